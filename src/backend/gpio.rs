//! GPIO backend: power is cut and restored by writing ASCII `"0"`/`"1"` to
//! a pre-exported sysfs GPIO `value` file, one line per switched port.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use super::{BackendError, SwitchingBackend};

#[derive(Debug)]
pub struct GpioBackend {
    /// Port index on the hub -> sysfs path of that port's GPIO `value` file.
    lines: HashMap<u8, PathBuf>,
}

impl GpioBackend {
    pub const fn new(lines: HashMap<u8, PathBuf>) -> Self {
        Self { lines }
    }

    /// Computes the sysfs `value` file path for a GPIO line number, matching
    /// the layout the kernel creates once a line has been exported.
    pub fn sysfs_value_path(gpio_line: u32) -> PathBuf {
        PathBuf::from(format!("/sys/class/gpio/gpio{gpio_line}/value"))
    }

    async fn write_value(&self, port_index: u8, value: &'static str) -> Result<(), BackendError> {
        let path = self
            .lines
            .get(&port_index)
            .ok_or(BackendError::UnmappedPort(port_index))?;
        debug!(port = port_index, path = %path.display(), value, "GPIO write");
        tokio::fs::write(path, value)
            .await
            .map_err(|source| BackendError::Gpio {
                path: path.display().to_string(),
                source,
            })
    }
}

#[async_trait]
impl SwitchingBackend for GpioBackend {
    fn name(&self) -> &'static str {
        "GPIO"
    }

    async fn power_off_port(&self, port_index: u8) -> Result<(), BackendError> {
        self.write_value(port_index, "0").await
    }

    async fn power_on_port(&self, port_index: u8) -> Result<(), BackendError> {
        self.write_value(port_index, "1").await
    }
}
