//! Switching-backend abstraction: the capability a hub exposes for
//! toggling power on one of its ports.
//!
//! Two hardware families implement this trait: [`ykush::YkushBackend`]
//! drives a YKUSH hub's own HID interface, [`gpio::GpioBackend`] drives a
//! host GPIO line per port. The port supervisor (see [`crate::supervisor`])
//! is the only caller; it never depends on which variant it is holding.

pub mod gpio;
pub mod ykush;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::port::{MessageMode, PowerState};

/// Errors a backend can report while toggling port power.
///
/// These are logged and otherwise swallowed (see the error-handling design
/// for "backend errors"): the port keeps its current state and the next
/// scheduled action will retry.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("control transfer to hub failed: {0}")]
    ControlTransfer(#[from] nusb::transfer::TransferError),
    #[error("GPIO sysfs write to {path} failed: {source}")]
    Gpio {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no GPIO line configured for port {0}")]
    UnmappedPort(u8),
}

/// How a hub's ports are switched on and off.
///
/// Hubs hold their backend as `Arc<dyn SwitchingBackend>`, so this trait is
/// boxed with `async_trait` rather than using native `async fn` in traits:
/// trait objects cannot name the per-implementation future type stable
/// async-fn-in-traits would otherwise produce.
#[async_trait]
pub trait SwitchingBackend: fmt::Debug + Send + Sync {
    /// Short name used in log lines, e.g. `"YKUSH"` or `"GPIO"`.
    fn name(&self) -> &'static str;

    /// Cuts power to the given port index.
    async fn power_off_port(&self, port_index: u8) -> Result<(), BackendError>;

    /// Restores power to the given port index.
    async fn power_on_port(&self, port_index: u8) -> Result<(), BackendError>;

    /// Writes one human-readable status line for `port_index` to the log
    /// sink. The format does not depend on which hardware family is
    /// backing the hub, so this has a shared default implementation rather
    /// than needing to be overridden by each variant.
    fn print_state(&self, port_index: u8, mode: MessageMode, power_state: PowerState) {
        info!(
            backend = self.name(),
            port = port_index,
            mode = ?mode,
            power = ?power_state,
            "port state"
        );
    }
}
