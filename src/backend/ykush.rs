//! YKUSH backend: power commands are HID control transfers sent to the
//! hub's own USB device, not to the downstream port's device.

use std::time::Duration;

use async_trait::async_trait;
use nusb::transfer::{ControlOut, ControlType, Recipient};
use tracing::debug;

use super::{BackendError, SwitchingBackend};

/// YKUSH's USB vendor ID. A design constant of the target hardware family.
pub const YKUSH_VENDOR_ID: u16 = 0x04d8;
/// YKUSH's USB product ID.
pub const YKUSH_PRODUCT_ID: u16 = 0x0042;

const HID_SET_REPORT: u8 = 0x09;
const HID_REPORT_TYPE_OUTPUT: u16 = 0x02;

/// A command takes roughly 200ms to complete on real hardware.
const COMMAND_TIMEOUT: Duration = Duration::from_millis(200);

/// Power-off and power-on command bytes are `0x10 | port` / `0x11 | port`.
const fn power_command(port_index: u8, power_on: bool) -> u8 {
    let base = if power_on { 0x11 } else { 0x10 };
    base | port_index
}

/// `true` if this VID/PID pair identifies a YKUSH switching hub.
pub const fn is_ykush(vendor_id: u16, product_id: u16) -> bool {
    vendor_id == YKUSH_VENDOR_ID && product_id == YKUSH_PRODUCT_ID
}

#[derive(Debug)]
pub struct YkushBackend {
    device: nusb::Device,
    interface_number: u8,
}

impl YkushBackend {
    pub const fn new(device: nusb::Device, interface_number: u8) -> Self {
        Self {
            device,
            interface_number,
        }
    }

    async fn send_command(&self, command: u8) -> Result<(), BackendError> {
        let control = ControlOut {
            control_type: ControlType::Class,
            recipient: Recipient::Interface,
            request: HID_SET_REPORT,
            value: HID_REPORT_TYPE_OUTPUT << 8,
            index: u16::from(self.interface_number),
            data: &[command],
        };
        self.device.control_out(control, COMMAND_TIMEOUT).await?;
        Ok(())
    }
}

#[async_trait]
impl SwitchingBackend for YkushBackend {
    fn name(&self) -> &'static str {
        "YKUSH"
    }

    async fn power_off_port(&self, port_index: u8) -> Result<(), BackendError> {
        debug!(port = port_index, "YKUSH power-off");
        self.send_command(power_command(port_index, false)).await
    }

    async fn power_on_port(&self, port_index: u8) -> Result<(), BackendError> {
        debug!(port = port_index, "YKUSH power-on");
        self.send_command(power_command(port_index, true)).await
    }
}
