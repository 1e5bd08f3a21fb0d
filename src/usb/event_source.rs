//! Wraps the host USB library (`nusb`): hotplug events and the liveness
//! probe control transfer.

use std::time::Duration;

use async_trait::async_trait;
use nusb::hotplug::HotplugEvent;
use nusb::transfer::{ControlIn, ControlType, Recipient};
use nusb::MaybeFuture;
use thiserror::Error;

/// A standard `GET_STATUS` request to endpoint (and interface/device) zero,
/// used purely as a liveness check; the response content is never
/// inspected, only whether the transfer completed.
const STANDARD_REQUEST_GET_STATUS: u8 = 0x00;
const PROBE_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("control transfer failed: {0}")]
    Transfer(#[from] nusb::transfer::TransferError),
}

/// A handle capable of answering a liveness probe.
///
/// Abstracted behind a trait so the port supervisor's state machine can be
/// exercised in tests without real hardware (see [`crate::supervisor`]).
/// Ports hold this as `Arc<dyn ProbeTarget>`, so it is boxed with
/// `async_trait` rather than native async-fn-in-traits (see the same note
/// on [`crate::backend::SwitchingBackend`]).
#[async_trait]
pub trait ProbeTarget: std::fmt::Debug + Send + Sync {
    /// Issues the liveness probe and reports whether the device answered.
    async fn get_status(&self) -> Result<(), ProbeError>;
}

/// A `ProbeTarget` backed by a real, opened `nusb` device.
#[derive(Debug, Clone)]
pub struct NusbProbeTarget(nusb::Device);

impl NusbProbeTarget {
    pub const fn new(device: nusb::Device) -> Self {
        Self(device)
    }
}

#[async_trait]
impl ProbeTarget for NusbProbeTarget {
    async fn get_status(&self) -> Result<(), ProbeError> {
        let control = ControlIn {
            control_type: ControlType::Standard,
            recipient: Recipient::Device,
            request: STANDARD_REQUEST_GET_STATUS,
            value: 0,
            index: 0,
            length: 2,
        };
        self.0.control_in(control, PROBE_TIMEOUT).await?;
        Ok(())
    }
}

/// A hotplug arrival or departure, translated from `nusb`'s event type into
/// the vocabulary the rest of this crate uses.
#[derive(Debug)]
pub enum UsbEvent {
    Arrived(nusb::DeviceInfo),
    Left(nusb::DeviceId),
}

impl From<HotplugEvent> for UsbEvent {
    fn from(event: HotplugEvent) -> Self {
        match event {
            HotplugEvent::Connected(info) => Self::Arrived(info),
            HotplugEvent::Disconnected(id) => Self::Left(id),
        }
    }
}

/// Lists the USB devices currently present on the system.
pub fn list_devices() -> Result<Vec<nusb::DeviceInfo>, std::io::Error> {
    Ok(nusb::list_devices().wait()?.collect())
}

/// Opens a device and wraps it as a [`ProbeTarget`].
pub fn open_probe_target(info: &nusb::DeviceInfo) -> Result<NusbProbeTarget, std::io::Error> {
    Ok(NusbProbeTarget::new(info.open().wait()?))
}
