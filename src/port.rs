//! The per-port supervision state: what is attached, how it is being
//! probed, and when the next timer-driven action falls due.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::hub::HubId;
use crate::usb::{ProbeTarget, TopologicalPath};

/// A process-local, self-issued identity for an attached device.
///
/// `nusb::DeviceId` identifies a device to the host USB library, but it has
/// no public constructor and carries platform-specific internals we do not
/// want to thread through the pure supervision logic. The glue layer that
/// talks to `nusb` (see [`crate::event_loop`]) mints one of these the first
/// time it sees a device and remembers the mapping for the device's
/// lifetime, the same way the donor crate's `IdentifiableRealDevice` gives
/// USB devices a stable identity of its own rather than relying solely on
/// values the device reports about itself.
pub type DeviceId = u64;

/// Whether a device is currently plugged into this port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    NoDevice,
    DeviceConnected,
}

/// The port's assumed power state. The hardware does not always report the
/// truth, so this is corrected by the state machine rather than re-read
/// from the hub on every decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Off,
    On,
}

/// Stage of the per-port supervision state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageMode {
    Idle,
    Ping,
    Reset,
}

/// The device currently bound to a port.
///
/// Held behind an `Arc` so that an in-flight probe can keep the handle
/// alive across an `.await` point even if the port itself is concurrently
/// reset to `NoDevice` (the invariant that a port "holds a reference count
/// on its attached device while `message_mode != Idle`").
#[derive(Clone)]
pub struct AttachedDevice {
    pub id: DeviceId,
    pub vendor_id: u16,
    pub product_id: u16,
    pub handle: Arc<dyn ProbeTarget>,
}

impl fmt::Debug for AttachedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachedDevice")
            .field("id", &self.id)
            .field("vendor_id", &format_args!("{:04x}", self.vendor_id))
            .field("product_id", &format_args!("{:04x}", self.product_id))
            .finish()
    }
}

/// One supervised downstream position on a hub.
///
/// Persistent for the lifetime of its parent hub: created once when the hub
/// is discovered, regardless of whether a device is plugged in yet, and
/// destroyed only when the hub departs.
#[derive(Debug)]
pub struct Port {
    parent: HubId,
    path: TopologicalPath,
    port_index: u8,
    device: Option<AttachedDevice>,
    status: ConnectionStatus,
    power_state: PowerState,
    mode: MessageMode,
    retransmissions: u8,
    ping_count: u32,
    deadline: Option<Instant>,
}

impl Port {
    pub const fn new(parent: HubId, path: TopologicalPath, port_index: u8) -> Self {
        Self {
            parent,
            path,
            port_index,
            device: None,
            status: ConnectionStatus::NoDevice,
            power_state: PowerState::On,
            mode: MessageMode::Idle,
            retransmissions: 0,
            ping_count: 0,
            deadline: None,
        }
    }

    pub const fn parent(&self) -> HubId {
        self.parent
    }

    pub const fn path(&self) -> &TopologicalPath {
        &self.path
    }

    pub const fn port_index(&self) -> u8 {
        self.port_index
    }

    pub const fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub const fn power_state(&self) -> PowerState {
        self.power_state
    }

    pub const fn mode(&self) -> MessageMode {
        self.mode
    }

    pub const fn retransmissions(&self) -> u8 {
        self.retransmissions
    }

    pub const fn ping_count(&self) -> u32 {
        self.ping_count
    }

    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn device(&self) -> Option<&AttachedDevice> {
        self.device.as_ref()
    }

    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    pub fn set_mode(&mut self, mode: MessageMode) {
        self.mode = mode;
    }

    pub fn set_power_state(&mut self, power_state: PowerState) {
        self.power_state = power_state;
    }

    pub fn reset_retransmissions(&mut self) {
        self.retransmissions = 0;
    }

    pub fn increment_retransmissions(&mut self) -> u8 {
        self.retransmissions += 1;
        self.retransmissions
    }

    pub fn increment_ping_count(&mut self) -> u32 {
        self.ping_count += 1;
        self.ping_count
    }

    /// Binds a device to this port: caches its identifiers, marks it
    /// connected, and upholds the `device_handle is empty <=> status =
    /// NoDevice` invariant.
    pub fn attach_device(&mut self, device: AttachedDevice) {
        self.device = Some(device);
        self.status = ConnectionStatus::DeviceConnected;
    }

    /// Clears whatever device is attached without touching mode or the
    /// pending deadline. Used when entering `Reset`, which drops the
    /// device reference but governs its own mode/deadline separately.
    pub fn take_device(&mut self) -> Option<AttachedDevice> {
        self.status = ConnectionStatus::NoDevice;
        self.device.take()
    }

    /// Unbinds whatever device is attached, per departure handling. Also
    /// resets mode to `Idle`, clears the pending deadline, and zeroes the
    /// retransmission counter, matching the "reset to unbound state" rule.
    pub fn detach_device(&mut self) {
        self.take_device();
        self.mode = MessageMode::Idle;
        self.retransmissions = 0;
        self.deadline = None;
    }

    /// `true` if this device identifier is already bound to this port
    /// (the de-duplication check guarding against double arrival
    /// processing).
    pub fn already_bound_to(&self, device_id: DeviceId) -> bool {
        self.device.as_ref().is_some_and(|d| d.id == device_id)
    }
}
