//! A single programmable switching hub and the ports it exposes.

use std::fmt;
use std::sync::Arc;

use crate::backend::SwitchingBackend;

/// Identifies a hub within the topology registry.
///
/// Ports keep this instead of a strong reference to their parent hub, so
/// that a hub can be torn down without the port graph turning into a cycle
/// of owning pointers (see the design note on weak back-references).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct HubId(u32);

/// Hands out fresh, never-reused `HubId`s for the lifetime of the process.
#[derive(Debug, Default)]
pub struct HubIdAllocator(u32);

impl HubIdAllocator {
    pub const fn new() -> Self {
        Self(0)
    }

    pub fn next(&mut self) -> HubId {
        let id = HubId(self.0);
        self.0 += 1;
        id
    }
}

/// One programmable switching hub: a stable identity for the USB device
/// node of the hub itself, its port count, and the backend that knows how
/// to toggle power on its ports.
pub struct Hub {
    id: HubId,
    /// Identity of the hub's own USB device node, used to recognize its
    /// departure. `None` for hubs that exist only as configuration (the
    /// GPIO backend has no corresponding hotplug-discovered USB device).
    device_id: Option<nusb::DeviceId>,
    port_count: u8,
    backend: Arc<dyn SwitchingBackend>,
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("id", &self.id)
            .field("device_id", &self.device_id)
            .field("port_count", &self.port_count)
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl Hub {
    pub fn new(
        id: HubId,
        device_id: Option<nusb::DeviceId>,
        port_count: u8,
        backend: Arc<dyn SwitchingBackend>,
    ) -> Self {
        Self {
            id,
            device_id,
            port_count,
            backend,
        }
    }

    pub const fn id(&self) -> HubId {
        self.id
    }

    pub fn device_id(&self) -> Option<nusb::DeviceId> {
        self.device_id
    }

    pub const fn port_count(&self) -> u8 {
        self.port_count
    }

    pub fn backend(&self) -> &Arc<dyn SwitchingBackend> {
        &self.backend
    }
}
