//! The topology registry: the set of known hubs, the set of supervised
//! ports, and the timeout-ordered subset of ports with a pending deadline.
//!
//! Modeled as three owning collections rather than the intrusive linked
//! lists of the system this was adapted from (see the design note on
//! intrusive lists): a `HashMap` per collection, keyed so that the lookups
//! the rest of the crate needs are all `O(1)` or a short linear scan over a
//! population bounded by the number of physical ports.

use std::collections::{HashMap, HashSet};

use crate::hub::{Hub, HubId, HubIdAllocator};
use crate::port::Port;
use crate::usb::TopologicalPath;

#[derive(Debug, Default)]
pub struct Topology {
    hubs: HashMap<HubId, Hub>,
    ports: HashMap<TopologicalPath, Port>,
    timeouts: HashSet<TopologicalPath>,
    hub_ids: HubIdAllocator,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate_hub_id(&mut self) -> HubId {
        self.hub_ids.next()
    }

    /// Finds the hub whose own USB device node matches `device_id`.
    pub fn find_hub_by_device(&self, device_id: nusb::DeviceId) -> Option<&Hub> {
        self.hubs
            .values()
            .find(|hub| hub.device_id() == Some(device_id))
    }

    pub fn hub(&self, id: HubId) -> Option<&Hub> {
        self.hubs.get(&id)
    }

    pub fn add_hub(&mut self, hub: Hub) {
        self.hubs.insert(hub.id(), hub);
    }

    /// Removes a hub and every port whose parent is this hub, from both the
    /// port collection and the timeout collection (the hub-removal
    /// cascade, property P6).
    pub fn remove_hub(&mut self, id: HubId) {
        self.hubs.remove(&id);
        let orphaned: Vec<TopologicalPath> = self
            .ports
            .iter()
            .filter(|(_, port)| port.parent() == id)
            .map(|(path, _)| path.clone())
            .collect();
        for path in orphaned {
            self.remove_port(&path);
        }
    }

    pub fn ports(&self) -> impl Iterator<Item = &Port> {
        self.ports.values()
    }

    pub fn ports_mut(&mut self) -> impl Iterator<Item = &mut Port> {
        self.ports.values_mut()
    }

    pub fn port(&self, path: &TopologicalPath) -> Option<&Port> {
        self.ports.get(path)
    }

    pub fn port_mut(&mut self, path: &TopologicalPath) -> Option<&mut Port> {
        self.ports.get_mut(path)
    }

    pub fn find_port_by_path(&self, path: &TopologicalPath) -> Option<&Port> {
        self.port(path)
    }

    pub fn add_port(&mut self, port: Port) {
        self.ports.insert(port.path().clone(), port);
    }

    /// Removes a port, ensuring it is also absent from the timeout
    /// collection (property P2: timeout membership implies port
    /// membership).
    pub fn remove_port(&mut self, path: &TopologicalPath) {
        self.ports.remove(path);
        self.timeouts.remove(path);
    }

    pub fn port_count(&self) -> usize {
        self.ports.len()
    }

    pub fn hub_count(&self) -> usize {
        self.hubs.len()
    }

    /// Enrolls a port in the timeout collection. Idempotent.
    pub fn add_timeout(&mut self, path: TopologicalPath) {
        self.timeouts.insert(path);
    }

    /// Removes a port from the timeout collection. Idempotent.
    pub fn remove_timeout(&mut self, path: &TopologicalPath) {
        self.timeouts.remove(path);
    }

    pub fn is_enrolled(&self, path: &TopologicalPath) -> bool {
        self.timeouts.contains(path)
    }

    pub fn timeout_paths(&self) -> impl Iterator<Item = &TopologicalPath> {
        self.timeouts.iter()
    }

    pub fn timeout_count(&self) -> usize {
        self.timeouts.len()
    }
}
