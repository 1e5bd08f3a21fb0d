//! Integrates the USB event source, the timeout scan, the operator-signal
//! channel, and the two periodic sweeps into a single `tick()` step.
//!
//! The glue responsibility unique to this module is translating between
//! `nusb`'s device identity (`nusb::DeviceId`, no public constructor, not
//! suitable for the pure supervision logic to hold onto in tests) and this
//! crate's own process-local [`crate::port::DeviceId`]. Everything else is
//! delegated to [`crate::supervisor`].

use std::collections::HashMap;
use std::time::Instant;

use nusb::MaybeFuture;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::backend::gpio::GpioBackend;
use crate::backend::ykush::{is_ykush, YkushBackend};
use crate::backend::SwitchingBackend;
use crate::config::Config;
use crate::constants::{DEVICE_SWEEP_INTERVAL, RESTART_SWEEP_INTERVAL, USB_EVENT_WAIT};
use crate::hub::Hub;
use crate::port::{AttachedDevice, DeviceId, Port};
use crate::signals::OperatorSignal;
use crate::supervisor;
use crate::topology::Topology;
use crate::usb::{open_probe_target, path_of_device, TopologicalPath, UsbEvent};

/// USB hub device class code (`bDeviceClass` / `bInterfaceClass` = 9).
const USB_CLASS_HUB: u8 = 0x09;

/// Drives the supervisor: owns the topology registry and the `nusb`
/// identity mapping, and steps the system forward one tick at a time.
#[derive(Debug)]
pub struct EventLoop {
    topology: Topology,
    nusb_ids: HashMap<nusb::DeviceId, DeviceId>,
    next_device_id: DeviceId,
    last_device_sweep: Instant,
    last_restart_sweep: Instant,
}

impl EventLoop {
    pub fn new(now: Instant) -> Self {
        Self {
            topology: Topology::new(),
            nusb_ids: HashMap::new(),
            next_device_id: 0,
            last_device_sweep: now,
            last_restart_sweep: now,
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Seeds the registry with GPIO hubs from the configuration file. GPIO
    /// hubs have no corresponding hotplug-discoverable USB device, so they
    /// are onboarded directly from configuration rather than through the
    /// arrival path used for YKUSH hubs (see the design note on GPIO
    /// onboarding).
    pub fn onboard_configured_hubs(&mut self, config: &Config) {
        for handler in &config.gpio_handlers {
            let hub_id = self.topology.allocate_hub_id();

            // Assign each configured path a dense per-hub port index rather
            // than keying on `leaf_port()`: two paths can share a leaf port
            // number (different buses, or a bus-only path) while still
            // being distinct physical positions, and the GPIO backend must
            // be keyed the same way the port is indexed so that toggling
            // one port's power never reaches another port's line.
            let assignments: Vec<(TopologicalPath, u8, u32)> = handler
                .ports
                .iter()
                .enumerate()
                .map(|(index, (path, gpio_line))| (path.clone(), u8::try_from(index).unwrap_or(u8::MAX), *gpio_line))
                .collect();

            let lines = assignments
                .iter()
                .map(|(_, port_index, gpio_line)| (*port_index, GpioBackend::sysfs_value_path(*gpio_line)))
                .collect();
            let backend = GpioBackend::new(lines);
            self.topology.add_hub(Hub::new(
                hub_id,
                None,
                u8::try_from(assignments.len()).unwrap_or(u8::MAX),
                std::sync::Arc::new(backend),
            ));
            for (path, port_index, _) in assignments {
                self.topology.add_port(Port::new(hub_id, path, port_index));
            }
        }
    }

    /// Walks the full current device list and synthesizes arrivals, used
    /// both for startup enumeration and for re-walking after a new hub is
    /// onboarded (children of a just-discovered hub may have generated,
    /// and lost, their own arrival events).
    pub fn enumerate_present_devices(&mut self, now: Instant) {
        match crate::usb::list_devices() {
            Ok(devices) => {
                for info in devices {
                    self.handle_device_info(&info, now);
                }
            }
            Err(error) => warn!(%error, "failed to list USB devices"),
        }
    }

    fn mint_device_id(&mut self, nusb_id: nusb::DeviceId) -> DeviceId {
        if let Some(&id) = self.nusb_ids.get(&nusb_id) {
            return id;
        }
        let id = self.next_device_id;
        self.next_device_id += 1;
        self.nusb_ids.insert(nusb_id, id);
        id
    }

    fn handle_device_info(&mut self, info: &nusb::DeviceInfo, now: Instant) {
        if is_ykush(info.vendor_id(), info.product_id()) {
            self.onboard_ykush_hub(info, now);
            return;
        }
        if info.class() == USB_CLASS_HUB {
            debug!(bus = info.busnum(), "ignoring nested hub, not supported");
            return;
        }

        let Some(path) = path_of_device(info) else {
            return;
        };
        let id = self.mint_device_id(info.id());
        let Ok(probe) = open_probe_target(info) else {
            return;
        };
        let device = AttachedDevice {
            id,
            vendor_id: info.vendor_id(),
            product_id: info.product_id(),
            handle: std::sync::Arc::new(probe) as std::sync::Arc<dyn crate::usb::ProbeTarget>,
        };
        supervisor::on_arrived(&mut self.topology, &path, device, now);
    }

    /// Onboards a newly-discovered YKUSH hub and re-walks the device list
    /// so any children that already arrived (and were dropped, since no
    /// port existed yet for them) are picked up.
    fn onboard_ykush_hub(&mut self, info: &nusb::DeviceInfo, now: Instant) {
        if self.topology.find_hub_by_device(info.id()).is_some() {
            return;
        }
        let Some(hub_path) = path_of_device(info) else {
            return;
        };
        let Ok(device) = info.open().wait() else {
            warn!(bus = info.busnum(), "failed to open YKUSH hub device");
            return;
        };
        let Some(interface_number) = device
            .active_configuration()
            .ok()
            .and_then(|config| config.interfaces().next().map(|i| i.interface_number()))
        else {
            warn!(bus = info.busnum(), "YKUSH hub exposes no interfaces");
            return;
        };
        let backend = YkushBackend::new(device, interface_number);

        let hub_id = self.topology.allocate_hub_id();
        // YKUSH3 hubs expose three downstream ports; this is a design
        // constant of the target hardware family, not discovered from the
        // device descriptor.
        const YKUSH_PORT_COUNT: u8 = 3;
        self.topology
            .add_hub(Hub::new(hub_id, Some(info.id()), YKUSH_PORT_COUNT, std::sync::Arc::new(backend)));
        for port_index in 1..=YKUSH_PORT_COUNT {
            if let Some(port_path) = hub_path.child(port_index) {
                self.topology.add_port(Port::new(hub_id, port_path, port_index));
            }
        }
        info!(bus = info.busnum(), "onboarded YKUSH hub");

        self.enumerate_present_devices(now);
    }

    fn handle_departure(&mut self, nusb_id: nusb::DeviceId) {
        if let Some(hub_id) = self.topology.find_hub_by_device(nusb_id).map(Hub::id) {
            self.topology.remove_hub(hub_id);
            return;
        }

        // The `nusb_id -> DeviceId` mapping exists only for the lifetime of
        // the device: prune it here so a daemon that runs for the life of
        // the host, supervising devices that repeatedly re-enumerate,
        // doesn't grow this map without bound.
        let Some(id) = self.nusb_ids.remove(&nusb_id) else {
            return;
        };
        for path in self
            .topology
            .ports()
            .filter(|p| p.already_bound_to(id))
            .map(|p| p.path().clone())
            .collect::<Vec<_>>()
        {
            supervisor::on_left(&mut self.topology, &path, id);
        }
    }

    /// Runs one step of the event loop: drains the operator-signal
    /// channel, dispatches at most one bounded wait for USB events, scans
    /// the timeout collection, and runs the periodic sweeps when due.
    pub async fn tick(
        &mut self,
        signals: &mut UnboundedReceiver<OperatorSignal>,
        usb_events: &mut (impl futures::Stream<Item = UsbEvent> + Unpin),
    ) {
        let now = Instant::now();

        while let Ok(signal) = signals.try_recv() {
            match signal {
                OperatorSignal::ForceResetSweep => {
                    info!("running operator-forced reset sweep");
                    supervisor::force_reset_all(&mut self.topology, now).await;
                }
            }
        }

        if let Ok(Some(event)) = timeout(USB_EVENT_WAIT, futures::StreamExt::next(usb_events)).await {
            self.handle_usb_event(event, now);
        }

        let fired: Vec<_> = self
            .topology
            .timeout_paths()
            .filter(|path| self.topology.port(path).and_then(|p| p.deadline()).is_some_and(|d| d <= now))
            .cloned()
            .collect();
        for path in fired {
            self.topology.remove_timeout(&path);
            supervisor::fire_timeout(&mut self.topology, &path, now).await;
        }

        if now.duration_since(self.last_device_sweep) >= DEVICE_SWEEP_INTERVAL {
            self.last_device_sweep = now;
            self.enumerate_present_devices(now);
        } else if now.duration_since(self.last_restart_sweep) >= RESTART_SWEEP_INTERVAL {
            self.last_restart_sweep = now;
            supervisor::restart_wedged_ports(&mut self.topology, now).await;
        }
    }

    fn handle_usb_event(&mut self, event: UsbEvent, now: Instant) {
        match event {
            UsbEvent::Arrived(info) => self.handle_device_info(&info, now),
            UsbEvent::Left(id) => self.handle_departure(id),
        }
    }
}
