//! The port supervision state machine: `Idle -> Ping -> Reset -> Idle`.
//!
//! Every function here takes the registry and an explicit `now` so the
//! whole machine can be driven deterministically in tests without a real
//! clock or real hardware (see the fakes in the test module). The event
//! loop (see [`crate::event_loop`]) is the only caller in production; it
//! supplies `Instant::now()` and the real `nusb`/backend glue.

use std::time::Instant;

use tracing::{info, warn};

use crate::constants::{DEFAULT_TIMEOUT, PING_LOG_THROTTLE, RESET_HOLD, RETRANS_LIMIT};
use crate::port::{AttachedDevice, ConnectionStatus, DeviceId, MessageMode, PowerState};
use crate::topology::Topology;
use crate::usb::TopologicalPath;

/// Binds a newly-arrived device to the port at `path`, if one exists, and
/// arms its first probe deadline. Arrivals on a path with no known port
/// (an unsupervised position on a hub, or a hub we never onboarded) are
/// silently ignored. Re-arrival of a device already bound to this port is
/// a no-op, guarding against duplicate hotplug delivery.
pub fn on_arrived(topology: &mut Topology, path: &TopologicalPath, device: AttachedDevice, now: Instant) {
    let Some(port) = topology.port_mut(path) else {
        return;
    };
    if port.already_bound_to(device.id) {
        return;
    }
    port.attach_device(device);
    port.set_mode(MessageMode::Ping);
    port.set_deadline(Some(now + DEFAULT_TIMEOUT + crate::constants::ARRIVAL_GRACE));
    topology.add_timeout(path.clone());
}

/// Unbinds `device_id` from the port at `path` if it is the device
/// currently bound there. A departure for a port that holds a different
/// device, or none at all, is a topology inconsistency and is ignored
/// rather than acted on.
pub fn on_left(topology: &mut Topology, path: &TopologicalPath, device_id: DeviceId) {
    let Some(port) = topology.port_mut(path) else {
        return;
    };
    if !port.already_bound_to(device_id) {
        return;
    }
    port.detach_device();
    topology.remove_timeout(path);
}

/// Dispatches a fired deadline to the handler for the port's current mode.
/// The caller is responsible for having already removed `path` from the
/// timeout collection before invoking this (an expired deadline is
/// consumed exactly once).
pub async fn fire_timeout(topology: &mut Topology, path: &TopologicalPath, now: Instant) {
    let Some(mode) = topology.port(path).map(crate::port::Port::mode) else {
        return;
    };
    match mode {
        MessageMode::Idle => {}
        MessageMode::Ping => fire_ping(topology, path, now).await,
        MessageMode::Reset => advance_reset(topology, path, now).await,
    }
}

/// Issues the liveness probe for a port in `Ping` mode and reacts to the
/// result.
///
/// The probe handle is cloned out and the control transfer is awaited
/// without holding a borrow of the registry, so the registry can be freely
/// mutated by other parts of the event loop while the transfer is
/// in-flight. When it completes, the port's state is re-checked: if the
/// port is gone, no longer in `Ping`, or bound to a different device than
/// the one that was probed, the result is discarded (tie-break: late
/// results from a port that has moved on are ignored).
async fn fire_ping(topology: &mut Topology, path: &TopologicalPath, now: Instant) {
    let Some((probe, expected_id)) = topology
        .port(path)
        .and_then(|p| p.device().map(|d| (d.handle.clone(), d.id)))
    else {
        return;
    };

    let result = probe.get_status().await;

    let Some(port) = topology.port_mut(path) else {
        return;
    };
    if port.mode() != MessageMode::Ping || !port.already_bound_to(expected_id) {
        return;
    }

    match result {
        Ok(()) => {
            port.reset_retransmissions();
            let count = port.increment_ping_count();
            if count % PING_LOG_THROTTLE == 0 {
                info!(port = %path, ping_count = count, "device still responding");
            }
            port.set_deadline(Some(now + DEFAULT_TIMEOUT));
            topology.add_timeout(path.clone());
        }
        Err(error) => {
            let retransmissions = port.increment_retransmissions();
            if retransmissions < RETRANS_LIMIT {
                warn!(port = %path, retransmissions, %error, "probe failed, retrying");
                port.set_deadline(Some(now));
                topology.add_timeout(path.clone());
            } else {
                warn!(port = %path, retransmissions, "retransmission limit reached, resetting port");
                enter_reset(topology, path, now).await;
            }
        }
    }
}

/// Moves a port into `Reset`: drops its device reference and starts the
/// power-off/hold/power-on sequence. A no-op if the port is already
/// resetting (property P5: forcing reset on a port already in reset
/// changes nothing), which also makes this safe to call from both the
/// retransmission-limit path and an operator-forced sweep.
pub async fn enter_reset(topology: &mut Topology, path: &TopologicalPath, now: Instant) {
    let Some(port) = topology.port_mut(path) else {
        return;
    };
    if port.mode() == MessageMode::Reset {
        return;
    }
    port.take_device();
    port.set_mode(MessageMode::Reset);
    port.set_power_state(PowerState::On);
    advance_reset(topology, path, now).await;
}

/// Drives one step of an in-progress reset.
///
/// The port's own `power_state` doubles as the reset sub-stage: `On` means
/// the power-off command has not yet succeeded, `Off` means it has and
/// power-on is next. A backend error at either stage is logged and the
/// same deadline is re-armed so the step is retried on the next fire
/// (backend errors never leave a port stuck without a pending deadline).
async fn advance_reset(topology: &mut Topology, path: &TopologicalPath, now: Instant) {
    let Some(port) = topology.port(path) else {
        return;
    };
    if port.mode() != MessageMode::Reset {
        return;
    }
    let parent = port.parent();
    let port_index = port.port_index();
    let power_state = port.power_state();

    let Some(backend) = topology.hub(parent).map(|h| h.backend().clone()) else {
        return;
    };

    match power_state {
        PowerState::On => {
            if let Err(error) = backend.power_off_port(port_index).await {
                warn!(port = %path, %error, "power-off command failed, will retry");
            } else if let Some(port) = topology.port_mut(path) {
                port.set_power_state(PowerState::Off);
                backend.print_state(port_index, MessageMode::Reset, PowerState::Off);
            }
            if let Some(port) = topology.port_mut(path) {
                port.set_deadline(Some(now + RESET_HOLD));
            }
            topology.add_timeout(path.clone());
        }
        PowerState::Off => {
            if let Err(error) = backend.power_on_port(port_index).await {
                warn!(port = %path, %error, "power-on command failed, will retry");
                if let Some(port) = topology.port_mut(path) {
                    port.set_deadline(Some(now + RESET_HOLD));
                }
                topology.add_timeout(path.clone());
            } else if let Some(port) = topology.port_mut(path) {
                port.set_power_state(PowerState::On);
                port.set_mode(MessageMode::Idle);
                port.reset_retransmissions();
                port.set_deadline(None);
                backend.print_state(port_index, MessageMode::Idle, PowerState::On);
            }
        }
    }
}

/// Forces every known port through a reset, regardless of its current
/// state. Ports already resetting are left alone by `enter_reset`'s own
/// guard. Driven by the operator SIGUSR1 signal (see [`crate::signals`]).
pub async fn force_reset_all(topology: &mut Topology, now: Instant) {
    let paths: Vec<TopologicalPath> = topology.ports().map(|p| p.path().clone()).collect();
    for path in paths {
        enter_reset(topology, &path, now).await;
    }
}

/// Resets every port whose device never appeared: connected status is
/// still `NoDevice` and it is not already mid-reset. Run periodically as a
/// backstop against devices that never enumerate in the first place (see
/// the restart sweep in [`crate::event_loop`]).
pub async fn restart_wedged_ports(topology: &mut Topology, now: Instant) {
    let candidates: Vec<TopologicalPath> = topology
        .ports()
        .filter(|p| p.status() == ConnectionStatus::NoDevice && p.mode() != MessageMode::Reset)
        .map(|p| p.path().clone())
        .collect();
    for path in candidates {
        enter_reset(topology, &path, now).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::backend::BackendError;
    use crate::backend::SwitchingBackend;
    use crate::hub::Hub;
    use crate::port::Port;
    use crate::usb::ProbeError;
    use crate::usb::ProbeTarget;

    fn path() -> TopologicalPath {
        "1-2".parse().unwrap()
    }

    #[derive(Debug)]
    struct ScriptedProbe {
        ok: AtomicBool,
    }

    impl ScriptedProbe {
        fn always_ok() -> Arc<Self> {
            Arc::new(Self { ok: AtomicBool::new(true) })
        }
        fn always_failing() -> Arc<Self> {
            Arc::new(Self { ok: AtomicBool::new(false) })
        }
    }

    #[async_trait::async_trait]
    impl ProbeTarget for ScriptedProbe {
        async fn get_status(&self) -> Result<(), ProbeError> {
            if self.ok.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(ProbeError::Transfer(nusb::transfer::TransferError::Disconnected))
            }
        }
    }

    #[derive(Debug, Default)]
    struct CountingBackend {
        power_offs: AtomicU32,
        power_ons: AtomicU32,
    }

    #[async_trait::async_trait]
    impl SwitchingBackend for CountingBackend {
        fn name(&self) -> &'static str {
            "counting"
        }
        async fn power_off_port(&self, _: u8) -> Result<(), BackendError> {
            self.power_offs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn power_on_port(&self, _: u8) -> Result<(), BackendError> {
            self.power_ons.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn device(id: DeviceId, probe: Arc<dyn ProbeTarget>) -> AttachedDevice {
        AttachedDevice {
            id,
            vendor_id: 0x04d8,
            product_id: 0x0042,
            handle: probe,
        }
    }

    fn setup(backend: Arc<dyn SwitchingBackend>) -> (Topology, TopologicalPath) {
        let mut topo = Topology::new();
        let hub_id = topo.allocate_hub_id();
        topo.add_hub(Hub::new(hub_id, None, 1, backend));
        let p = path();
        topo.add_port(Port::new(hub_id, p.clone(), 2));
        (topo, p)
    }

    #[tokio::test]
    async fn successful_probe_stays_in_ping_and_reschedules() {
        let (mut topo, p) = setup(Arc::new(CountingBackend::default()));
        let now = Instant::now();
        on_arrived(&mut topo, &p, device(1, ScriptedProbe::always_ok()), now);

        fire_timeout(&mut topo, &p, now).await;

        let port = topo.port(&p).unwrap();
        assert_eq!(port.mode(), MessageMode::Ping);
        assert_eq!(port.ping_count(), 1);
        assert_eq!(port.retransmissions(), 0);
        assert_eq!(port.deadline(), Some(now + DEFAULT_TIMEOUT));
    }

    #[tokio::test]
    async fn ping_success_logged_only_every_twentieth_time() {
        let (mut topo, p) = setup(Arc::new(CountingBackend::default()));
        let now = Instant::now();
        on_arrived(&mut topo, &p, device(1, ScriptedProbe::always_ok()), now);

        for _ in 0..20 {
            fire_timeout(&mut topo, &p, now).await;
        }

        assert_eq!(topo.port(&p).unwrap().ping_count(), 20);
    }

    #[tokio::test]
    async fn repeated_failures_exhaust_retransmissions_then_reset() {
        let backend = Arc::new(CountingBackend::default());
        let (mut topo, p) = setup(backend.clone());
        let now = Instant::now();
        on_arrived(&mut topo, &p, device(1, ScriptedProbe::always_failing()), now);

        for _ in 0..RETRANS_LIMIT {
            fire_timeout(&mut topo, &p, now).await;
        }

        let port = topo.port(&p).unwrap();
        assert_eq!(port.mode(), MessageMode::Reset);
        assert_eq!(port.power_state(), PowerState::Off);
        assert!(port.device().is_none());
        assert_eq!(backend.power_offs.load(Ordering::SeqCst), 1);
        assert_eq!(port.deadline(), Some(now + RESET_HOLD));
    }

    #[tokio::test]
    async fn reset_completes_power_on_after_hold_and_returns_to_idle() {
        let backend = Arc::new(CountingBackend::default());
        let (mut topo, p) = setup(backend.clone());
        let now = Instant::now();
        on_arrived(&mut topo, &p, device(1, ScriptedProbe::always_failing()), now);
        for _ in 0..RETRANS_LIMIT {
            fire_timeout(&mut topo, &p, now).await;
        }

        let later = now + Duration::from_secs(1);
        fire_timeout(&mut topo, &p, later).await;

        let port = topo.port(&p).unwrap();
        assert_eq!(port.mode(), MessageMode::Idle);
        assert_eq!(port.power_state(), PowerState::On);
        assert_eq!(port.status(), ConnectionStatus::NoDevice);
        assert_eq!(backend.power_ons.load(Ordering::SeqCst), 1);
        assert_eq!(port.deadline(), None);
        assert!(!topo.is_enrolled(&p));
    }

    #[tokio::test]
    async fn departure_mid_ping_discards_late_probe_result() {
        let (mut topo, p) = setup(Arc::new(CountingBackend::default()));
        let now = Instant::now();
        on_arrived(&mut topo, &p, device(1, ScriptedProbe::always_ok()), now);

        on_left(&mut topo, &p, 1);
        fire_ping(&mut topo, &p, now).await;

        let port = topo.port(&p).unwrap();
        assert_eq!(port.mode(), MessageMode::Idle);
        assert_eq!(port.status(), ConnectionStatus::NoDevice);
    }

    #[tokio::test]
    async fn forced_reset_is_a_no_op_on_an_already_resetting_port() {
        let backend = Arc::new(CountingBackend::default());
        let (mut topo, p) = setup(backend.clone());
        let now = Instant::now();
        on_arrived(&mut topo, &p, device(1, ScriptedProbe::always_failing()), now);
        for _ in 0..RETRANS_LIMIT {
            fire_timeout(&mut topo, &p, now).await;
        }
        assert_eq!(backend.power_offs.load(Ordering::SeqCst), 1);

        force_reset_all(&mut topo, now).await;

        assert_eq!(backend.power_offs.load(Ordering::SeqCst), 1);
        assert_eq!(topo.port(&p).unwrap().mode(), MessageMode::Reset);
    }

    #[tokio::test]
    async fn restart_sweep_only_touches_wedged_ports() {
        let backend = Arc::new(CountingBackend::default());
        let (mut topo, p) = setup(backend.clone());
        let now = Instant::now();

        restart_wedged_ports(&mut topo, now).await;

        assert_eq!(topo.port(&p).unwrap().mode(), MessageMode::Reset);
        assert_eq!(backend.power_offs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn arrival_on_unknown_path_is_ignored() {
        let (mut topo, _p) = setup(Arc::new(CountingBackend::default()));
        let unknown: TopologicalPath = "9-9".parse().unwrap();
        on_arrived(&mut topo, &unknown, device(1, ScriptedProbe::always_ok()), Instant::now());
        assert!(topo.port(&unknown).is_none());
    }

    #[tokio::test]
    async fn departure_of_a_different_device_is_ignored() {
        let (mut topo, p) = setup(Arc::new(CountingBackend::default()));
        let now = Instant::now();
        on_arrived(&mut topo, &p, device(1, ScriptedProbe::always_ok()), now);

        on_left(&mut topo, &p, 2);

        let port = topo.port(&p).unwrap();
        assert_eq!(port.status(), ConnectionStatus::DeviceConnected);
        assert!(port.already_bound_to(1));
    }
}
