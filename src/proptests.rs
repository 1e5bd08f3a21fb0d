//! Property tests for the topology/port-binding invariants (§8, P1/P2/P5/P6
//! of the design this crate was adapted from). Exercises the supervisor
//! against randomly generated sequences of arrivals, departures, fired
//! timers, and forced resets, checking invariants after every step rather
//! than only at a handful of hand-picked points.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use proptest::prelude::*;

use crate::backend::{BackendError, SwitchingBackend};
use crate::hub::Hub;
use crate::port::{AttachedDevice, ConnectionStatus, MessageMode, Port};
use crate::supervisor;
use crate::topology::Topology;
use crate::usb::{ProbeError, ProbeTarget, TopologicalPath};

#[derive(Debug, Default)]
struct CountingBackend {
    power_offs: AtomicU32,
}

#[async_trait]
impl SwitchingBackend for CountingBackend {
    fn name(&self) -> &'static str {
        "counting"
    }
    async fn power_off_port(&self, _: u8) -> Result<(), BackendError> {
        self.power_offs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    async fn power_on_port(&self, _: u8) -> Result<(), BackendError> {
        Ok(())
    }
}

#[derive(Debug)]
struct AlwaysOk;

#[async_trait]
impl ProbeTarget for AlwaysOk {
    async fn get_status(&self) -> Result<(), ProbeError> {
        Ok(())
    }
}

fn device(id: u64) -> AttachedDevice {
    AttachedDevice {
        id,
        vendor_id: 0x04d8,
        product_id: 0x0042,
        handle: Arc::new(AlwaysOk),
    }
}

fn port_paths(count: u8) -> Vec<TopologicalPath> {
    (1..=count).map(|p| TopologicalPath::new(1, vec![p]).unwrap()).collect()
}

fn assert_p1_and_p2(topology: &Topology) {
    for port in topology.ports() {
        assert_eq!(
            port.device().is_some(),
            port.status() == ConnectionStatus::DeviceConnected,
            "P1 violated: device presence disagrees with connection status"
        );
    }
    for path in topology.timeout_paths() {
        assert!(
            topology.port(path).is_some(),
            "P2 violated: a timeout entry with no corresponding port"
        );
    }
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Arrive(usize),
    Leave(usize),
    FireDue,
    ForceReset,
}

fn op_strategy(port_count: usize) -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..port_count).prop_map(Op::Arrive),
        (0..port_count).prop_map(Op::Leave),
        Just(Op::FireDue),
        Just(Op::ForceReset),
    ]
}

proptest! {
    /// P1 (binding) and P2 (timeout membership) hold after every step of an
    /// arbitrary interleaving of arrivals, departures, fired timers, and
    /// forced reset sweeps over a fixed four-port hub.
    #[test]
    fn p1_and_p2_hold_after_any_operation_sequence(
        ops in proptest::collection::vec(op_strategy(4), 0..40)
    ) {
        const PORT_COUNT: u8 = 4;
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let mut topology = Topology::new();
            let hub_id = topology.allocate_hub_id();
            topology.add_hub(Hub::new(hub_id, None, PORT_COUNT, Arc::new(CountingBackend::default())));
            let paths = port_paths(PORT_COUNT);
            for (index, path) in paths.iter().enumerate() {
                topology.add_port(Port::new(hub_id, path.clone(), u8::try_from(index + 1).unwrap()));
            }

            let mut next_device_id = 0u64;
            let mut now = Instant::now();

            for op in ops {
                match op {
                    Op::Arrive(index) => {
                        let id = next_device_id;
                        next_device_id += 1;
                        supervisor::on_arrived(&mut topology, &paths[index], device(id), now);
                    }
                    Op::Leave(index) => {
                        if let Some(id) = topology.port(&paths[index]).and_then(|p| p.device()).map(|d| d.id) {
                            supervisor::on_left(&mut topology, &paths[index], id);
                        }
                    }
                    Op::FireDue => {
                        now += Duration::from_secs(20);
                        let fired: Vec<_> = topology
                            .timeout_paths()
                            .filter(|path| topology.port(path).and_then(|p| p.deadline()).is_some_and(|d| d <= now))
                            .cloned()
                            .collect();
                        for path in fired {
                            topology.remove_timeout(&path);
                            supervisor::fire_timeout(&mut topology, &path, now).await;
                        }
                    }
                    Op::ForceReset => {
                        supervisor::force_reset_all(&mut topology, now).await;
                    }
                }
                assert_p1_and_p2(&topology);
            }
        });
    }

    /// P5 (no-op force): once a port is resetting, any number of further
    /// forced-reset sweeps neither re-enters `Reset` nor issues another
    /// power-off command.
    #[test]
    fn forced_reset_is_a_no_op_on_an_already_resetting_port(extra_sweeps in 1usize..5) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let backend = Arc::new(CountingBackend::default());
            let mut topology = Topology::new();
            let hub_id = topology.allocate_hub_id();
            topology.add_hub(Hub::new(hub_id, None, 1, backend.clone()));
            let path = TopologicalPath::new(1, vec![1]).unwrap();
            topology.add_port(Port::new(hub_id, path.clone(), 1));
            let now = Instant::now();

            supervisor::enter_reset(&mut topology, &path, now).await;
            let power_offs_after_entry = backend.power_offs.load(Ordering::SeqCst);

            for _ in 0..extra_sweeps {
                supervisor::force_reset_all(&mut topology, now).await;
            }

            prop_assert_eq!(backend.power_offs.load(Ordering::SeqCst), power_offs_after_entry);
            prop_assert_eq!(topology.port(&path).unwrap().mode(), MessageMode::Reset);
        });
    }

    /// P6 (hub removal cascade): removing a hub drops every one of its
    /// ports from both the port collection and the timeout collection,
    /// regardless of how many ports it had or which were enrolled.
    #[test]
    fn removing_a_hub_cascades_to_every_one_of_its_ports(
        port_count in 1u8..8,
        enroll_mask in proptest::collection::vec(any::<bool>(), 0..8)
    ) {
        let mut topology = Topology::new();
        let hub_id = topology.allocate_hub_id();
        topology.add_hub(Hub::new(hub_id, None, port_count, Arc::new(CountingBackend::default())));
        let paths = port_paths(port_count);
        for (index, path) in paths.iter().enumerate() {
            topology.add_port(Port::new(hub_id, path.clone(), u8::try_from(index + 1).unwrap()));
            if enroll_mask.get(index).copied().unwrap_or(false) {
                topology.add_timeout(path.clone());
            }
        }

        topology.remove_hub(hub_id);

        for path in &paths {
            prop_assert!(topology.port(path).is_none());
            prop_assert!(!topology.is_enrolled(path));
        }
        prop_assert_eq!(topology.port_count(), 0);
        prop_assert_eq!(topology.timeout_count(), 0);
    }
}
