//! Operator signal handling: `SIGUSR1` triggers a forced reset sweep.
//!
//! The signal-listening task never touches the topology directly (see the
//! design note on the global singleton); it only posts a message onto an
//! `mpsc` channel the event loop drains at the top of each tick.

use futures::stream::StreamExt;
use signal_hook::consts::signal::SIGUSR1;
use signal_hook_tokio::Signals;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

/// A message posted by the signal listener for the event loop to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorSignal {
    ForceResetSweep,
}

/// Spawns the task that listens for `SIGUSR1` and forwards it as an
/// [`OperatorSignal::ForceResetSweep`] on `sender`.
///
/// Returns a handle so the caller can track the task, though in normal
/// operation it runs for the lifetime of the process.
pub fn spawn_listener(sender: UnboundedSender<OperatorSignal>) -> Result<tokio::task::JoinHandle<()>, std::io::Error> {
    let mut signals = Signals::new([SIGUSR1])?;
    Ok(tokio::spawn(async move {
        while let Some(signal) = signals.next().await {
            if signal == SIGUSR1 {
                info!("received SIGUSR1, requesting forced reset sweep");
                if sender.send(OperatorSignal::ForceResetSweep).is_err() {
                    warn!("event loop no longer listening for operator signals");
                    break;
                }
            }
        }
    }))
}
