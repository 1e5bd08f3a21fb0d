//! Timing and retry constants that drive the port supervisor and event
//! loop. Collected here because they are design parameters referenced from
//! several modules, not because they form a cohesive abstraction.

use std::time::Duration;

/// Steady-state interval between liveness probes of a connected device, and
/// the baseline enrollment deadline for a freshly-bound device.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Extra grace period added on top of [`DEFAULT_TIMEOUT`] for the first
/// probe after arrival, to let mode-switching tools finish re-enumeration
/// (total: ten seconds).
pub const ARRIVAL_GRACE: Duration = Duration::from_secs(5);

/// Maximum number of consecutive failed probes before a port is reset.
pub const RETRANS_LIMIT: u8 = 5;

/// How long power stays off during a reset before being restored.
pub const RESET_HOLD: Duration = Duration::from_secs(1);

/// Log a successful probe only every Nth time, to avoid flooding the log
/// at the default probe cadence (roughly one line per 100s).
pub const PING_LOG_THROTTLE: u32 = 20;

/// How often the event loop re-walks the full device list looking for
/// devices the registry lost track of.
pub const DEVICE_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// How often the event loop restarts ports whose device never appeared.
pub const RESTART_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Bound on how long a single tick waits for a USB hotplug event.
pub const USB_EVENT_WAIT: Duration = Duration::from_secs(1);
