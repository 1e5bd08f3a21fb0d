//! Everything that talks to the host USB library directly.

pub mod device_path;
pub mod event_source;

pub use device_path::{path_of_device, PathParseError, TopologicalPath};
pub use event_source::{list_devices, open_probe_target, NusbProbeTarget, ProbeError, ProbeTarget, UsbEvent};
