//! Topological addressing of USB devices: bus number plus the chain of hub
//! port numbers a device is plugged into. Two devices on the same physical
//! port, at different times, share the same path.

use std::fmt;

use thiserror::Error;

/// Maximum depth of the port chain (USB allows at most 7 tiers of hubs).
const MAX_CHAIN_LEN: usize = 7;

/// A bus number followed by the chain of hub ports leading to a device.
///
/// Path uniqueness is an invariant the topology registry relies on: no two
/// supervised ports ever share the same `TopologicalPath`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopologicalPath {
    bus: u8,
    chain: Vec<u8>,
}

impl TopologicalPath {
    /// Builds a path from a bus number and a port chain.
    ///
    /// Returns `None` if the chain is deeper than USB allows.
    pub fn new(bus: u8, chain: impl Into<Vec<u8>>) -> Option<Self> {
        let chain = chain.into();
        if chain.len() > MAX_CHAIN_LEN {
            return None;
        }
        Some(Self { bus, chain })
    }

    pub const fn bus(&self) -> u8 {
        self.bus
    }

    pub fn chain(&self) -> &[u8] {
        &self.chain
    }

    /// The port index of the final hop, i.e. the port on the immediate
    /// parent hub that this path terminates on.
    pub fn leaf_port(&self) -> Option<u8> {
        self.chain.last().copied()
    }

    /// The path of the parent hub, i.e. this path with the last hop removed.
    pub fn parent(&self) -> Option<Self> {
        if self.chain.is_empty() {
            return None;
        }
        let mut chain = self.chain.clone();
        chain.pop();
        Some(Self {
            bus: self.bus,
            chain,
        })
    }

    /// Appends one more hop to this path (used to compute the path of a
    /// device plugged into a given port number of the hub this path names).
    pub fn child(&self, port: u8) -> Option<Self> {
        Self::new(self.bus, self.chain.iter().copied().chain([port]).collect())
    }
}

impl fmt::Display for TopologicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bus)?;
        for (index, port) in self.chain.iter().enumerate() {
            let separator = if index == 0 { '-' } else { '.' };
            write!(f, "{separator}{port}")?;
        }
        Ok(())
    }
}

/// Errors produced while parsing a topological path from a textual form
/// (used for config-file port identifiers such as `"1-2.3"`).
#[derive(Error, Debug)]
pub enum PathParseError {
    #[error("path {0:?} is empty")]
    Empty(String),
    #[error("path {0:?} has a chain deeper than USB's 7-tier limit")]
    ChainTooDeep(String),
    #[error("path {0:?} contains a non-numeric bus or port component")]
    NotNumeric(String),
}

impl std::str::FromStr for TopologicalPath {
    type Err = PathParseError;

    /// Parses the `"bus-port.port.port"` notation used by Linux `usbfs` and
    /// by this daemon's configuration file.
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        if text.is_empty() {
            return Err(PathParseError::Empty(text.to_owned()));
        }

        let mut parts = text.splitn(2, '-');
        let bus_str = parts.next().unwrap_or_default();
        let bus = bus_str
            .parse::<u8>()
            .map_err(|_| PathParseError::NotNumeric(text.to_owned()))?;

        let chain = match parts.next() {
            Some(rest) => rest
                .split('.')
                .map(|p| p.parse::<u8>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| PathParseError::NotNumeric(text.to_owned()))?,
            None => Vec::new(),
        };

        Self::new(bus, chain).ok_or_else(|| PathParseError::ChainTooDeep(text.to_owned()))
    }
}

/// Computes the topological path of a device from its `nusb` device
/// information.
pub fn path_of_device(info: &nusb::DeviceInfo) -> Option<TopologicalPath> {
    TopologicalPath::new(info.busnum(), info.port_chain().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bus_only() {
        let path: TopologicalPath = "1".parse().unwrap();
        assert_eq!(path.bus(), 1);
        assert!(path.chain().is_empty());
    }

    #[test]
    fn parses_bus_and_chain() {
        let path: TopologicalPath = "1-2.3".parse().unwrap();
        assert_eq!(path.bus(), 1);
        assert_eq!(path.chain(), &[2, 3]);
    }

    #[test]
    fn rejects_too_deep_chain() {
        let err = "1-1.2.3.4.5.6.7.8".parse::<TopologicalPath>().unwrap_err();
        assert!(matches!(err, PathParseError::ChainTooDeep(_)));
    }

    #[test]
    fn rejects_non_numeric() {
        assert!("1-x".parse::<TopologicalPath>().is_err());
        assert!("bus-1".parse::<TopologicalPath>().is_err());
    }

    #[test]
    fn display_round_trips_through_parse() {
        let path: TopologicalPath = "4-1.2".parse().unwrap();
        let text = path.to_string();
        assert_eq!(text, "4-1.2");
        let reparsed: TopologicalPath = text.parse().unwrap();
        assert_eq!(path, reparsed);
    }

    #[test]
    fn child_extends_parent_chain() {
        let parent: TopologicalPath = "1-2".parse().unwrap();
        let child = parent.child(5).unwrap();
        assert_eq!(child.chain(), &[2, 5]);
        assert_eq!(child.parent().unwrap(), parent);
    }

    #[test]
    fn path_uniqueness_distinguishes_by_chain() {
        let a: TopologicalPath = "1-2".parse().unwrap();
        let b: TopologicalPath = "1-3".parse().unwrap();
        assert_ne!(a, b);
    }
}
