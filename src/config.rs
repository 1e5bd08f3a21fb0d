//! Configuration file parsing: a YAML document describing which port
//! power-switching handlers to wire up, and how.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::usb::{PathParseError, TopologicalPath};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("unrecognized handler name {0:?}, only \"GPIO\" is supported")]
    UnknownHandler(String),
    #[error("invalid port path {path:?} in handler configuration: {source}")]
    InvalidPortPath {
        path: String,
        #[source]
        source: PathParseError,
    },
}

/// Raw shape of the YAML document, deserialized before being validated into
/// [`Config`]. `serde`'s `deny_unknown_fields` is what rejects unrecognized
/// top-level and per-handler keys.
#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct RawDocument {
    handlers: Vec<RawHandler>,
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct RawHandler {
    name: String,
    ports: HashMap<String, u32>,
}

/// A validated GPIO handler entry: which topological port maps to which
/// sysfs GPIO line number.
#[derive(Debug, Clone)]
pub struct GpioHandlerConfig {
    pub ports: HashMap<TopologicalPath, u32>,
}

/// The fully validated configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub gpio_handlers: Vec<GpioHandlerConfig>,
}

impl Config {
    /// Reads and parses the configuration file at `path`.
    ///
    /// Reads the full file with [`std::fs::read_to_string`] rather than a
    /// fixed-size buffer before handing it to `serde_yaml`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text)
    }

    fn parse(text: &str) -> Result<Self, ConfigError> {
        let raw: RawDocument = serde_yaml::from_str(text)?;
        let mut gpio_handlers = Vec::with_capacity(raw.handlers.len());
        for handler in raw.handlers {
            if handler.name != "GPIO" {
                return Err(ConfigError::UnknownHandler(handler.name));
            }
            let mut ports = HashMap::with_capacity(handler.ports.len());
            for (path_text, gpio_line) in handler.ports {
                let path: TopologicalPath =
                    path_text.parse().map_err(|source| ConfigError::InvalidPortPath {
                        path: path_text.clone(),
                        source,
                    })?;
                ports.insert(path, gpio_line);
            }
            gpio_handlers.push(GpioHandlerConfig { ports });
        }
        Ok(Self { gpio_handlers })
    }
}
