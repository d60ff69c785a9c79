//! Daemon configuration
//!
//! Read from a JSON file (`config.json` unless a path is given on the
//! command line). Every key is optional.

use mavbridge_core::config::EngineConfig;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// `host:port` or `[v6]:port`
const UDP_ADDRESS_PATTERN: &str = r"^([A-Za-z0-9.\-]+|\[[0-9A-Fa-f:]+\]):\d{1,5}$";

/// Errors loading the configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid address pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Daemon settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Vehicle link: a UDP `host:port` to listen on, or a serial device
    pub master: String,
    /// UDP peer for outbound traffic. Defaults to whoever last sent to us.
    pub remote: Option<String>,
    /// Serial baud rate
    pub baud: u32,
    /// Dialect XML; the built-in dialect when unset
    pub schema: Option<PathBuf>,
    /// Default log filter, overridden by `RUST_LOG`
    pub log: String,
    /// Engine timing and identity
    pub engine: EngineConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            master: "127.0.0.1:14550".to_string(),
            remote: None,
            baud: 57600,
            schema: None,
            log: "info".to_string(),
            engine: EngineConfig::default(),
        }
    }
}

/// How to reach the vehicle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkKind {
    /// UDP socket bound to this address
    Udp(String),
    /// Serial device path
    Serial(String),
}

impl DaemonConfig {
    /// Load from a file. A missing file yields `Ok(None)`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Option<Self>, ConfigError> {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Classify [`DaemonConfig::master`]
    pub fn link(&self) -> Result<LinkKind, ConfigError> {
        let udp = Regex::new(UDP_ADDRESS_PATTERN)?;
        if udp.is_match(&self.master) {
            Ok(LinkKind::Udp(self.master.clone()))
        } else {
            Ok(LinkKind::Serial(self.master.clone()))
        }
    }
}
