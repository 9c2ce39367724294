//! Chute Configuration
//!
//! TOML-based configuration loading with sensible defaults, plus the generic
//! string-or-subtree [`StoreConfig`] that store implementations read their
//! keys from.
//!
//! # Parsing
//!
//! Use the `FromStr` trait to parse configuration:
//!
//! ```
//! use chute_config::DaemonConfig;
//! use std::str::FromStr;
//!
//! let config = DaemonConfig::from_str(
//!     "[[store]]\ncategory = \"default\"\ntype = \"null\"",
//! )
//! .unwrap();
//! assert_eq!(config.stores.len(), 1);
//! ```
//!
//! # Example Config
//!
//! ```toml
//! check_interval_secs = 5
//!
//! [log]
//! level = "info"
//!
//! [[source]]
//! type = "tail"
//! category = "apache"
//! file = "/var/log/apache/access.log"
//!
//! [[store]]
//! category = "default"
//! type = "buffer"
//! retry_interval = 30
//!
//! [store.primary]
//! type = "network"
//! remote_host = "upstream.example.com"
//! remote_port = 1463
//!
//! [store.secondary]
//! type = "file"
//! file_path = "/var/spool/chute"
//! ```

mod error;
mod tree;

pub use error::{ConfigError, Result};
pub use tree::StoreConfig;

use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

/// Top-level daemon configuration.
///
/// All sections are optional with sensible defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging configuration.
    pub log: LogConfig,

    /// Seconds between periodic-check ticks driven into every store tree.
    pub check_interval_secs: u64,

    /// Store trees, one per `[[store]]` section. The `category` key inside
    /// each section selects the traffic the tree receives; `default` catches
    /// everything without an exact match.
    #[serde(rename = "store")]
    pub stores: Vec<StoreConfig>,

    /// Sources, one per `[[source]]` section. Only `type = "tail"` is
    /// recognized.
    #[serde(rename = "source")]
    pub sources: Vec<StoreConfig>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log: LogConfig::default(),
            check_interval_secs: 5,
            stores: Vec::new(),
            sources: Vec::new(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or contains invalid TOML.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        contents.parse()
    }
}

impl FromStr for DaemonConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(ConfigError::Parse)
    }
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod lib_test;
