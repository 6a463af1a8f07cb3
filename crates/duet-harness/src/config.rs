//! Harness configuration.
//!
//! Every knob has a default matching the cadence the conformance suite has
//! always run with, so an empty TOML document is a valid configuration.
//!
//! ```toml
//! threshold = 15
//! network = "local"
//!
//! [engine]
//! udp_enabled = true
//!
//! [[nodes]]
//! protocol = "udp"
//! host = "127.0.0.1"
//! port = 33445
//! ```

use std::{path::Path, time::Duration};

use duet_core::{BootstrapNode, EngineOptions};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which part of the network the peers bootstrap into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// Sample from the configured public node list
    #[default]
    Public,
    /// Use every configured node, unsampled
    Local,
}

/// Errors loading or validating a [`HarnessConfig`].
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The document is not valid TOML for this schema
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid config: {field} {reason}")]
    Invalid {
        /// Offending key
        field: &'static str,
        /// What is wrong with it
        reason: &'static str,
    },
}

/// Tunables for waits, bootstrap and driver shutdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Rounds a wait gets before timing out
    pub threshold: u32,
    /// Bootstrap every Nth round in connect and single-peer waits
    pub connect_cadence: u32,
    /// Bootstrap every Nth round in all-peers waits
    pub all_peers_cadence: u32,
    /// Paired iterations per round
    pub batch: u32,
    /// Nodes sampled per bootstrap attempt
    pub bootstrap_per_attempt: usize,
    /// Minimum gap between bootstrap attempts
    pub bootstrap_min_interval_ms: u64,
    /// Wait per join attempt when stopping a driver
    pub driver_stop_timeout_ms: u64,
    /// Join attempts before a driver is reported blocked
    pub driver_join_attempts: u32,
    /// Drive Alice in the background too, not only Bob
    pub drive_both: bool,
    /// Public or local bootstrap
    pub network: NetworkMode,
    /// Seed for bootstrap sampling. Random when absent.
    pub seed: Option<u64>,
    /// Options both engines are created with
    pub engine: EngineOptions,
    /// Bootstrap and relay nodes
    pub nodes: Vec<BootstrapNode>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            threshold: 15,
            connect_cadence: 3,
            all_peers_cadence: 1,
            batch: 100,
            bootstrap_per_attempt: 8,
            bootstrap_min_interval_ms: 0,
            driver_stop_timeout_ms: 1000,
            driver_join_attempts: 3,
            drive_both: false,
            network: NetworkMode::Public,
            seed: None,
            engine: EngineOptions::default(),
            nodes: Vec::new(),
        }
    }
}

impl HarnessConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Reject values that would make waits or shutdown unbounded or empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("threshold", self.threshold),
            ("connect_cadence", self.connect_cadence),
            ("all_peers_cadence", self.all_peers_cadence),
            ("batch", self.batch),
            ("driver_join_attempts", self.driver_join_attempts),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid { field, reason: "must be at least 1" });
            }
        }
        if self.nodes.iter().any(|n| n.host.is_empty()) {
            return Err(ConfigError::Invalid { field: "nodes", reason: "host must not be empty" });
        }
        Ok(())
    }

    /// Per-join wait when stopping a driver.
    pub fn driver_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.driver_stop_timeout_ms)
    }

    /// Minimum gap between bootstrap attempts.
    pub fn bootstrap_min_interval(&self) -> Duration {
        Duration::from_millis(self.bootstrap_min_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let config = HarnessConfig::from_toml_str("").unwrap();
        assert_eq!(config, HarnessConfig::default());
        assert_eq!(config.threshold, 15);
        assert_eq!(config.connect_cadence, 3);
        assert_eq!(config.all_peers_cadence, 1);
        assert_eq!(config.batch, 100);
    }

    #[test]
    fn zero_cadence_is_rejected() {
        let err = HarnessConfig::from_toml_str("connect_cadence = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "connect_cadence", .. }));
    }

    #[test]
    fn unknown_network_mode_is_a_parse_error() {
        let err = HarnessConfig::from_toml_str("network = \"lan\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
