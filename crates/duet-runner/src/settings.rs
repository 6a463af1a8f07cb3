//! Runner settings: the harness document plus an optional `[sim]` table.

use std::path::Path;

use duet_harness::{ConfigError, HarnessConfig, SimConfig};
use serde::Deserialize;
use thiserror::Error;

/// Errors loading runner settings.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// The harness part is unreadable or invalid
    #[error(transparent)]
    Harness(#[from] ConfigError),

    /// The `[sim]` table does not match the simulator schema
    #[error("invalid [sim] table: {0}")]
    Sim(#[from] toml::de::Error),
}

#[derive(Deserialize)]
struct SimTable {
    #[serde(default)]
    sim: SimConfig,
}

/// Everything one suite run needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Waits, bootstrap and shutdown knobs
    pub harness: HarnessConfig,
    /// Simulated network the suite runs against
    pub sim: SimConfig,
}

impl Settings {
    /// Parse both tables from one TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, SettingsError> {
        let harness = HarnessConfig::from_toml_str(content)?;
        let SimTable { sim } = toml::from_str(content)?;
        Ok(Self { harness, sim })
    }

    /// Read settings from `path`, or use defaults when there is none.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(ConfigError::from)?;
                Self::from_toml_str(&content)
            },
            None => Ok(Self::from_toml_str("")?),
        }
    }

    /// Apply a command-line seed. It wins over both tables.
    #[must_use]
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        if let Some(seed) = seed.or(self.harness.seed) {
            self.harness.seed = Some(seed);
            self.sim.seed = seed;
        }
        self
    }

    /// Whether the run replays from a fixed seed.
    pub fn is_seeded(&self) -> bool {
        self.harness.seed.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sim_table_sits_beside_harness_keys() {
        let settings = Settings::from_toml_str(
            "threshold = 9\n[sim]\nloss_rate = 0.25\niteration_interval_ms = 5\n",
        )
        .unwrap();
        assert_eq!(settings.harness.threshold, 9);
        assert!((settings.sim.loss_rate - 0.25).abs() < f64::EPSILON);
        assert_eq!(settings.sim.iteration_interval_ms, 5);
        assert_eq!(settings.sim.chunk_size, SimConfig::default().chunk_size);
    }

    #[test]
    fn command_line_seed_overrides_config_seed() {
        let settings = Settings::from_toml_str("seed = 3").unwrap().with_seed(Some(11));
        assert_eq!(settings.harness.seed, Some(11));
        assert_eq!(settings.sim.seed, 11);
    }

    #[test]
    fn config_seed_reaches_the_simulator() {
        let settings = Settings::from_toml_str("seed = 3").unwrap().with_seed(None);
        assert_eq!(settings.sim.seed, 3);
        assert!(settings.is_seeded());
    }

    #[test]
    fn unseeded_by_default() {
        let settings = Settings::load(None).unwrap().with_seed(None);
        assert!(!settings.is_seeded());
    }

    #[test]
    fn bad_sim_table_is_reported() {
        let err = Settings::from_toml_str("[sim]\nloss_rate = \"high\"\n").unwrap_err();
        assert!(matches!(err, SettingsError::Sim(_)));
    }

    #[test]
    fn file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runner.toml");
        std::fs::write(&path, "batch = 7\n").unwrap();
        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.harness.batch, 7);
    }
}
