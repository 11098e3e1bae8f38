//! Configuration for the simulation
//!
//! Loaded from TOML, overridden from the command line, validated before a
//! run starts. Every field has a default, so an empty file is valid.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SimulationError, SimulationResult};

/// Who completes a batch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    /// The operator is a barrier participant and closes each batch with a
    /// summarize command.
    #[default]
    Manual,
    /// Workers alone form the barrier; the last one in publishes the batch.
    Automatic,
}

/// Settings for one simulation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Number of producers
    pub chefs: usize,
    /// Number of consumers
    pub deliverers: usize,
    /// Queue capacity
    pub capacity: usize,
    /// Orders each worker handles before it waits at the barrier
    pub batch_size: u32,
    /// Bound on a single try-enqueue or try-dequeue
    pub operation_timeout_ms: u64,
    /// Shortest pause between two work items
    pub min_delay_ms: u64,
    /// Longest pause between two work items
    pub max_delay_ms: u64,
    /// Run seed; drawn from entropy when absent
    pub seed: Option<u64>,
    pub batch_mode: BatchMode,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            chefs: 3,
            deliverers: 3,
            capacity: 5,
            batch_size: 5,
            operation_timeout_ms: 1000,
            min_delay_ms: 1000,
            max_delay_ms: 2000,
            seed: None,
            batch_mode: BatchMode::Manual,
        }
    }
}

impl SimulationConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(source: &str) -> SimulationResult<Self> {
        Ok(toml::from_str(source)?)
    }

    /// Read and parse a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> SimulationResult<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> SimulationResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject settings no run can work with.
    pub fn validate(&self) -> SimulationResult<()> {
        let positive = [
            ("chefs", self.chefs as u64),
            ("deliverers", self.deliverers as u64),
            ("capacity", self.capacity as u64),
            ("batch_size", u64::from(self.batch_size)),
            ("operation_timeout_ms", self.operation_timeout_ms),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(SimulationError::Configuration(format!(
                    "{} must be at least 1",
                    name
                )));
            }
        }
        if self.min_delay_ms > self.max_delay_ms {
            return Err(SimulationError::Configuration(format!(
                "min_delay_ms ({}) is greater than max_delay_ms ({})",
                self.min_delay_ms, self.max_delay_ms
            )));
        }
        // Every worker handles batch_size orders per batch, so unequal pools
        // leave the queue full or starved and the next batch never closes.
        if self.chefs != self.deliverers {
            return Err(SimulationError::Configuration(format!(
                "chefs ({}) and deliverers ({}) must be equal for batches to close",
                self.chefs, self.deliverers
            )));
        }
        Ok(())
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Number of workers across both pools
    pub fn workers(&self) -> usize {
        self.chefs + self.deliverers
    }

    /// Barrier size for the configured batch mode
    pub fn barrier_participants(&self) -> usize {
        match self.batch_mode {
            BatchMode::Manual => self.workers() + 1,
            BatchMode::Automatic => self.workers(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SimulationConfig::default();
        assert_eq!(config.chefs, 3);
        assert_eq!(config.deliverers, 3);
        assert_eq!(config.capacity, 5);
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.operation_timeout(), Duration::from_secs(1));
        assert_eq!(config.barrier_participants(), 7);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = SimulationConfig::from_toml_str(
            r#"
            chefs = 4
            batch_mode = "automatic"
            seed = 42
            "#,
        )
        .unwrap();
        assert_eq!(config.chefs, 4);
        assert_eq!(config.deliverers, 3);
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.batch_mode, BatchMode::Automatic);
        assert_eq!(config.barrier_participants(), 7);
    }

    #[test]
    fn test_toml_roundtrip_through_file() {
        let config = SimulationConfig {
            capacity: 9,
            seed: Some(3),
            ..SimulationConfig::default()
        };
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_toml().unwrap().as_bytes()).unwrap();

        let loaded = SimulationConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        let cases = [
            SimulationConfig { chefs: 0, deliverers: 0, ..Default::default() },
            SimulationConfig { deliverers: 0, ..Default::default() },
            SimulationConfig { capacity: 0, ..Default::default() },
            SimulationConfig { batch_size: 0, ..Default::default() },
            SimulationConfig { operation_timeout_ms: 0, ..Default::default() },
        ];
        for config in cases {
            assert!(matches!(
                config.validate(),
                Err(SimulationError::Configuration(_))
            ));
        }
    }

    #[test]
    fn test_validation_rejects_inverted_delays() {
        let config = SimulationConfig {
            min_delay_ms: 10,
            max_delay_ms: 5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_unequal_pools() {
        for (chefs, deliverers) in [(3, 2), (2, 3)] {
            let config = SimulationConfig {
                chefs,
                deliverers,
                ..Default::default()
            };
            assert!(matches!(
                config.validate(),
                Err(SimulationError::Configuration(_))
            ));
        }
    }

    #[test]
    fn test_malformed_toml_is_serialization_error() {
        let result = SimulationConfig::from_toml_str("chefs = \"many\"");
        assert!(matches!(result, Err(SimulationError::Serialization(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = SimulationConfig::from_toml_file(dir.path().join("absent.toml"));
        assert!(matches!(result, Err(SimulationError::Io(_))));
    }
}
