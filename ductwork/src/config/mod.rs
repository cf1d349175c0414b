//! Framework configuration.
//!
//! Every section has defaults, so an empty JSON object is a valid configuration.

use crate::dataflow::RunnerKind;
use crate::errors::DuctworkError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DuctworkConfig {
    /// Dataflow runner settings.
    pub dataflow: DataflowConfig,
    /// Step scheduler settings.
    pub scheduler: SchedulerConfig,
    /// Status store settings.
    pub store: StoreConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

impl DuctworkConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, DuctworkError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| DuctworkError::Config(format!("invalid configuration: {e}")))?;
        Ok(config)
    }

    /// Reads a configuration from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, DuctworkError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }
}

/// Dataflow runner settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataflowConfig {
    /// Which execution strategy runs graphs.
    pub runner: RunnerKind,
    /// Capacity of each channel in the parallel runner.
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    1
}

impl Default for DataflowConfig {
    fn default() -> Self {
        Self {
            runner: RunnerKind::default(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl DataflowConfig {
    /// Returns the channel capacity, never below one.
    #[must_use]
    pub fn effective_channel_capacity(&self) -> usize {
        self.channel_capacity.max(1)
    }
}

/// Step scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Pause between two scheduler passes, in milliseconds.
    pub tick_ms: u64,
    /// Pause between two `all_done` polls of `perform`, in milliseconds.
    pub perform_poll_ms: u64,
}

fn default_tick_ms() -> u64 {
    100
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            perform_poll_ms: default_tick_ms(),
        }
    }
}

impl SchedulerConfig {
    /// Gets the tick as a Duration.
    #[must_use]
    pub const fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Gets the perform poll interval as a Duration.
    #[must_use]
    pub const fn perform_poll(&self) -> Duration {
        Duration::from_millis(self.perform_poll_ms)
    }
}

/// Status store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Prefix of every key written by the framework.
    pub namespace: String,
    /// Time to live of status entries, in seconds.
    pub expiration_secs: u64,
}

fn default_namespace() -> String {
    "ductwork".to_string()
}

fn default_expiration_secs() -> u64 {
    86_400 // one day
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            expiration_secs: default_expiration_secs(),
        }
    }
}

impl StoreConfig {
    /// Gets the expiration as a Duration.
    #[must_use]
    pub const fn expiration(&self) -> Duration {
        Duration::from_secs(self.expiration_secs)
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default filter directive when `DUCTWORK_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human readable text.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = DuctworkConfig::new();
        assert_eq!(config.dataflow.runner, RunnerKind::Coroutine);
        assert_eq!(config.dataflow.channel_capacity, 1);
        assert_eq!(config.scheduler.tick(), Duration::from_millis(100));
        assert_eq!(config.store.expiration(), Duration::from_secs(86_400));
        assert_eq!(config.store.namespace, "ductwork");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_empty_json_is_default() {
        let config = DuctworkConfig::from_json_str("{}").unwrap();
        assert_eq!(config, DuctworkConfig::default());
    }

    #[test]
    fn test_partial_override() {
        let config = DuctworkConfig::from_json_str(
            r#"{
                "dataflow": {"runner": "parallel", "channel_capacity": 0},
                "scheduler": {"tick_ms": 5}
            }"#,
        )
        .unwrap();

        assert_eq!(config.dataflow.runner, RunnerKind::Parallel);
        assert_eq!(config.dataflow.effective_channel_capacity(), 1);
        assert_eq!(config.scheduler.tick_ms, 5);
        assert_eq!(config.scheduler.perform_poll_ms, 100);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = DuctworkConfig::from_json_str(r#"{"scheduler": {"tik_ms": 5}}"#).unwrap_err();
        assert!(matches!(err, DuctworkError::Config(_)));
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"store": {{"namespace": "etl", "expiration_secs": 60}}}}"#).unwrap();

        let config = DuctworkConfig::from_path(file.path()).unwrap();
        assert_eq!(config.store.namespace, "etl");
        assert_eq!(config.store.expiration(), Duration::from_secs(60));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = DuctworkConfig::from_path("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, DuctworkError::Io(_)));
    }
}
