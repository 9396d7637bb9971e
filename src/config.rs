//! Configuration parsing and validation.
//!
//! Handles loading the engine configuration from YAML files with serde
//! defaults for every field, so an empty file (or no file) is a valid
//! configuration.

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::path::Path;

use crate::error::{ConfigError, ReadFileSnafu, UnknownVerbositySnafu, YamlParseSnafu};

/// Byte size constants (binary/IEC units).
pub const KI: u64 = 1024;
pub const MI: u64 = 1024 * KI;

/// Main configuration structure for the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Enables operators that refuse to run otherwise.
    #[serde(default)]
    pub allow_unsafe_pipelines: bool,

    /// Log level for console output (trace, debug, info, warn, error).
    #[serde(default = "default_console_verbosity")]
    pub console_verbosity: String,

    /// Metrics configuration (optional, disabled by default).
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            allow_unsafe_pipelines: false,
            console_verbosity: default_console_verbosity(),
            metrics: MetricsConfig::default(),
        }
    }
}

/// Metrics configuration for the Prometheus endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether the metrics endpoint is enabled (default: false).
    #[serde(default)]
    pub enabled: bool,
    /// Address to bind the metrics HTTP server (default: "0.0.0.0:9090").
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

fn default_console_verbosity() -> String {
    "info".to_string()
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

impl EngineConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).context(ReadFileSnafu)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(contents).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field values that serde cannot check.
    pub fn validate(&self) -> Result<(), ConfigError> {
        const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        ensure!(
            LEVELS.contains(&self.console_verbosity.as_str()),
            UnknownVerbositySnafu {
                level: self.console_verbosity.clone(),
            }
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_yaml("{}").unwrap();
        assert!(!config.allow_unsafe_pipelines);
        assert_eq!(config.console_verbosity, "info");
        assert!(!config.metrics.enabled);
        assert_eq!(config.metrics.address, "0.0.0.0:9090");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
allow_unsafe_pipelines: true
console_verbosity: debug
metrics:
  enabled: true
  address: "127.0.0.1:9191"
"#;
        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert!(config.allow_unsafe_pipelines);
        assert_eq!(config.console_verbosity, "debug");
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.address, "127.0.0.1:9191");
    }

    #[test]
    fn test_unknown_verbosity_rejected() {
        let result = EngineConfig::from_yaml("console_verbosity: loud");
        assert!(result.is_err());
    }
}
