//! Configuration parsing and validation.
//!
//! Handles loading configuration from YAML files, with environment-variable
//! interpolation and serde-supplied defaults matching the deployment the
//! original loader ran in.

mod vars;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{
    ConfigError, EmptyAddressSnafu, EmptyPatternSnafu, EnvInterpolationSnafu, ErrorRateRangeSnafu,
    NoDestinationsSnafu, ReadFileSnafu, YamlParseSnafu, ZeroRetriesSnafu,
};
use crate::sink::WriterConfig;

/// Main configuration structure for the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub source: SourceConfig,

    /// Destination type -> store address. One queue and one sink writer is
    /// created per entry.
    #[serde(default = "default_destinations")]
    pub destinations: BTreeMap<String, String>,

    /// Delivery behavior (optional, defaults below).
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Metrics configuration (optional, enabled by default).
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Source configuration for discovering input batches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Glob pattern for input files, e.g.
    /// `/var/data/appsinstalled/*.tsv.gz`. Only the file-name component is
    /// glob-matched; the directory part is listed literally.
    pub pattern: String,
}

/// Delivery behavior shared by every sink writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Capacity of each destination queue (backpressure parameter).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Delivery attempts per record (must be at least 1).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed delay between attempts, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Per-attempt store timeout, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Error-rate threshold below which a file's load is acceptable.
    #[serde(default = "default_normal_error_rate")]
    pub normal_error_rate: f64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            timeout_ms: default_timeout_ms(),
            normal_error_rate: default_normal_error_rate(),
        }
    }
}

impl DeliveryConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Per-writer retry policy derived from this configuration.
    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            max_retries: self.max_retries,
            retry_delay: self.retry_delay(),
        }
    }
}

/// Metrics configuration for the Prometheus endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    /// Address to bind the metrics HTTP server (default: "0.0.0.0:9090").
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

/// The four device-identity schemes the original deployment served.
fn default_destinations() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("idfa".to_string(), "127.0.0.1:33013".to_string()),
        ("gaid".to_string(), "127.0.0.1:33014".to_string()),
        ("adid".to_string(), "127.0.0.1:33015".to_string()),
        ("dvid".to_string(), "127.0.0.1:33016".to_string()),
    ])
}

fn default_queue_capacity() -> usize {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_normal_error_rate() -> f64 {
    0.01
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_file_with_options(path, true)
    }

    /// Load configuration from a YAML file with optional environment
    /// variable interpolation.
    pub fn from_file_with_options(
        path: impl AsRef<Path>,
        interpolate_env: bool,
    ) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).context(ReadFileSnafu)?;

        let content = if interpolate_env {
            let result = vars::interpolate(&content);
            if !result.is_ok() {
                let error_msg = result.errors.join("\n");
                return EnvInterpolationSnafu { message: error_msg }.fail();
            }
            result.text
        } else {
            content
        };

        let config: Config = serde_yaml::from_str(&content).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.source.pattern.is_empty(), EmptyPatternSnafu);
        ensure!(!self.destinations.is_empty(), NoDestinationsSnafu);
        for (destination, addr) in &self.destinations {
            ensure!(!addr.is_empty(), EmptyAddressSnafu { destination });
        }
        ensure!(self.delivery.max_retries >= 1, ZeroRetriesSnafu);
        ensure!(
            self.delivery.normal_error_rate > 0.0 && self.delivery.normal_error_rate <= 1.0,
            ErrorRateRangeSnafu {
                value: self.delivery.normal_error_rate,
            }
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_parsing_with_defaults() {
        let yaml = r#"
source:
  pattern: "/var/data/appsinstalled/*.tsv.gz"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.destinations.len(), 4);
        assert_eq!(config.destinations["idfa"], "127.0.0.1:33013");
        assert_eq!(config.delivery.queue_capacity, 10);
        assert_eq!(config.delivery.max_retries, 3);
        assert_eq!(config.delivery.retry_delay(), Duration::from_secs(1));
        assert_eq!(config.delivery.normal_error_rate, 0.01);
        assert!(config.metrics.enabled);
    }

    #[test]
    fn test_yaml_parsing_explicit() {
        let yaml = r#"
source:
  pattern: "/srv/batches/*.tsv.gz"

destinations:
  idfa: "10.0.0.1:11211"
  gaid: "10.0.0.2:11211"

delivery:
  queue_capacity: 64
  max_retries: 5
  retry_delay_ms: 250
  timeout_ms: 500
  normal_error_rate: 0.05

metrics:
  enabled: false
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.destinations.len(), 2);
        assert_eq!(config.delivery.max_retries, 5);
        assert_eq!(config.delivery.timeout(), Duration::from_millis(500));
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn test_validate_rejects_empty_pattern() {
        let yaml = r#"
source:
  pattern: ""
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyPattern { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_empty_destinations() {
        let yaml = r#"
source:
  pattern: "*.tsv.gz"
destinations: {}
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NoDestinations { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_retries() {
        let yaml = r#"
source:
  pattern: "*.tsv.gz"
delivery:
  max_retries: 0
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroRetries { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_error_rate() {
        let yaml = r#"
source:
  pattern: "*.tsv.gz"
delivery:
  normal_error_rate: 1.5
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ErrorRateRange { .. })
        ));
    }
}
