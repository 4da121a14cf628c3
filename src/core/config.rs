//! Configuration management for the metrics pipeline.
//!
//! This module provides configuration handling with:
//! - YAML file support
//! - Environment variable overrides (`OTEL_METRIC_EXPORT_*`,
//!   `OTEL_METRICS_EXEMPLAR_FILTER`)
//! - Validation and defaults

use crate::core::diagnostics::handle_error;
use crate::core::{MetricsError, Result};
use crate::exemplar::ExemplarFilter;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default number of distinct attribute sets per stream
pub const DEFAULT_CARDINALITY_LIMIT: usize = 2000;

const ENV_EXPORT_INTERVAL: &str = "OTEL_METRIC_EXPORT_INTERVAL";
const ENV_EXPORT_TIMEOUT: &str = "OTEL_METRIC_EXPORT_TIMEOUT";
const ENV_EXEMPLAR_FILTER: &str = "OTEL_METRICS_EXEMPLAR_FILTER";

/// Complete pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Periodic reader scheduling
    pub reader: ReaderConfig,
    /// Maximum distinct attribute sets per stream, 0 for unlimited
    pub cardinality_limit: usize,
    /// Exemplar sampling
    pub exemplar: ExemplarConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Periodic reader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Time between collect+export cycles
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Bound on a single collect+export cycle
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

/// Exemplar configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExemplarConfig {
    pub filter: ExemplarFilter,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,
    /// Include targets, thread ids and line numbers
    pub structured: bool,
}

/// Log levels
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            reader: ReaderConfig::default(),
            cardinality_limit: DEFAULT_CARDINALITY_LIMIT,
            exemplar: ExemplarConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ReaderConfig {
    fn default() -> Self {
        ReaderConfig {
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(30),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
            structured: false,
        }
    }
}

impl LogLevel {
    /// Convert to tracing filter string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl Config {
    /// Defaults with environment overrides applied
    pub fn from_env() -> Result<Self> {
        ConfigBuilder::new().with_env_overrides().build()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.reader.interval.is_zero() {
            return Err(MetricsError::config("reader interval must be greater than 0"));
        }

        if self.reader.timeout.is_zero() {
            return Err(MetricsError::config("reader timeout must be greater than 0"));
        }

        Ok(())
    }

    fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(interval) = millis_from_env(ENV_EXPORT_INTERVAL, &lookup) {
            self.reader.interval = interval;
        }
        if let Some(timeout) = millis_from_env(ENV_EXPORT_TIMEOUT, &lookup) {
            self.reader.timeout = timeout;
        }
        if let Some(raw) = lookup(ENV_EXEMPLAR_FILTER) {
            match raw.trim().parse::<ExemplarFilter>() {
                Ok(filter) => self.exemplar.filter = filter,
                Err(e) => handle_error(e),
            }
        }
    }
}

fn millis_from_env<F>(name: &str, lookup: &F) -> Option<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name)?;
    match raw.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Some(Duration::from_millis(ms)),
        _ => {
            handle_error(MetricsError::config(format!(
                "ignoring {}={:?}: expected a positive number of milliseconds",
                name, raw
            )));
            None
        },
    }
}

/// Configuration builder for programmatic construction
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        ConfigBuilder {
            config: Config::default(),
        }
    }

    /// Load configuration from YAML string
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        self.config = serde_yaml::from_str(yaml)
            .map_err(|e| MetricsError::config(format!("Failed to parse YAML config: {}", e)))?;
        Ok(self)
    }

    /// Load configuration from a YAML file
    pub fn from_file(self, path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        self.from_yaml(&content)
    }

    /// Apply `OTEL_METRIC_EXPORT_INTERVAL`, `OTEL_METRIC_EXPORT_TIMEOUT` and
    /// `OTEL_METRICS_EXEMPLAR_FILTER` from the process environment
    pub fn with_env_overrides(self) -> Self {
        self.with_env_lookup(|name| std::env::var(name).ok())
    }

    /// Apply environment overrides read through `lookup`
    pub fn with_env_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        self.config.apply_env(lookup);
        self
    }

    /// Set export interval
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.reader.interval = interval;
        self
    }

    /// Set export timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.reader.timeout = timeout;
        self
    }

    /// Set the per-stream cardinality limit
    pub fn cardinality_limit(mut self, limit: usize) -> Self {
        self.config.cardinality_limit = limit;
        self
    }

    /// Set the exemplar filter
    pub fn exemplar_filter(mut self, filter: ExemplarFilter) -> Self {
        self.config.exemplar.filter = filter;
        self
    }

    /// Set log level
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.logging.level = level;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cardinality_limit, DEFAULT_CARDINALITY_LIMIT);
        assert_eq!(config.exemplar.filter, ExemplarFilter::TraceBased);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let result = ConfigBuilder::new().interval(Duration::ZERO).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
reader:
  interval: 10s
  timeout: 2s
cardinality_limit: 50
exemplar:
  filter: always_on
logging:
  level: debug
"#;

        let config = ConfigBuilder::new().from_yaml(yaml).unwrap().build().unwrap();
        assert_eq!(config.reader.interval, Duration::from_secs(10));
        assert_eq!(config.reader.timeout, Duration::from_secs(2));
        assert_eq!(config.cardinality_limit, 50);
        assert_eq!(config.exemplar.filter, ExemplarFilter::AlwaysOn);
        assert_eq!(config.logging.level.as_str(), "debug");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("OTEL_METRIC_EXPORT_INTERVAL", "1500"),
            ("OTEL_METRIC_EXPORT_TIMEOUT", "not-a-number"),
            ("OTEL_METRICS_EXEMPLAR_FILTER", "always_off"),
        ]
        .into_iter()
        .collect();

        let config = ConfigBuilder::new()
            .with_env_lookup(|name| env.get(name).map(|v| v.to_string()))
            .build()
            .unwrap();

        assert_eq!(config.reader.interval, Duration::from_millis(1500));
        // Invalid values are ignored
        assert_eq!(config.reader.timeout, Duration::from_secs(30));
        assert_eq!(config.exemplar.filter, ExemplarFilter::AlwaysOff);
    }
}
