//! Configuration file parsing for the exporter.
//!
//! Loads bind address, operating mode, cluster access, controller and
//! collector tuning, and metric naming from TOML. Every section is optional
//! and falls back to in-code defaults.

use runstate_controller::{CollectorConfig, ControllerConfig};
use runstate_domain::classifier::DEFAULT_PLATFORM_PARAM;
use runstate_domain::{Classifier, StatusLabel, StatusTaxonomy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Exporter configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// A value is out of range or inconsistent with another
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// How metrics are kept up to date
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// List and classify every PipelineRun at scrape time
    #[default]
    Pull,

    /// Maintain a store from watch events and periodic resync
    Reactive,
}

impl Mode {
    /// Get the mode name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Pull => "pull",
            Mode::Reactive => "reactive",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pull" => Ok(Mode::Pull),
            "reactive" => Ok(Mode::Reactive),
            other => Err(ConfigError::Invalid(format!(
                "unknown mode '{}' (expected 'pull' or 'reactive')",
                other
            ))),
        }
    }
}

/// Kubernetes API access
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// API server base URL
    #[serde(default = "default_api_server")]
    pub api_server: String,

    /// Namespace to watch; empty means all namespaces
    #[serde(default)]
    pub namespace: String,

    /// Bearer token file, read once at startup
    #[serde(default)]
    pub bearer_token_file: Option<PathBuf>,

    /// PEM bundle trusted for the API server certificate
    #[serde(default)]
    pub ca_cert_file: Option<PathBuf>,
}

fn default_api_server() -> String {
    "https://kubernetes.default.svc".to_string()
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            api_server: default_api_server(),
            namespace: String::new(),
            bearer_token_file: Some(PathBuf::from(
                "/var/run/secrets/kubernetes.io/serviceaccount/token",
            )),
            ca_cert_file: Some(PathBuf::from(
                "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt",
            )),
        }
    }
}

/// Metric naming and classification settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Exposed metric name
    #[serde(default = "default_metric_name")]
    pub metric_name: String,

    /// Parameter whose array value forms the `build_platform` label
    #[serde(default = "default_platform_param")]
    pub platform_param: String,

    /// Closed set of status labels emitted for every entity
    #[serde(default = "default_taxonomy")]
    pub taxonomy: Vec<String>,
}

fn default_metric_name() -> String {
    "tekton_kueue_pipelinerun_status".to_string()
}

fn default_platform_param() -> String {
    DEFAULT_PLATFORM_PARAM.to_string()
}

fn default_taxonomy() -> Vec<String> {
    StatusLabel::KNOWN.iter().map(|l| l.as_str().to_string()).collect()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            metric_name: default_metric_name(),
            platform_param: default_platform_param(),
            taxonomy: default_taxonomy(),
        }
    }
}

impl MetricsConfig {
    /// Classifier configured with the platform parameter
    pub fn classifier(&self) -> Classifier {
        Classifier::new(self.platform_param.clone())
    }

    /// Status taxonomy in configured order
    pub fn status_taxonomy(&self) -> StatusTaxonomy {
        StatusTaxonomy::new(self.taxonomy.iter().cloned())
    }
}

/// Exporter configuration loaded from TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Bind address (e.g., "0.0.0.0")
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Bind port (default: 9090)
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,

    /// Operating mode
    #[serde(default)]
    pub mode: Mode,

    /// Cluster access
    #[serde(default)]
    pub source: SourceConfig,

    /// Reactive mode tuning
    #[serde(default)]
    pub controller: ControllerConfig,

    /// Pull mode tuning
    #[serde(default)]
    pub collector: CollectorConfig,

    /// Metric naming
    #[serde(default)]
    pub metrics: MetricsConfig,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_bind_port() -> u16 {
    9090
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            bind_port: default_bind_port(),
            mode: Mode::default(),
            source: SourceConfig::default(),
            controller: ControllerConfig::default(),
            collector: CollectorConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl ExporterConfig {
    /// Load and validate configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: ExporterConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every section
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] describing the first violation
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.metrics.metric_name.trim().is_empty() {
            return Err(ConfigError::Invalid("metrics.metric_name must not be empty".to_string()));
        }
        if self.metrics.status_taxonomy().is_empty() {
            return Err(ConfigError::Invalid("metrics.taxonomy must not be empty".to_string()));
        }
        if self.source.api_server.trim().is_empty() {
            return Err(ConfigError::Invalid("source.api_server must not be empty".to_string()));
        }
        self.controller
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.collector
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }

    /// Override the resync interval (from `SCRAPE_INTERVAL`)
    pub fn with_scrape_interval(mut self, secs: u64) -> Self {
        self.controller.reconcile_interval_secs = secs;
        self
    }

    /// Get the full bind address (address:port)
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.bind_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ExporterConfig::default();
        assert_eq!(config.bind_addr(), "0.0.0.0:9090");
        assert_eq!(config.mode, Mode::Pull);
        assert_eq!(config.metrics.metric_name, "tekton_kueue_pipelinerun_status");
        assert_eq!(config.metrics.taxonomy.len(), 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            bind_address = "127.0.0.1"
            bind_port = 9100
            mode = "reactive"

            [source]
            api_server = "https://10.0.0.1:6443"
            namespace = "builds"

            [controller]
            reconcile_interval_secs = 15

            [metrics]
            taxonomy = ["Running", "Succeeded", "Failed"]
        "#;

        let config: ExporterConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.bind_addr(), "127.0.0.1:9100");
        assert_eq!(config.mode, Mode::Reactive);
        assert_eq!(config.source.namespace, "builds");
        assert_eq!(config.source.bearer_token_file, None);
        assert_eq!(config.controller.reconcile_interval_secs, 15);
        assert_eq!(config.controller.source_timeout_secs, 10);
        assert_eq!(config.metrics.status_taxonomy().len(), 3);
        assert_eq!(config.metrics.platform_param, "build-platforms");
    }

    #[test]
    fn test_validate_rejects_empty_taxonomy() {
        let mut config = ExporterConfig::default();
        config.metrics.taxonomy = vec![String::new()];
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = ExporterConfig::default().with_scrape_interval(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("Reactive".parse::<Mode>().unwrap(), Mode::Reactive);
        assert_eq!("pull".parse::<Mode>().unwrap(), Mode::Pull);
        assert!("push".parse::<Mode>().is_err());
    }
}
