//! Configuration for the K8sGPT exporter.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

use k8sgpt_common::{LoggingConfig, load_config, parse_config};

use crate::mapping::sanitize_metric_name;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] k8sgpt_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Prometheus endpoint settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    /// Where diagnostic records come from.
    #[serde(default)]
    pub source: SourceConfig,

    /// Poll loop settings.
    #[serde(default)]
    pub polling: PollingConfig,

    /// Label value limits.
    #[serde(default)]
    pub labels: LabelConfig,

    /// Namespace filtering applied before aggregation.
    #[serde(default)]
    pub filters: FilterConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Prometheus HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,

    /// Labels added to every exported series.
    #[serde(default)]
    pub default_labels: HashMap<String, String>,

    /// Metric name prefix (default: "k8sgpt").
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

fn default_prefix() -> String {
    "k8sgpt".to_string()
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
            default_labels: HashMap::new(),
            prefix: default_prefix(),
        }
    }
}

/// Record source backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Kubernetes API through in-cluster config or kubeconfig.
    #[default]
    Api,
    /// `kubectl get ... -o json` subprocess.
    Kubectl,
}

/// Record source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub kind: SourceKind,

    /// Restrict listing to one namespace (default: all namespaces).
    #[serde(default)]
    pub namespace: Option<String>,

    /// Custom resource API group.
    #[serde(default = "default_group")]
    pub group: String,

    /// Custom resource API version.
    #[serde(default = "default_version")]
    pub version: String,

    /// Custom resource kind.
    #[serde(default = "default_resource_kind")]
    pub resource_kind: String,

    /// Custom resource plural name.
    #[serde(default = "default_plural")]
    pub plural: String,

    /// kubectl binary, used by the `kubectl` source.
    #[serde(default = "default_kubectl_path")]
    pub kubectl_path: String,
}

fn default_group() -> String {
    "core.k8sgpt.ai".to_string()
}

fn default_version() -> String {
    "v1alpha1".to_string()
}

fn default_resource_kind() -> String {
    "Result".to_string()
}

fn default_plural() -> String {
    "results".to_string()
}

fn default_kubectl_path() -> String {
    "kubectl".to_string()
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::default(),
            namespace: None,
            group: default_group(),
            version: default_version(),
            resource_kind: default_resource_kind(),
            plural: default_plural(),
            kubectl_path: default_kubectl_path(),
        }
    }
}

/// Poll loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Seconds between poll cycle starts.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
}

fn default_interval() -> u64 {
    30
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
        }
    }
}

/// Label value configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelConfig {
    /// Maximum characters in a free-text label value.
    #[serde(default = "default_max_len")]
    pub max_len: usize,
}

fn default_max_len() -> usize {
    200
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            max_len: default_max_len(),
        }
    }
}

/// Namespace filtering configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Glob patterns for namespaces to include (empty = all).
    #[serde(default)]
    pub include_namespaces: Vec<String>,

    /// Glob patterns for namespaces to exclude.
    #[serde(default)]
    pub exclude_namespaces: Vec<String>,
}

/// Values taken from the environment or command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub listen: Option<String>,
    pub port: Option<u16>,
    pub poll_interval_secs: Option<u64>,
    pub namespace: Option<String>,
    pub label_max_len: Option<usize>,
    pub log_level: Option<String>,
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: ExporterConfig = load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment/CLI overrides and re-validate.
    ///
    /// `port` replaces the port of the listen address, after `listen` has been
    /// applied. An empty namespace means all namespaces.
    pub fn apply(&mut self, overrides: Overrides) -> Result<(), ConfigError> {
        if let Some(listen) = overrides.listen {
            self.prometheus.listen = listen;
        }

        if let Some(port) = overrides.port {
            let mut addr = self.listen_addr()?;
            addr.set_port(port);
            self.prometheus.listen = addr.to_string();
        }

        if let Some(secs) = overrides.poll_interval_secs {
            self.polling.interval_secs = secs;
        }

        if let Some(namespace) = overrides.namespace {
            self.source.namespace = Some(namespace).filter(|ns| !ns.is_empty());
        }

        if let Some(max_len) = overrides.label_max_len {
            self.labels.max_len = max_len;
        }

        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }

        self.validate()
    }

    /// Parsed listen address.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.prometheus.listen.parse().map_err(|_| {
            ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.prometheus.listen
            ))
        })
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.polling.interval_secs == 0 {
            return Err(ConfigError::Validation(
                "interval_secs must be > 0".to_string(),
            ));
        }

        if self.labels.max_len < 3 {
            return Err(ConfigError::Validation(
                "labels.max_len must be >= 3".to_string(),
            ));
        }

        self.listen_addr()?;

        if !self.prometheus.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        if matches!(self.prometheus.path.as_str(), "/health" | "/ready") {
            return Err(ConfigError::Validation(format!(
                "Metrics path {} is reserved",
                self.prometheus.path
            )));
        }

        if !self.prometheus.prefix.is_empty()
            && sanitize_metric_name(&self.prometheus.prefix) != self.prometheus.prefix
        {
            return Err(ConfigError::Validation(format!(
                "Invalid metric prefix: {}",
                self.prometheus.prefix
            )));
        }

        if self.source.plural.is_empty() || self.source.group.is_empty() {
            return Err(ConfigError::Validation(
                "source.group and source.plural must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8sgpt_common::LogFormat;
    use std::io::Write;

    #[test]
    fn test_parse_minimal_config() {
        let config = ExporterConfig::parse("{}").unwrap();

        assert_eq!(config.prometheus.listen, "0.0.0.0:8080");
        assert_eq!(config.prometheus.path, "/metrics");
        assert_eq!(config.prometheus.prefix, "k8sgpt");
        assert_eq!(config.polling.interval_secs, 30);
        assert_eq!(config.labels.max_len, 200);
        assert_eq!(config.source.kind, SourceKind::Api);
        assert_eq!(config.source.namespace, None);
        assert_eq!(config.source.plural, "results");
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            prometheus: {
                listen: "127.0.0.1:9101",
                path: "/k8sgpt/metrics",
                prefix: "diag",
                default_labels: { cluster: "prod-eu" }
            },
            source: {
                kind: "kubectl",
                namespace: "k8sgpt",
                kubectl_path: "/usr/local/bin/kubectl"
            },
            polling: { interval_secs: 60 },
            labels: { max_len: 120 },
            filters: {
                exclude_namespaces: ["kube-*"]
            },
            logging: {
                level: "debug",
                format: "json"
            }
        }"#;

        let config = ExporterConfig::parse(json).unwrap();

        assert_eq!(config.prometheus.listen, "127.0.0.1:9101");
        assert_eq!(config.prometheus.path, "/k8sgpt/metrics");
        assert_eq!(config.prometheus.prefix, "diag");
        assert_eq!(
            config.prometheus.default_labels.get("cluster"),
            Some(&"prod-eu".to_string())
        );
        assert_eq!(config.source.kind, SourceKind::Kubectl);
        assert_eq!(config.source.namespace.as_deref(), Some("k8sgpt"));
        assert_eq!(config.source.kubectl_path, "/usr/local/bin/kubectl");
        assert_eq!(config.polling.interval_secs, 60);
        assert_eq!(config.labels.max_len, 120);
        assert_eq!(config.filters.exclude_namespaces, vec!["kube-*"]);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{ polling: {{ interval_secs: 5 }} }}").unwrap();

        let config = ExporterConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.polling.interval_secs, 5);
    }

    #[test]
    fn test_validate_invalid_listen() {
        let result = ExporterConfig::parse(r#"{ prometheus: { listen: "not-an-address" } }"#);
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Invalid listen address")
        );
    }

    #[test]
    fn test_validate_invalid_path() {
        let result = ExporterConfig::parse(r#"{ prometheus: { path: "metrics" } }"#);
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("must start with /")
        );
    }

    #[test]
    fn test_validate_invalid_prefix() {
        let result = ExporterConfig::parse(r#"{ prometheus: { prefix: "k8s-gpt" } }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_zero_interval() {
        assert!(ExporterConfig::parse("{ polling: { interval_secs: 0 } }").is_err());
    }

    #[test]
    fn test_validate_tiny_label_length() {
        assert!(ExporterConfig::parse("{ labels: { max_len: 2 } }").is_err());
        assert!(ExporterConfig::parse("{ labels: { max_len: 3 } }").is_ok());
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = ExporterConfig::default();
        config
            .apply(Overrides {
                port: Some(9400),
                poll_interval_secs: Some(10),
                namespace: Some("k8sgpt".to_string()),
                label_max_len: Some(64),
                log_level: Some("debug".to_string()),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(config.prometheus.listen, "0.0.0.0:9400");
        assert_eq!(config.polling.interval_secs, 10);
        assert_eq!(config.source.namespace.as_deref(), Some("k8sgpt"));
        assert_eq!(config.labels.max_len, 64);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_apply_port_after_listen() {
        let mut config = ExporterConfig::default();
        config
            .apply(Overrides {
                listen: Some("127.0.0.1:1234".to_string()),
                port: Some(8081),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(config.prometheus.listen, "127.0.0.1:8081");
    }

    #[test]
    fn test_apply_empty_namespace_means_all() {
        let mut config = ExporterConfig::default();
        config.source.namespace = Some("ops".to_string());
        config
            .apply(Overrides {
                namespace: Some(String::new()),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(config.source.namespace, None);
    }

    #[test]
    fn test_apply_rejects_invalid_values() {
        let mut config = ExporterConfig::default();
        let result = config.apply(Overrides {
            poll_interval_secs: Some(0),
            ..Default::default()
        });
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }
}
