//! Metric collector: owns the exported metric state and reconciles it
//! against each poll's aggregate.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::aggregate::Aggregate;
use crate::config::{LabelConfig, PrometheusConfig};
use crate::mapping::{PrometheusType, build_metric_name, sanitize_label_name, truncate_label};

/// Gauge families derived from the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetricFamily {
    IssuesTotal,
    IssuesByKind,
    IssuesBySeverity,
    RemediationAvailable,
    IssueInfo,
}

impl MetricFamily {
    /// All families, in exposition order.
    pub const ALL: [MetricFamily; 5] = [
        MetricFamily::IssuesTotal,
        MetricFamily::IssuesByKind,
        MetricFamily::IssuesBySeverity,
        MetricFamily::RemediationAvailable,
        MetricFamily::IssueInfo,
    ];

    /// Metric name without the prefix.
    pub fn suffix(&self) -> &'static str {
        match self {
            MetricFamily::IssuesTotal => "issues_total",
            MetricFamily::IssuesByKind => "issues_by_kind",
            MetricFamily::IssuesBySeverity => "issues_by_severity",
            MetricFamily::RemediationAvailable => "remediation_available",
            MetricFamily::IssueInfo => "issue_info",
        }
    }

    pub fn help(&self) -> &'static str {
        match self {
            MetricFamily::IssuesTotal => "Total number of issues detected by K8sGPT",
            MetricFamily::IssuesByKind => "Issues by Kubernetes resource kind",
            MetricFamily::IssuesBySeverity => "Issues by severity level",
            MetricFamily::RemediationAvailable => "Number of issues with remediation available",
            MetricFamily::IssueInfo => "Detailed issue information",
        }
    }
}

/// A unique identifier for a metric time series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesKey {
    pub family: MetricFamily,
    /// Label key-value pairs in the family's declared order.
    pub labels: Vec<(String, String)>,
}

impl SeriesKey {
    pub fn new<K, V>(family: MetricFamily, labels: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            family,
            labels: labels
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Format labels for Prometheus exposition format.
    pub fn format_labels(&self) -> String {
        format_labels(&self.labels)
    }
}

/// Outcome of one reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Series written with the new aggregate's values.
    pub set: usize,
    /// Series from the previous cycle that were removed.
    pub retired: usize,
}

/// Collector statistics.
#[derive(Debug, Clone, Default)]
pub struct CollectorStats {
    /// Poll cycles attempted.
    pub polls_total: u64,
    /// Poll cycles that completed.
    pub polls_succeeded: u64,
    /// Poll cycles that failed; exported as the analysis error counter.
    pub polls_failed: u64,
    /// Records counted by the last successful poll.
    pub records_last_poll: u64,
    /// Total series removed because they disappeared from the aggregate.
    pub series_retired: u64,
    /// Unix time (seconds) of the last successful poll.
    pub last_success_timestamp: Option<f64>,
}

/// Thread-safe metric collector.
///
/// All writes to the exported series go through [`MetricCollector::reconcile`];
/// individual series are set and removed one at a time so concurrent scrapes
/// see each series either at its old or its new value.
pub struct MetricCollector {
    series: RwLock<HashMap<SeriesKey, f64>>,
    prometheus_config: PrometheusConfig,
    label_config: LabelConfig,
    stats: RwLock<CollectorStats>,
}

impl MetricCollector {
    /// Create a new metric collector.
    pub fn new(prometheus_config: PrometheusConfig, label_config: LabelConfig) -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            prometheus_config,
            label_config,
            stats: RwLock::new(CollectorStats::default()),
        }
    }

    /// Replace the exported gauges with the values from `aggregate`.
    ///
    /// Every series produced by the aggregate is set to its count; every
    /// series from the previous cycle that the aggregate no longer produces
    /// is removed.
    pub fn reconcile(&self, aggregate: &Aggregate) -> ReconcileSummary {
        let desired = self.desired_series(aggregate);

        let stale: Vec<SeriesKey> = self
            .series
            .read()
            .keys()
            .filter(|key| !desired.contains_key(*key))
            .cloned()
            .collect();

        for key in &stale {
            self.remove(key);
        }

        let summary = ReconcileSummary {
            set: desired.len(),
            retired: stale.len(),
        };

        for (key, value) in desired {
            self.set(key, value);
        }

        if summary.retired > 0 {
            debug!(retired = summary.retired, "Retired stale series");
            self.stats.write().series_retired += summary.retired as u64;
        }

        summary
    }

    /// Record a completed poll cycle.
    pub fn record_success(&self, records: usize) {
        let now = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
        let mut stats = self.stats.write();
        stats.polls_total += 1;
        stats.polls_succeeded += 1;
        stats.records_last_poll = records as u64;
        stats.last_success_timestamp = Some(now);
    }

    /// Record a failed poll cycle. Exported series are left untouched.
    pub fn record_failure(&self) {
        let mut stats = self.stats.write();
        stats.polls_total += 1;
        stats.polls_failed += 1;
    }

    /// Current value of a series, `None` if it is not exported.
    pub fn get(&self, key: &SeriesKey) -> Option<f64> {
        self.series.read().get(key).copied()
    }

    /// Get the current number of stored series.
    pub fn series_count(&self) -> usize {
        self.series.read().len()
    }

    /// Get collector statistics.
    pub fn stats(&self) -> CollectorStats {
        self.stats.read().clone()
    }

    fn set(&self, key: SeriesKey, value: f64) {
        self.series.write().insert(key, value);
    }

    fn remove(&self, key: &SeriesKey) {
        self.series.write().remove(key);
    }

    /// Build the label sets for an aggregate. Free-text values are truncated;
    /// label sets that collide after truncation are summed.
    fn desired_series(&self, aggregate: &Aggregate) -> HashMap<SeriesKey, f64> {
        let max_len = self.label_config.max_len;
        let bound = |value: &str| truncate_label(value, max_len);
        let mut desired: HashMap<SeriesKey, f64> = HashMap::new();
        let mut add = |key: SeriesKey, count: u64| {
            if count > 0 {
                *desired.entry(key).or_default() += count as f64;
            }
        };

        for (namespace, count) in &aggregate.issues_total {
            add(
                SeriesKey::new(MetricFamily::IssuesTotal, [("namespace", bound(namespace))]),
                *count,
            );
        }

        for ((kind, namespace), count) in &aggregate.by_kind {
            add(
                SeriesKey::new(
                    MetricFamily::IssuesByKind,
                    [("kind", bound(kind)), ("namespace", bound(namespace))],
                ),
                *count,
            );
        }

        for ((severity, namespace), count) in &aggregate.by_severity {
            add(
                SeriesKey::new(
                    MetricFamily::IssuesBySeverity,
                    [
                        ("severity", severity.as_str().to_string()),
                        ("namespace", bound(namespace)),
                    ],
                ),
                *count,
            );
        }

        for (namespace, count) in &aggregate.remediation_available {
            add(
                SeriesKey::new(
                    MetricFamily::RemediationAvailable,
                    [("namespace", bound(namespace))],
                ),
                *count,
            );
        }

        for (issue, count) in &aggregate.issues {
            add(
                SeriesKey::new(
                    MetricFamily::IssueInfo,
                    [
                        ("namespace", bound(&issue.namespace)),
                        ("kind", bound(&issue.kind)),
                        ("name", bound(&issue.name)),
                        ("severity", issue.severity.as_str().to_string()),
                        ("has_remediation", issue.has_remediation.to_string()),
                        ("summary", bound(&issue.summary)),
                        ("recommended_steps", bound(&issue.recommended_steps)),
                    ],
                ),
                *count,
            );
        }

        desired
    }

    /// Render metrics in Prometheus exposition format.
    pub fn render(&self) -> String {
        let series = self.series.read();
        let stats = self.stats.read().clone();
        let prefix = &self.prometheus_config.prefix;
        let mut output = Vec::with_capacity(series.len() * 100 + 1024);

        let mut default_labels: Vec<(String, String)> = self
            .prometheus_config
            .default_labels
            .iter()
            .map(|(k, v)| (sanitize_label_name(k), v.clone()))
            .collect();
        default_labels.sort();

        let mut by_family: HashMap<MetricFamily, Vec<(&SeriesKey, f64)>> = HashMap::new();
        for (key, value) in series.iter() {
            by_family.entry(key.family).or_default().push((key, *value));
        }

        for family in MetricFamily::ALL {
            let name = build_metric_name(prefix, family.suffix());
            write_header(&mut output, &name, family.help(), PrometheusType::Gauge);

            let Some(entries) = by_family.get_mut(&family) else {
                continue;
            };
            entries.sort_by(|a, b| a.0.labels.cmp(&b.0.labels));

            for (key, value) in entries.iter() {
                let mut labels = key.labels.clone();
                for (k, v) in &default_labels {
                    if !labels.iter().any(|(lk, _)| lk == k) {
                        labels.push((k.clone(), v.clone()));
                    }
                }
                writeln!(
                    output,
                    "{}{} {}",
                    name,
                    format_labels(&labels),
                    format_value(*value)
                )
                .ok();
            }
        }

        let default_label_str = format_labels(&default_labels);
        let mut write_scalar = |suffix: &str, help: &str, kind: PrometheusType, value: f64| {
            let name = build_metric_name(prefix, suffix);
            write_header(&mut output, &name, help, kind);
            writeln!(output, "{}{} {}", name, default_label_str, format_value(value)).ok();
        };

        write_scalar(
            "last_analysis_timestamp",
            "Timestamp of last K8sGPT analysis",
            PrometheusType::Gauge,
            stats.last_success_timestamp.unwrap_or(0.0),
        );
        write_scalar(
            "analysis_errors_total",
            "Total number of analysis errors",
            PrometheusType::Counter,
            stats.polls_failed as f64,
        );
        write_scalar(
            "exporter_series_total",
            "Number of exported series",
            PrometheusType::Gauge,
            series.len() as f64,
        );
        write_scalar(
            "exporter_polls_total",
            "Poll cycles attempted",
            PrometheusType::Counter,
            stats.polls_total as f64,
        );
        write_scalar(
            "exporter_records_last_poll",
            "Records counted by the last successful poll",
            PrometheusType::Gauge,
            stats.records_last_poll as f64,
        );

        String::from_utf8(output).unwrap_or_default()
    }
}

/// Create a shareable collector handle.
pub type SharedCollector = Arc<MetricCollector>;

fn write_header(output: &mut Vec<u8>, name: &str, help: &str, kind: PrometheusType) {
    writeln!(output, "# HELP {} {}", name, help).ok();
    writeln!(output, "# TYPE {} {}", name, kind.as_str()).ok();
}

/// Escape special characters in label values.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Format a floating point value for Prometheus.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

/// Format labels for Prometheus exposition format.
fn format_labels(labels: &[(String, String)]) -> String {
    if labels.is_empty() {
        return String::new();
    }

    let parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    format!("{{{}}}", parts.join(","))
}
