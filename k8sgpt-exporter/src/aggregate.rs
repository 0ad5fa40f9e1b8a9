//! Folding classified records into label-keyed counts.

use std::collections::HashMap;

use k8sgpt_common::{ClassifiedRecord, ExtractionPolicy, Record, Severity};
use tracing::trace;

use crate::config::FilterConfig;

/// Identity of a single issue for the per-issue info metric.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IssueKey {
    pub namespace: String,
    pub kind: String,
    pub name: String,
    pub severity: Severity,
    pub has_remediation: bool,
    pub summary: String,
    pub recommended_steps: String,
}

impl From<&ClassifiedRecord> for IssueKey {
    fn from(record: &ClassifiedRecord) -> Self {
        let fields = &record.fields;
        Self {
            namespace: fields.namespace.clone(),
            kind: fields.kind.clone(),
            name: fields.name.clone(),
            severity: record.severity,
            has_remediation: fields.has_remediation,
            summary: fields.error_text.clone(),
            recommended_steps: fields.recommended_steps.clone(),
        }
    }
}

/// Count maps computed from one poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregate {
    /// Records that passed the namespace filter.
    pub records: usize,
    /// Records dropped by the namespace filter.
    pub filtered: usize,
    /// Issues per namespace.
    pub issues_total: HashMap<String, u64>,
    /// Issues per `(kind, namespace)`.
    pub by_kind: HashMap<(String, String), u64>,
    /// Issues per `(severity, namespace)`.
    pub by_severity: HashMap<(Severity, String), u64>,
    /// Issues with remediation details per namespace.
    pub remediation_available: HashMap<String, u64>,
    /// Occurrences of each distinct issue.
    pub issues: HashMap<IssueKey, u64>,
}

impl Aggregate {
    /// Fold classified records. The result does not depend on input order.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a ClassifiedRecord>) -> Self {
        let mut aggregate = Self::default();
        for record in records {
            aggregate.add(record);
        }
        aggregate
    }

    fn add(&mut self, record: &ClassifiedRecord) {
        let fields = &record.fields;
        let namespace = &fields.namespace;

        self.records += 1;
        *self.issues_total.entry(namespace.clone()).or_default() += 1;
        *self
            .by_kind
            .entry((fields.kind.clone(), namespace.clone()))
            .or_default() += 1;
        *self
            .by_severity
            .entry((record.severity, namespace.clone()))
            .or_default() += 1;
        if fields.has_remediation {
            *self
                .remediation_available
                .entry(namespace.clone())
                .or_default() += 1;
        }
        *self.issues.entry(IssueKey::from(record)).or_default() += 1;
    }
}

/// Include/exclude glob filter on record namespaces.
pub struct NamespaceFilter {
    include: Vec<glob::Pattern>,
    exclude: Vec<glob::Pattern>,
}

impl NamespaceFilter {
    /// Create a new filter from configuration. Invalid patterns are ignored.
    pub fn new(config: &FilterConfig) -> Self {
        let compile = |patterns: &[String]| -> Vec<glob::Pattern> {
            patterns
                .iter()
                .filter_map(|p| glob::Pattern::new(p).ok())
                .collect()
        };

        Self {
            include: compile(&config.include_namespaces),
            exclude: compile(&config.exclude_namespaces),
        }
    }

    /// Check if records from a namespace should be counted.
    pub fn should_include(&self, namespace: &str) -> bool {
        if !self.include.is_empty() && !self.include.iter().any(|p| p.matches(namespace)) {
            return false;
        }
        !self.exclude.iter().any(|p| p.matches(namespace))
    }
}

impl Default for NamespaceFilter {
    fn default() -> Self {
        Self::new(&FilterConfig::default())
    }
}

/// Extract, classify, filter and fold one poll's records.
pub fn aggregate_records(
    records: &[Record],
    policy: &ExtractionPolicy,
    filter: &NamespaceFilter,
) -> Aggregate {
    let mut accepted = Vec::with_capacity(records.len());
    let mut filtered = 0;

    for record in records {
        let classified = ClassifiedRecord::from_record(record, policy);
        if filter.should_include(&classified.fields.namespace) {
            accepted.push(classified);
        } else {
            trace!(
                namespace = %classified.fields.namespace,
                name = %classified.fields.name,
                "Record filtered out"
            );
            filtered += 1;
        }
    }

    let mut aggregate = Aggregate::from_records(&accepted);
    aggregate.filtered = filtered;
    aggregate
}
