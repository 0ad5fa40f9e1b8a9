//! Diagnostic records and field extraction.
//!
//! Records come from K8sGPT custom resources whose shape differs between
//! schema versions. Rather than modelling every version as a type, fields are
//! pulled out through an [`ExtractionPolicy`]: for each normalized field an
//! ordered list of paths is tried and the first non-empty value wins.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::severity::Severity;

/// Namespace used when a record carries none.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Placeholder for a missing kind or name.
pub const UNKNOWN: &str = "unknown";

/// A single diagnostic record as returned by a record source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Value);

impl Record {
    /// Wrap a raw JSON value.
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Borrow the underlying JSON value.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Resolve a path, treating explicit `null` as absent.
    pub fn get(&self, path: &FieldPath) -> Option<&Value> {
        path.resolve(&self.0)
    }
}

impl From<Value> for Record {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// A path of object keys into a record, e.g. `spec.result.summary`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldPath(&'static [&'static str]);

impl FieldPath {
    pub const fn new(segments: &'static [&'static str]) -> Self {
        Self(segments)
    }

    /// Walk the path. Non-object intermediates and `null` leaves yield `None`.
    pub fn resolve<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        self.0
            .iter()
            .try_fold(value, |current, key| current.get(*key))
            .filter(|v| !v.is_null())
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// Ordered fallback rules for each normalized field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionPolicy {
    pub namespace: Vec<FieldPath>,
    pub kind: Vec<FieldPath>,
    pub name: Vec<FieldPath>,
    pub error: Vec<FieldPath>,
    pub remediation: Vec<FieldPath>,
    pub recommended_steps: Vec<FieldPath>,
}

impl ExtractionPolicy {
    /// Policy covering both the `Result` and the `K8sGPT` resource shapes.
    ///
    /// Flat records (`{namespace, error, details}`) are accepted as a last
    /// resort. `kind` has no top-level fallback: on a custom resource that
    /// key holds the resource type (`Result`), not the affected object.
    pub fn k8sgpt() -> Self {
        Self {
            namespace: vec![
                FieldPath::new(&["metadata", "namespace"]),
                FieldPath::new(&["namespace"]),
            ],
            kind: vec![FieldPath::new(&["spec", "kind"])],
            name: vec![
                FieldPath::new(&["spec", "name"]),
                FieldPath::new(&["spec", "analysis", "name"]),
                FieldPath::new(&["metadata", "name"]),
            ],
            error: vec![
                FieldPath::new(&["spec", "error"]),
                FieldPath::new(&["spec", "result", "summary"]),
                FieldPath::new(&["spec", "ai", "summary"]),
                FieldPath::new(&["error"]),
            ],
            remediation: vec![
                FieldPath::new(&["spec", "details"]),
                FieldPath::new(&["details"]),
            ],
            recommended_steps: vec![
                FieldPath::new(&["spec", "result", "recommended_steps"]),
                FieldPath::new(&["spec", "ai", "recommended_steps"]),
                FieldPath::new(&["spec", "details"]),
                FieldPath::new(&["details"]),
            ],
        }
    }

    /// Extract normalized fields from a record. Never fails.
    pub fn extract(&self, record: &Record) -> ExtractedFields {
        ExtractedFields {
            namespace: first_text(record, &self.namespace)
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            kind: first_text(record, &self.kind).unwrap_or_else(|| UNKNOWN.to_string()),
            name: first_text(record, &self.name).unwrap_or_else(|| UNKNOWN.to_string()),
            error_text: first_text(record, &self.error).unwrap_or_default(),
            has_remediation: self
                .remediation
                .iter()
                .filter_map(|path| record.get(path))
                .any(is_truthy),
            recommended_steps: first_text(record, &self.recommended_steps).unwrap_or_default(),
        }
    }
}

impl Default for ExtractionPolicy {
    fn default() -> Self {
        Self::k8sgpt()
    }
}

/// Normalized view of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExtractedFields {
    pub namespace: String,
    pub kind: String,
    pub name: String,
    pub error_text: String,
    pub has_remediation: bool,
    pub recommended_steps: String,
}

impl ExtractedFields {
    /// Attach the severity derived from the error text.
    pub fn classify(self) -> ClassifiedRecord {
        let severity = Severity::classify(&self.error_text);
        ClassifiedRecord {
            fields: self,
            severity,
        }
    }
}

/// Extracted fields plus derived severity. Rebuilt on every poll.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassifiedRecord {
    pub fields: ExtractedFields,
    pub severity: Severity,
}

impl ClassifiedRecord {
    /// Extract and classify in one step.
    pub fn from_record(record: &Record, policy: &ExtractionPolicy) -> Self {
        policy.extract(record).classify()
    }
}

/// First non-empty text value along the given paths.
fn first_text(record: &Record, paths: &[FieldPath]) -> Option<String> {
    paths
        .iter()
        .filter_map(|path| record.get(path))
        .map(coerce_text)
        .find(|text| !text.is_empty())
}

/// Coerce a JSON value to text.
///
/// Sequences are joined with a single space. Objects use their `text` field
/// when it is a string (the K8sGPT `{text, sensitive}` failure shape),
/// otherwise their compact JSON form.
pub fn coerce_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .map(coerce_text)
            .collect::<Vec<_>>()
            .join(" "),
        Value::Object(map) => match map.get("text") {
            Some(Value::String(text)) => text.clone(),
            _ => value.to_string(),
        },
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
