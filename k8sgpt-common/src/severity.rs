use serde::{Deserialize, Serialize};

/// Keywords that mark an issue as critical.
pub const CRITICAL_KEYWORDS: &[&str] = &["critical", "failed", "crash", "oom"];

/// Keywords that mark an issue as a warning.
pub const WARNING_KEYWORDS: &[&str] = &["warning", "deprecated", "misconfigured"];

/// Severity of a diagnostic record, derived from its error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl Severity {
    /// All severities in classification priority order.
    pub const ALL: [Severity; 3] = [Severity::Critical, Severity::Warning, Severity::Info];

    /// Classify free text by case-insensitive keyword matching.
    ///
    /// Critical keywords are checked before warning keywords, so text that
    /// contains both classifies as [`Severity::Critical`]. Empty text is
    /// [`Severity::Info`].
    pub fn classify(text: &str) -> Self {
        let text = text.to_lowercase();

        if CRITICAL_KEYWORDS.iter().any(|k| text.contains(k)) {
            Severity::Critical
        } else if WARNING_KEYWORDS.iter().any(|k| text.contains(k)) {
            Severity::Warning
        } else {
            Severity::Info
        }
    }

    /// Get the string representation used as a label value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text_is_info() {
        assert_eq!(Severity::classify(""), Severity::Info);
    }

    #[test]
    fn test_critical_keywords() {
        assert_eq!(Severity::classify("Back-off restarting failed container"), Severity::Critical);
        assert_eq!(Severity::classify("CrashLoopBackOff"), Severity::Critical);
        assert_eq!(Severity::classify("OOMKilled"), Severity::Critical);
        assert_eq!(Severity::classify("CRITICAL: disk full"), Severity::Critical);
    }

    #[test]
    fn test_warning_keywords() {
        assert_eq!(Severity::classify("deprecated apiVersion"), Severity::Warning);
        assert_eq!(Severity::classify("Service is Misconfigured"), Severity::Warning);
        assert_eq!(Severity::classify("Warning: no endpoints"), Severity::Warning);
    }

    #[test]
    fn test_critical_wins_over_warning() {
        assert_eq!(
            Severity::classify("warning: container was OOMKilled"),
            Severity::Critical
        );
        assert_eq!(
            Severity::classify("deprecated field caused crash"),
            Severity::Critical
        );
    }

    #[test]
    fn test_unmatched_text_is_info() {
        assert_eq!(
            Severity::classify("Service has no ready endpoints"),
            Severity::Info
        );
    }

    #[test]
    fn test_severity_serde() {
        let json = serde_json::to_string(&Severity::Warning).unwrap();
        assert_eq!(json, "\"warning\"");
        let parsed: Severity = serde_json::from_str("\"critical\"").unwrap();
        assert_eq!(parsed, Severity::Critical);
    }

    #[test]
    fn test_display() {
        let labels: Vec<String> = Severity::ALL.iter().map(|s| s.to_string()).collect();
        assert_eq!(labels, vec!["critical", "warning", "info"]);
    }
}
