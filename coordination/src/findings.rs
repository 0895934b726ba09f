//! Findings shared by agents, rules and the consensus aggregator

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one configured agent (its roster name)
pub type AgentId = String;

/// Ordered severity scale
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Health-score penalty contributed by one issue of this severity
    pub fn health_penalty(&self) -> f64 {
        match self {
            Self::Info => 0.0,
            Self::Low => 0.05,
            Self::Medium => 0.1,
            Self::High => 0.2,
            Self::Critical => 0.4,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    Issue,
    Recommendation,
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Issue => write!(f, "issue"),
            Self::Recommendation => write!(f, "recommendation"),
        }
    }
}

/// A structured claim about the machine: an issue or a recommended action
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub category: String,
    pub description: String,
    #[serde(default)]
    pub severity: Severity,
}

impl Finding {
    pub fn issue(
        category: impl Into<String>,
        description: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            kind: FindingKind::Issue,
            category: category.into(),
            description: description.into(),
            severity,
        }
    }

    pub fn recommendation(
        category: impl Into<String>,
        description: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            kind: FindingKind::Recommendation,
            category: category.into(),
            description: description.into(),
            severity,
        }
    }

    pub fn is_issue(&self) -> bool {
        self.kind == FindingKind::Issue
    }

    /// Key under which content-equal findings are merged
    pub fn content_key(&self) -> (FindingKind, String, String) {
        (
            self.kind,
            normalize_text(&self.category),
            normalize_text(&self.description),
        )
    }
}

/// Lowercase, keep alphanumeric runs, join them with single spaces
pub fn normalize_text(text: &str) -> String {
    tokenize(text).collect::<Vec<_>>().join(" ")
}

/// Lowercased alphanumeric tokens of `text`, in order
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(Severity::High.to_string(), "high");
    }

    #[test]
    fn test_normalize_text_collapses_case_and_punctuation() {
        assert_eq!(
            normalize_text("  CPU usage is HIGH (92%)! "),
            "cpu usage is high 92"
        );
    }

    #[test]
    fn test_content_key_ignores_formatting() {
        let a = Finding::issue("cpu", "CPU usage is high.", Severity::High);
        let b = Finding::issue("CPU", "cpu usage  is high", Severity::Medium);
        assert_eq!(a.content_key(), b.content_key());

        let rec = Finding::recommendation("cpu", "CPU usage is high.", Severity::High);
        assert_ne!(a.content_key(), rec.content_key());
    }
}
