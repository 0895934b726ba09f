//! Deterministic rule evaluation
//!
//! The rule evaluator is the safety net under the agent pipeline. It runs
//! when the snapshot is rejected, when every agent fails, when the aggregate
//! confidence is too low, and when the consensus phase faults.
//!
//! - `rule`: rule, condition and action types
//! - `builtin`: baseline rules that are always active
//! - `loader`: YAML/JSON ingestion of external rule sets
//! - `evaluator`: the pure `evaluate(snapshot)` function and rule-set merging

pub mod builtin;
pub mod evaluator;
pub mod loader;
pub mod rule;

pub use builtin::builtin_rules;
pub use evaluator::{RuleEvaluator, RuleFinding, RuleStatistics, SharedRuleEvaluator};
pub use loader::{IngestionSummary, RuleDocument};
pub use rule::{Condition, Operator, Rule, RuleAction};

/// Errors from rule ingestion and validation
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("failed to read rule file {path}: {detail}")]
    Io { path: String, detail: String },

    #[error("failed to parse rules{}: {detail}", source_suffix(.source_path))]
    Parse {
        source_path: Option<String>,
        detail: String,
    },

    #[error("invalid rule '{rule_id}': {reason}")]
    Invalid { rule_id: String, reason: String },

    #[error("duplicate rule id '{0}' in external rule set")]
    DuplicateId(String),
}

/// Result type for rule operations
pub type RuleResult<T> = Result<T, RuleError>;

fn source_suffix(path: &Option<String>) -> String {
    path.as_ref()
        .map(|p| format!(" from {p}"))
        .unwrap_or_default()
}
