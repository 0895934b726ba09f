//! Rule, condition and action types

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{RuleError, RuleResult};
use crate::findings::Severity;
use crate::snapshot::{Metric, Snapshot};

/// Default confidence of a fired rule
pub const DEFAULT_RULE_CONFIDENCE: f64 = 0.8;

const EQ_TOLERANCE: f64 = 1e-9;

/// Comparison operator of a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl Operator {
    pub fn holds(&self, observed: f64, threshold: f64) -> bool {
        match self {
            Self::Gt => observed > threshold,
            Self::Ge => observed >= threshold,
            Self::Lt => observed < threshold,
            Self::Le => observed <= threshold,
            Self::Eq => (observed - threshold).abs() <= EQ_TOLERANCE,
            Self::Ne => (observed - threshold).abs() > EQ_TOLERANCE,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// `metric op threshold`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub metric: Metric,
    pub op: Operator,
    pub threshold: f64,
}

impl Condition {
    pub fn new(metric: Metric, op: Operator, threshold: f64) -> Self {
        Self {
            metric,
            op,
            threshold,
        }
    }

    /// Observed value when the condition holds. Absent metrics never hold.
    pub fn check(&self, snapshot: &Snapshot) -> Option<f64> {
        let observed = snapshot.metric(self.metric)?;
        (observed.is_finite() && self.op.holds(observed, self.threshold)).then_some(observed)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.metric, self.op, self.threshold)
    }
}

/// What a fired rule reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleAction {
    pub severity: Severity,
    /// Issue text; `{value}` is replaced with the observed metric value
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

/// A threshold rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Unique key; built-in rules win on collision
    pub id: String,
    pub category: String,
    pub condition: Condition,
    pub action: RuleAction,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_confidence() -> f64 {
    DEFAULT_RULE_CONFIDENCE
}

fn default_enabled() -> bool {
    true
}

impl Rule {
    pub fn new(
        id: &str,
        category: &str,
        condition: Condition,
        severity: Severity,
        message: &str,
    ) -> Self {
        Self {
            id: id.to_string(),
            category: category.to_string(),
            condition,
            action: RuleAction {
                severity,
                message: message.to_string(),
                recommendation: None,
            },
            confidence: DEFAULT_RULE_CONFIDENCE,
            enabled: true,
        }
    }

    pub fn with_recommendation(mut self, recommendation: &str) -> Self {
        self.action.recommendation = Some(recommendation.to_string());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Check the structural contract of a rule
    pub fn validate(&self) -> RuleResult<()> {
        let invalid = |reason: &str| RuleError::Invalid {
            rule_id: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("id must not be empty"));
        }
        if self.category.trim().is_empty() {
            return Err(invalid("category must not be empty"));
        }
        if !self.condition.threshold.is_finite() {
            return Err(invalid("threshold must be finite"));
        }
        if self.action.message.trim().is_empty() {
            return Err(invalid("message must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(invalid("confidence must be within 0..=1"));
        }
        Ok(())
    }

    /// Render the action message for an observed value
    pub fn render_message(&self, observed: f64) -> String {
        self.action
            .message
            .replace("{value}", &format!("{observed:.1}"))
    }
}
