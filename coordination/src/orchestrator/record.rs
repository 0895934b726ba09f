//! The final output of a diagnosis run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::agent::AgentStatus;
use crate::audit::AuditRef;
use crate::consensus::{ConsensusResult, RankedFinding};
use crate::events::RunId;
use crate::findings::AgentId;

/// Why the rule evaluator contributed to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// Snapshot failed the mandatory-field check
    InvalidSnapshot,
    /// No agent produced a usable run
    AllAgentsFailed,
    /// Cross-validation or aggregation faulted
    PipelineFault,
    /// Aggregate confidence was below the threshold
    LowConfidence,
}

impl FallbackReason {
    /// Whether the record is built from rules alone
    pub fn is_rule_only(&self) -> bool {
        !matches!(self, Self::LowConfidence)
    }
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSnapshot => write!(f, "invalid_snapshot"),
            Self::AllAgentsFailed => write!(f, "all_agents_failed"),
            Self::PipelineFault => write!(f, "pipeline_fault"),
            Self::LowConfidence => write!(f, "low_confidence"),
        }
    }
}

/// Per-agent line of a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub agent: AgentId,
    pub role: String,
    pub status: AgentStatus,
    pub stages: usize,
    pub confidence: f64,
    /// Trust weight from cross-validation; 0.0 for failed agents
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

/// Immutable result handed to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisRecord {
    pub run_id: RunId,
    pub collection_id: String,
    pub consensus: ConsensusResult,
    /// Aggregate agent confidence; 0.0 when no agent could be trusted
    pub confidence: f64,
    pub rule_engine_used: bool,
    /// False when the record comes from a fallback path alone
    pub validated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<FallbackReason>,
    pub agents: Vec<AgentSummary>,
    /// 1.0 is healthy; each issue subtracts a severity-based penalty
    pub health_score: f64,
    pub audit: AuditRef,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl DiagnosisRecord {
    pub fn top_issue(&self) -> Option<&RankedFinding> {
        self.consensus.top_issue()
    }

    pub fn issues(&self) -> &[RankedFinding] {
        &self.consensus.issues
    }

    pub fn recommendations(&self) -> &[RankedFinding] {
        &self.consensus.recommendations
    }

    pub fn elapsed_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

pub(crate) fn health_score(consensus: &ConsensusResult) -> f64 {
    let penalty: f64 = consensus
        .issues
        .iter()
        .map(|i| i.finding.severity.health_penalty())
        .sum();
    (1.0 - penalty).clamp(0.0, 1.0)
}
