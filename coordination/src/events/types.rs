//! Event types for diagnosis runs
//!
//! Every event goes to the audit log, the broadcast bus and the per-run
//! stream returned by `run_diagnosis`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::agent::{AgentStatus, DiagnosticTool, GateFailure, ReasoningStage};
use crate::findings::{AgentId, Finding};
use crate::orchestrator::{DiagnosisRecord, FallbackReason};
use crate::snapshot::FieldViolation;

/// Identifier of one diagnosis run
pub type RunId = uuid::Uuid;

/// All diagnosis events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiagnosisEvent {
    /// A diagnosis run was accepted
    RunStarted {
        run_id: RunId,
        collection_id: String,
        agents: Vec<AgentId>,
        timestamp: DateTime<Utc>,
    },

    /// The snapshot met the mandatory-field contract
    SnapshotValidated {
        run_id: RunId,
        timestamp: DateTime<Utc>,
    },

    /// The snapshot was rejected; the run goes straight to rules
    SnapshotRejected {
        run_id: RunId,
        violations: Vec<FieldViolation>,
        timestamp: DateTime<Utc>,
    },

    /// An agent began its stage pipeline
    AgentStarted {
        run_id: RunId,
        agent: AgentId,
        role: String,
        timestamp: DateTime<Utc>,
    },

    /// A stage is about to run
    StageStarted {
        run_id: RunId,
        agent: AgentId,
        stage: ReasoningStage,
        /// `stage_index / total_stages`
        progress: f64,
        /// Running mean over accepted stages
        confidence: f64,
        timestamp: DateTime<Utc>,
    },

    /// A stage passed the quality gate
    StageCompleted {
        run_id: RunId,
        agent: AgentId,
        stage: ReasoningStage,
        progress: f64,
        stage_confidence: f64,
        confidence: f64,
        timestamp: DateTime<Utc>,
    },

    /// A stage was rejected by the quality gate
    StageGateFailed {
        run_id: RunId,
        agent: AgentId,
        failure: GateFailure,
        timestamp: DateTime<Utc>,
    },

    /// A diagnostic tool was called during information gathering
    ToolInvoked {
        run_id: RunId,
        agent: AgentId,
        tool: DiagnosticTool,
        success: bool,
        timestamp: DateTime<Utc>,
    },

    /// An agent reached a terminal status
    AgentFinished {
        run_id: RunId,
        agent: AgentId,
        status: AgentStatus,
        confidence: f64,
        stages: usize,
        findings: Vec<Finding>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        failure: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Trust weights were computed
    CrossValidated {
        run_id: RunId,
        weights: BTreeMap<AgentId, f64>,
        timestamp: DateTime<Utc>,
    },

    /// Weighted findings were merged
    ConsensusReached {
        run_id: RunId,
        issues: usize,
        recommendations: usize,
        confidence: f64,
        timestamp: DateTime<Utc>,
    },

    /// Aggregate confidence was compared to the threshold
    ConfidenceGateEvaluated {
        run_id: RunId,
        confidence: f64,
        threshold: f64,
        passed: bool,
        timestamp: DateTime<Utc>,
    },

    /// The rule evaluator ran
    RuleEngineInvoked {
        run_id: RunId,
        reason: FallbackReason,
        fired: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// The agent pipeline was abandoned for a rule-only record
    EmergencyFallback {
        run_id: RunId,
        reason: FallbackReason,
        detail: String,
        timestamp: DateTime<Utc>,
    },

    /// Final record; always the last event of a run
    RunCompleted {
        run_id: RunId,
        record: Box<DiagnosisRecord>,
        timestamp: DateTime<Utc>,
    },
}

impl DiagnosisEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::SnapshotValidated { .. } => "snapshot_validated",
            Self::SnapshotRejected { .. } => "snapshot_rejected",
            Self::AgentStarted { .. } => "agent_started",
            Self::StageStarted { .. } => "stage_started",
            Self::StageCompleted { .. } => "stage_completed",
            Self::StageGateFailed { .. } => "stage_gate_failed",
            Self::ToolInvoked { .. } => "tool_invoked",
            Self::AgentFinished { .. } => "agent_finished",
            Self::CrossValidated { .. } => "cross_validated",
            Self::ConsensusReached { .. } => "consensus_reached",
            Self::ConfidenceGateEvaluated { .. } => "confidence_gate_evaluated",
            Self::RuleEngineInvoked { .. } => "rule_engine_invoked",
            Self::EmergencyFallback { .. } => "emergency_fallback",
            Self::RunCompleted { .. } => "run_completed",
        }
    }

    pub fn run_id(&self) -> RunId {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::SnapshotValidated { run_id, .. }
            | Self::SnapshotRejected { run_id, .. }
            | Self::AgentStarted { run_id, .. }
            | Self::StageStarted { run_id, .. }
            | Self::StageCompleted { run_id, .. }
            | Self::StageGateFailed { run_id, .. }
            | Self::ToolInvoked { run_id, .. }
            | Self::AgentFinished { run_id, .. }
            | Self::CrossValidated { run_id, .. }
            | Self::ConsensusReached { run_id, .. }
            | Self::ConfidenceGateEvaluated { run_id, .. }
            | Self::RuleEngineInvoked { run_id, .. }
            | Self::EmergencyFallback { run_id, .. }
            | Self::RunCompleted { run_id, .. } => *run_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::RunStarted { timestamp, .. }
            | Self::SnapshotValidated { timestamp, .. }
            | Self::SnapshotRejected { timestamp, .. }
            | Self::AgentStarted { timestamp, .. }
            | Self::StageStarted { timestamp, .. }
            | Self::StageCompleted { timestamp, .. }
            | Self::StageGateFailed { timestamp, .. }
            | Self::ToolInvoked { timestamp, .. }
            | Self::AgentFinished { timestamp, .. }
            | Self::CrossValidated { timestamp, .. }
            | Self::ConsensusReached { timestamp, .. }
            | Self::ConfidenceGateEvaluated { timestamp, .. }
            | Self::RuleEngineInvoked { timestamp, .. }
            | Self::EmergencyFallback { timestamp, .. }
            | Self::RunCompleted { timestamp, .. } => *timestamp,
        }
    }

    /// Agent the event belongs to, if any
    pub fn agent(&self) -> Option<&str> {
        match self {
            Self::AgentStarted { agent, .. }
            | Self::StageStarted { agent, .. }
            | Self::StageCompleted { agent, .. }
            | Self::StageGateFailed { agent, .. }
            | Self::ToolInvoked { agent, .. }
            | Self::AgentFinished { agent, .. } => Some(agent.as_str()),
            _ => None,
        }
    }

    /// The final record, when this is the terminating event
    pub fn record(&self) -> Option<&DiagnosisRecord> {
        match self {
            Self::RunCompleted { record, .. } => Some(record.as_ref()),
            _ => None,
        }
    }

    pub fn into_record(self) -> Option<DiagnosisRecord> {
        match self {
            Self::RunCompleted { record, .. } => Some(*record),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let run_id = RunId::new_v4();
        let event = DiagnosisEvent::StageStarted {
            run_id,
            agent: "hardware".into(),
            stage: ReasoningStage::HypothesisGeneration,
            progress: 2.0 / 6.0,
            confidence: 0.8,
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "stage_started");
        assert_eq!(value["stage"], "hypothesis_generation");
        assert_eq!(event.event_type(), "stage_started");
        assert_eq!(event.run_id(), run_id);
        assert_eq!(event.agent(), Some("hardware"));
        assert!(event.record().is_none());
    }

    #[test]
    fn test_event_deserializes() {
        let run_id = RunId::new_v4();
        let json = format!(
            r#"{{"type":"snapshot_validated","run_id":"{run_id}","timestamp":"2026-01-01T00:00:00Z"}}"#
        );
        let event: DiagnosisEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(event, DiagnosisEvent::SnapshotValidated { .. }));
        assert_eq!(event.agent(), None);
    }
}
