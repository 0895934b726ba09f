//! Reasoning stages and the records an agent run produces

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::findings::{AgentId, Finding};

/// Fixed reasoning pipeline, executed strictly in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningStage {
    ProblemUnderstanding,
    InformationGathering,
    HypothesisGeneration,
    EvidenceAnalysis,
    Conclusion,
    Validation,
}

impl ReasoningStage {
    pub const ALL: [ReasoningStage; 6] = [
        ReasoningStage::ProblemUnderstanding,
        ReasoningStage::InformationGathering,
        ReasoningStage::HypothesisGeneration,
        ReasoningStage::EvidenceAnalysis,
        ReasoningStage::Conclusion,
        ReasoningStage::Validation,
    ];

    pub const COUNT: usize = Self::ALL.len();

    /// Zero-based position in the pipeline
    pub fn index(&self) -> usize {
        match self {
            Self::ProblemUnderstanding => 0,
            Self::InformationGathering => 1,
            Self::HypothesisGeneration => 2,
            Self::EvidenceAnalysis => 3,
            Self::Conclusion => 4,
            Self::Validation => 5,
        }
    }

    /// `stage_index / total_stages`
    pub fn progress(&self) -> f64 {
        self.index() as f64 / Self::COUNT as f64
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProblemUnderstanding => "problem_understanding",
            Self::InformationGathering => "information_gathering",
            Self::HypothesisGeneration => "hypothesis_generation",
            Self::EvidenceAnalysis => "evidence_analysis",
            Self::Conclusion => "conclusion",
            Self::Validation => "validation",
        }
    }
}

impl fmt::Display for ReasoningStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of one reasoning step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Observation,
    Deduction,
    Induction,
    Abduction,
    Verification,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub index: usize,
    pub kind: StepKind,
    pub content: String,
}

/// Where a stage's confidence came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceSource {
    #[default]
    Backend,
    /// The backend gave none; the configured fallback constant was used
    Fallback,
}

/// Output of one stage. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: ReasoningStage,
    pub thoughts: Vec<String>,
    pub steps: Vec<ReasoningStep>,
    pub conclusions: Vec<Finding>,
    pub confidence: f64,
    #[serde(default)]
    pub confidence_source: ConfidenceSource,
    pub evidence: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

impl StageResult {
    /// Narrative text used for cross-agent consistency checks
    pub fn summary(&self) -> String {
        let mut parts: Vec<&str> = self.thoughts.iter().map(String::as_str).collect();
        parts.extend(self.conclusions.iter().map(|c| c.description.as_str()));
        parts.join(" ")
    }
}

/// Terminal status of an agent run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// All stages passed the quality gate
    Completed,
    /// A stage failed the quality gate; earlier stages are kept
    Aborted,
    /// Backend fault, panic, cancellation or timeout
    Failed,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Aborted => write!(f, "aborted"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Why a stage was rejected by the quality gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateFailure {
    pub stage: ReasoningStage,
    pub confidence: f64,
    pub thoughts: usize,
    pub reason: String,
}

/// Everything one agent produced for one diagnosis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRun {
    pub agent: AgentId,
    pub role: String,
    pub stages: Vec<StageResult>,
    pub status: AgentStatus,
    /// Mean of executed stage confidences, 0.0 for failed runs
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_failure: Option<GateFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl AgentRun {
    /// A run that produced nothing usable
    pub fn failed(
        agent: impl Into<AgentId>,
        role: impl Into<String>,
        reason: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            agent: agent.into(),
            role: role.into(),
            stages: Vec::new(),
            status: AgentStatus::Failed,
            confidence: 0.0,
            failure: Some(reason.into()),
            gate_failure: None,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Completed and aborted runs take part in cross-validation
    pub fn is_usable(&self) -> bool {
        self.status != AgentStatus::Failed
    }

    /// Share of the pipeline this run got through, in 0..=1
    pub fn completed_fraction(&self) -> f64 {
        self.stages.len() as f64 / ReasoningStage::COUNT as f64
    }

    /// Conclusions of the latest stage that produced any
    pub fn findings(&self) -> &[Finding] {
        self.stages
            .iter()
            .rev()
            .find(|s| !s.conclusions.is_empty())
            .map(|s| s.conclusions.as_slice())
            .unwrap_or(&[])
    }

    pub fn elapsed_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// Mean confidence over executed stages
pub(crate) fn mean_confidence(stages: &[StageResult]) -> f64 {
    if stages.is_empty() {
        return 0.0;
    }
    stages.iter().map(|s| s.confidence).sum::<f64>() / stages.len() as f64
}
