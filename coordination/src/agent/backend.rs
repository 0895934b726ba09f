//! Seam to the external inference backend
//!
//! The backend turns a stage request into an already-structured
//! [`StageOutput`]. Prompting, model loading and free-text parsing all live
//! behind this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::role::RoleDescriptor;
use super::stage::{ReasoningStage, ReasoningStep, StepKind};
use super::tools::{DiagnosticTool, ToolObservation};
use crate::findings::{AgentId, Finding};
use crate::snapshot::{SharedSnapshot, Snapshot};

/// Errors reported by an inference backend
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("transient backend error: {0}")]
    Transient(String),

    #[error("malformed stage output: {0}")]
    Malformed(String),

    #[error("tool {tool} failed: {detail}")]
    Tool { tool: DiagnosticTool, detail: String },
}

impl BackendError {
    /// Worth retrying the same request
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Shared reference to an inference backend
pub type SharedBackend = Arc<dyn InferenceBackend>;

/// Everything the backend needs to produce one stage
#[derive(Debug, Clone)]
pub struct StageRequest {
    pub agent: AgentId,
    pub role: Arc<RoleDescriptor>,
    pub stage: ReasoningStage,
    pub prompt: String,
    /// `stage: summary` lines of every accepted stage so far
    pub running_summary: String,
    /// Tool results gathered at information gathering; empty before it
    pub tool_results: Vec<ToolObservation>,
    pub snapshot: SharedSnapshot,
}

/// Structured stage output as returned by the backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    pub thoughts: Vec<String>,
    #[serde(default)]
    pub steps: Vec<ReasoningStep>,
    #[serde(default)]
    pub conclusions: Vec<Finding>,
    /// `None` when the backend could not state a confidence
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub evidence: Vec<String>,
}

impl StageOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a thought and a matching reasoning step
    pub fn thought(mut self, kind: StepKind, text: impl Into<String>) -> Self {
        let text = text.into();
        self.steps.push(ReasoningStep {
            index: self.steps.len(),
            kind,
            content: text.clone(),
        });
        self.thoughts.push(text);
        self
    }

    pub fn conclusion(mut self, finding: Finding) -> Self {
        self.conclusions.push(finding);
        self
    }

    pub fn evidence(mut self, item: impl Into<String>) -> Self {
        self.evidence.push(item.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Backend name for logs and events
    fn name(&self) -> &str;

    /// Produce the output of one reasoning stage
    async fn run_stage(&self, request: &StageRequest) -> BackendResult<StageOutput>;

    /// Run one diagnostic tool. Defaults to the built-in implementation.
    async fn invoke_tool(
        &self,
        tool: DiagnosticTool,
        snapshot: &Snapshot,
    ) -> BackendResult<ToolObservation> {
        Ok(tool.run(snapshot))
    }
}
