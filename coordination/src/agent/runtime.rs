//! Staged execution of one agent
//!
//! ```text
//! for stage in ReasoningStage::ALL:
//!     request  = role prompt + running summary + tool results
//!     output   = backend.run_stage(request)        (transient faults retried)
//!     result   = output with confidence resolved
//!     gate(result) ──fail──> aborted (partial stages kept)
//!     append result, update running mean
//! ```
//!
//! Every transition is emitted through the run's [`EventSink`].

use chrono::Utc;
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::backend::{BackendError, SharedBackend, StageOutput, StageRequest};
use super::role::AgentSpec;
use super::stage::{
    mean_confidence, AgentRun, AgentStatus, ConfidenceSource, GateFailure, ReasoningStage,
    StageResult,
};
use super::tools::ToolObservation;
use crate::events::sink::driven_stream;
use crate::events::{DiagnosisEvent, EventSink, RunId};
use crate::snapshot::SharedSnapshot;

/// Errors that end an agent run as `failed`
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("stage {stage} returned invalid confidence {value}")]
    InvalidConfidence { stage: ReasoningStage, value: f64 },
}

/// Quality gate and retry settings
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Stages below this confidence fail the gate
    pub min_stage_confidence: f64,
    /// Stages with fewer thoughts fail the gate
    pub min_thoughts: usize,
    /// Used when the backend returns no confidence
    pub fallback_confidence: f64,
    /// Extra attempts for transient backend faults
    pub stage_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            min_stage_confidence: 0.3,
            min_thoughts: 2,
            fallback_confidence: 0.5,
            stage_retries: 1,
            retry_backoff: Duration::from_millis(50),
        }
    }
}

impl RuntimeConfig {
    pub fn with_gate(mut self, min_stage_confidence: f64, min_thoughts: usize) -> Self {
        self.min_stage_confidence = min_stage_confidence;
        self.min_thoughts = min_thoughts;
        self
    }

    pub fn with_fallback_confidence(mut self, confidence: f64) -> Self {
        self.fallback_confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.stage_retries = retries;
        self.retry_backoff = backoff;
        self
    }
}

/// Item of a standalone agent stream
#[derive(Debug, Clone)]
pub enum AgentProgress {
    Event(DiagnosisEvent),
    Finished(Box<AgentRun>),
}

/// Drives agents through the reasoning stages against one backend
pub struct AgentRuntime {
    backend: SharedBackend,
    config: RuntimeConfig,
}

impl AgentRuntime {
    pub fn new(backend: SharedBackend, config: RuntimeConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Lazy stream of progress events ending with the finished run
    pub fn stream(
        self: &Arc<Self>,
        agent: AgentSpec,
        snapshot: SharedSnapshot,
        run_id: RunId,
    ) -> BoxStream<'static, AgentProgress> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();
        let runtime = Arc::clone(self);

        let driver = async move {
            let sink = EventSink::new(run_id).with_stream(tx);
            let run = runtime.run(&agent, snapshot, &sink).await;
            let _ = done_tx.send(run);
        };

        let events = driven_stream(driver, rx).map(AgentProgress::Event);
        let finished = futures::stream::once(done_rx)
            .filter_map(|run| async move { run.ok().map(|r| AgentProgress::Finished(Box::new(r))) });
        events.chain(finished).boxed()
    }

    /// Run every stage for `agent`, emitting progress through `sink`
    pub async fn run(&self, agent: &AgentSpec, snapshot: SharedSnapshot, sink: &EventSink) -> AgentRun {
        let run_id = sink.run_id();
        let started_at = Utc::now();
        info!(%run_id, agent = %agent.id, role = %agent.role.name, "Agent started");
        sink.emit(DiagnosisEvent::AgentStarted {
            run_id,
            agent: agent.id.clone(),
            role: agent.role.name.clone(),
            timestamp: started_at,
        });

        let mut stages: Vec<StageResult> = Vec::with_capacity(ReasoningStage::COUNT);
        let mut tool_results: Vec<ToolObservation> = Vec::new();
        let mut running_summary = String::new();
        let mut status = AgentStatus::Completed;
        let mut gate_failure = None;
        let mut failure = None;

        for stage in ReasoningStage::ALL {
            sink.emit(DiagnosisEvent::StageStarted {
                run_id,
                agent: agent.id.clone(),
                stage,
                progress: stage.progress(),
                confidence: mean_confidence(&stages),
                timestamp: Utc::now(),
            });

            if stage == ReasoningStage::InformationGathering {
                tool_results = self.gather_tools(agent, &snapshot, sink).await;
            }

            let request = StageRequest {
                agent: agent.id.clone(),
                role: Arc::clone(&agent.role),
                stage,
                prompt: agent.role.render_prompt(stage, &snapshot),
                running_summary: running_summary.clone(),
                tool_results: tool_results.clone(),
                snapshot: Arc::clone(&snapshot),
            };

            let result = match self.execute_stage(&request).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(%run_id, agent = %agent.id, %stage, "Agent failed: {e}");
                    status = AgentStatus::Failed;
                    failure = Some(e.to_string());
                    break;
                }
            };

            if let Some(gate) = self.check_gate(&result) {
                warn!(
                    %run_id,
                    agent = %agent.id,
                    %stage,
                    confidence = gate.confidence,
                    thoughts = gate.thoughts,
                    "Stage failed quality gate: {}",
                    gate.reason
                );
                sink.emit(DiagnosisEvent::StageGateFailed {
                    run_id,
                    agent: agent.id.clone(),
                    failure: gate.clone(),
                    timestamp: Utc::now(),
                });
                // A rejected validation stage is dropped without aborting the run
                if stage != ReasoningStage::Validation {
                    status = AgentStatus::Aborted;
                }
                gate_failure = Some(gate);
                break;
            }

            running_summary.push_str(&format!("{stage}: {}\n", result.summary()));
            let stage_confidence = result.confidence;
            stages.push(result);

            debug!(%run_id, agent = %agent.id, %stage, stage_confidence, "Stage completed");
            sink.emit(DiagnosisEvent::StageCompleted {
                run_id,
                agent: agent.id.clone(),
                stage,
                progress: (stage.index() + 1) as f64 / ReasoningStage::COUNT as f64,
                stage_confidence,
                confidence: mean_confidence(&stages),
                timestamp: Utc::now(),
            });
        }

        let confidence = match status {
            AgentStatus::Failed => 0.0,
            _ => mean_confidence(&stages),
        };
        let run = AgentRun {
            agent: agent.id.clone(),
            role: agent.role.name.clone(),
            stages,
            status,
            confidence,
            failure,
            gate_failure,
            started_at,
            finished_at: Utc::now(),
        };

        info!(
            %run_id,
            agent = %run.agent,
            status = %run.status,
            stages = run.stages.len(),
            confidence = run.confidence,
            "Agent finished"
        );
        sink.emit(finished_event(run_id, &run));
        run
    }

    async fn gather_tools(
        &self,
        agent: &AgentSpec,
        snapshot: &SharedSnapshot,
        sink: &EventSink,
    ) -> Vec<ToolObservation> {
        let mut observations = Vec::with_capacity(agent.role.tools.len());
        for tool in &agent.role.tools {
            let outcome = self.backend.invoke_tool(*tool, snapshot).await;
            sink.emit(DiagnosisEvent::ToolInvoked {
                run_id: sink.run_id(),
                agent: agent.id.clone(),
                tool: *tool,
                success: outcome.is_ok(),
                timestamp: Utc::now(),
            });
            match outcome {
                Ok(obs) => observations.push(obs),
                // A missing tool result weakens later stages but is not fatal
                Err(e) => warn!(agent = %agent.id, %tool, "Tool call failed: {e}"),
            }
        }
        observations
    }

    async fn execute_stage(&self, request: &StageRequest) -> Result<StageResult, StageError> {
        let output = self.call_with_retry(request).await?;
        self.resolve(request.stage, output)
    }

    async fn call_with_retry(&self, request: &StageRequest) -> Result<StageOutput, BackendError> {
        let mut attempt = 0;
        loop {
            match self.backend.run_stage(request).await {
                Ok(output) => return Ok(output),
                Err(e) if e.is_transient() && attempt < self.config.stage_retries => {
                    attempt += 1;
                    warn!(
                        agent = %request.agent,
                        stage = %request.stage,
                        attempt,
                        "Transient backend error, retrying: {e}"
                    );
                    tokio::time::sleep(self.config.retry_backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn resolve(&self, stage: ReasoningStage, output: StageOutput) -> Result<StageResult, StageError> {
        let (confidence, confidence_source) = match output.confidence {
            Some(value) if value.is_finite() && (0.0..=1.0).contains(&value) => {
                (value, ConfidenceSource::Backend)
            }
            Some(value) => return Err(StageError::InvalidConfidence { stage, value }),
            None => {
                debug!(%stage, fallback = self.config.fallback_confidence, "No stage confidence, using fallback");
                (self.config.fallback_confidence, ConfidenceSource::Fallback)
            }
        };

        Ok(StageResult {
            stage,
            thoughts: output.thoughts,
            steps: output.steps,
            conclusions: output.conclusions,
            confidence,
            confidence_source,
            evidence: output.evidence,
            completed_at: Utc::now(),
        })
    }

    fn check_gate(&self, result: &StageResult) -> Option<GateFailure> {
        let low_confidence = result.confidence < self.config.min_stage_confidence;
        let too_few_thoughts = result.thoughts.len() < self.config.min_thoughts;
        if !low_confidence && !too_few_thoughts {
            return None;
        }

        let reason = match (low_confidence, too_few_thoughts) {
            (true, true) => format!(
                "confidence below {} and fewer than {} thoughts",
                self.config.min_stage_confidence, self.config.min_thoughts
            ),
            (true, false) => format!("confidence below {}", self.config.min_stage_confidence),
            _ => format!("fewer than {} thoughts", self.config.min_thoughts),
        };
        Some(GateFailure {
            stage: result.stage,
            confidence: result.confidence,
            thoughts: result.thoughts.len(),
            reason,
        })
    }
}

pub(crate) fn finished_event(run_id: RunId, run: &AgentRun) -> DiagnosisEvent {
    DiagnosisEvent::AgentFinished {
        run_id,
        agent: run.agent.clone(),
        status: run.status,
        confidence: run.confidence,
        stages: run.stages.len(),
        findings: run.findings().to_vec(),
        failure: run.failure.clone(),
        timestamp: run.finished_at,
    }
}
