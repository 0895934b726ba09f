//! Diagnosis pipeline: fan-out, cross-validation, consensus, rule fallback
//!
//! ```text
//! RunStarted
//!   validate snapshot ──invalid──> rules only (validated = false)
//!   JoinSet::spawn(agent_i) × N     (timeout, cancellation, panic → failed)
//!   all failed? ─────────────────> rules only (validated = false)
//!   cross-validate → weights
//!   aggregate → consensus   ─fault─> rules only (validated = false)
//!   confidence < threshold? ─────> consensus + appended rule findings
//! RunCompleted(record)
//! ```
//!
//! Every path ends with exactly one `RunCompleted` event. No failure inside
//! the pipeline reaches the caller; it is converted into a degraded record.

use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::FutureExt;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::OrchestratorConfig;
use super::record::{health_score, AgentSummary, DiagnosisRecord, FallbackReason};
use crate::agent::runtime::finished_event;
use crate::agent::{AgentRun, AgentRuntime, AgentSpec, SharedBackend};
use crate::audit::{AuditLog, AuditRef, SharedAuditLog};
use crate::consensus::{AgentContribution, ConsensusAggregator, ConsensusResult};
use crate::events::sink::driven_stream;
use crate::events::{DiagnosisEvent, EventBus, EventSink, RunId, SharedEventBus};
use crate::findings::AgentId;
use crate::rules::{RuleEvaluator, RuleFinding, SharedRuleEvaluator};
use crate::snapshot::{SharedSnapshot, Snapshot};
use crate::validation::{CrossValidator, ValidationVerdict};

/// Shared reference to an Orchestrator
pub type SharedOrchestrator = Arc<Orchestrator>;

type Verdicts = BTreeMap<AgentId, ValidationVerdict>;

/// Runs diagnoses over a fixed roster of agents
pub struct Orchestrator {
    roster: Vec<AgentSpec>,
    runtime: Arc<AgentRuntime>,
    rules: SharedRuleEvaluator,
    validator: CrossValidator,
    aggregator: ConsensusAggregator,
    audit: SharedAuditLog,
    event_bus: SharedEventBus,
    config: OrchestratorConfig,
    shutdown: Mutex<CancellationToken>,
}

impl Orchestrator {
    /// Orchestrator with built-in rules, an in-memory audit log and a
    /// private event bus
    pub fn new(roster: Vec<AgentSpec>, backend: SharedBackend, config: OrchestratorConfig) -> Self {
        let runtime = Arc::new(AgentRuntime::new(backend, config.runtime.clone()));
        let validator = if config.enable_cross_validation {
            CrossValidator::new()
        } else {
            CrossValidator::disabled()
        };
        let aggregator = ConsensusAggregator::new(config.aggregator.clone());

        Self {
            roster,
            runtime,
            rules: RuleEvaluator::new().shared(),
            validator,
            aggregator,
            audit: AuditLog::new().shared(),
            event_bus: EventBus::new().shared(),
            config,
            shutdown: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn with_rules(mut self, rules: SharedRuleEvaluator) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_audit(mut self, audit: SharedAuditLog) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_event_bus(mut self, event_bus: SharedEventBus) -> Self {
        self.event_bus = event_bus;
        self
    }

    /// Create a shared reference to this orchestrator
    pub fn shared(self) -> SharedOrchestrator {
        Arc::new(self)
    }

    pub fn roster(&self) -> &[AgentSpec] {
        &self.roster
    }

    pub fn rules(&self) -> &SharedRuleEvaluator {
        &self.rules
    }

    pub fn audit(&self) -> &SharedAuditLog {
        &self.audit
    }

    pub fn event_bus(&self) -> &SharedEventBus {
        &self.event_bus
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Cancel every run in flight. Their unfinished agents are recorded as
    /// failed and each run still completes with a record. Later runs are
    /// unaffected.
    pub fn cancel(&self) {
        let mut token = self
            .shutdown
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        token.cancel();
        *token = CancellationToken::new();
        info!("Cancelled in-flight diagnosis runs");
    }

    fn current_token(&self) -> CancellationToken {
        self.shutdown
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn sink(&self, run_id: RunId) -> EventSink {
        EventSink::new(run_id)
            .with_audit(Arc::clone(&self.audit))
            .with_bus(Arc::clone(&self.event_bus))
    }

    /// Lazy event stream of one run. Nothing happens until it is polled;
    /// the last item is always `RunCompleted`.
    pub fn run_diagnosis(self: &Arc<Self>, snapshot: Snapshot) -> BoxStream<'static, DiagnosisEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = self.sink(RunId::new_v4()).with_stream(tx);
        let this = Arc::clone(self);
        driven_stream(
            async move {
                this.execute(snapshot, sink).await;
            },
            rx,
        )
    }

    /// Run a diagnosis to completion and return its record
    pub async fn diagnose(&self, snapshot: Snapshot) -> DiagnosisRecord {
        self.execute(snapshot, self.sink(RunId::new_v4())).await
    }

    async fn execute(&self, snapshot: Snapshot, sink: EventSink) -> DiagnosisRecord {
        let snapshot = snapshot.shared();
        // Taken before RunStarted so a cancel() issued by a stream consumer
        // that has seen RunStarted reaches this run
        let cancel = self.current_token().child_token();
        let mut ctx = RunContext::new(sink, Arc::clone(&snapshot));

        info!(
            run_id = %ctx.run_id(),
            collection_id = %snapshot.collection_id,
            agents = self.roster.len(),
            "Diagnosis started"
        );
        ctx.emit(DiagnosisEvent::RunStarted {
            run_id: ctx.run_id(),
            collection_id: snapshot.collection_id.clone(),
            agents: self.roster.iter().map(|a| a.id.clone()).collect(),
            timestamp: Utc::now(),
        });

        let violations = snapshot.violations();
        if !violations.is_empty() {
            warn!(
                run_id = %ctx.run_id(),
                violations = violations.len(),
                "Snapshot rejected, using rules only"
            );
            ctx.emit(DiagnosisEvent::SnapshotRejected {
                run_id: ctx.run_id(),
                violations,
                timestamp: Utc::now(),
            });
            return self.rule_only(ctx, FallbackReason::InvalidSnapshot, Vec::new());
        }
        ctx.emit(DiagnosisEvent::SnapshotValidated {
            run_id: ctx.run_id(),
            timestamp: Utc::now(),
        });

        let runs = self.fan_out(&ctx, cancel).await;

        if !runs.iter().any(AgentRun::is_usable) {
            error!(run_id = %ctx.run_id(), "All agents failed");
            ctx.emit(DiagnosisEvent::EmergencyFallback {
                run_id: ctx.run_id(),
                reason: FallbackReason::AllAgentsFailed,
                detail: format!("{} of {} agents failed", runs.len(), self.roster.len()),
                timestamp: Utc::now(),
            });
            return self.rule_only(ctx, FallbackReason::AllAgentsFailed, runs);
        }

        let phase = std::panic::catch_unwind(AssertUnwindSafe(|| self.consensus_phase(&runs)))
            .unwrap_or_else(|_| Err("consensus phase panicked".to_string()));

        let (verdicts, mut consensus) = match phase {
            Ok(outcome) => outcome,
            Err(detail) => {
                error!(run_id = %ctx.run_id(), detail = %detail, "Consensus phase failed");
                ctx.emit(DiagnosisEvent::EmergencyFallback {
                    run_id: ctx.run_id(),
                    reason: FallbackReason::PipelineFault,
                    detail,
                    timestamp: Utc::now(),
                });
                return self.rule_only(ctx, FallbackReason::PipelineFault, runs);
            }
        };

        ctx.emit(DiagnosisEvent::CrossValidated {
            run_id: ctx.run_id(),
            weights: verdicts
                .iter()
                .map(|(agent, v)| (agent.clone(), v.weight))
                .collect(),
            timestamp: Utc::now(),
        });
        ctx.emit(DiagnosisEvent::ConsensusReached {
            run_id: ctx.run_id(),
            issues: consensus.issues.len(),
            recommendations: consensus.recommendations.len(),
            confidence: consensus.confidence,
            timestamp: Utc::now(),
        });

        let threshold = self.config.confidence_threshold;
        let passed = consensus.confidence >= threshold;
        ctx.emit(DiagnosisEvent::ConfidenceGateEvaluated {
            run_id: ctx.run_id(),
            confidence: consensus.confidence,
            threshold,
            passed,
            timestamp: Utc::now(),
        });

        let mut fallback_reason = None;
        if !passed {
            if self.config.fallback_to_rules {
                let fired = self.evaluate_rules(&mut ctx, FallbackReason::LowConfidence);
                consensus.append_rule_findings(&fired);
                fallback_reason = Some(FallbackReason::LowConfidence);
            } else {
                debug!(
                    run_id = %ctx.run_id(),
                    confidence = consensus.confidence,
                    "Low confidence, rule fallback disabled"
                );
            }
        }

        let confidence = consensus.confidence;
        self.finish(ctx, Outcome {
            consensus,
            confidence,
            validated: true,
            fallback_reason,
            runs,
            verdicts,
        })
    }

    /// Run every agent concurrently. The result is in roster order and has
    /// one entry per roster agent.
    async fn fan_out(&self, ctx: &RunContext, cancel: CancellationToken) -> Vec<AgentRun> {
        let deadline = tokio::time::Instant::now() + self.config.run_timeout;
        let mut join_set: JoinSet<(usize, AgentRun)> = JoinSet::new();

        for (rank, agent) in self.roster.iter().cloned().enumerate() {
            let runtime = Arc::clone(&self.runtime);
            let snapshot = Arc::clone(&ctx.snapshot);
            let sink = ctx.sink.clone();
            let cancel = cancel.clone();

            join_set.spawn(async move {
                let started_at = Utc::now();
                let work = AssertUnwindSafe(runtime.run(&agent, snapshot, &sink)).catch_unwind();
                let run = tokio::select! {
                    outcome = work => match outcome {
                        Ok(run) => return (rank, run),
                        Err(_) => AgentRun::failed(&agent.id, &agent.role.name, "agent task panicked", started_at),
                    },
                    _ = cancel.cancelled() => {
                        AgentRun::failed(&agent.id, &agent.role.name, "cancelled", started_at)
                    }
                    _ = tokio::time::sleep_until(deadline) => {
                        AgentRun::failed(&agent.id, &agent.role.name, "timed out", started_at)
                    }
                };
                warn!(
                    agent = %run.agent,
                    reason = run.failure.as_deref().unwrap_or_default(),
                    "Agent did not finish"
                );
                sink.emit(finished_event(sink.run_id(), &run));
                (rank, run)
            });
        }

        let mut slots: Vec<Option<AgentRun>> = vec![None; self.roster.len()];
        while let Some(res) = join_set.join_next().await {
            match res {
                Ok((rank, run)) => slots[rank] = Some(run),
                Err(e) => warn!(error = %e, "Agent task join error"),
            }
        }

        slots
            .into_iter()
            .zip(&self.roster)
            .map(|(slot, agent)| {
                slot.unwrap_or_else(|| {
                    let run = AgentRun::failed(&agent.id, &agent.role.name, "agent task lost", Utc::now());
                    ctx.sink.emit(finished_event(ctx.run_id(), &run));
                    run
                })
            })
            .collect()
    }

    fn consensus_phase(&self, runs: &[AgentRun]) -> Result<(Verdicts, ConsensusResult), String> {
        let verdicts = self.validator.validate(runs).map_err(|e| e.to_string())?;

        let contributions: Vec<AgentContribution> = runs
            .iter()
            .enumerate()
            .filter_map(|(rank, run)| {
                let verdict = verdicts.get(&run.agent)?;
                Some(AgentContribution {
                    agent: run.agent.clone(),
                    rank,
                    weight: verdict.weight,
                    confidence: run.confidence,
                    findings: run.findings().to_vec(),
                })
            })
            .collect();

        let consensus = self
            .aggregator
            .aggregate(&contributions)
            .map_err(|e| e.to_string())?;
        Ok((verdicts, consensus))
    }

    fn evaluate_rules(&self, ctx: &mut RunContext, reason: FallbackReason) -> Vec<RuleFinding> {
        let fired = self.rules.evaluate(&ctx.snapshot);
        info!(
            run_id = %ctx.run_id(),
            reason = %reason,
            fired = fired.len(),
            "Rule engine invoked"
        );
        ctx.emit(DiagnosisEvent::RuleEngineInvoked {
            run_id: ctx.run_id(),
            reason,
            fired: fired.iter().map(|f| f.rule_id.clone()).collect(),
            timestamp: Utc::now(),
        });
        fired
    }

    fn rule_only(
        &self,
        mut ctx: RunContext,
        reason: FallbackReason,
        runs: Vec<AgentRun>,
    ) -> DiagnosisRecord {
        let fired = self.evaluate_rules(&mut ctx, reason);
        self.finish(ctx, Outcome {
            consensus: ConsensusResult::from_rules(&fired),
            confidence: 0.0,
            validated: false,
            fallback_reason: Some(reason),
            runs,
            verdicts: Verdicts::new(),
        })
    }

    fn finish(&self, mut ctx: RunContext, outcome: Outcome) -> DiagnosisRecord {
        let agents = outcome
            .runs
            .iter()
            .map(|run| AgentSummary {
                agent: run.agent.clone(),
                role: run.role.clone(),
                status: run.status,
                stages: run.stages.len(),
                confidence: run.confidence,
                weight: outcome
                    .verdicts
                    .get(&run.agent)
                    .map(|v| v.weight)
                    .unwrap_or(0.0),
                failure: run.failure.clone(),
            })
            .collect();

        let record = DiagnosisRecord {
            run_id: ctx.run_id(),
            collection_id: ctx.snapshot.collection_id.clone(),
            health_score: health_score(&outcome.consensus),
            rule_engine_used: outcome.consensus.has_rule_findings()
                || outcome.fallback_reason.is_some(),
            consensus: outcome.consensus,
            confidence: outcome.confidence,
            validated: outcome.validated,
            fallback_reason: outcome.fallback_reason,
            agents,
            audit: ctx.audit_ref(),
            started_at: ctx.started_at,
            finished_at: Utc::now(),
        };

        info!(
            run_id = %record.run_id,
            confidence = record.confidence,
            issues = record.consensus.issues.len(),
            rule_engine_used = record.rule_engine_used,
            validated = record.validated,
            elapsed_ms = record.elapsed_ms(),
            "Diagnosis completed"
        );
        ctx.emit(DiagnosisEvent::RunCompleted {
            run_id: record.run_id,
            record: Box::new(record.clone()),
            timestamp: record.finished_at,
        });
        record
    }
}

/// Inputs to the final record
struct Outcome {
    consensus: ConsensusResult,
    confidence: f64,
    validated: bool,
    fallback_reason: Option<FallbackReason>,
    runs: Vec<AgentRun>,
    verdicts: Verdicts,
}

/// Per-run state: where events go and which audit entries they produced
struct RunContext {
    sink: EventSink,
    snapshot: SharedSnapshot,
    started_at: DateTime<Utc>,
    first_seq: Option<u64>,
    last_seq: Option<u64>,
}

impl RunContext {
    fn new(sink: EventSink, snapshot: SharedSnapshot) -> Self {
        Self {
            sink,
            snapshot,
            started_at: Utc::now(),
            first_seq: None,
            last_seq: None,
        }
    }

    fn run_id(&self) -> RunId {
        self.sink.run_id()
    }

    fn emit(&mut self, event: DiagnosisEvent) {
        if let Some(seq) = self.sink.emit(event) {
            self.first_seq.get_or_insert(seq);
            self.last_seq = Some(seq);
        }
    }

    /// Audit span from `RunStarted` up to the event before `RunCompleted`
    fn audit_ref(&self) -> AuditRef {
        let first_seq = self.first_seq.unwrap_or_default();
        AuditRef {
            run_id: self.run_id(),
            first_seq,
            last_seq: self.last_seq.unwrap_or(first_seq),
        }
    }
}
