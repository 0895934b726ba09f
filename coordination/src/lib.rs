//! Sysgraph Coordination Library
//!
//! Multi-agent diagnosis of system snapshots:
//! - Specialised agents reason over a snapshot in six staged steps
//! - Their runs are cross-validated against each other for trust weights
//! - Weighted findings are merged into a ranked consensus
//! - A deterministic rule engine backs up low-confidence or failed runs
//!
//! # Flow
//!
//! ```text
//! Snapshot ──> Orchestrator ──┬──> agent 1 ─┐
//!                             ├──> agent 2 ─┼──> CrossValidator ──> ConsensusAggregator
//!                             └──> agent N ─┘                              │
//!                                                   confidence gate <──────┘
//!                                                         │ low
//!                                                   RuleEvaluator
//!                                                         │
//!                                                  DiagnosisRecord
//! ```
//!
//! Every transition is a [`DiagnosisEvent`] appended to the [`AuditLog`],
//! broadcast on the [`EventBus`] and yielded by the run's stream.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use sysgraph_coordination::{
//!     AgentRegistry, HeuristicBackend, Orchestrator, OrchestratorConfig, Snapshot,
//! };
//!
//! # async fn demo(json: &str) -> anyhow::Result<()> {
//! let roster = AgentRegistry::with_defaults().roster(&["hardware", "system", "network"])?;
//! let orchestrator = Orchestrator::new(
//!     roster,
//!     Arc::new(HeuristicBackend::new()),
//!     OrchestratorConfig::default(),
//! )
//! .shared();
//!
//! let record = orchestrator.diagnose(Snapshot::from_json_str(json)?).await;
//! println!("confidence {:.2}", record.confidence);
//! # Ok(())
//! # }
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod agent;
pub mod audit;
pub mod consensus;
pub mod events;
pub mod findings;
pub mod orchestrator;
pub mod rules;
pub mod snapshot;
pub mod validation;

// Re-export key agent types
pub use agent::{
    AgentRegistry, AgentRun, AgentRuntime, AgentSpec, AgentStatus, BackendError,
    HeuristicBackend, InferenceBackend, ReasoningStage, RoleDescriptor, RuntimeConfig,
    SharedBackend, StageOutput, StageRequest,
};

// Re-export key pipeline types
pub use audit::{AuditEntry, AuditLog, AuditRef, SharedAuditLog};
pub use consensus::{ConsensusResult, FindingSource, RankedFinding};
pub use events::{DiagnosisEvent, EventBus, EventFilter, RunId, SharedEventBus};
pub use findings::{AgentId, Finding, FindingKind, Severity};
pub use orchestrator::{
    DiagnosisRecord, FallbackReason, Orchestrator, OrchestratorConfig, SharedOrchestrator,
};
pub use rules::{Rule, RuleEvaluator, RuleFinding, RuleStatistics, SharedRuleEvaluator};
pub use snapshot::{Metric, Snapshot, SnapshotError};
pub use validation::{CrossValidator, ValidationVerdict};
