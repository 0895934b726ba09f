//! Diagnosis orchestration
//!
//! The [`Orchestrator`] owns the agent roster, the rule evaluator, the audit
//! log and the event bus. Each call to `run_diagnosis` or `diagnose` is an
//! independent run that ends in a [`DiagnosisRecord`].

pub mod config;
pub mod pipeline;
pub mod record;

pub use config::{OrchestratorConfig, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_RUN_TIMEOUT};
pub use pipeline::{Orchestrator, SharedOrchestrator};
pub use record::{AgentSummary, DiagnosisRecord, FallbackReason};
