//! Analysis agents
//!
//! An agent is a [`RoleDescriptor`] bound to an identity and driven through
//! the six [`ReasoningStage`]s by the [`AgentRuntime`]. Stage content comes
//! from an [`InferenceBackend`]; [`HeuristicBackend`] is the built-in,
//! model-free implementation.

pub mod backend;
pub mod heuristic;
pub mod role;
pub mod runtime;
pub mod stage;
pub mod tools;

pub use backend::{
    BackendError, BackendResult, InferenceBackend, SharedBackend, StageOutput, StageRequest,
};
pub use heuristic::HeuristicBackend;
pub use role::{AgentRegistry, AgentSpec, RoleDescriptor, RoleError, RoleResult};
pub use runtime::{AgentProgress, AgentRuntime, RuntimeConfig, StageError};
pub use stage::{
    AgentRun, AgentStatus, ConfidenceSource, GateFailure, ReasoningStage, ReasoningStep,
    StageResult, StepKind,
};
pub use tools::{DiagnosticTool, ToolObservation};
