//! stagerun - a CI/CD stage orchestrator
//!
//! Runs build, test, scan and deploy stages as a dependency graph with
//! condition gating, bounded parallelism, scoped secrets and skip propagation.

pub mod cli;
pub mod core;
pub mod error;
pub mod execution;
pub mod persistence;
pub mod secrets;
pub mod task;

// Re-export commonly used types
pub use core::{
    ExecutionStatus, PipelineRun, RunState, StageDefinition, StageState, TriggerContext,
    WorkflowDefinition,
};
pub use error::{ConditionError, DefinitionError, EngineError};
pub use execution::{ExecutionEngine, ExecutionEvent, SchedulingStrategy};
pub use secrets::{ScopedSecrets, SecretError, SecretStore, SecretStoreBuilder};
pub use task::{TaskError, TaskInvocation, TaskInvoker, TaskOutcome, ToolInvoker};
