//! Task invocation boundary
//!
//! The engine never runs tools itself. It hands a [`TaskInvocation`] to a
//! [`TaskInvoker`] and records the [`TaskOutcome`] it gets back.

pub mod process;
pub mod tools;

use crate::core::{findings::Finding, results::ArtifactRef, stage::TaskRef};
use crate::secrets::ScopedSecrets;
use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use process::{CommandLine, ProcessInvoker};
pub use tools::{ToolInvoker, ToolKind, ToolPaths};

/// Everything a tool needs to run one attempt of a stage
#[derive(Debug, Clone)]
pub struct TaskInvocation {
    pub stage_id: String,
    pub task: TaskRef,
    /// Rendered inputs
    pub inputs: BTreeMap<String, String>,
    pub secrets: ScopedSecrets,
    /// 1-based attempt number
    pub attempt: u32,
    /// Fires when the run is cancelled
    pub cancel: CancellationToken,
}

impl TaskInvocation {
    pub fn input(&self, name: &str) -> Option<&str> {
        self.inputs.get(name).map(String::as_str).filter(|v| !v.is_empty())
    }

    /// Inputs like `push: "true"`
    pub fn flag(&self, name: &str) -> bool {
        matches!(self.input(name), Some("true" | "yes" | "1"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Success,
    Failure {
        exit_code: Option<i32>,
        message: String,
    },
}

/// What a tool reported
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub status: TaskStatus,
    pub outputs: BTreeMap<String, String>,
    pub artifacts: Vec<ArtifactRef>,
    pub findings: Vec<Finding>,
}

impl TaskOutcome {
    pub fn success() -> Self {
        Self {
            status: TaskStatus::Success,
            outputs: BTreeMap::new(),
            artifacts: Vec::new(),
            findings: Vec::new(),
        }
    }

    pub fn failure(exit_code: Option<i32>, message: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Failure {
                exit_code,
                message: message.into(),
            },
            ..Self::success()
        }
    }

    pub fn with_output(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.outputs.insert(name.into(), value.into());
        self
    }

    pub fn with_artifact(mut self, name: impl Into<String>, uri: impl Into<String>) -> Self {
        self.artifacts.push(ArtifactRef {
            name: name.into(),
            uri: uri.into(),
        });
        self
    }

    pub fn with_findings(mut self, findings: Vec<Finding>) -> Self {
        self.findings.extend(findings);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }
}

/// Errors raised while invoking a task (as opposed to the tool failing)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("Failed to start tool: {0}")]
    Spawn(String),

    #[error("Timed out after {0} seconds")]
    Timeout(u64),

    #[error("Cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TaskError {
    /// Cancellation and configuration errors never get another attempt
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TaskError::Cancelled | TaskError::Config(_))
    }
}

impl From<crate::secrets::SecretError> for TaskError {
    fn from(err: crate::secrets::SecretError) -> Self {
        TaskError::Config(err.to_string())
    }
}

/// Runs one attempt of a stage's task
#[async_trait]
pub trait TaskInvoker: Send + Sync {
    async fn invoke(&self, invocation: TaskInvocation) -> Result<TaskOutcome, TaskError>;
}
