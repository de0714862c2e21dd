//! Error taxonomy for workflow definitions, conditions and the engine

use thiserror::Error;

/// Errors detected while loading or validating a workflow definition.
///
/// Every variant fails the run before any stage is dispatched.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("Failed to read workflow file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid workflow YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Stage id must not be empty")]
    EmptyStageId,

    #[error("Duplicate stage id: {0}")]
    DuplicateStage(String),

    #[error("Stage '{stage}' needs non-existent stage '{dependency}'")]
    UnknownDependency { stage: String, dependency: String },

    #[error("Cycle detected in stage graph: {}", format_cycle(.0))]
    Cycle(Vec<String>),

    #[error("Stage '{stage}' declares secret '{secret}' which the workflow does not declare")]
    UndeclaredSecret { stage: String, secret: String },

    #[error("Stage '{stage}' references unknown workflow input '{input}'")]
    UnknownInput { stage: String, input: String },

    #[error("Stage '{stage}' cannot reference output '{output}' of stage '{source_stage}': {reason}")]
    InvalidOutputReference {
        stage: String,
        source_stage: String,
        output: String,
        reason: String,
    },

    #[error("Required input '{0}' was not provided")]
    MissingInput(String),

    #[error("Input '{0}' is not declared by the workflow")]
    UnexpectedInput(String),

    #[error("Stage '{stage}' uses unknown task kind '{kind}'")]
    UnknownTask { stage: String, kind: String },

    #[error("Stage '{stage}' has an invalid setting: {reason}")]
    InvalidStage { stage: String, reason: String },
}

fn format_cycle(cycle: &[String]) -> String {
    match cycle.first() {
        Some(first) => format!("{} -> {}", cycle.join(" -> "), first),
        None => String::new(),
    }
}

/// A malformed stage condition. The stage is treated as ineligible.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConditionError {
    #[error("Unexpected end of condition")]
    UnexpectedEnd,

    #[error("Unexpected '{token}' at position {position}")]
    UnexpectedToken { token: String, position: usize },

    #[error("Unterminated string starting at position {0}")]
    UnterminatedString(usize),

    #[error("Invalid glob pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Condition references unknown key '{0}'")]
    UnknownKey(String),
}

/// Invariant violations inside the execution engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Aggregator(#[from] crate::core::results::AggregatorError),

    #[error("Stage '{0}' not found in workflow")]
    UnknownStage(String),
}
