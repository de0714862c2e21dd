//! Persistence layer for pipeline run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteExecutionStore;

pub use crate::core::ExecutionStatus;
use crate::core::{state::StageState, PipelineRun};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Final (or current) state of one stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSummary {
    pub stage_id: String,
    pub state: String,
    pub attempts: u32,
    /// Error text, skip reason or cancel reason
    pub detail: Option<String>,
}

impl StageSummary {
    fn from_state(stage_id: &str, state: &StageState) -> Self {
        let (attempts, detail) = match state {
            StageState::Succeeded { attempts, .. } => (*attempts, None),
            StageState::Failed { attempts, error, .. } => (*attempts, Some(error.clone())),
            StageState::Skipped { reason } => (0, Some(reason.clone())),
            StageState::Cancelled { reason, .. } => (1, Some(reason.clone())),
            StageState::Pending | StageState::Eligible | StageState::Running { .. } => (0, None),
        };
        Self {
            stage_id: stage_id.to_string(),
            state: state.label().to_string(),
            attempts,
            detail,
        }
    }
}

/// Summary of a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    /// Unique execution ID
    pub execution_id: Uuid,

    pub workflow_name: String,

    pub status: ExecutionStatus,

    /// Trigger event and branch
    pub event: String,
    pub branch: String,

    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,

    pub total_stages: usize,
    pub succeeded_stages: usize,
    pub failed_stages: usize,
    pub skipped_stages: usize,
    pub cancelled_stages: usize,

    #[serde(default)]
    pub stages: Vec<StageSummary>,
}

impl ExecutionSummary {
    /// Fraction of stages in a terminal state
    pub fn progress(&self) -> f64 {
        if self.total_stages == 0 {
            return 0.0;
        }
        let done = self.succeeded_stages + self.failed_stages + self.skipped_stages + self.cancelled_stages;
        done as f64 / self.total_stages as f64
    }
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save (or replace) a run summary
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()>;

    /// Load a run by ID
    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>>;

    /// Runs of a workflow, newest first
    async fn list_executions(&self, workflow_name: &str) -> Result<Vec<ExecutionSummary>>;

    /// Most recent run of a workflow
    async fn latest_execution(&self, workflow_name: &str) -> Result<Option<ExecutionSummary>> {
        Ok(self.list_executions(workflow_name).await?.into_iter().next())
    }

    async fn delete_execution(&self, execution_id: Uuid) -> Result<()>;

    /// All workflow names with recorded runs
    async fn list_workflows(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or `--no-history` runs)
#[derive(Default)]
pub struct InMemoryPersistence {
    executions: RwLock<HashMap<Uuid, ExecutionSummary>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()> {
        let mut execs = self.executions.write().await;
        execs.insert(execution.execution_id, execution.clone());
        Ok(())
    }

    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>> {
        let execs = self.executions.read().await;
        Ok(execs.get(&execution_id).cloned())
    }

    async fn list_executions(&self, workflow_name: &str) -> Result<Vec<ExecutionSummary>> {
        let execs = self.executions.read().await;
        let mut result: Vec<ExecutionSummary> = execs
            .values()
            .filter(|e| e.workflow_name == workflow_name)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(result)
    }

    async fn delete_execution(&self, execution_id: Uuid) -> Result<()> {
        self.executions.write().await.remove(&execution_id);
        Ok(())
    }

    async fn list_workflows(&self) -> Result<Vec<String>> {
        let execs = self.executions.read().await;
        let mut names: Vec<String> = execs.values().map(|e| e.workflow_name.clone()).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

/// Create a summary from a run
pub fn create_summary(run: &PipelineRun) -> ExecutionSummary {
    let state = run.state();
    let counts = state.counts();
    ExecutionSummary {
        execution_id: state.execution_id,
        workflow_name: run.name().to_string(),
        status: state.status,
        event: run.trigger.event.clone(),
        branch: run.trigger.branch.clone(),
        started_at: state.started_at.unwrap_or_else(Utc::now),
        completed_at: state.completed_at,
        total_stages: counts.total,
        succeeded_stages: counts.succeeded,
        failed_stages: counts.failed,
        skipped_stages: counts.skipped,
        cancelled_stages: counts.cancelled,
        stages: run
            .definition
            .graph()
            .topological_order()
            .iter()
            .filter_map(|id| state.get(id).map(|s| StageSummary::from_state(id, s)))
            .collect(),
    }
}
