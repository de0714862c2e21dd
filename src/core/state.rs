//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Overall pipeline run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Run has not started
    Pending,
    /// Run is in progress
    Running,
    /// Every non-skipped stage succeeded
    Succeeded,
    /// At least one stage failed
    Failed,
    /// Run was cancelled before it could finish
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Succeeded => "succeeded",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ExecutionStatus::Pending),
            "running" => Some(ExecutionStatus::Running),
            "succeeded" => Some(ExecutionStatus::Succeeded),
            "failed" => Some(ExecutionStatus::Failed),
            "cancelled" => Some(ExecutionStatus::Cancelled),
            _ => None,
        }
    }
}

/// State of a single stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageState {
    /// Waiting for dependencies
    Pending,
    /// All dependencies succeeded, waiting for a concurrency slot
    Eligible,
    /// Task invocation in flight
    Running { started_at: DateTime<Utc> },
    Succeeded {
        attempts: u32,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
    Failed {
        error: String,
        attempts: u32,
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
    },
    /// Never started (condition false, upstream failure, or run cancelled)
    Skipped { reason: String },
    /// Interrupted while running because the run was cancelled
    Cancelled {
        reason: String,
        started_at: DateTime<Utc>,
        cancelled_at: DateTime<Utc>,
    },
}

impl StageState {
    /// Check if stage is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageState::Succeeded { .. }
                | StageState::Failed { .. }
                | StageState::Skipped { .. }
                | StageState::Cancelled { .. }
        )
    }

    /// Pending, Eligible or Running
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, StageState::Succeeded { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            StageState::Pending => "pending",
            StageState::Eligible => "eligible",
            StageState::Running { .. } => "running",
            StageState::Succeeded { .. } => "succeeded",
            StageState::Failed { .. } => "failed",
            StageState::Skipped { .. } => "skipped",
            StageState::Cancelled { .. } => "cancelled",
        }
    }
}

/// Stage tallies for a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCounts {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
}

/// Per-run mutable state: one entry per stage plus run-level status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Unique execution ID
    pub execution_id: Uuid,

    /// Current run status
    pub status: ExecutionStatus,

    /// When the run started
    pub started_at: Option<DateTime<Utc>>,

    /// When the run finished
    pub completed_at: Option<DateTime<Utc>>,

    stages: BTreeMap<String, StageState>,
}

impl RunState {
    /// Create a run state with every stage Pending
    pub fn new<I, S>(stage_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            execution_id: Uuid::new_v4(),
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            stages: stage_ids
                .into_iter()
                .map(|id| (id.into(), StageState::Pending))
                .collect(),
        }
    }

    pub fn get(&self, stage_id: &str) -> Option<&StageState> {
        self.stages.get(stage_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &StageState)> {
        self.stages.iter()
    }

    pub fn is_succeeded(&self, stage_id: &str) -> bool {
        self.get(stage_id).is_some_and(StageState::is_succeeded)
    }

    /// Stage ids currently in the given state kind
    pub fn stages_where(&self, pred: impl Fn(&StageState) -> bool) -> Vec<String> {
        self.stages
            .iter()
            .filter(|(_, s)| pred(s))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Whether any stage is still Pending, Eligible or Running
    pub fn has_active(&self) -> bool {
        self.stages.values().any(StageState::is_active)
    }

    // Writes go through the result aggregator only
    pub(crate) fn set(&mut self, stage_id: &str, state: StageState) {
        if let Some(slot) = self.stages.get_mut(stage_id) {
            *slot = state;
        }
    }

    /// Mark the run as started
    pub fn start(&mut self) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Mark the run as finished with a final status
    pub fn finish(&mut self, status: ExecutionStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }

    pub fn counts(&self) -> StageCounts {
        let mut counts = StageCounts {
            total: self.stages.len(),
            ..StageCounts::default()
        };
        for state in self.stages.values() {
            match state {
                StageState::Pending | StageState::Eligible => counts.pending += 1,
                StageState::Running { .. } => counts.running += 1,
                StageState::Succeeded { .. } => counts.succeeded += 1,
                StageState::Failed { .. } => counts.failed += 1,
                StageState::Skipped { .. } => counts.skipped += 1,
                StageState::Cancelled { .. } => counts.cancelled += 1,
            }
        }
        counts
    }

    /// Final run status: any failure wins, then cancellation, else success
    pub fn outcome(&self, cancelled: bool) -> ExecutionStatus {
        let counts = self.counts();
        if counts.failed > 0 {
            ExecutionStatus::Failed
        } else if cancelled || counts.cancelled > 0 {
            ExecutionStatus::Cancelled
        } else {
            ExecutionStatus::Succeeded
        }
    }

    /// Calculate progress (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.stages.is_empty() {
            return 0.0;
        }
        let done = self.stages.values().filter(|s| s.is_terminal()).count();
        done as f64 / self.stages.len() as f64
    }
}
