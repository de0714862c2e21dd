//! Result aggregation: the only writer of run state
//!
//! Every stage transition goes through [`ResultAggregator`]. Terminal
//! outcomes are immutable once recorded.

use crate::core::{
    findings::Finding,
    graph::StageGraph,
    state::{RunState, StageState},
    workflow::WorkflowDefinition,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AggregatorError {
    #[error("Unknown stage '{0}'")]
    UnknownStage(String),

    #[error("Stage '{stage}' already recorded as {state}")]
    AlreadyRecorded { stage: String, state: &'static str },

    #[error("Stage '{stage}' cannot move from {from} to {to}")]
    InvalidTransition {
        stage: String,
        from: &'static str,
        to: &'static str,
    },
}

/// Opaque handle to an artifact held in an external store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub name: String,
    pub uri: String,
}

/// Everything a finished stage produced besides its state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub outputs: BTreeMap<String, String>,
    pub artifacts: Vec<ArtifactRef>,
    pub findings: Vec<Finding>,
}

/// What a stage task reports back to the coordinator
#[derive(Debug, Clone, PartialEq)]
pub enum StageReport {
    Succeeded {
        attempts: u32,
        record: StageRecord,
    },
    Failed {
        attempts: u32,
        error: String,
        record: StageRecord,
    },
    Cancelled {
        reason: String,
    },
}

/// Collects stage outcomes and owns the run state
#[derive(Debug, Clone)]
pub struct ResultAggregator {
    state: RunState,
    records: HashMap<String, StageRecord>,
    declared_outputs: HashMap<String, BTreeSet<String>>,
}

impl ResultAggregator {
    pub fn new(definition: &WorkflowDefinition) -> Self {
        Self {
            state: RunState::new(definition.stages().iter().map(|s| s.id.clone())),
            records: HashMap::new(),
            declared_outputs: definition
                .stages()
                .iter()
                .map(|s| (s.id.clone(), s.outputs.iter().cloned().collect()))
                .collect(),
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub(crate) fn state_mut(&mut self) -> &mut RunState {
        &mut self.state
    }

    pub fn record(&self, stage_id: &str) -> Option<&StageRecord> {
        self.records.get(stage_id)
    }

    pub fn outputs(&self, stage_id: &str) -> Option<&BTreeMap<String, String>> {
        self.records.get(stage_id).map(|r| &r.outputs)
    }

    fn current(&self, stage_id: &str) -> Result<&StageState, AggregatorError> {
        let current = self
            .state
            .get(stage_id)
            .ok_or_else(|| AggregatorError::UnknownStage(stage_id.to_string()))?;
        if current.is_terminal() {
            return Err(AggregatorError::AlreadyRecorded {
                stage: stage_id.to_string(),
                state: current.label(),
            });
        }
        Ok(current)
    }

    fn transition(&mut self, stage_id: &str, next: StageState) -> Result<(), AggregatorError> {
        let current = self.current(stage_id)?;
        let allowed = matches!(
            (current, &next),
            (StageState::Pending, StageState::Eligible)
                | (StageState::Pending, StageState::Skipped { .. })
                | (StageState::Eligible, StageState::Running { .. })
                | (StageState::Eligible, StageState::Skipped { .. })
                | (StageState::Running { .. }, StageState::Succeeded { .. })
                | (StageState::Running { .. }, StageState::Failed { .. })
                | (StageState::Running { .. }, StageState::Cancelled { .. })
        );
        if !allowed {
            return Err(AggregatorError::InvalidTransition {
                stage: stage_id.to_string(),
                from: current.label(),
                to: next.label(),
            });
        }

        debug!("stage {}: {} -> {}", stage_id, current.label(), next.label());
        self.state.set(stage_id, next);
        Ok(())
    }

    pub fn mark_eligible(&mut self, stage_id: &str) -> Result<(), AggregatorError> {
        self.transition(stage_id, StageState::Eligible)
    }

    pub fn mark_running(&mut self, stage_id: &str) -> Result<DateTime<Utc>, AggregatorError> {
        let started_at = Utc::now();
        self.transition(stage_id, StageState::Running { started_at })?;
        Ok(started_at)
    }

    pub fn skip(&mut self, stage_id: &str, reason: impl Into<String>) -> Result<(), AggregatorError> {
        self.transition(
            stage_id,
            StageState::Skipped {
                reason: reason.into(),
            },
        )
    }

    /// Record a finished stage task
    pub fn complete(&mut self, stage_id: &str, report: StageReport) -> Result<(), AggregatorError> {
        let started_at = match self.current(stage_id)? {
            StageState::Running { started_at } => *started_at,
            _ => Utc::now(),
        };
        let now = Utc::now();

        let (next, record) = match report {
            StageReport::Succeeded { attempts, record } => (
                StageState::Succeeded {
                    attempts,
                    started_at,
                    completed_at: now,
                },
                Some(record),
            ),
            StageReport::Failed {
                attempts,
                error,
                record,
            } => (
                StageState::Failed {
                    error,
                    attempts,
                    started_at,
                    failed_at: now,
                },
                Some(record),
            ),
            StageReport::Cancelled { reason } => (
                StageState::Cancelled {
                    reason,
                    started_at,
                    cancelled_at: now,
                },
                None,
            ),
        };

        self.transition(stage_id, next)?;

        if let Some(mut record) = record {
            let declared = self.declared_outputs.get(stage_id);
            record.outputs.retain(|name, _| {
                let keep = declared.is_some_and(|d| d.contains(name));
                if !keep {
                    warn!("Stage {} produced undeclared output '{}', dropping it", stage_id, name);
                }
                keep
            });
            self.records.insert(stage_id.to_string(), record);
        }
        Ok(())
    }

    /// Skip every non-terminal transitive dependent of `stage_id`
    ///
    /// One reachability pass over the graph; returns the stages it skipped.
    pub fn skip_downstream(&mut self, graph: &StageGraph, stage_id: &str, reason: &str) -> Vec<String> {
        let mut skipped = Vec::new();
        for dependent in graph.downstream(&[stage_id]) {
            let skippable = matches!(
                self.state.get(&dependent),
                Some(StageState::Pending | StageState::Eligible)
            );
            if skippable && self.skip(&dependent, reason).is_ok() {
                skipped.push(dependent);
            }
        }
        skipped
    }
}
