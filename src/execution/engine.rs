//! Main execution engine - orchestrates the entire pipeline run

use crate::{
    core::{
        condition::Condition,
        results::StageReport,
        state::{ExecutionStatus, StageState},
        PipelineRun,
    },
    error::EngineError,
    execution::{
        runner::{StageJob, StageRunner, CANCELLED_REASON},
        scheduler::{ExecutionScheduler, SchedulingStrategy},
    },
    secrets::SecretStore,
    task::TaskInvoker,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::{Id, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events that can occur during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    PipelineStarted {
        execution_id: Uuid,
        pipeline_name: String,
        stage_count: usize,
    },
    StageSkipped {
        stage_id: String,
        reason: String,
    },
    StageStarted {
        stage_id: String,
    },
    StageRetrying {
        stage_id: String,
        attempt: u32,
        max_attempts: u32,
        error: String,
    },
    StageSucceeded {
        stage_id: String,
        attempts: u32,
        outputs: BTreeMap<String, String>,
    },
    StageFailed {
        stage_id: String,
        error: String,
        attempts: u32,
    },
    StageCancelled {
        stage_id: String,
        reason: String,
    },
    RunCancelled {
        execution_id: Uuid,
    },
    PipelineCompleted {
        execution_id: Uuid,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Fan-out of events to registered handlers, shared with stage tasks
#[derive(Clone, Default)]
pub struct EventEmitter {
    handlers: Arc<Mutex<Vec<EventHandler>>>,
}

impl EventEmitter {
    pub fn add<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(handler));
    }

    pub fn emit(&self, event: ExecutionEvent) {
        // A handler that panicked must not silence the rest of the run
        let handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner()).clone();
        for handler in handlers {
            handler(event.clone());
        }
    }
}

/// Main pipeline execution engine
///
/// The coordinator loop is the only writer of run state. Stage tasks
/// report back through the join set.
pub struct ExecutionEngine<I> {
    runner: Arc<StageRunner<I>>,
    scheduler: ExecutionScheduler,
    events: EventEmitter,
    cancel: CancellationToken,
    grace_period: Option<Duration>,
}

impl<I: TaskInvoker + 'static> ExecutionEngine<I> {
    pub fn new(invoker: I, secrets: Arc<SecretStore>, strategy: SchedulingStrategy) -> Self {
        let events = EventEmitter::default();
        Self {
            runner: Arc::new(StageRunner::new(Arc::new(invoker), secrets, events.clone())),
            scheduler: ExecutionScheduler::new(strategy),
            events,
            cancel: CancellationToken::new(),
            grace_period: None,
        }
    }

    /// Override the workflow's grace period
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = Some(grace_period);
        self
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.events.add(handler);
    }

    /// Token that cancels the run when triggered
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Execute the entire pipeline
    pub async fn execute(&self, run: &mut PipelineRun) -> Result<ExecutionStatus, EngineError> {
        let definition = run.definition.clone();
        let execution_id = run.execution_id();
        let grace_period = self.grace_period.unwrap_or(definition.settings.grace_period);

        info!(
            "Starting pipeline execution: {} ({}, {})",
            definition.name,
            execution_id,
            self.scheduler.strategy()
        );
        run.results.state_mut().start();
        self.events.emit(ExecutionEvent::PipelineStarted {
            execution_id,
            pipeline_name: definition.name.clone(),
            stage_count: definition.len(),
        });

        let mut tasks: JoinSet<StageReport> = JoinSet::new();
        let mut running: HashMap<Id, String> = HashMap::new();
        let mut cancelled = false;
        let mut grace_deadline: Option<Instant> = None;

        loop {
            if !cancelled && self.cancel.is_cancelled() {
                cancelled = true;
                self.on_cancel(run)?;
                // Too large to represent means wait indefinitely
                grace_deadline = Instant::now().checked_add(grace_period);
                if grace_deadline.is_none() {
                    warn!("Grace period of {}s has no deadline", grace_period.as_secs());
                }
            }

            if !cancelled {
                self.promote_ready(run)?;
                self.launch_eligible(run, &mut tasks, &mut running)?;
            }

            if tasks.is_empty() {
                self.skip_stuck(run)?;
                break;
            }

            tokio::select! {
                joined = tasks.join_next_with_id() => {
                    let (id, report) = match joined {
                        Some(Ok((id, report))) => (id, report),
                        Some(Err(join_error)) => {
                            let report = if join_error.is_cancelled() {
                                StageReport::Cancelled {
                                    reason: format!("{}; aborted after grace period", CANCELLED_REASON),
                                }
                            } else {
                                error!("Stage task panicked: {}", join_error);
                                StageReport::Failed {
                                    attempts: 1,
                                    error: "stage task panicked".to_string(),
                                    record: Default::default(),
                                }
                            };
                            (join_error.id(), report)
                        }
                        None => continue,
                    };
                    let stage_id = running
                        .remove(&id)
                        .ok_or_else(|| EngineError::UnknownStage(format!("task {}", id)))?;
                    self.record(run, &stage_id, report)?;
                }
                _ = self.cancel.cancelled(), if !cancelled => {
                    // Handled at the top of the loop
                }
                _ = tokio::time::sleep_until(grace_deadline.unwrap_or_else(Instant::now)), if grace_deadline.is_some() => {
                    warn!(
                        "Grace period of {}s expired, aborting {} running stages",
                        grace_period.as_secs(),
                        tasks.len()
                    );
                    tasks.abort_all();
                    grace_deadline = None;
                }
            }
        }

        let status = run.state().outcome(cancelled);
        run.results.state_mut().finish(status);
        info!("Pipeline execution finished: {} - {:?}", definition.name, status);
        self.events.emit(ExecutionEvent::PipelineCompleted { execution_id, status });
        Ok(status)
    }

    /// Mark ready stages Eligible, or Skipped when their condition fails
    fn promote_ready(&self, run: &mut PipelineRun) -> Result<(), EngineError> {
        let definition = run.definition.clone();
        for stage_id in definition.graph().ready(run.state()) {
            let stage = definition
                .stage(&stage_id)
                .ok_or_else(|| EngineError::UnknownStage(stage_id.clone()))?;

            let skip_reason = match stage.condition.as_deref() {
                None => None,
                Some(expression) => match Condition::parse(expression).and_then(|c| c.check(&run.trigger)) {
                    Ok(true) => None,
                    Ok(false) => Some(format!("condition '{}' is false", expression)),
                    Err(e) => {
                        warn!("Stage {} has an invalid condition: {}", stage_id, e);
                        Some(format!("invalid condition: {}", e))
                    }
                },
            };

            match skip_reason {
                None => run.results.mark_eligible(&stage_id)?,
                Some(reason) => {
                    info!("Skipping stage {}: {}", stage_id, reason);
                    run.results.skip(&stage_id, reason.clone())?;
                    self.events.emit(ExecutionEvent::StageSkipped {
                        stage_id: stage_id.clone(),
                        reason,
                    });
                    self.skip_dependents(run, &stage_id, &format!("upstream stage '{}' was skipped", stage_id));
                }
            }
        }
        Ok(())
    }

    fn launch_eligible(
        &self,
        run: &mut PipelineRun,
        tasks: &mut JoinSet<StageReport>,
        running: &mut HashMap<Id, String>,
    ) -> Result<(), EngineError> {
        let definition = run.definition.clone();
        let eligible: Vec<String> = definition
            .graph()
            .topological_order()
            .iter()
            .filter(|id| matches!(run.state().get(id), Some(StageState::Eligible)))
            .cloned()
            .collect();

        for stage_id in self.scheduler.next_stages(&eligible, tasks.len()) {
            let stage = definition
                .stage(&stage_id)
                .ok_or_else(|| EngineError::UnknownStage(stage_id.clone()))?;

            run.results.mark_running(&stage_id)?;
            self.events.emit(ExecutionEvent::StageStarted {
                stage_id: stage_id.clone(),
            });

            let job = StageJob {
                stage: stage.clone(),
                variables: run.template_variables_for(&stage_id),
                cancel: self.cancel.child_token(),
            };
            let runner = self.runner.clone();
            let handle = tasks.spawn(async move { runner.run(job).await });
            debug!("Spawned stage {} as task {}", stage_id, handle.id());
            running.insert(handle.id(), stage_id);
        }
        Ok(())
    }

    /// Record a stage result and propagate skips on failure
    fn record(&self, run: &mut PipelineRun, stage_id: &str, report: StageReport) -> Result<(), EngineError> {
        run.results.complete(stage_id, report.clone())?;

        match report {
            StageReport::Succeeded { attempts, .. } => {
                let outputs = run.results.outputs(stage_id).cloned().unwrap_or_default();
                self.events.emit(ExecutionEvent::StageSucceeded {
                    stage_id: stage_id.to_string(),
                    attempts,
                    outputs,
                });
            }
            StageReport::Failed { attempts, error, .. } => {
                error!("Stage {} failed after {} attempts: {}", stage_id, attempts, error);
                self.events.emit(ExecutionEvent::StageFailed {
                    stage_id: stage_id.to_string(),
                    error,
                    attempts,
                });
                self.skip_dependents(run, stage_id, &format!("upstream stage '{}' failed", stage_id));
            }
            StageReport::Cancelled { reason } => {
                warn!("Stage {} cancelled: {}", stage_id, reason);
                self.events.emit(ExecutionEvent::StageCancelled {
                    stage_id: stage_id.to_string(),
                    reason,
                });
                self.skip_dependents(run, stage_id, CANCELLED_REASON);
            }
        }
        Ok(())
    }

    fn skip_dependents(&self, run: &mut PipelineRun, stage_id: &str, reason: &str) {
        let definition = run.definition.clone();
        for skipped in run.results.skip_downstream(definition.graph(), stage_id, reason) {
            info!("Skipping stage {}: {}", skipped, reason);
            self.events.emit(ExecutionEvent::StageSkipped {
                stage_id: skipped,
                reason: reason.to_string(),
            });
        }
    }

    /// Stop new starts; Pending and Eligible stages never run
    fn on_cancel(&self, run: &mut PipelineRun) -> Result<(), EngineError> {
        warn!("Run {} cancelled", run.execution_id());
        self.events.emit(ExecutionEvent::RunCancelled {
            execution_id: run.execution_id(),
        });

        let waiting = run
            .state()
            .stages_where(|s| matches!(s, StageState::Pending | StageState::Eligible));
        for stage_id in waiting {
            run.results.skip(&stage_id, CANCELLED_REASON)?;
            self.events.emit(ExecutionEvent::StageSkipped {
                stage_id,
                reason: CANCELLED_REASON.to_string(),
            });
        }
        Ok(())
    }

    /// Skip stages left waiting with nothing running
    ///
    /// Unreachable while skips propagate correctly; guards against a hang.
    fn skip_stuck(&self, run: &mut PipelineRun) -> Result<(), EngineError> {
        let stuck = run
            .state()
            .stages_where(|s| matches!(s, StageState::Pending | StageState::Eligible));
        if stuck.is_empty() {
            return Ok(());
        }

        error!("No stages ready and none running; skipping {:?}", stuck);
        for stage_id in stuck {
            run.results.skip(&stage_id, "unsatisfiable dependencies")?;
            self.events.emit(ExecutionEvent::StageSkipped {
                stage_id,
                reason: "unsatisfiable dependencies".to_string(),
            });
        }
        Ok(())
    }
}
