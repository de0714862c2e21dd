//! Stage runner - runs one stage inside its own task

use crate::core::{
    findings::count_at_or_above,
    results::{StageRecord, StageReport},
    stage::StageDefinition,
};
use crate::execution::engine::{EventEmitter, ExecutionEvent};
use crate::secrets::SecretStore;
use crate::task::{TaskError, TaskInvocation, TaskInvoker, TaskOutcome, TaskStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Reason recorded when a stage stops because the run was cancelled
pub const CANCELLED_REASON: &str = "run cancelled";

/// Everything a stage task needs, detached from the coordinator
#[derive(Debug, Clone)]
pub struct StageJob {
    pub stage: StageDefinition,
    /// Template variables visible to this stage
    pub variables: HashMap<String, String>,
    pub cancel: CancellationToken,
}

enum Attempt {
    Done(StageReport),
    Retry(String),
}

/// Runs a stage to completion: inputs, secrets, retries, severity gate
pub struct StageRunner<I> {
    invoker: Arc<I>,
    secrets: Arc<SecretStore>,
    events: EventEmitter,
}

impl<I: TaskInvoker> StageRunner<I> {
    pub fn new(invoker: Arc<I>, secrets: Arc<SecretStore>, events: EventEmitter) -> Self {
        Self {
            invoker,
            secrets,
            events,
        }
    }

    pub async fn run(&self, job: StageJob) -> StageReport {
        let stage = &job.stage;
        info!("Executing stage: {}", stage.id);

        let inputs = match stage.render_inputs(&job.variables) {
            Ok(inputs) => inputs,
            Err(name) => {
                error!("Stage {}: unresolved template variable '{}'", stage.id, name);
                return failed(0, format!("unresolved template variable '{}'", name), StageRecord::default());
            }
        };

        let secrets = match self.secrets.scope(&stage.id, &stage.secrets) {
            Ok(secrets) => secrets,
            Err(e) => {
                error!("Stage {}: {}", stage.id, e);
                return failed(0, e.to_string(), StageRecord::default());
            }
        };

        let max_attempts = stage.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            if job.cancel.is_cancelled() {
                return cancelled();
            }

            let invocation = TaskInvocation {
                stage_id: stage.id.clone(),
                task: stage.task.clone(),
                inputs: inputs.clone(),
                secrets: secrets.clone(),
                attempt,
                cancel: job.cancel.clone(),
            };

            let result = match timeout(stage.timeout, self.invoker.invoke(invocation)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("Timeout for stage {} after {}s", stage.id, stage.timeout.as_secs());
                    Err(TaskError::Timeout(stage.timeout.as_secs()))
                }
            };

            let error = match self.evaluate(stage, attempt, result) {
                Attempt::Done(report) => return report,
                Attempt::Retry(error) if attempt < max_attempts => error,
                Attempt::Retry(error) => {
                    return failed(attempt, error, StageRecord::default());
                }
            };

            info!(
                "Stage {} attempt {}/{} failed, retrying: {}",
                stage.id, attempt, max_attempts, error
            );
            self.events.emit(ExecutionEvent::StageRetrying {
                stage_id: stage.id.clone(),
                attempt: attempt + 1,
                max_attempts,
                error,
            });

            if !stage.retry.backoff.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(stage.retry.backoff) => {}
                    _ = job.cancel.cancelled() => return cancelled(),
                }
            }
            attempt += 1;
        }
    }

    fn evaluate(&self, stage: &StageDefinition, attempt: u32, result: Result<TaskOutcome, TaskError>) -> Attempt {
        match result {
            Ok(outcome) => {
                let record = StageRecord {
                    outputs: outcome.outputs,
                    artifacts: outcome.artifacts,
                    findings: outcome.findings,
                };
                match outcome.status {
                    TaskStatus::Success => Attempt::Done(gate(stage, attempt, record)),
                    TaskStatus::Failure { exit_code, message } => {
                        debug!("Stage {} exit code {:?}", stage.id, exit_code);
                        let error = match exit_code {
                            Some(code) if message.is_empty() => format!("exited with code {}", code),
                            _ => message,
                        };
                        if attempt < stage.retry.max_attempts {
                            Attempt::Retry(error)
                        } else {
                            Attempt::Done(failed(attempt, error, record))
                        }
                    }
                }
            }
            Err(TaskError::Cancelled) => Attempt::Done(cancelled()),
            Err(e) if e.is_retryable() => Attempt::Retry(e.to_string()),
            Err(e) => {
                error!("Stage {}: {}", stage.id, e);
                Attempt::Done(failed(attempt, e.to_string(), StageRecord::default()))
            }
        }
    }
}

/// Fail a successful task whose findings reach the stage's threshold
fn gate(stage: &StageDefinition, attempts: u32, record: StageRecord) -> StageReport {
    if let Some(threshold) = stage.fail_on_severity {
        let count = count_at_or_above(&record.findings, threshold);
        if count > 0 {
            warn!(
                "Stage {} reported {} findings at or above {}",
                stage.id, count, threshold
            );
            return failed(
                attempts,
                format!("{} findings at or above severity '{}'", count, threshold),
                record,
            );
        }
    }
    info!("Stage {} completed successfully", stage.id);
    StageReport::Succeeded { attempts, record }
}

fn failed(attempts: u32, error: String, record: StageRecord) -> StageReport {
    StageReport::Failed {
        attempts,
        error,
        record,
    }
}

fn cancelled() -> StageReport {
    StageReport::Cancelled {
        reason: CANCELLED_REASON.to_string(),
    }
}
