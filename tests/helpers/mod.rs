//! Test utilities for stagerun

#![allow(dead_code)]

use async_trait::async_trait;
use stagerun::core::config::WorkflowConfig;
use stagerun::core::findings::Finding;
use stagerun::execution::{ExecutionEngine, ExecutionEvent, SchedulingStrategy};
use stagerun::secrets::SecretStore;
use stagerun::{
    ExecutionStatus, PipelineRun, StageState, TaskError, TaskInvocation, TaskInvoker, TaskOutcome,
    TriggerContext, WorkflowDefinition,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What the mock does for one attempt of a stage
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed(Vec<(String, String)>),
    SucceedWithFindings(Vec<Finding>),
    Fail(String),
    Error(TaskError),
    /// Runs until the run is cancelled, then stops
    WaitForCancel,
    /// Runs until aborted
    IgnoreCancel,
}

impl Behavior {
    pub fn ok() -> Self {
        Behavior::Succeed(Vec::new())
    }

    pub fn outputs(pairs: &[(&str, &str)]) -> Self {
        Behavior::Succeed(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    }

    pub fn fail(message: &str) -> Self {
        Behavior::Fail(message.to_string())
    }
}

/// One recorded invocation
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub stage_id: String,
    pub attempt: u32,
    pub inputs: BTreeMap<String, String>,
    /// Secret name and exposed value
    pub secrets: BTreeMap<String, String>,
}

#[derive(Default)]
struct MockState {
    scripts: Mutex<HashMap<String, VecDeque<Behavior>>>,
    calls: Mutex<Vec<RecordedCall>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// Scripted invoker; stages without a script succeed
#[derive(Clone, Default)]
pub struct MockInvoker {
    state: Arc<MockState>,
    delay: Option<Duration>,
}

impl MockInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Behaviors for successive attempts; the last one repeats
    pub fn script(self, stage_id: &str, behaviors: Vec<Behavior>) -> Self {
        self.state
            .scripts
            .lock()
            .unwrap()
            .insert(stage_id.to_string(), behaviors.into());
        self
    }

    pub fn on(self, stage_id: &str, behavior: Behavior) -> Self {
        self.script(stage_id, vec![behavior])
    }

    /// Every attempt takes this long before its behavior applies
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, stage_id: &str) -> Vec<RecordedCall> {
        self.calls().into_iter().filter(|c| c.stage_id == stage_id).collect()
    }

    pub fn invoked(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.calls().into_iter().map(|c| c.stage_id).collect();
        ids.dedup();
        ids
    }

    /// Most stages that were in flight at once
    pub fn peak_concurrency(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }

    fn next_behavior(&self, stage_id: &str) -> Behavior {
        let mut scripts = self.state.scripts.lock().unwrap();
        match scripts.get_mut(stage_id) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue.front().cloned().unwrap_or_else(Behavior::ok),
            None => Behavior::ok(),
        }
    }

    async fn perform(&self, behavior: Behavior, cancel: CancellationToken) -> Result<TaskOutcome, TaskError> {
        if let Some(delay) = self.delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(TaskError::Cancelled),
            }
        }

        match behavior {
            Behavior::Succeed(outputs) => Ok(outputs
                .into_iter()
                .fold(TaskOutcome::success(), |outcome, (k, v)| outcome.with_output(k, v))),
            Behavior::SucceedWithFindings(findings) => Ok(TaskOutcome::success().with_findings(findings)),
            Behavior::Fail(message) => Ok(TaskOutcome::failure(Some(1), message)),
            Behavior::Error(error) => Err(error),
            Behavior::WaitForCancel => {
                cancel.cancelled().await;
                Err(TaskError::Cancelled)
            }
            Behavior::IgnoreCancel => {
                std::future::pending::<()>().await;
                Err(TaskError::Internal("unreachable".to_string()))
            }
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TaskInvoker for MockInvoker {
    async fn invoke(&self, invocation: TaskInvocation) -> Result<TaskOutcome, TaskError> {
        self.state.calls.lock().unwrap().push(RecordedCall {
            stage_id: invocation.stage_id.clone(),
            attempt: invocation.attempt,
            inputs: invocation.inputs.clone(),
            secrets: invocation
                .secrets
                .iter()
                .map(|(name, value)| (name.to_string(), value.expose().to_string()))
                .collect(),
        });

        let now = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.state.in_flight);

        let behavior = self.next_behavior(&invocation.stage_id);
        self.perform(behavior, invocation.cancel.clone()).await
    }
}

/// Parse a workflow from YAML
pub fn workflow_from_yaml(yaml: &str) -> Arc<WorkflowDefinition> {
    let config = WorkflowConfig::from_yaml(yaml).unwrap_or_else(|e| panic!("Failed to parse workflow YAML: {}", e));
    Arc::new(config.to_definition().unwrap())
}

pub fn push_to(branch: &str) -> TriggerContext {
    TriggerContext::new("push", branch).with_actor("tester")
}

/// Result of running a workflow in a test
pub struct RunResult {
    pub run: PipelineRun,
    pub status: ExecutionStatus,
    pub events: Vec<ExecutionEvent>,
}

impl RunResult {
    pub fn state(&self, stage_id: &str) -> &StageState {
        self.run
            .state()
            .get(stage_id)
            .unwrap_or_else(|| panic!("Stage '{}' not found in result", stage_id))
    }

    pub fn outputs(&self, stage_id: &str) -> BTreeMap<String, String> {
        self.run.results.outputs(stage_id).cloned().unwrap_or_default()
    }

    /// Stage ids in the order they started
    pub fn started(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                ExecutionEvent::StageStarted { stage_id } => Some(stage_id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn retries_of(&self, stage_id: &str) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, ExecutionEvent::StageRetrying { stage_id: id, .. } if id == stage_id))
            .count()
    }

    pub fn summary(&self) -> String {
        let states: Vec<String> = self
            .run
            .state()
            .iter()
            .map(|(id, s)| format!("{}={}", id, s.label()))
            .collect();
        format!("{:?} [{}]", self.status, states.join(", "))
    }
}

/// Options for [`run_workflow_with`]
pub struct RunOptions {
    pub trigger: TriggerContext,
    pub inputs: BTreeMap<String, String>,
    pub secrets: Arc<SecretStore>,
    pub strategy: SchedulingStrategy,
    pub grace_period: Option<Duration>,
    /// Cancel the run after this long
    pub cancel_after: Option<Duration>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            trigger: push_to("main"),
            inputs: BTreeMap::new(),
            secrets: SecretStore::empty(),
            strategy: SchedulingStrategy::Parallel,
            grace_period: None,
            cancel_after: None,
        }
    }
}

pub async fn run_workflow(yaml: &str, invoker: MockInvoker) -> RunResult {
    run_workflow_with(yaml, invoker, RunOptions::default()).await
}

pub async fn run_workflow_with(yaml: &str, invoker: MockInvoker, options: RunOptions) -> RunResult {
    let definition = workflow_from_yaml(yaml);
    let mut run = PipelineRun::new(definition, options.trigger, &options.inputs).unwrap();

    let mut engine = ExecutionEngine::new(invoker, options.secrets, options.strategy);
    if let Some(grace) = options.grace_period {
        engine = engine.with_grace_period(grace);
    }

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    engine.add_event_handler(move |event| sink.lock().unwrap().push(event));

    if let Some(after) = options.cancel_after {
        let token = engine.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            token.cancel();
        });
    }

    let status = engine.execute(&mut run).await.unwrap();
    let events = events.lock().unwrap().clone();
    RunResult { run, status, events }
}

pub fn assert_succeeded(result: &RunResult, stage_id: &str) {
    assert!(
        matches!(result.state(stage_id), StageState::Succeeded { .. }),
        "Stage '{}' should have succeeded: {}",
        stage_id,
        result.summary()
    );
}

pub fn assert_failed(result: &RunResult, stage_id: &str, expected_error: &str) {
    match result.state(stage_id) {
        StageState::Failed { error, .. } => assert!(
            error.contains(expected_error),
            "Stage '{}' error:\n{}\n\ndoes not contain:\n{}",
            stage_id,
            error,
            expected_error
        ),
        other => panic!("Stage '{}' should have failed, but was {:?}", stage_id, other),
    }
}

pub fn assert_skipped(result: &RunResult, stage_id: &str, expected_reason: &str) {
    match result.state(stage_id) {
        StageState::Skipped { reason } => assert!(
            reason.contains(expected_reason),
            "Stage '{}' skip reason '{}' does not contain '{}'",
            stage_id,
            reason,
            expected_reason
        ),
        other => panic!("Stage '{}' should have been skipped, but was {:?}", stage_id, other),
    }
}

pub fn assert_cancelled(result: &RunResult, stage_id: &str, expected_reason: &str) {
    match result.state(stage_id) {
        StageState::Cancelled { reason, .. } => assert!(
            reason.contains(expected_reason),
            "Stage '{}' cancel reason '{}' does not contain '{}'",
            stage_id,
            reason,
            expected_reason
        ),
        other => panic!("Stage '{}' should have been cancelled, but was {:?}", stage_id, other),
    }
}

pub fn attempts_of(result: &RunResult, stage_id: &str) -> u32 {
    match result.state(stage_id) {
        StageState::Succeeded { attempts, .. } | StageState::Failed { attempts, .. } => *attempts,
        _ => 0,
    }
}
