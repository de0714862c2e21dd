//! Test: run cancellation, grace period and abort

use crate::helpers::*;
use stagerun::execution::ExecutionEvent;
use stagerun::ExecutionStatus;
use std::time::{Duration, Instant};

const CHAIN: &str = r#"
name: "deploy"
stages:
  - { id: build, uses: command }
  - { id: migrate, uses: command, needs: [build] }
  - { id: deploy, uses: command, needs: [migrate] }
  - { id: lint, uses: command }
"#;

#[tokio::test]
async fn test_cancel_stops_running_and_skips_waiting() {
    let mock = MockInvoker::new().on("migrate", Behavior::WaitForCancel);
    let result = run_workflow_with(
        CHAIN,
        mock.clone(),
        RunOptions {
            cancel_after: Some(Duration::from_millis(100)),
            ..RunOptions::default()
        },
    )
    .await;

    assert_eq!(result.status, ExecutionStatus::Cancelled, "{}", result.summary());
    assert_succeeded(&result, "build");
    assert_succeeded(&result, "lint");
    assert_cancelled(&result, "migrate", "run cancelled");
    assert_skipped(&result, "deploy", "run cancelled");
    assert!(mock.calls_for("deploy").is_empty());

    assert!(result
        .events
        .iter()
        .any(|e| matches!(e, ExecutionEvent::RunCancelled { .. })));
    assert!(matches!(
        result.events.last(),
        Some(ExecutionEvent::PipelineCompleted {
            status: ExecutionStatus::Cancelled,
            ..
        })
    ));
}

#[tokio::test]
async fn test_stubborn_stage_is_aborted_after_grace_period() {
    let mock = MockInvoker::new().on("migrate", Behavior::IgnoreCancel);
    let started = Instant::now();
    let result = run_workflow_with(
        CHAIN,
        mock,
        RunOptions {
            cancel_after: Some(Duration::from_millis(50)),
            grace_period: Some(Duration::from_millis(200)),
            ..RunOptions::default()
        },
    )
    .await;

    assert_eq!(result.status, ExecutionStatus::Cancelled, "{}", result.summary());
    assert_cancelled(&result, "migrate", "aborted after grace period");
    assert_skipped(&result, "deploy", "run cancelled");
    assert!(started.elapsed() >= Duration::from_millis(250));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_cancel_during_backoff() {
    let yaml = r#"
name: "retrying"
stages:
  - id: flaky
    uses: command
    retries: { max_attempts: 5, backoff_ms: 10000 }
"#;
    let mock = MockInvoker::new().on("flaky", Behavior::fail("connection reset"));
    let result = run_workflow_with(
        yaml,
        mock.clone(),
        RunOptions {
            cancel_after: Some(Duration::from_millis(100)),
            ..RunOptions::default()
        },
    )
    .await;

    assert_eq!(result.status, ExecutionStatus::Cancelled, "{}", result.summary());
    assert_cancelled(&result, "flaky", "run cancelled");
    assert_eq!(mock.calls_for("flaky").len(), 1);
}

#[tokio::test]
async fn test_failure_outranks_cancellation() {
    let yaml = r#"
name: "mixed"
stages:
  - { id: broken, uses: command }
  - { id: slow, uses: command }
"#;
    let mock = MockInvoker::new()
        .on("broken", Behavior::fail("exit 2"))
        .on("slow", Behavior::WaitForCancel);
    let result = run_workflow_with(
        yaml,
        mock,
        RunOptions {
            cancel_after: Some(Duration::from_millis(100)),
            ..RunOptions::default()
        },
    )
    .await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_cancelled(&result, "slow", "run cancelled");
}
