//! Test: bounded retries, timeouts and non-retryable errors

use crate::helpers::*;
use stagerun::{ExecutionStatus, TaskError};

const FLAKY: &str = r#"
name: "flaky"
stages:
  - id: integration
    uses: command
    retries:
      max_attempts: 3
      backoff_ms: 5
  - { id: report, uses: command, needs: [integration] }
"#;

#[tokio::test]
async fn test_succeeds_on_third_attempt() {
    let mock = MockInvoker::new().script(
        "integration",
        vec![
            Behavior::fail("connection refused"),
            Behavior::Error(TaskError::Spawn("no such file".to_string())),
            Behavior::ok(),
        ],
    );
    let result = run_workflow(FLAKY, mock.clone()).await;

    assert_eq!(result.status, ExecutionStatus::Succeeded, "{}", result.summary());
    assert_eq!(attempts_of(&result, "integration"), 3);
    assert_eq!(result.retries_of("integration"), 2);

    let attempts: Vec<u32> = mock.calls_for("integration").iter().map(|c| c.attempt).collect();
    assert_eq!(attempts, vec![1, 2, 3]);
    assert_succeeded(&result, "report");
}

#[tokio::test]
async fn test_exhausted_retries_fail_with_last_error() {
    let mock = MockInvoker::new().script(
        "integration",
        vec![Behavior::fail("first"), Behavior::fail("second"), Behavior::fail("third")],
    );
    let result = run_workflow(FLAKY, mock.clone()).await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_failed(&result, "integration", "third");
    assert_eq!(attempts_of(&result, "integration"), 3);
    assert_eq!(mock.calls_for("integration").len(), 3);
    assert_skipped(&result, "report", "upstream stage 'integration' failed");
}

#[tokio::test]
async fn test_config_errors_are_not_retried() {
    let mock = MockInvoker::new().on(
        "integration",
        Behavior::Error(TaskError::Config("command requires input 'run'".to_string())),
    );
    let result = run_workflow(FLAKY, mock.clone()).await;

    assert_failed(&result, "integration", "requires input 'run'");
    assert_eq!(mock.calls_for("integration").len(), 1);
    assert_eq!(result.retries_of("integration"), 0);
}

#[tokio::test]
async fn test_timeout_counts_as_failed_attempt() {
    let yaml = r#"
name: "slow"
stages:
  - id: hang
    uses: command
    timeout_secs: 1
    retries: { max_attempts: 2 }
"#;
    let mock = MockInvoker::new().on("hang", Behavior::IgnoreCancel);
    let result = run_workflow(yaml, mock.clone()).await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_failed(&result, "hang", "Timed out after 1 seconds");
    assert_eq!(mock.calls_for("hang").len(), 2);
}

#[tokio::test]
async fn test_single_attempt_by_default() {
    let yaml = r#"
name: "once"
stages:
  - { id: only, uses: command }
"#;
    let mock = MockInvoker::new().on("only", Behavior::fail("exit 1"));
    let result = run_workflow(yaml, mock.clone()).await;
    assert_eq!(attempts_of(&result, "only"), 1);
    assert_eq!(result.retries_of("only"), 0);
}
