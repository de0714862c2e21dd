//! Test: scheduling strategies bound how many stages run at once

use crate::helpers::*;
use stagerun::execution::SchedulingStrategy;
use stagerun::ExecutionStatus;
use std::time::Duration;

const FAN_OUT: &str = r#"
name: "fan-out"
stages:
  - { id: checkout, uses: command }
  - { id: unit, uses: command, needs: [checkout] }
  - { id: integration, uses: command, needs: [checkout] }
  - { id: lint, uses: command, needs: [checkout] }
  - { id: audit, uses: command, needs: [checkout] }
  - { id: fmt, uses: command, needs: [checkout] }
  - { id: package, uses: command, needs: [unit, integration, lint, audit, fmt] }
"#;

async fn run_with(strategy: SchedulingStrategy) -> (RunResult, MockInvoker) {
    let mock = MockInvoker::new().with_delay(Duration::from_millis(40));
    let result = run_workflow_with(
        FAN_OUT,
        mock.clone(),
        RunOptions {
            strategy,
            ..RunOptions::default()
        },
    )
    .await;
    assert_eq!(result.status, ExecutionStatus::Succeeded, "{}", result.summary());
    (result, mock)
}

#[tokio::test]
async fn test_parallel_runs_independent_stages_together() {
    let (result, mock) = run_with(SchedulingStrategy::Parallel).await;
    assert_eq!(mock.peak_concurrency(), 5);
    assert_eq!(result.started().first().map(String::as_str), Some("checkout"));
    assert_eq!(result.started().last().map(String::as_str), Some("package"));
}

#[tokio::test]
async fn test_limited_parallel_respects_limit() {
    let (_, mock) = run_with(SchedulingStrategy::LimitedParallel(2)).await;
    assert_eq!(mock.peak_concurrency(), 2);
    assert_eq!(mock.calls().len(), 7);
}

#[tokio::test]
async fn test_sequential_follows_topological_order() {
    let (result, mock) = run_with(SchedulingStrategy::Sequential).await;
    assert_eq!(mock.peak_concurrency(), 1);

    let order = result.run.definition.graph().topological_order().to_vec();
    assert_eq!(result.started(), order);
}

#[tokio::test]
async fn test_workflow_concurrency_setting() {
    let yaml = FAN_OUT.replace("name: \"fan-out\"", "name: \"fan-out\"\nsettings:\n  concurrency: 3");
    let definition = workflow_from_yaml(&yaml);
    assert_eq!(
        SchedulingStrategy::from_settings(&definition.settings),
        SchedulingStrategy::LimitedParallel(3)
    );

    let mock = MockInvoker::new().with_delay(Duration::from_millis(40));
    let result = run_workflow_with(
        &yaml,
        mock.clone(),
        RunOptions {
            strategy: SchedulingStrategy::from_settings(&definition.settings),
            ..RunOptions::default()
        },
    )
    .await;
    assert_eq!(result.status, ExecutionStatus::Succeeded);
    assert_eq!(mock.peak_concurrency(), 3);
}
