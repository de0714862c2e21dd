//! Test: failures and false conditions skip exactly the downstream stages

use crate::helpers::*;
use stagerun::{ExecutionStatus, StageState};

const DIAMOND: &str = r#"
name: "diamond"
stages:
  - { id: a, uses: command }
  - { id: b, uses: command, needs: [a] }
  - { id: c, uses: command, needs: [a] }
  - { id: d, uses: command, needs: [b, c] }
  - { id: lint, uses: command }
  - { id: docs, uses: command, needs: [lint] }
"#;

#[tokio::test]
async fn test_root_failure_skips_descendants_only() {
    let mock = MockInvoker::new().on("a", Behavior::fail("compile error"));
    let result = run_workflow(DIAMOND, mock.clone()).await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_failed(&result, "a", "compile error");
    for stage in ["b", "c", "d"] {
        assert_skipped(&result, stage, "upstream stage 'a' failed");
    }
    assert_succeeded(&result, "lint");
    assert_succeeded(&result, "docs");

    let mut invoked = mock.invoked();
    invoked.sort();
    assert_eq!(invoked, vec!["a", "docs", "lint"]);
}

#[tokio::test]
async fn test_sibling_failure_does_not_stop_running_sibling() {
    let mock = MockInvoker::new().on("b", Behavior::fail("flaky"));
    let result = run_workflow(DIAMOND, mock).await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_failed(&result, "b", "flaky");
    assert_succeeded(&result, "c");
    assert_skipped(&result, "d", "upstream stage 'b' failed");
}

#[tokio::test]
async fn test_false_condition_skips_transitively() {
    let yaml = r#"
name: "release"
stages:
  - { id: build, uses: command }
  - { id: publish, uses: command, needs: [build], if: "ref =~ 'refs/tags/v*'" }
  - { id: announce, uses: command, needs: [publish] }
  - { id: report, uses: command, needs: [build] }
"#;
    let result = run_workflow(yaml, MockInvoker::new()).await;

    assert_eq!(result.status, ExecutionStatus::Succeeded, "{}", result.summary());
    assert_succeeded(&result, "build");
    assert_skipped(&result, "publish", "is false");
    assert_skipped(&result, "announce", "upstream stage 'publish' was skipped");
    assert_succeeded(&result, "report");
}

#[tokio::test]
async fn test_condition_on_unknown_key_fails_closed() {
    let yaml = r#"
name: "matrix"
stages:
  - { id: linux, uses: command, if: "matrix.os == linux" }
"#;
    let result = run_workflow(yaml, MockInvoker::new()).await;
    assert_skipped(&result, "linux", "is false");
    assert_eq!(result.status, ExecutionStatus::Succeeded);
}

#[tokio::test]
async fn test_invalid_condition_skips_stage() {
    let yaml = r#"
name: "broken"
stages:
  - { id: a, uses: command, if: "branch == " }
  - { id: b, uses: command, needs: [a] }
"#;
    let mock = MockInvoker::new();
    let result = run_workflow(yaml, mock.clone()).await;

    assert_skipped(&result, "a", "invalid condition");
    assert_skipped(&result, "b", "upstream stage 'a' was skipped");
    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn test_every_stage_ends_terminal() {
    let mock = MockInvoker::new().on("c", Behavior::fail("nope"));
    let result = run_workflow(DIAMOND, mock).await;
    assert!(result.run.state().iter().all(|(_, s)| s.is_terminal()));
    assert!(matches!(result.state("d"), StageState::Skipped { .. }));
}
