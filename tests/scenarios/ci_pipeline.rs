//! Test: the canonical CI workflow - test and security scan, build, deploy on main

use crate::helpers::*;
use stagerun::core::findings::{Finding, Severity};
use stagerun::{ExecutionStatus, SecretStoreBuilder};

const CI: &str = r#"
name: "ci"
inputs:
  image_name: "registry.example.com/app"
  namespace: "staging"
secrets: [REGISTRY_TOKEN]
stages:
  - id: test
    uses: command
    with:
      run: "cargo test"
  - id: security
    uses: scan
    with:
      scan_path: "."
    fail_on_severity: high
  - id: build
    needs: [test, security]
    uses: container-build
    with:
      image: "{{ inputs.image_name }}:{{ ref }}"
      push: "true"
      registry_secret: REGISTRY_TOKEN
    secrets: [REGISTRY_TOKEN]
    outputs: [digest]
  - id: deploy
    needs: [build]
    if: "branch == 'main'"
    uses: deploy
    with:
      namespace: "{{ inputs.namespace }}"
      digest: "{{ stages.build.outputs.digest }}"
"#;

fn options(branch: &str) -> RunOptions {
    RunOptions {
        trigger: push_to(branch),
        secrets: SecretStoreBuilder::new().insert("REGISTRY_TOKEN", "s3cr3t").build(),
        ..RunOptions::default()
    }
}

fn invoker() -> MockInvoker {
    MockInvoker::new().on("build", Behavior::outputs(&[("digest", "sha256:feed")]))
}

#[tokio::test]
async fn test_main_branch_runs_every_stage() {
    let mock = invoker();
    let result = run_workflow_with(CI, mock.clone(), options("main")).await;

    assert_eq!(result.status, ExecutionStatus::Succeeded, "{}", result.summary());
    for stage in ["test", "security", "build", "deploy"] {
        assert_succeeded(&result, stage);
    }

    // build only starts after both of its needs
    let started = result.started();
    let build_at = started.iter().position(|s| s == "build").unwrap();
    assert!(started.iter().position(|s| s == "test").unwrap() < build_at);
    assert!(started.iter().position(|s| s == "security").unwrap() < build_at);

    let deploy = &mock.calls_for("deploy")[0];
    assert_eq!(deploy.inputs["digest"], "sha256:feed");
    assert_eq!(deploy.inputs["namespace"], "staging");
    assert_eq!(
        mock.calls_for("build")[0].inputs["image"],
        "registry.example.com/app:refs/heads/main"
    );
}

#[tokio::test]
async fn test_feature_branch_skips_deploy() {
    let mock = invoker();
    let result = run_workflow_with(CI, mock.clone(), options("feature/login")).await;

    assert_eq!(result.status, ExecutionStatus::Succeeded, "{}", result.summary());
    assert_succeeded(&result, "build");
    assert_skipped(&result, "deploy", "condition 'branch == 'main'' is false");
    assert!(mock.calls_for("deploy").is_empty());
}

#[tokio::test]
async fn test_security_failure_blocks_build_and_deploy() {
    let finding = Finding {
        rule_id: "CVE-2024-0001".to_string(),
        severity: Severity::Critical,
        message: "remote code execution".to_string(),
        location: Some("Cargo.lock:12".to_string()),
    };
    let mock = invoker().on("security", Behavior::SucceedWithFindings(vec![finding]));
    let result = run_workflow_with(CI, mock.clone(), options("main")).await;

    assert_eq!(result.status, ExecutionStatus::Failed, "{}", result.summary());
    assert_succeeded(&result, "test");
    assert_failed(&result, "security", "1 findings at or above severity 'high'");
    assert_skipped(&result, "build", "upstream stage 'security' failed");
    assert_skipped(&result, "deploy", "upstream stage 'security' failed");
    assert_eq!(mock.invoked().len(), 2);

    // findings survive on the failed stage
    let record = result.run.results.record("security").unwrap();
    assert_eq!(record.findings.len(), 1);
}

#[tokio::test]
async fn test_low_findings_pass_the_gate() {
    let finding = Finding {
        rule_id: "AVD-DS-0002".to_string(),
        severity: Severity::Low,
        message: "no healthcheck".to_string(),
        location: None,
    };
    let mock = invoker().on("security", Behavior::SucceedWithFindings(vec![finding]));
    let result = run_workflow_with(CI, mock, options("main")).await;

    assert_eq!(result.status, ExecutionStatus::Succeeded, "{}", result.summary());
    assert_succeeded(&result, "deploy");
}
