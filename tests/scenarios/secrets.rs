//! Test: stages only ever see the secrets they declare

use crate::helpers::*;
use stagerun::core::config::WorkflowConfig;
use stagerun::{DefinitionError, ExecutionStatus, SecretStoreBuilder};

const RELEASE: &str = r#"
name: "release"
secrets: [REGISTRY_TOKEN, KUBECONFIG_DATA]
stages:
  - { id: test, uses: command }
  - { id: push, uses: container-build, needs: [test], secrets: [REGISTRY_TOKEN] }
  - { id: deploy, uses: deploy, needs: [push], secrets: [KUBECONFIG_DATA] }
"#;

fn all_secrets() -> RunOptions {
    RunOptions {
        secrets: SecretStoreBuilder::new()
            .insert("REGISTRY_TOKEN", "reg-token")
            .insert("KUBECONFIG_DATA", "kube-data")
            .build(),
        ..RunOptions::default()
    }
}

#[tokio::test]
async fn test_each_stage_gets_exactly_its_declared_secrets() {
    let mock = MockInvoker::new();
    let result = run_workflow_with(RELEASE, mock.clone(), all_secrets()).await;
    assert_eq!(result.status, ExecutionStatus::Succeeded, "{}", result.summary());

    assert!(mock.calls_for("test")[0].secrets.is_empty());

    let push = &mock.calls_for("push")[0].secrets;
    assert_eq!(push.len(), 1);
    assert_eq!(push["REGISTRY_TOKEN"], "reg-token");

    let deploy = &mock.calls_for("deploy")[0].secrets;
    assert_eq!(deploy.keys().collect::<Vec<_>>(), vec!["KUBECONFIG_DATA"]);
}

#[tokio::test]
async fn test_missing_secret_value_fails_stage_without_invoking() {
    let mock = MockInvoker::new();
    let result = run_workflow_with(
        RELEASE,
        mock.clone(),
        RunOptions {
            secrets: SecretStoreBuilder::new().insert("KUBECONFIG_DATA", "kube-data").build(),
            ..RunOptions::default()
        },
    )
    .await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_failed(&result, "push", "Secret 'REGISTRY_TOKEN' declared by stage 'push' has no value");
    assert_eq!(attempts_of(&result, "push"), 0);
    assert!(mock.calls_for("push").is_empty());
    assert_skipped(&result, "deploy", "upstream stage 'push' failed");
}

#[test]
fn test_stage_cannot_declare_secret_the_workflow_lacks() {
    let yaml = r#"
name: "leaky"
secrets: [REGISTRY_TOKEN]
stages:
  - { id: deploy, uses: deploy, secrets: [AWS_SECRET_ACCESS_KEY] }
"#;
    let err = WorkflowConfig::from_yaml(yaml).unwrap_err();
    assert!(matches!(
        err,
        DefinitionError::UndeclaredSecret { ref stage, ref secret }
            if stage == "deploy" && secret == "AWS_SECRET_ACCESS_KEY"
    ));
}
