//! Test: malformed workflows are rejected before any stage runs

use stagerun::core::config::WorkflowConfig;
use stagerun::{DefinitionError, ToolInvoker};

fn reject(yaml: &str) -> DefinitionError {
    WorkflowConfig::from_yaml(yaml).expect_err("workflow should be rejected")
}

#[test]
fn test_cycle_is_rejected() {
    let err = reject(
        r#"
name: "loop"
stages:
  - { id: a, uses: command, needs: [c] }
  - { id: b, uses: command, needs: [a] }
  - { id: c, uses: command, needs: [b] }
"#,
    );
    match err {
        DefinitionError::Cycle(cycle) => {
            assert_eq!(cycle.len(), 3);
            for id in ["a", "b", "c"] {
                assert!(cycle.contains(&id.to_string()));
            }
        }
        other => panic!("expected cycle, got {:?}", other),
    }
}

#[test]
fn test_self_dependency_is_a_cycle() {
    let err = reject(
        r#"
name: "self"
stages:
  - { id: a, uses: command, needs: [a] }
"#,
    );
    assert!(matches!(err, DefinitionError::Cycle(_)));
}

#[test]
fn test_unknown_dependency() {
    let err = reject(
        r#"
name: "typo"
stages:
  - { id: build, uses: command }
  - { id: deploy, uses: deploy, needs: [biuld] }
"#,
    );
    assert_eq!(
        err.to_string(),
        "Stage 'deploy' needs non-existent stage 'biuld'"
    );
}

#[test]
fn test_output_reference_must_be_upstream() {
    let err = reject(
        r#"
name: "sideways"
stages:
  - { id: build, uses: command, outputs: [digest] }
  - id: lint
    uses: command
    with:
      run: "echo {{ stages.build.outputs.digest }}"
"#,
    );
    assert!(matches!(
        err,
        DefinitionError::InvalidOutputReference { ref stage, ref source_stage, .. }
            if stage == "lint" && source_stage == "build"
    ));
}

#[test]
fn test_output_reference_must_be_declared() {
    let err = reject(
        r#"
name: "undeclared"
stages:
  - { id: build, uses: command }
  - id: deploy
    needs: [build]
    uses: deploy
    with:
      digest: "{{ stages.build.outputs.digest }}"
"#,
    );
    assert!(err.to_string().contains("the output is not declared"));
}

#[test]
fn test_unknown_input_reference() {
    let err = reject(
        r#"
name: "inputs"
stages:
  - id: deploy
    uses: deploy
    with:
      namespace: "{{ inputs.namespace }}"
"#,
    );
    assert!(matches!(err, DefinitionError::UnknownInput { ref input, .. } if input == "namespace"));
}

#[test]
fn test_retry_bound() {
    let err = reject(
        r#"
name: "retries"
stages:
  - id: flaky
    uses: command
    retries: { max_attempts: 50 }
"#,
    );
    assert!(err.to_string().contains("retries.max_attempts must be between 1 and 10"));
}

#[test]
fn test_unknown_task_kind() {
    let config = WorkflowConfig::from_yaml(
        r#"
name: "tools"
stages:
  - { id: build, uses: container-build, with: { image: app } }
  - { id: notify, uses: slack }
"#,
    )
    .unwrap();
    let definition = config.to_definition().unwrap();
    let err = ToolInvoker::default().check(&definition).unwrap_err();
    assert!(matches!(
        err,
        DefinitionError::UnknownTask { ref stage, ref kind } if stage == "notify" && kind == "slack"
    ));
}
