//! A single run of a workflow

use crate::core::{
    context::TriggerContext,
    results::ResultAggregator,
    state::{ExecutionStatus, RunState},
    workflow::WorkflowDefinition,
};
use crate::error::DefinitionError;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

/// One execution of a workflow against a trigger
///
/// The definition and trigger are shared read-only with stage tasks; the
/// aggregator is owned by the coordinator.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub definition: Arc<WorkflowDefinition>,
    pub trigger: Arc<TriggerContext>,
    /// Resolved workflow inputs
    pub inputs: BTreeMap<String, String>,
    pub results: ResultAggregator,
}

impl PipelineRun {
    /// Prepare a run, resolving invocation inputs against the definition
    pub fn new(
        definition: Arc<WorkflowDefinition>,
        trigger: TriggerContext,
        overrides: &BTreeMap<String, String>,
    ) -> Result<Self, DefinitionError> {
        let inputs = definition.resolve_inputs(overrides)?;
        let results = ResultAggregator::new(&definition);
        Ok(Self {
            definition,
            trigger: Arc::new(trigger),
            inputs,
            results,
        })
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn execution_id(&self) -> Uuid {
        self.results.state().execution_id
    }

    pub fn status(&self) -> ExecutionStatus {
        self.results.state().status
    }

    pub fn state(&self) -> &RunState {
        self.results.state()
    }

    /// Variables visible to a stage's input templates
    ///
    /// Trigger values, `inputs.*`, and `stages.<id>.outputs.*` for every
    /// succeeded ancestor of the stage.
    pub fn template_variables_for(&self, stage_id: &str) -> HashMap<String, String> {
        let mut vars = self.trigger.template_variables();
        for (name, value) in &self.inputs {
            vars.insert(format!("inputs.{}", name), value.clone());
        }

        let graph = self.definition.graph();
        for ancestor in graph.stage_ids() {
            if !graph.is_ancestor(ancestor, stage_id) {
                continue;
            }
            if let Some(outputs) = self.results.outputs(ancestor) {
                for (name, value) in outputs {
                    vars.insert(format!("stages.{}.outputs.{}", ancestor, name), value.clone());
                }
            }
        }
        vars
    }
}
