//! Workflow definition: validated stages, inputs, secrets and settings

use crate::core::{
    config::WorkflowConfig,
    context::placeholders,
    graph::StageGraph,
    stage::{StageDefaults, StageDefinition},
};
use crate::error::DefinitionError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::Duration;

/// Default grace period for running stages after cancellation
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 30;

/// A declared workflow invocation input
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDefinition {
    pub default: Option<String>,
    pub description: Option<String>,
    pub required: bool,
}

/// Engine settings carried by the workflow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Maximum concurrently running stages (None = unbounded)
    pub concurrency: Option<usize>,
    pub grace_period: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            concurrency: None,
            grace_period: Duration::from_secs(DEFAULT_GRACE_PERIOD_SECS),
        }
    }
}

/// A validated workflow
///
/// Only constructible through [`WorkflowDefinition::from_config`], so every
/// instance is acyclic with unique stage ids and resolvable references.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    pub name: String,
    pub description: Option<String>,
    pub inputs: BTreeMap<String, InputDefinition>,
    pub secrets: BTreeSet<String>,
    pub settings: EngineSettings,
    stages: Vec<StageDefinition>,
    index: HashMap<String, usize>,
    graph: StageGraph,
}

impl WorkflowDefinition {
    /// Build and validate a definition from configuration
    pub fn from_config(config: &WorkflowConfig) -> Result<Self, DefinitionError> {
        let defaults = StageDefaults {
            timeout_secs: config
                .settings
                .timeout_secs
                .unwrap_or(StageDefaults::default().timeout_secs),
        };

        let mut stages = Vec::with_capacity(config.stages.len());
        let mut index = HashMap::new();
        for stage_config in &config.stages {
            if stage_config.id.trim().is_empty() {
                return Err(DefinitionError::EmptyStageId);
            }
            if index.contains_key(&stage_config.id) {
                return Err(DefinitionError::DuplicateStage(stage_config.id.clone()));
            }
            let stage = StageDefinition::from_config(stage_config, &defaults).map_err(|reason| {
                DefinitionError::InvalidStage {
                    stage: stage_config.id.clone(),
                    reason,
                }
            })?;
            index.insert(stage.id.clone(), stages.len());
            stages.push(stage);
        }

        let graph = StageGraph::new(&stages)?;

        let secrets: BTreeSet<String> = config.secrets.iter().cloned().collect();
        for stage in &stages {
            for secret in &stage.secrets {
                if !secrets.contains(secret) {
                    return Err(DefinitionError::UndeclaredSecret {
                        stage: stage.id.clone(),
                        secret: secret.clone(),
                    });
                }
            }
        }

        if config.settings.concurrency == Some(0) {
            return Err(DefinitionError::InvalidStage {
                stage: "settings".to_string(),
                reason: "concurrency must be greater than zero".to_string(),
            });
        }

        let definition = Self {
            name: config.name.clone(),
            description: config.description.clone(),
            inputs: config.get_inputs(),
            secrets,
            settings: EngineSettings {
                concurrency: config.settings.concurrency,
                grace_period: Duration::from_secs(
                    config
                        .settings
                        .grace_period_secs
                        .unwrap_or(DEFAULT_GRACE_PERIOD_SECS),
                ),
            },
            stages,
            index,
            graph,
        };

        definition.check_references()?;
        Ok(definition)
    }

    /// Check `{{ inputs.* }}` and `{{ stages.*.outputs.* }}` references
    fn check_references(&self) -> Result<(), DefinitionError> {
        for stage in &self.stages {
            for template in stage.inputs.values() {
                for name in placeholders(template) {
                    if let Some(input) = name.strip_prefix("inputs.") {
                        if !self.inputs.contains_key(input) {
                            return Err(DefinitionError::UnknownInput {
                                stage: stage.id.clone(),
                                input: input.to_string(),
                            });
                        }
                    } else if let Some(rest) = name.strip_prefix("stages.") {
                        self.check_output_reference(stage, rest)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn check_output_reference(&self, stage: &StageDefinition, reference: &str) -> Result<(), DefinitionError> {
        let invalid = |source: &str, output: &str, reason: &str| DefinitionError::InvalidOutputReference {
            stage: stage.id.clone(),
            source_stage: source.to_string(),
            output: output.to_string(),
            reason: reason.to_string(),
        };

        let (source, output) = match reference.split_once(".outputs.") {
            Some(parts) => parts,
            None => return Err(invalid(reference, "", "expected stages.<id>.outputs.<name>")),
        };

        let source_stage = self
            .stage(source)
            .ok_or_else(|| invalid(source, output, "no such stage"))?;
        if !self.graph.is_ancestor(source, &stage.id) {
            return Err(invalid(source, output, "it is not an upstream dependency"));
        }
        if !source_stage.declares_output(output) {
            return Err(invalid(source, output, "the output is not declared"));
        }
        Ok(())
    }

    /// Merge overrides with declared defaults
    ///
    /// Fails on undeclared names and on required inputs left unset.
    pub fn resolve_inputs(
        &self,
        overrides: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>, DefinitionError> {
        let declared: HashSet<&String> = self.inputs.keys().collect();
        if let Some(unknown) = overrides.keys().find(|k| !declared.contains(k)) {
            return Err(DefinitionError::UnexpectedInput(unknown.clone()));
        }

        let mut resolved = BTreeMap::new();
        for (name, def) in &self.inputs {
            match overrides.get(name).or(def.default.as_ref()) {
                Some(value) => {
                    resolved.insert(name.clone(), value.clone());
                }
                None if def.required => return Err(DefinitionError::MissingInput(name.clone())),
                None => {
                    resolved.insert(name.clone(), String::new());
                }
            }
        }
        Ok(resolved)
    }

    /// Get a stage by ID
    pub fn stage(&self, id: &str) -> Option<&StageDefinition> {
        self.index.get(id).map(|&i| &self.stages[i])
    }

    /// Stages in definition order
    pub fn stages(&self) -> &[StageDefinition] {
        &self.stages
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
