//! Workflow configuration from YAML

use crate::core::workflow::{InputDefinition, WorkflowDefinition};
use crate::error::DefinitionError;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Top-level workflow configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Workflow name
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Invocation inputs: either a default value or `{ default, description, required }`
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,

    /// Secret names the workflow may hand out to stages
    #[serde(default)]
    pub secrets: Vec<String>,

    /// Engine settings
    #[serde(default)]
    pub settings: SettingsConfig,

    /// Workflow stages
    #[serde(default)]
    pub stages: Vec<StageConfig>,
}

/// Engine settings block
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsConfig {
    /// Maximum concurrently running stages (unset = unbounded)
    #[serde(default)]
    pub concurrency: Option<usize>,

    /// Default per-stage timeout in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// How long running stages may take to stop after cancellation
    #[serde(default)]
    pub grace_period_secs: Option<u64>,
}

/// Stage configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Unique stage identifier
    pub id: String,

    /// Human-readable stage name
    #[serde(default)]
    pub name: Option<String>,

    /// Optional stage description
    #[serde(default)]
    pub description: Option<String>,

    /// Stage IDs this stage depends on
    #[serde(default, alias = "depends_on")]
    pub needs: Vec<String>,

    /// Run condition
    #[serde(default, rename = "if", alias = "condition")]
    pub condition: Option<String>,

    /// Task kind to invoke
    pub uses: String,

    /// Task inputs; scalars and lists are converted to strings
    #[serde(default, rename = "with")]
    pub with: BTreeMap<String, Value>,

    /// Secret names this stage may read
    #[serde(default)]
    pub secrets: Vec<String>,

    /// Output names this stage publishes
    #[serde(default)]
    pub outputs: Vec<String>,

    /// Timeout for this stage (overrides settings)
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Retry policy
    #[serde(default)]
    pub retries: Option<RetryConfig>,

    /// Severity threshold for reported findings
    #[serde(default)]
    pub fail_on_severity: Option<String>,
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first
    pub max_attempts: u32,

    /// Delay between attempts in milliseconds
    #[serde(default)]
    pub backoff_ms: u64,
}

/// Convert a YAML value to the string a task receives
///
/// Lists become comma-separated (`platforms: [linux/amd64, linux/arm64]`).
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Sequence(items) => items.iter().map(value_to_string).collect::<Vec<_>>().join(","),
        other => serde_yaml::to_string(other).unwrap_or_default().trim_end().to_string(),
    }
}

impl StageConfig {
    /// Task inputs as strings
    pub fn inputs_as_string_map(&self) -> BTreeMap<String, String> {
        self.with
            .iter()
            .map(|(k, v)| (k.clone(), value_to_string(v)))
            .collect()
    }
}

impl WorkflowConfig {
    /// Load workflow configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, DefinitionError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate workflow configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, DefinitionError> {
        let config: WorkflowConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration by building the definition
    pub fn validate(&self) -> Result<(), DefinitionError> {
        self.to_definition().map(|_| ())
    }

    /// Get inputs as parsed definitions
    pub fn get_inputs(&self) -> BTreeMap<String, InputDefinition> {
        self.inputs
            .iter()
            .map(|(name, value)| {
                let def = match value {
                    Value::Mapping(map) => {
                        let field = |key: &str| map.get(key);
                        InputDefinition {
                            default: field("default").filter(|v| !v.is_null()).map(value_to_string),
                            description: field("description").and_then(|v| v.as_str()).map(str::to_string),
                            required: field("required").and_then(|v| v.as_bool()).unwrap_or(false),
                        }
                    }
                    Value::Null => InputDefinition::default(),
                    scalar => InputDefinition {
                        default: Some(value_to_string(scalar)),
                        ..InputDefinition::default()
                    },
                };
                (name.clone(), def)
            })
            .collect()
    }

    /// Convert config to a validated workflow definition
    pub fn to_definition(&self) -> Result<WorkflowDefinition, DefinitionError> {
        WorkflowDefinition::from_config(self)
    }
}
