//! Stage domain model

use crate::core::{config::StageConfig, context::render_template, findings::Severity};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

/// Upper bound on attempts a stage may configure
pub const MAX_ATTEMPTS_LIMIT: u32 = 10;

/// Opaque reference to the tool a stage invokes (the `uses:` key)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskRef(String);

impl TaskRef {
    pub fn new(uses: impl Into<String>) -> Self {
        Self(uses.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bounded retry policy for a stage
///
/// The engine treats all attempts as one logical invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one (>= 1)
    pub max_attempts: u32,
    /// Delay between attempts
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }
}

/// A single stage in a workflow
#[derive(Debug, Clone)]
pub struct StageDefinition {
    /// Unique stage identifier
    pub id: String,

    /// Human-readable name
    pub name: Option<String>,

    /// Stage IDs that must succeed before this one runs
    pub needs: Vec<String>,

    /// Run condition (`if:`), evaluated against the trigger context
    pub condition: Option<String>,

    /// Tool to invoke
    pub task: TaskRef,

    /// Input templates (`with:`), rendered right before invocation
    pub inputs: BTreeMap<String, String>,

    /// Secret names this stage may read
    pub secrets: Vec<String>,

    /// Output names this stage publishes to dependents
    pub outputs: Vec<String>,

    /// Per-attempt timeout
    pub timeout: Duration,

    pub retry: RetryPolicy,

    /// Fail the stage when a finding at or above this severity is reported
    pub fail_on_severity: Option<Severity>,
}

/// Workflow-level defaults applied to stages
#[derive(Debug, Clone)]
pub struct StageDefaults {
    pub timeout_secs: u64,
}

impl Default for StageDefaults {
    fn default() -> Self {
        Self {
            timeout_secs: 1800, // 30 minutes
        }
    }
}

impl StageDefinition {
    /// Create a stage from its config, without cross-stage validation
    pub fn from_config(config: &StageConfig, defaults: &StageDefaults) -> Result<Self, String> {
        let retry = match &config.retries {
            Some(r) => {
                if r.max_attempts == 0 || r.max_attempts > MAX_ATTEMPTS_LIMIT {
                    return Err(format!(
                        "retries.max_attempts must be between 1 and {}",
                        MAX_ATTEMPTS_LIMIT
                    ));
                }
                RetryPolicy {
                    max_attempts: r.max_attempts,
                    backoff: Duration::from_millis(r.backoff_ms),
                }
            }
            None => RetryPolicy::default(),
        };

        let fail_on_severity = config
            .fail_on_severity
            .as_deref()
            .map(str::parse::<Severity>)
            .transpose()?;

        let timeout_secs = config.timeout_secs.unwrap_or(defaults.timeout_secs);
        if timeout_secs == 0 {
            return Err("timeout_secs must be greater than zero".to_string());
        }

        Ok(StageDefinition {
            id: config.id.clone(),
            name: config.name.clone(),
            needs: config.needs.clone(),
            condition: config.condition.clone().filter(|c| !c.trim().is_empty()),
            task: TaskRef::new(config.uses.clone()),
            inputs: config.inputs_as_string_map(),
            secrets: config.secrets.clone(),
            outputs: config.outputs.clone(),
            timeout: Duration::from_secs(timeout_secs),
            retry,
            fail_on_severity,
        })
    }

    /// Name for display, falling back to the id
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Render every input template; fails with the first unresolved name
    pub fn render_inputs(&self, variables: &HashMap<String, String>) -> Result<BTreeMap<String, String>, String> {
        self.inputs
            .iter()
            .map(|(k, template)| render_template(template, variables).map(|v| (k.clone(), v)))
            .collect()
    }

    pub fn declares_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|o| o == name)
    }
}
