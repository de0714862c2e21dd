//! Trigger context and input templating

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

/// The event that started a pipeline run
///
/// Created once per run and shared immutably with every stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerContext {
    /// Event type (e.g. `push`, `pull_request`, `workflow_dispatch`)
    pub event: String,

    /// Branch name, without the `refs/heads/` prefix
    pub branch: String,

    /// Full git ref; defaults to `refs/heads/<branch>`
    #[serde(rename = "ref")]
    pub git_ref: String,

    /// Who triggered the run
    pub actor: String,

    /// Arbitrary event payload values
    #[serde(default)]
    pub payload: BTreeMap<String, String>,

    /// Matrix combination this run executes
    #[serde(default)]
    pub matrix: BTreeMap<String, String>,
}

impl TriggerContext {
    pub fn new(event: impl Into<String>, branch: impl Into<String>) -> Self {
        let branch = branch.into();
        Self {
            event: event.into(),
            git_ref: format!("refs/heads/{}", branch),
            branch,
            actor: String::new(),
            payload: BTreeMap::new(),
            matrix: BTreeMap::new(),
        }
    }

    pub fn with_ref(mut self, git_ref: impl Into<String>) -> Self {
        self.git_ref = git_ref.into();
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn with_payload(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn with_matrix(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.matrix.insert(key.into(), value.into());
        self
    }

    /// Look up a context key used by conditions and templates
    ///
    /// Known keys: `event`, `branch`, `ref`, `actor`, `matrix.<name>`,
    /// `payload.<name>`. Anything else returns `None`.
    pub fn lookup(&self, key: &str) -> Option<&str> {
        match key {
            "event" => Some(&self.event),
            "branch" => Some(&self.branch),
            "ref" => Some(&self.git_ref),
            "actor" => Some(&self.actor),
            _ => {
                if let Some(name) = key.strip_prefix("matrix.") {
                    self.matrix.get(name).map(String::as_str)
                } else if let Some(name) = key.strip_prefix("payload.") {
                    self.payload.get(name).map(String::as_str)
                } else {
                    None
                }
            }
        }
    }

    /// All context values keyed the way templates reference them
    pub fn template_variables(&self) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert("event".to_string(), self.event.clone());
        vars.insert("branch".to_string(), self.branch.clone());
        vars.insert("ref".to_string(), self.git_ref.clone());
        vars.insert("actor".to_string(), self.actor.clone());
        for (k, v) in &self.matrix {
            vars.insert(format!("matrix.{}", k), v.clone());
        }
        for (k, v) in &self.payload {
            vars.insert(format!("payload.{}", k), v.clone());
        }
        vars
    }
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("valid placeholder regex"))
}

/// Names referenced by `{{ name }}` placeholders in a template
pub fn placeholders(template: &str) -> Vec<String> {
    placeholder_regex()
        .captures_iter(template)
        .map(|c| c[1].to_string())
        .collect()
}

/// Render `{{ name }}` placeholders, failing on the first unresolved name
pub fn render_template(template: &str, variables: &HashMap<String, String>) -> Result<String, String> {
    let mut missing = None;
    let rendered = placeholder_regex().replace_all(template, |caps: &regex::Captures| {
        match variables.get(&caps[1]) {
            Some(value) => value.clone(),
            None => {
                missing.get_or_insert_with(|| caps[1].to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(name),
        None => Ok(rendered.into_owned()),
    }
}
