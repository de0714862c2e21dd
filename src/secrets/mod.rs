//! Secret scoping
//!
//! Values are collected once at startup into a [`SecretStoreBuilder`] and
//! frozen into a read-only [`SecretStore`]. Stages only ever see the subset
//! they declared, through [`ScopedSecrets`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("Secret '{name}' declared by stage '{stage}' has no value")]
    Missing { stage: String, name: String },

    #[error("Stage '{stage}' did not declare secret '{name}'")]
    NotDeclared { stage: String, name: String },

    #[error("Failed to read secrets file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid secrets file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Where a secret value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretSource {
    EnvVar,
    File,
    Inline,
}

impl fmt::Display for SecretSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretSource::EnvVar => write!(f, "environment"),
            SecretSource::File => write!(f, "secrets file"),
            SecretSource::Inline => write!(f, "inline"),
        }
    }
}

/// A secret value that never prints its content
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue {
    value: String,
    source: SecretSource,
}

impl SecretValue {
    pub fn new(value: impl Into<String>, source: SecretSource) -> Self {
        Self {
            value: value.into(),
            source,
        }
    }

    /// The raw value, for handing to a tool
    pub fn expose(&self) -> &str {
        &self.value
    }

    pub fn source(&self) -> SecretSource {
        self.source
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretValue(***, from {})", self.source)
    }
}

impl fmt::Display for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Collects secret values before a run starts
#[derive(Debug, Default)]
pub struct SecretStoreBuilder {
    values: BTreeMap<String, SecretValue>,
}

impl SecretStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values
            .insert(name.into(), SecretValue::new(value, SecretSource::Inline));
        self
    }

    /// Read the named environment variables; unset or empty ones are ignored
    pub fn from_env<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            let name = name.as_ref();
            match std::env::var(name) {
                Ok(value) if !value.is_empty() => {
                    self.values
                        .insert(name.to_string(), SecretValue::new(value, SecretSource::EnvVar));
                }
                _ => debug!("Secret {} not set in environment", name),
            }
        }
        self
    }

    /// Load a flat `NAME: value` YAML mapping
    pub fn from_yaml_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, SecretError> {
        let content = std::fs::read_to_string(path)?;
        let values: BTreeMap<String, String> = serde_yaml::from_str(&content)?;
        for (name, value) in values {
            self.values.insert(name, SecretValue::new(value, SecretSource::File));
        }
        Ok(self)
    }

    /// Freeze the collected values
    pub fn build(self) -> Arc<SecretStore> {
        Arc::new(SecretStore {
            values: self.values,
        })
    }
}

/// Immutable secret values for the lifetime of a run
#[derive(Debug, Default)]
pub struct SecretStore {
    values: BTreeMap<String, SecretValue>,
}

impl SecretStore {
    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The declared subset of secrets for one stage
    ///
    /// Fails if any declared name has no value.
    pub fn scope(&self, stage_id: &str, declared: &[String]) -> Result<ScopedSecrets, SecretError> {
        let mut values = BTreeMap::new();
        for name in declared {
            let value = self.values.get(name).ok_or_else(|| SecretError::Missing {
                stage: stage_id.to_string(),
                name: name.clone(),
            })?;
            values.insert(name.clone(), value.clone());
        }
        let withheld = self
            .values
            .keys()
            .filter(|name| !declared.contains(*name))
            .cloned()
            .collect();
        Ok(ScopedSecrets {
            stage_id: stage_id.to_string(),
            values,
            withheld,
        })
    }
}

/// The secrets one stage is allowed to read
#[derive(Debug, Clone, Default)]
pub struct ScopedSecrets {
    stage_id: String,
    values: BTreeMap<String, SecretValue>,
    /// Store entries this stage did not declare
    withheld: Vec<String>,
}

impl ScopedSecrets {
    /// Get a declared secret
    pub fn get(&self, name: &str) -> Result<&SecretValue, SecretError> {
        self.values.get(name).ok_or_else(|| SecretError::NotDeclared {
            stage: self.stage_id.clone(),
            name: name.to_string(),
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Names of run secrets outside this stage's scope
    ///
    /// A tool process must not inherit these from the parent environment.
    pub fn withheld(&self) -> impl Iterator<Item = &str> {
        self.withheld.iter().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SecretValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Mask every secret value occurring in `text`
    pub fn redact(&self, text: &str) -> String {
        let mut redacted = text.to_string();
        for value in self.values.values() {
            if !value.expose().is_empty() {
                redacted = redacted.replace(value.expose(), "***");
            }
        }
        redacted
    }
}
