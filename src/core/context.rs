//! Parameter contexts and declared task parameters.
//!
//! Every workflow node owns a [`ParameterContext`]: an untyped key-value map
//! seeded by the caller at submission time and extended by the `update`
//! payloads of completed parents. Merges go through
//! [`ParameterContext::merge`] with an explicit [`MergePolicy`].
//!
//! Tasks declare the keys they read as [`ParamSpec`]s. Resolution against a
//! context yields [`ResolvedParams`], where every declared name is present
//! either from the context or from its default.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors that can occur when working with a context.
#[derive(Debug, Error)]
pub enum ContextError {
    /// Key was not found in the context.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// A required parameter is absent from the context.
    #[error("missing required parameter: {0}")]
    MissingParameter(String),

    /// A task asked for a parameter it never declared.
    #[error("parameter '{0}' was not declared by the task")]
    UndeclaredParameter(String),

    /// Failed to deserialize value from context.
    #[error("deserialization error for key '{key}': {message}")]
    DeserializationError { key: String, message: String },

    /// Failed to serialize value for context.
    #[error("serialization error for key '{key}': {message}")]
    SerializationError { key: String, message: String },

    /// Two writers disagree on the value of a key.
    ///
    /// `writer` names the source of the rejected update. It is not called
    /// `source` because thiserror treats a field of that name as the
    /// underlying error.
    #[error("conflicting values for key '{key}' from '{writer}'")]
    KeyConflict { key: String, writer: String },
}

/// Collision policy applied when an update is merged into a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Incoming values overwrite existing ones (default).
    #[default]
    LastWriterWins,

    /// A key present on both sides with different values is an error.
    RejectConflicts,
}

/// Mutable key-value store a task reads from and writes into.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterContext {
    values: BTreeMap<String, Value>,
}

impl ParameterContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`insert_raw`](Self::insert_raw) for literal seeds.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Serialize and store a value.
    pub fn insert<T: Serialize>(&mut self, key: impl Into<String>, value: T) -> Result<(), ContextError> {
        let key = key.into();
        let json_value =
            serde_json::to_value(value).map_err(|e| ContextError::SerializationError {
                key: key.clone(),
                message: e.to_string(),
            })?;
        self.values.insert(key, json_value);
        Ok(())
    }

    /// Store a raw JSON value, returning the previous one.
    pub fn insert_raw(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.values.insert(key.into(), value)
    }

    /// Get a value by key.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, ContextError> {
        let value = self
            .values
            .get(key)
            .ok_or_else(|| ContextError::KeyNotFound(key.to_string()))?;
        decode_value(key, value)
    }

    /// Get an optional value by key. Returns None if the key is missing or garbled.
    pub fn get_optional<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.values
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Get the raw JSON value for a key.
    pub fn get_raw(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Remove a key, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// Check if a key exists in the context.
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// All keys, in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    /// Merge another context into this one.
    ///
    /// `source` names the writer for conflict reporting. Under
    /// [`MergePolicy::RejectConflicts`] the merge is all-or-nothing.
    /// Returns the keys whose existing value was replaced by a different one.
    pub fn merge(
        &mut self,
        update: &ParameterContext,
        policy: MergePolicy,
        source: &str,
    ) -> Result<Vec<String>, ContextError> {
        let overwritten: Vec<String> = update
            .values
            .iter()
            .filter(|(key, value)| self.values.get(*key).is_some_and(|old| old != *value))
            .map(|(key, _)| key.clone())
            .collect();

        if policy == MergePolicy::RejectConflicts {
            if let Some(key) = overwritten.first() {
                return Err(ContextError::KeyConflict {
                    key: key.clone(),
                    writer: source.to_string(),
                });
            }
        }

        for (key, value) in &update.values {
            self.values.insert(key.clone(), value.clone());
        }
        Ok(overwritten)
    }

    /// Resolve declared parameters against this context.
    pub fn resolve(&self, specs: &[ParamSpec]) -> Result<ResolvedParams, ContextError> {
        let mut values = BTreeMap::new();
        for spec in specs {
            let value = match (self.values.get(spec.name), &spec.default) {
                (Some(value), _) => value.clone(),
                (None, ParamDefault::Value(default)) => default.clone(),
                (None, ParamDefault::Computed(compute)) => compute(),
                (None, ParamDefault::Required) => {
                    return Err(ContextError::MissingParameter(spec.name.to_string()));
                }
            };
            values.insert(spec.name.to_string(), value);
        }
        Ok(ResolvedParams { values })
    }
}

impl From<serde_json::Map<String, Value>> for ParameterContext {
    fn from(map: serde_json::Map<String, Value>) -> Self {
        Self {
            values: map.into_iter().collect(),
        }
    }
}

impl FromIterator<(String, Value)> for ParameterContext {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

fn decode_value<T: DeserializeOwned>(key: &str, value: &Value) -> Result<T, ContextError> {
    serde_json::from_value(value.clone()).map_err(|e| ContextError::DeserializationError {
        key: key.to_string(),
        message: e.to_string(),
    })
}

/// Default used when a declared parameter is absent from the context.
#[derive(Debug, Clone)]
pub enum ParamDefault {
    /// A literal value.
    Value(Value),
    /// Evaluated at resolution time.
    Computed(fn() -> Value),
    /// No default; absence fails the node.
    Required,
}

/// A parameter declared by a task.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub default: ParamDefault,
    pub description: &'static str,
}

impl ParamSpec {
    /// Declare an optional parameter with a literal default.
    pub fn optional(name: &'static str, default: impl Into<Value>) -> Self {
        Self {
            name,
            default: ParamDefault::Value(default.into()),
            description: "",
        }
    }

    /// Declare an optional parameter whose default is computed on demand.
    pub fn computed(name: &'static str, default: fn() -> Value) -> Self {
        Self {
            name,
            default: ParamDefault::Computed(default),
            description: "",
        }
    }

    /// Declare a parameter that must be present in the context.
    pub fn required(name: &'static str) -> Self {
        Self {
            name,
            default: ParamDefault::Required,
            description: "",
        }
    }

    /// Attach a human-readable description.
    pub fn describe(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    pub fn is_required(&self) -> bool {
        matches!(self.default, ParamDefault::Required)
    }
}

/// Declared parameters after resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedParams {
    values: BTreeMap<String, Value>,
}

impl ResolvedParams {
    /// Get a resolved parameter.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<T, ContextError> {
        let value = self
            .values
            .get(name)
            .ok_or_else(|| ContextError::UndeclaredParameter(name.to_string()))?;
        decode_value(name, value)
    }

    /// Get the raw JSON value of a resolved parameter.
    pub fn get_raw(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
