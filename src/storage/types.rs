//! Core data types for the event store.
//!
//! This module defines the primary data structures used throughout the storage layer:
//!
//! - [`Event`]: Transient write request handed to the store by a caller
//! - [`EventId`]: Non-empty, case-sensitive event identifier
//! - [`ParameterValue`]: Tagged union of string, boolean, integer and array values
//! - [`ParameterSet`]: Key-unique mapping from parameter key to value
//! - [`EventRecord`]: Immutable persisted form of a captured event

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

/// Errors raised while constructing events or parsing user-supplied parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    /// Identifier was the empty string.
    #[error("event identifier must not be empty")]
    EmptyIdentifier,

    /// Input was not valid JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// Top-level JSON value was not an object.
    #[error("parameters must be a JSON object, found {0}")]
    NotAnObject(&'static str),

    /// A parameter value has a shape outside the four supported variants.
    #[error("parameter '{key}' has unsupported value: {found}")]
    UnsupportedValue { key: String, found: &'static str },

    /// A predefined event was built without its required parameter.
    #[error("event '{event}' requires parameter '{key}'")]
    MissingParameter {
        event: &'static str,
        key: &'static str,
    },
}

// =============================================================================
// Identifier
// =============================================================================

/// Event identifier, e.g. `sign_up`.
///
/// Always non-empty. Comparison is exact and case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventId(String);

impl EventId {
    /// Create an identifier, rejecting the empty string.
    pub fn new(id: impl Into<String>) -> Result<Self, EventError> {
        let id = id.into();
        if id.is_empty() {
            return Err(EventError::EmptyIdentifier);
        }
        Ok(Self(id))
    }

    /// Identifier for compile-time constants known to be non-empty.
    pub(crate) fn from_static(id: &'static str) -> Self {
        debug_assert!(!id.is_empty());
        Self(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EventId {
    type Error = EventError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl FromStr for EventId {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl From<EventId> for String {
    fn from(id: EventId) -> Self {
        id.0
    }
}

impl AsRef<str> for EventId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Parameter values
// =============================================================================

/// Discriminant of a [`ParameterValue`], stored in the `kind` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum ParameterKind {
    String,
    Boolean,
    Integer,
    Array,
}

/// A single parameter value.
///
/// Serializes untagged, so JSON `"x"`, `true`, `3` and `[1, "a"]` map directly
/// onto the four variants. Arrays compare element-wise and in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    String(String),
    Boolean(bool),
    Integer(i64),
    Array(Vec<ParameterValue>),
}

impl ParameterValue {
    pub fn kind(&self) -> ParameterKind {
        match self {
            Self::String(_) => ParameterKind::String,
            Self::Boolean(_) => ParameterKind::Boolean,
            Self::Integer(_) => ParameterKind::Integer,
            Self::Array(_) => ParameterKind::Array,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[ParameterValue]> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Convert an arbitrary JSON value, rejecting null, objects and non-integer numbers.
    fn from_json(key: &str, value: Value) -> Result<Self, EventError> {
        let unsupported = |found| EventError::UnsupportedValue {
            key: key.to_string(),
            found,
        };
        match value {
            Value::String(s) => Ok(Self::String(s)),
            Value::Bool(b) => Ok(Self::Boolean(b)),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Integer)
                .ok_or_else(|| unsupported("number that is not a 64-bit integer")),
            Value::Array(items) => items
                .into_iter()
                .map(|item| Self::from_json(key, item))
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Array),
            Value::Null => Err(unsupported("null")),
            Value::Object(_) => Err(unsupported("object")),
        }
    }
}

impl From<&str> for ParameterValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for ParameterValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<i64> for ParameterValue {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<i32> for ParameterValue {
    fn from(n: i32) -> Self {
        Self::Integer(i64::from(n))
    }
}

impl From<Vec<ParameterValue>> for ParameterValue {
    fn from(items: Vec<ParameterValue>) -> Self {
        Self::Array(items)
    }
}

// =============================================================================
// Parameter set
// =============================================================================

/// Mapping from parameter key to value. Keys are unique; inserting an existing
/// key overwrites its value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSet(BTreeMap<String, ParameterValue>);

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, returning the previous value for the key if any.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<ParameterValue>,
    ) -> Option<ParameterValue> {
        self.0.insert(key.into(), value.into())
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParameterValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&ParameterValue> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParameterValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Parse user-entered JSON text.
    ///
    /// Accepts an object whose values are strings, booleans, integers or arrays
    /// of those (recursively). Blank input yields an empty set.
    ///
    /// # Example
    ///
    /// ```
    /// use eventviewer::storage::{ParameterSet, ParameterValue};
    ///
    /// let params = ParameterSet::from_json_str(r#"{"scene": "login", "retries": 2}"#).unwrap();
    /// assert_eq!(params.get("scene"), Some(&ParameterValue::from("login")));
    /// assert!(ParameterSet::from_json_str(r#"{"ratio": 0.5}"#).is_err());
    /// ```
    pub fn from_json_str(input: &str) -> Result<Self, EventError> {
        if input.trim().is_empty() {
            return Ok(Self::new());
        }
        let value: Value =
            serde_json::from_str(input).map_err(|e| EventError::InvalidJson(e.to_string()))?;
        let object = match value {
            Value::Object(map) => map,
            Value::Null => return Err(EventError::NotAnObject("null")),
            Value::Bool(_) => return Err(EventError::NotAnObject("boolean")),
            Value::Number(_) => return Err(EventError::NotAnObject("number")),
            Value::String(_) => return Err(EventError::NotAnObject("string")),
            Value::Array(_) => return Err(EventError::NotAnObject("array")),
        };

        let mut set = Self::new();
        for (key, value) in object {
            let value = ParameterValue::from_json(&key, value)?;
            set.insert(key, value);
        }
        Ok(set)
    }
}

impl<K: Into<String>, V: Into<ParameterValue>> FromIterator<(K, V)> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

// =============================================================================
// Events and records
// =============================================================================

/// A transient write request describing one occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    /// Display name (e.g., "Sign up"). May be empty.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parameters: ParameterSet,
}

impl Event {
    pub fn new(id: EventId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            parameters: ParameterSet::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<ParameterValue>) -> Self {
        self.parameters.insert(key, value);
        self
    }

    pub fn with_parameters(mut self, parameters: ParameterSet) -> Self {
        self.parameters = parameters;
        self
    }
}

/// One key/value attribute owned by an [`EventRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub key: String,
    pub value: ParameterValue,
}

/// The immutable persisted form of a captured [`Event`].
///
/// Records are only created by the store's capture path. `parameters` is
/// ordered by key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Storage-assigned identity, increasing in insertion order.
    pub record_id: i64,
    pub id: EventId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub parameters: Vec<Parameter>,
}

impl EventRecord {
    /// Look up a parameter value by key.
    pub fn parameter(&self, key: &str) -> Option<&ParameterValue> {
        self.parameters
            .iter()
            .find(|p| p.key == key)
            .map(|p| &p.value)
    }

    pub fn parameter_set(&self) -> ParameterSet {
        self.parameters
            .iter()
            .map(|p| (p.key.clone(), p.value.clone()))
            .collect()
    }
}
