//! Data model shared by the queue, the executor and callers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A primitive command argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Parameter {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<bool> for Parameter {
    fn from(value: bool) -> Self {
        Parameter::Bool(value)
    }
}

impl From<i64> for Parameter {
    fn from(value: i64) -> Self {
        Parameter::Int(value)
    }
}

impl From<i32> for Parameter {
    fn from(value: i32) -> Self {
        Parameter::Int(value.into())
    }
}

impl From<f64> for Parameter {
    fn from(value: f64) -> Self {
        Parameter::Float(value)
    }
}

impl From<&str> for Parameter {
    fn from(value: &str) -> Self {
        Parameter::Text(value.to_string())
    }
}

impl From<String> for Parameter {
    fn from(value: String) -> Self {
        Parameter::Text(value)
    }
}

/// A named command with its ordered arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,
}

impl Command {
    /// Command without arguments.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameters<I, P>(name: impl Into<String>, parameters: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Parameter>,
    {
        Self {
            name: name.into(),
            parameters: parameters.into_iter().map(Into::into).collect(),
        }
    }
}

/// Commands addressed to one device.
///
/// Two actions target the same device when their `device_url` is equal.
/// The upstream API accepts at most one action per device per execution,
/// so the queue merges actions by device before sending them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "deviceURL")]
    pub device_url: String,
    pub commands: Vec<Command>,
}

impl Action {
    pub fn new(device_url: impl Into<String>, commands: Vec<Command>) -> Self {
        Self {
            device_url: device_url.into(),
            commands,
        }
    }
}

/// Execution mode requested from the upstream API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionMode {
    #[serde(rename = "highPriority")]
    HighPriority,
    #[serde(rename = "geolocated")]
    Geolocated,
    #[serde(rename = "internal")]
    InternalSchedule,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionMode::HighPriority => "highPriority",
            ExecutionMode::Geolocated => "geolocated",
            ExecutionMode::InternalSchedule => "internal",
        };
        f.write_str(name)
    }
}

/// The `(mode, label)` pair deciding which actions may share one execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Partition {
    pub mode: Option<ExecutionMode>,
    pub label: Option<String>,
}

impl Partition {
    pub fn new(mode: Option<ExecutionMode>, label: Option<String>) -> Self {
        Self { mode, label }
    }
}
