//! Canonical identity of an action call.
//!
//! Bindings follow the action's declared parameter order, whatever order the
//! caller used, and serialize as a list of single-key maps
//! (`[{"table": ...}, {"n": ...}]`). Keys read back from stored provenance have
//! exactly the shape of keys built from a live call, so durable lookups work
//! across runs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::value::NormalizedValue;

/// One `parameter-name -> normalized value` pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(
    into = "BTreeMap<String, NormalizedValue>",
    try_from = "BTreeMap<String, NormalizedValue>"
)]
pub struct Binding {
    pub name: String,
    pub value: NormalizedValue,
}

impl Binding {
    pub fn new(name: impl Into<String>, value: NormalizedValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

impl From<Binding> for BTreeMap<String, NormalizedValue> {
    fn from(binding: Binding) -> Self {
        let mut map = BTreeMap::new();
        map.insert(binding.name, binding.value);
        map
    }
}

impl TryFrom<BTreeMap<String, NormalizedValue>> for Binding {
    type Error = String;

    fn try_from(map: BTreeMap<String, NormalizedValue>) -> Result<Self, Self::Error> {
        if map.len() != 1 {
            return Err(format!("binding must have exactly one key, found {}", map.len()));
        }
        let (name, value) = map.into_iter().next().ok_or("empty binding")?;
        Ok(Binding { name, value })
    }
}

/// Qualified action name plus ordered bindings
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvocationKey {
    pub action: String,
    pub arguments: Vec<Binding>,
}

impl InvocationKey {
    pub fn new(action: impl Into<String>, arguments: Vec<Binding>) -> Self {
        Self {
            action: action.into(),
            arguments,
        }
    }

    pub fn get(&self, name: &str) -> Option<&NormalizedValue> {
        self.arguments
            .iter()
            .find(|binding| binding.name == name)
            .map(|binding| &binding.value)
    }
}

impl fmt::Display for InvocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.arguments.iter().map(|b| b.name.as_str()).collect();
        write!(f, "{}({})", self.action, names.join(", "))
    }
}
