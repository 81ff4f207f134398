//! Declared call signatures and argument coercion.
//!
//! A [`Signature`] is the descriptor attached to every action handle: ordered
//! parameters and ordered outputs. Collation maps positional and keyword
//! arguments onto declared names; coercion checks kinds and schemas and yields
//! declaration-ordered [`Inputs`].

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::artifact::Artifact;
use crate::core::errors::{MemoError, Result};
use crate::invocation::Binding;
use crate::results::ResultCollection;
use crate::value::{Arg, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    /// Takes stored data: an artifact or a collection of artifacts
    Input,
    /// Takes a primitive value
    Parameter,
}

#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub kind: ParameterKind,
    pub default: Option<Value>,
    /// Optional JSON schema checked against primitive parameter values
    pub schema: Option<serde_json::Value>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSpec {
    pub name: String,
    pub semantic_type: String,
    pub collection: bool,
}

/// Parameter and output metadata for an action
#[derive(Debug, Clone, Default)]
pub struct Signature {
    parameters: Vec<Parameter>,
    outputs: Vec<OutputSpec>,
}

impl Signature {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(self, name: &str) -> Self {
        self.with_parameter(name, ParameterKind::Input, None, None)
    }

    pub fn optional_input(self, name: &str) -> Self {
        self.with_parameter(name, ParameterKind::Input, Some(Value::Null), None)
    }

    pub fn parameter(self, name: &str) -> Self {
        self.with_parameter(name, ParameterKind::Parameter, None, None)
    }

    pub fn parameter_with_default(self, name: &str, default: impl Into<Value>) -> Self {
        self.with_parameter(name, ParameterKind::Parameter, Some(default.into()), None)
    }

    pub fn parameter_with_schema(self, name: &str, schema: serde_json::Value) -> Self {
        self.with_parameter(name, ParameterKind::Parameter, None, Some(schema))
    }

    fn with_parameter(
        mut self,
        name: &str,
        kind: ParameterKind,
        default: Option<Value>,
        schema: Option<serde_json::Value>,
    ) -> Self {
        self.parameters.push(Parameter {
            name: name.to_string(),
            kind,
            default,
            schema,
            description: None,
        });
        self
    }

    /// Attach a description to the most recently declared parameter
    pub fn described(mut self, description: &str) -> Self {
        if let Some(last) = self.parameters.last_mut() {
            last.description = Some(description.to_string());
        }
        self
    }

    pub fn output(mut self, name: &str, semantic_type: &str) -> Self {
        self.outputs.push(OutputSpec {
            name: name.to_string(),
            semantic_type: semantic_type.to_string(),
            collection: false,
        });
        self
    }

    pub fn collection_output(mut self, name: &str, semantic_type: &str) -> Self {
        self.outputs.push(OutputSpec {
            name: name.to_string(),
            semantic_type: semantic_type.to_string(),
            collection: true,
        });
        self
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn parameter_names(&self) -> Vec<&str> {
        self.parameters.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn outputs(&self) -> &[OutputSpec] {
        &self.outputs
    }

    pub fn get_output(&self, name: &str) -> Option<&OutputSpec> {
        self.outputs.iter().find(|o| o.name == name)
    }

    /// Map positional then keyword arguments onto declared parameters,
    /// filling defaults. The result is in declaration order.
    pub fn collate_inputs(&self, action: &str, args: CallArgs) -> Result<IndexMap<String, Arg>> {
        if args.positional.len() > self.parameters.len() {
            return Err(MemoError::signature(
                action,
                format!(
                    "takes {} arguments but {} positional arguments were given",
                    self.parameters.len(),
                    args.positional.len()
                ),
            ));
        }

        let mut supplied: IndexMap<String, Arg> = IndexMap::new();
        for (param, arg) in self.parameters.iter().zip(args.positional) {
            supplied.insert(param.name.clone(), arg);
        }
        for (name, arg) in args.keyword {
            if !self.parameters.iter().any(|p| p.name == name) {
                return Err(MemoError::signature(
                    action,
                    format!("unexpected keyword argument '{}'", name),
                ));
            }
            if supplied.contains_key(&name) {
                return Err(MemoError::signature(
                    action,
                    format!("got multiple values for argument '{}'", name),
                ));
            }
            supplied.insert(name, arg);
        }

        let mut collated = IndexMap::with_capacity(self.parameters.len());
        for param in &self.parameters {
            let arg = match supplied.shift_remove(&param.name) {
                Some(arg) => arg,
                None => match &param.default {
                    Some(default) => Arg::Realized(default.clone()),
                    None => {
                        return Err(MemoError::signature(
                            action,
                            format!("missing required argument '{}'", param.name),
                        ))
                    }
                },
            };
            collated.insert(param.name.clone(), arg);
        }
        Ok(collated)
    }

    /// Check collated, realized values against declared kinds and schemas
    pub fn coerce_user_input(&self, action: &str, collated: IndexMap<String, Value>) -> Result<Inputs> {
        let mut values = IndexMap::with_capacity(collated.len());
        for param in &self.parameters {
            let value = collated.get(&param.name).cloned().ok_or_else(|| {
                MemoError::signature(action, format!("missing required argument '{}'", param.name))
            })?;

            match param.kind {
                ParameterKind::Input => {
                    let optional_null =
                        matches!(value, Value::Null) && matches!(param.default, Some(Value::Null));
                    if !optional_null
                        && !matches!(value, Value::Artifact(_) | Value::Collection(_))
                    {
                        return Err(MemoError::signature(
                            action,
                            format!("input '{}' must be an artifact or a collection", param.name),
                        ));
                    }
                }
                ParameterKind::Parameter => {
                    if value.contains_artifacts() {
                        return Err(MemoError::signature(
                            action,
                            format!("parameter '{}' cannot take an artifact", param.name),
                        ));
                    }
                    if let Some(schema) = &param.schema {
                        validate_against_schema(action, &param.name, schema, &value)?;
                    }
                }
            }
            values.insert(param.name.clone(), value);
        }
        Ok(Inputs { values })
    }
}

fn validate_against_schema(
    action: &str,
    name: &str,
    schema: &serde_json::Value,
    value: &Value,
) -> Result<()> {
    let instance = value.to_json().ok_or_else(|| {
        MemoError::signature(action, format!("parameter '{}' has no JSON form", name))
    })?;
    let validator = jsonschema::validator_for(schema).map_err(|e| {
        MemoError::signature(action, format!("invalid schema for '{}': {}", name, e))
    })?;
    if let Err(error) = validator.validate(&instance) {
        warn!("Parameter validation failed for {}.{}: {}", action, name, error);
        return Err(MemoError::signature(
            action,
            format!("parameter '{}' is invalid: {}", name, error),
        ));
    }
    Ok(())
}

/// Positional and keyword arguments for one call
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    positional: Vec<Arg>,
    keyword: Vec<(String, Arg)>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, arg: impl Into<Arg>) -> Self {
        self.positional.push(arg.into());
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, arg: impl Into<Arg>) -> Self {
        self.keyword.push((name.into(), arg.into()));
        self
    }

    /// True if any argument stands for an output that is not computed yet
    pub fn contains_deferred(&self) -> bool {
        self.positional.iter().any(Arg::is_deferred)
            || self.keyword.iter().any(|(_, arg)| arg.is_deferred())
    }

    /// Wait on every deferred argument
    pub async fn resolve(self) -> Result<Self> {
        let mut positional = Vec::with_capacity(self.positional.len());
        for arg in self.positional {
            positional.push(Arg::Realized(arg.resolve().await?));
        }
        let mut keyword = Vec::with_capacity(self.keyword.len());
        for (name, arg) in self.keyword {
            keyword.push((name, Arg::Realized(arg.resolve().await?)));
        }
        Ok(Self { positional, keyword })
    }
}

/// Declaration-ordered, coerced values handed to an action
#[derive(Debug, Clone, Default)]
pub struct Inputs {
    values: IndexMap<String, Value>,
}

impl Inputs {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get an input artifact by name
    pub fn artifact(&self, name: &str) -> anyhow::Result<&Artifact> {
        self.values
            .get(name)
            .and_then(Value::as_artifact)
            .ok_or_else(|| anyhow::anyhow!("Input '{}' is not an artifact", name))
    }

    /// Get an input collection by name
    pub fn collection(&self, name: &str) -> anyhow::Result<&ResultCollection> {
        self.values
            .get(name)
            .and_then(Value::as_collection)
            .ok_or_else(|| anyhow::anyhow!("Input '{}' is not a collection", name))
    }

    /// Get a primitive parameter deserialized into `T`
    pub fn param<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<T> {
        let value = self
            .values
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("Parameter '{}' not found", name))?;
        let json = value
            .to_json()
            .ok_or_else(|| anyhow::anyhow!("Parameter '{}' is not a primitive", name))?;
        serde_json::from_value(json)
            .map_err(|e| anyhow::anyhow!("Failed to deserialize parameter '{}': {}", name, e))
    }

    /// Ordered bindings used to key this call
    pub fn bindings(&self) -> Vec<Binding> {
        self.values
            .iter()
            .map(|(name, value)| Binding::new(name.clone(), value.normalize()))
            .collect()
    }
}
