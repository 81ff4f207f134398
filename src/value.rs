//! Argument values.
//!
//! Callers pass [`Arg`]s: either a realized [`Value`] or a deferred placeholder
//! for an output that a parallel executor has not produced yet. Before a call
//! can be keyed, realized values are reduced to their [`NormalizedValue`] form,
//! which is hashable and compares structurally.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::artifact::Artifact;
use crate::core::errors::Result;
use crate::executor::DeferredOutput;
use crate::results::ResultCollection;

/// A realized argument value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Artifact(Artifact),
    Collection(ResultCollection),
}

impl Value {
    pub fn as_artifact(&self) -> Option<&Artifact> {
        match self {
            Value::Artifact(artifact) => Some(artifact),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&ResultCollection> {
        match self {
            Value::Collection(collection) => Some(collection),
            _ => None,
        }
    }

    /// True if this value (or anything nested in it) refers to stored data
    pub fn contains_artifacts(&self) -> bool {
        match self {
            Value::Artifact(_) | Value::Collection(_) => true,
            Value::List(items) => items.iter().any(Value::contains_artifacts),
            Value::Map(map) => map.values().any(Value::contains_artifacts),
            _ => false,
        }
    }

    /// Plain JSON view of a primitive value. Artifacts have no JSON view.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        Some(match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => serde_json::Value::Array(
                items.iter().map(Value::to_json).collect::<Option<Vec<_>>>()?,
            ),
            Value::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| v.to_json().map(|v| (k.clone(), v)))
                    .collect::<Option<serde_json::Map<_, _>>>()?,
            ),
            Value::Artifact(_) | Value::Collection(_) => return None,
        })
    }

    /// Build a primitive value from JSON
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => Value::List(items.iter().map(Value::from_json).collect()),
            serde_json::Value::Object(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Reduce to the hashable form used in invocation keys
    pub fn normalize(&self) -> NormalizedValue {
        match self {
            Value::Null => NormalizedValue::Null,
            Value::Bool(b) => NormalizedValue::Bool(*b),
            Value::Int(i) => NormalizedValue::Int(*i),
            Value::Float(f) => NormalizedValue::Float(CanonicalFloat::from(*f)),
            Value::Str(s) => NormalizedValue::Str(s.clone()),
            Value::List(items) => NormalizedValue::List(items.iter().map(Value::normalize).collect()),
            Value::Map(map) => NormalizedValue::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.normalize()))
                    .collect(),
            ),
            Value::Artifact(artifact) => NormalizedValue::Artifact(artifact.uuid()),
            Value::Collection(collection) => NormalizedValue::Collection(
                collection
                    .iter()
                    .map(|(name, artifact)| (name.clone(), artifact.uuid()))
                    .collect(),
            ),
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i64 => Int,
    i32 => Int,
    u32 => Int,
    f64 => Float,
    f32 => Float,
    String => Str,
    &str => Str,
    Artifact => Artifact,
    ResultCollection => Collection,
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

/// A float reduced to a canonical bit pattern so it can be hashed.
/// `-0.0` folds into `0.0` and every NaN folds into one NaN.
///
/// Finite values serialize as JSON numbers; NaN and the infinities have no
/// JSON number form and serialize as the strings `"nan"`, `"inf"`, `"-inf"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "FloatRepr", into = "FloatRepr")]
pub struct CanonicalFloat(u64);

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum FloatRepr {
    Finite(f64),
    NonFinite(String),
}

impl From<CanonicalFloat> for FloatRepr {
    fn from(c: CanonicalFloat) -> Self {
        let f = f64::from(c);
        if f.is_nan() {
            FloatRepr::NonFinite("nan".into())
        } else if f == f64::INFINITY {
            FloatRepr::NonFinite("inf".into())
        } else if f == f64::NEG_INFINITY {
            FloatRepr::NonFinite("-inf".into())
        } else {
            FloatRepr::Finite(f)
        }
    }
}

impl TryFrom<FloatRepr> for CanonicalFloat {
    type Error = String;

    fn try_from(repr: FloatRepr) -> std::result::Result<Self, Self::Error> {
        let f = match repr {
            FloatRepr::Finite(f) => f,
            FloatRepr::NonFinite(s) => match s.as_str() {
                "nan" => f64::NAN,
                "inf" => f64::INFINITY,
                "-inf" => f64::NEG_INFINITY,
                other => return Err(format!("not a float: '{}'", other)),
            },
        };
        Ok(CanonicalFloat::from(f))
    }
}

impl From<f64> for CanonicalFloat {
    fn from(f: f64) -> Self {
        let f = if f == 0.0 {
            0.0
        } else if f.is_nan() {
            f64::NAN
        } else {
            f
        };
        CanonicalFloat(f.to_bits())
    }
}

impl From<CanonicalFloat> for f64 {
    fn from(c: CanonicalFloat) -> Self {
        f64::from_bits(c.0)
    }
}

/// Hashable, structurally comparable form of a realized value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum NormalizedValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(CanonicalFloat),
    Str(String),
    List(Vec<NormalizedValue>),
    Map(BTreeMap<String, NormalizedValue>),
    Artifact(Uuid),
    Collection(Vec<(String, Uuid)>),
}

/// A call argument: realized, or a placeholder for an uncomputed output
#[derive(Debug, Clone)]
pub enum Arg {
    Realized(Value),
    Deferred(DeferredOutput),
}

impl Arg {
    pub fn is_deferred(&self) -> bool {
        matches!(self, Arg::Deferred(_))
    }

    pub fn as_realized(&self) -> Option<&Value> {
        match self {
            Arg::Realized(value) => Some(value),
            Arg::Deferred(_) => None,
        }
    }

    /// Wait for a deferred argument; realized arguments pass through
    pub async fn resolve(self) -> Result<Value> {
        match self {
            Arg::Realized(value) => Ok(value),
            Arg::Deferred(deferred) => deferred.resolve().await,
        }
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Realized(value)
    }
}

impl From<DeferredOutput> for Arg {
    fn from(deferred: DeferredOutput) -> Self {
        Arg::Deferred(deferred)
    }
}

macro_rules! arg_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Arg {
                fn from(v: $ty) -> Self {
                    Arg::Realized(Value::from(v))
                }
            }
        )*
    };
}

arg_from!(bool, i64, i32, u32, f64, f32, String, &str, Artifact, ResultCollection, Vec<Value>);
