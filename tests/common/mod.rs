//! Shared fixtures: a small "dummy-plugin" namespace whose actions count how
//! often they really execute.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use memoflow::{
    Action, ActionRegistry, CallArgs, Context, Inputs, ResultCollection, Results, Signature, Value,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const NAMESPACE: &str = "dummy-plugin";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Executions per action name
#[derive(Clone, Default)]
pub struct Counter {
    counts: Arc<DashMap<String, usize>>,
}

impl Counter {
    pub fn hit(&self, action: &str) {
        *self.counts.entry(action.to_string()).or_insert(0) += 1;
    }

    pub fn get(&self, action: &str) -> usize {
        self.counts.get(action).map(|c| *c).unwrap_or(0)
    }
}

/// A durable pool directory removed on drop
pub struct TempPool {
    path: PathBuf,
}

impl TempPool {
    pub fn new() -> Self {
        Self {
            path: std::env::temp_dir().join(format!("memoflow-test-{}", uuid::Uuid::new_v4())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempPool {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

pub fn ints(values: &[i64]) -> Value {
    Value::List(values.iter().copied().map(Value::Int).collect())
}

pub fn registry(counter: &Counter) -> ActionRegistry {
    let registry = ActionRegistry::new();
    registry.register(NAMESPACE, Arc::new(MakeTable::new(counter.clone())));
    registry.register(NAMESPACE, Arc::new(Identity::new(counter.clone())));
    registry.register(NAMESPACE, Arc::new(Split::new(counter.clone())));
    registry.register(NAMESPACE, Arc::new(Concat::new(counter.clone())));
    registry.register(NAMESPACE, Arc::new(Range::new(counter.clone())));
    registry.register(NAMESPACE, Arc::new(Failing::new(counter.clone())));
    registry.register(NAMESPACE, Arc::new(Pipeline::new(counter.clone())));
    registry.register(NAMESPACE, Arc::new(Scale::new(counter.clone())));
    registry
}

/// Build a table from a list of integers
pub struct MakeTable {
    signature: Signature,
    counter: Counter,
}

impl MakeTable {
    fn new(counter: Counter) -> Self {
        Self {
            signature: Signature::new()
                .parameter_with_schema(
                    "values",
                    json!({"type": "array", "items": {"type": "integer"}}),
                )
                .described("Rows of the new table")
                .output("table", "Table"),
            counter,
        }
    }
}

#[async_trait]
impl Action for MakeTable {
    fn name(&self) -> &str {
        "make_table"
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn description(&self) -> Option<&str> {
        Some("Build a table from integers")
    }

    async fn execute(&self, ctx: &Context, inputs: &Inputs) -> Result<Results> {
        self.counter.hit(self.name());
        let values: Vec<i64> = inputs.param("values")?;
        let table = ctx.make_value("Table", &values, Some("list"))?;
        Ok(Results::new().with("table", table))
    }
}

/// Return the input unchanged
pub struct Identity {
    signature: Signature,
    counter: Counter,
}

impl Identity {
    fn new(counter: Counter) -> Self {
        Self {
            signature: Signature::new().input("table").output("out", "Table"),
            counter,
        }
    }
}

#[async_trait]
impl Action for Identity {
    fn name(&self) -> &str {
        "identity"
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    async fn execute(&self, _ctx: &Context, inputs: &Inputs) -> Result<Results> {
        self.counter.hit(self.name());
        Ok(Results::new().with("out", inputs.artifact("table")?.clone()))
    }
}

/// Cut a table into consecutive pieces
pub struct Split {
    signature: Signature,
    counter: Counter,
}

impl Split {
    fn new(counter: Counter) -> Self {
        Self {
            signature: Signature::new()
                .input("table")
                .parameter_with_default("parts", 2)
                .collection_output("pieces", "Table"),
            counter,
        }
    }
}

#[async_trait]
impl Action for Split {
    fn name(&self) -> &str {
        "split"
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    async fn execute(&self, ctx: &Context, inputs: &Inputs) -> Result<Results> {
        self.counter.hit(self.name());
        let values: Vec<i64> = inputs.artifact("table")?.view()?;
        let parts: usize = inputs.param("parts")?;
        if parts == 0 {
            bail!("parts must be positive");
        }
        let size = ((values.len() + parts - 1) / parts).max(1);

        let mut pieces = ResultCollection::new();
        for (i, chunk) in values.chunks(size).enumerate() {
            pieces.insert(format!("piece-{}", i), ctx.make_value("Table", chunk, Some("list"))?);
        }
        Ok(Results::new().with_collection("pieces", pieces))
    }
}

/// Join a collection of tables in collection order
pub struct Concat {
    signature: Signature,
    counter: Counter,
}

impl Concat {
    fn new(counter: Counter) -> Self {
        Self {
            signature: Signature::new().input("pieces").output("table", "Table"),
            counter,
        }
    }
}

#[async_trait]
impl Action for Concat {
    fn name(&self) -> &str {
        "concat"
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    async fn execute(&self, ctx: &Context, inputs: &Inputs) -> Result<Results> {
        self.counter.hit(self.name());
        let mut values: Vec<i64> = Vec::new();
        for piece in inputs.collection("pieces")?.values() {
            values.extend(piece.view::<Vec<i64>>()?);
        }
        let table = ctx.make_value("Table", &values, Some("list"))?;
        Ok(Results::new().with("table", table))
    }
}

/// Produce `n` single-number tables as a collection
pub struct Range {
    signature: Signature,
    counter: Counter,
}

impl Range {
    fn new(counter: Counter) -> Self {
        Self {
            signature: Signature::new()
                .parameter_with_schema("n", json!({"type": "integer", "minimum": 0}))
                .collection_output("items", "Table"),
            counter,
        }
    }
}

#[async_trait]
impl Action for Range {
    fn name(&self) -> &str {
        "range"
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    async fn execute(&self, ctx: &Context, inputs: &Inputs) -> Result<Results> {
        self.counter.hit(self.name());
        let n: usize = inputs.param("n")?;
        let mut items = ResultCollection::new();
        for i in 0..n {
            items.insert(format!("item-{}", i), ctx.make_value("Table", vec![i], None)?);
        }
        Ok(Results::new().with_collection("items", items))
    }
}

/// Create one value, then fail
pub struct Failing {
    signature: Signature,
    counter: Counter,
}

impl Failing {
    fn new(counter: Counter) -> Self {
        Self {
            signature: Signature::new()
                .parameter_with_default("label", "partial")
                .output("table", "Table"),
            counter,
        }
    }
}

#[async_trait]
impl Action for Failing {
    fn name(&self) -> &str {
        "failing"
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    async fn execute(&self, ctx: &Context, inputs: &Inputs) -> Result<Results> {
        self.counter.hit(self.name());
        let label: String = inputs.param("label")?;
        ctx.make_value("Table", &label, Some("str"))?;
        bail!("failing on purpose after creating '{}'", label)
    }
}

/// make_table followed by identity, through the context it was given
pub struct Pipeline {
    signature: Signature,
    counter: Counter,
}

impl Pipeline {
    fn new(counter: Counter) -> Self {
        Self {
            signature: Signature::new().parameter("values").output("table", "Table"),
            counter,
        }
    }
}

#[async_trait]
impl Action for Pipeline {
    fn name(&self) -> &str {
        "pipeline"
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    async fn execute(&self, ctx: &Context, inputs: &Inputs) -> Result<Results> {
        self.counter.hit(self.name());
        let values = inputs
            .get("values")
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("missing values"))?;

        let make_table = ctx.get_action(NAMESPACE, "make_table")?;
        let made = make_table.call(CallArgs::new().arg(values)).await?.wait().await?;
        let table = made
            .artifact("table")
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("make_table produced no table"))?;

        let identity = ctx.get_action(NAMESPACE, "identity")?;
        let out = identity.call(CallArgs::new().arg(table)).await?.wait().await?;
        let table = out
            .artifact("out")
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("identity produced no output"))?;
        Ok(Results::new().with("table", table))
    }
}

/// Label a table with a float factor; the factor has no schema
pub struct Scale {
    signature: Signature,
    counter: Counter,
}

impl Scale {
    fn new(counter: Counter) -> Self {
        Self {
            signature: Signature::new().parameter("factor").output("table", "Table"),
            counter,
        }
    }
}

#[async_trait]
impl Action for Scale {
    fn name(&self) -> &str {
        "scale"
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    async fn execute(&self, ctx: &Context, inputs: &Inputs) -> Result<Results> {
        self.counter.hit(self.name());
        let factor = match inputs.get("factor") {
            Some(Value::Float(f)) => *f,
            Some(Value::Int(i)) => *i as f64,
            other => bail!("factor must be a number, got {:?}", other),
        };
        let table = ctx.make_value("Table", factor.to_string(), Some("str"))?;
        Ok(Results::new().with("table", table))
    }
}
