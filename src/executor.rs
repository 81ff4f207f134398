//! Parallel execution facility.
//!
//! An [`Executor`] takes a boxed job and hands back [`PendingResults`]
//! immediately; the job runs out of line. Downstream calls can take a
//! [`DeferredOutput`] from the pending results as an argument before the job
//! has finished.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error};

use crate::core::config::ParallelConfig;
use crate::core::errors::{MemoError, Result};
use crate::registry::normalize_namespace;
use crate::results::Results;
use crate::value::Value;

/// A unit of deferred work
pub type Job = BoxFuture<'static, Result<Results>>;

type SharedOutcome = Shared<BoxFuture<'static, std::result::Result<Results, Arc<MemoError>>>>;

pub trait Executor: Send + Sync {
    fn label(&self) -> &str;

    fn kind(&self) -> &'static str;

    /// Schedule a job; never blocks on its completion
    fn submit(&self, job: Job) -> PendingResults;
}

/// Runs jobs on the tokio runtime, at most `max_workers` at a time
pub struct TokioExecutor {
    label: String,
    max_workers: usize,
    semaphore: Arc<Semaphore>,
}

impl TokioExecutor {
    pub fn new(label: impl Into<String>, max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            label: label.into(),
            max_workers,
            semaphore: Arc::new(Semaphore::new(max_workers)),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }
}

impl Executor for TokioExecutor {
    fn label(&self) -> &str {
        &self.label
    }

    fn kind(&self) -> &'static str {
        "tokio"
    }

    fn submit(&self, job: Job) -> PendingResults {
        let semaphore = Arc::clone(&self.semaphore);
        let label = self.label.clone();
        let handle = tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| MemoError::executor(label, e.to_string()))?;
            job.await
        });
        debug!("Submitted job to executor '{}'", self.label);
        PendingResults::from_handle(self.label.clone(), handle)
    }
}

/// Results of a job that may not have finished yet. Clones share the outcome.
#[derive(Clone)]
pub struct PendingResults {
    label: String,
    outcome: SharedOutcome,
}

impl fmt::Debug for PendingResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingResults")
            .field("label", &self.label)
            .field("ready", &self.outcome.peek().is_some())
            .finish()
    }
}

impl PendingResults {
    /// Wrap a spawned task
    pub fn from_handle(
        label: impl Into<String>,
        handle: tokio::task::JoinHandle<Result<Results>>,
    ) -> Self {
        let label = label.into();
        let join_label = label.clone();
        let outcome = async move {
            match handle.await {
                Ok(result) => result.map_err(Arc::new),
                Err(join_error) => {
                    error!("Job on executor '{}' did not complete: {}", join_label, join_error);
                    Err(Arc::new(MemoError::executor(join_label, join_error.to_string())))
                }
            }
        }
        .boxed()
        .shared();
        Self { label, outcome }
    }

    /// Wrap any future producing results
    pub fn from_future(label: impl Into<String>, job: Job) -> Self {
        let outcome = job.map(|result| result.map_err(Arc::new)).boxed().shared();
        Self {
            label: label.into(),
            outcome,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_ready(&self) -> bool {
        self.outcome.peek().is_some()
    }

    /// Wait for the job
    pub async fn wait(&self) -> Result<Results> {
        self.outcome.clone().await.map_err(MemoError::from_shared)
    }

    /// Placeholder for one named output, usable as a call argument
    pub fn output(&self, name: impl Into<String>) -> DeferredOutput {
        DeferredOutput {
            pending: self.clone(),
            output: name.into(),
        }
    }
}

/// One not-yet-computed output of a pending job
#[derive(Clone)]
pub struct DeferredOutput {
    pending: PendingResults,
    output: String,
}

impl fmt::Debug for DeferredOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredOutput")
            .field("executor", &self.pending.label)
            .field("output", &self.output)
            .finish()
    }
}

impl DeferredOutput {
    pub fn output_name(&self) -> &str {
        &self.output
    }

    /// Wait for the producing job and take this output from its results
    pub async fn resolve(&self) -> Result<Value> {
        let results = self.pending.wait().await?;
        results
            .get(&self.output)
            .map(|output| output.to_value())
            .ok_or_else(|| {
                MemoError::invalid_outputs(
                    self.pending.label.clone(),
                    format!("deferred output '{}' was not produced", self.output),
                )
            })
    }
}

/// Live executors plus routing, built from a [`ParallelConfig`]
pub struct ExecutorSet {
    executors: HashMap<String, Arc<dyn Executor>>,
    default_label: String,
    action_executor_mapping: HashMap<String, String>,
    executor_name_type_mapping: HashMap<String, String>,
}

impl fmt::Debug for ExecutorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorSet")
            .field("default_label", &self.default_label)
            .field("action_executor_mapping", &self.action_executor_mapping)
            .field("executor_name_type_mapping", &self.executor_name_type_mapping)
            .finish()
    }
}

impl ExecutorSet {
    pub fn from_config(config: &ParallelConfig) -> Result<Self> {
        config.validate()?;
        let mut executors: HashMap<String, Arc<dyn Executor>> = HashMap::new();
        for def in &config.executors {
            let executor: Arc<dyn Executor> = match def.kind.as_str() {
                "tokio" => Arc::new(TokioExecutor::new(def.label.clone(), def.max_workers)),
                other => {
                    return Err(MemoError::configuration(format!(
                        "cannot build executor of kind '{}'",
                        other
                    )))
                }
            };
            executors.insert(def.label.clone(), executor);
        }

        Ok(Self {
            executors,
            default_label: config.default_executor.clone(),
            action_executor_mapping: config.mapping.clone(),
            executor_name_type_mapping: config.executor_name_type_mapping(),
        })
    }

    /// Add or replace an executor under its own label
    pub fn insert(&mut self, executor: Arc<dyn Executor>) {
        let label = executor.label().to_string();
        self.executor_name_type_mapping
            .insert(label.clone(), executor.kind().to_string());
        self.executors.insert(label, executor);
    }

    pub fn map_action(&mut self, action: impl Into<String>, label: impl Into<String>) {
        self.action_executor_mapping.insert(action.into(), label.into());
    }

    pub fn action_executor_mapping(&self) -> &HashMap<String, String> {
        &self.action_executor_mapping
    }

    pub fn executor_name_type_mapping(&self) -> &HashMap<String, String> {
        &self.executor_name_type_mapping
    }

    /// Executor label for a qualified action: exact mapping, then namespace
    /// mapping, then the default
    pub fn label_for(&self, qualified_name: &str) -> &str {
        if let Some(label) = self.action_executor_mapping.get(qualified_name) {
            return label;
        }
        let namespace = qualified_name.split(':').next().unwrap_or(qualified_name);
        self.action_executor_mapping
            .get(namespace)
            .or_else(|| self.action_executor_mapping.get(&normalize_namespace(namespace)))
            .map(String::as_str)
            .unwrap_or(&self.default_label)
    }

    pub fn route(&self, qualified_name: &str) -> Result<Arc<dyn Executor>> {
        let label = self.label_for(qualified_name);
        self.executors
            .get(label)
            .cloned()
            .ok_or_else(|| MemoError::executor(label, "no executor registered under this label"))
    }
}
