//! Memoizing execution context for action pipelines.
//!
//! Actions are registered by namespace and called through a [`Context`].
//! Every call is keyed by an [`InvocationKey`]; with a durable named pool
//! configured, a call that already ran (in this run or an earlier one) returns
//! its stored outputs instead of executing again.

// Core infrastructure modules
pub mod core;

pub mod artifact;
pub mod invocation;
pub mod signature;
pub mod value;

pub mod pool;
pub mod results;

pub mod context;
pub mod dispatch;
pub mod executor;
pub mod registry;

// Re-exports for convenience
pub use crate::core::config::{CacheConfig, ExecutorDefinition, ParallelConfig};
pub use crate::core::errors::{MemoError, Result};
pub use artifact::{Artifact, ElementDescriptor, Provenance};
pub use context::{Context, ContextBuilder};
pub use dispatch::{BoundAction, CallResult};
pub use executor::{DeferredOutput, Executor, ExecutorSet, PendingResults, TokioExecutor};
pub use invocation::{Binding, InvocationKey};
pub use pool::{Cache, NamedPool, ProcessPool};
pub use registry::{Action, ActionRegistry};
pub use results::{Output, ResultCollection, Results};
pub use signature::{CallArgs, Inputs, OutputSpec, Parameter, ParameterKind, Signature};
pub use value::{Arg, NormalizedValue, Value};
