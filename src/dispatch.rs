//! Per-call dispatch: cache probe, then local or parallel execution.

use futures::FutureExt;
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::artifact::{ElementDescriptor, Provenance};
use crate::context::Context;
use crate::core::errors::{MemoError, Result};
use crate::executor::PendingResults;
use crate::invocation::InvocationKey;
use crate::registry::{normalize_namespace, qualified_name, Action};
use crate::results::{reconstruct, Output, ResultCollection, Results};
use crate::signature::{CallArgs, Inputs, Signature};
use crate::value::Arg;

/// An action bound to the context that resolved it.
///
/// Carries the action's own [`Signature`], so callers see the real parameter
/// and output names.
#[derive(Clone)]
pub struct BoundAction {
    ctx: Context,
    namespace: String,
    qualified_name: String,
    action: Arc<dyn Action>,
}

impl fmt::Debug for BoundAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundAction")
            .field("action", &self.qualified_name)
            .field("parameters", &self.action.signature().parameter_names())
            .finish()
    }
}

impl BoundAction {
    pub(crate) fn new(ctx: Context, namespace: &str, action: Arc<dyn Action>) -> Self {
        Self {
            ctx,
            namespace: normalize_namespace(namespace),
            qualified_name: qualified_name(namespace, action.name()),
            action,
        }
    }

    pub fn name(&self) -> &str {
        self.action.name()
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    pub fn signature(&self) -> &Signature {
        self.action.signature()
    }

    pub fn description(&self) -> Option<&str> {
        self.action.description()
    }

    /// Invoke the action.
    ///
    /// Calls with deferred arguments never consult the cache. Otherwise a hit
    /// in the named pool index returns the stored outputs without executing.
    /// On a miss the action runs now in a child context, or is submitted to
    /// its executor when the context is parallel.
    pub async fn call(&self, args: CallArgs) -> Result<CallResult> {
        let inputs = if args.contains_deferred() {
            debug!("{} has deferred arguments, skipping cache", self.qualified_name);
            None
        } else {
            let inputs = coerce(self.signature(), &self.qualified_name, args.clone())?;
            let hit = probe(&self.ctx, self.action.as_ref(), &self.qualified_name, &inputs)?;
            if let Some(results) = hit {
                info!("Cache hit for {}", self.qualified_name);
                return Ok(CallResult::Ready(results));
            }
            Some(inputs)
        };

        if self.ctx.is_parallel() {
            return self.submit(args, inputs).map(CallResult::Pending);
        }

        let inputs = match inputs {
            Some(inputs) => inputs,
            None => coerce(self.signature(), &self.qualified_name, args.resolve().await?)?,
        };
        run(&self.ctx, &self.action, &self.qualified_name, inputs, None)
            .await
            .map(CallResult::Ready)
    }

    /// Hand the call to its executor. The job resolves deferred arguments and
    /// creates its child context when it actually runs.
    fn submit(&self, args: CallArgs, inputs: Option<Inputs>) -> Result<PendingResults> {
        let executor = self.ctx.executors().route(&self.qualified_name)?;
        let label = executor.label().to_string();
        let ctx = self.ctx.clone();
        let action = Arc::clone(&self.action);
        let qualified = self.qualified_name.clone();

        info!("Submitting {} to executor '{}'", qualified, label);
        let job = async move {
            let inputs = match inputs {
                Some(inputs) => inputs,
                None => coerce(action.signature(), &qualified, args.resolve().await?)?,
            };
            run(&ctx, &action, &qualified, inputs, Some(label)).await
        }
        .boxed();
        Ok(executor.submit(job))
    }
}

/// What a call produced: finished results, or results still being computed
#[derive(Debug, Clone)]
pub enum CallResult {
    Ready(Results),
    Pending(PendingResults),
}

impl CallResult {
    pub fn is_pending(&self) -> bool {
        matches!(self, CallResult::Pending(_))
    }

    pub async fn wait(self) -> Result<Results> {
        match self {
            CallResult::Ready(results) => Ok(results),
            CallResult::Pending(pending) => pending.wait().await,
        }
    }

    /// One output as an argument for a downstream call. Pending results give
    /// a deferred argument.
    pub fn output(&self, name: &str) -> Option<Arg> {
        match self {
            CallResult::Ready(results) => results.get(name).map(|o| Arg::Realized(o.to_value())),
            CallResult::Pending(pending) => Some(Arg::Deferred(pending.output(name))),
        }
    }
}

/// Collate and coerce fully realized arguments
fn coerce(signature: &Signature, action: &str, args: CallArgs) -> Result<Inputs> {
    let collated = signature.collate_inputs(action, args)?;
    let mut realized = IndexMap::with_capacity(collated.len());
    for (name, arg) in collated {
        match arg {
            Arg::Realized(value) => {
                realized.insert(name, value);
            }
            Arg::Deferred(_) => {
                return Err(MemoError::internal(format!(
                    "argument '{}' of {} is still deferred",
                    name, action
                )))
            }
        }
    }
    signature.coerce_user_input(action, realized)
}

/// Look the call up in the named pool index and rebuild its outputs.
///
/// An index entry whose storage is gone is dropped from the index, its
/// remaining records are deleted, and the probe reports a miss.
fn probe(
    ctx: &Context,
    action: &dyn Action,
    qualified: &str,
    inputs: &Inputs,
) -> Result<Option<Results>> {
    let cache = ctx.cache();
    let Some(named) = cache.named_pool() else {
        return Ok(None);
    };
    let key = InvocationKey::new(qualified, inputs.bindings());

    let _guard = cache.lock();
    let Some(cached) = named.lookup(&key) else {
        debug!("Cache miss for {}", key);
        return Ok(None);
    };
    match reconstruct(qualified, action.signature(), &cached, named) {
        Ok(results) => Ok(Some(results)),
        Err(e) if e.is_stale_index() => {
            let removed = named.forget(&key)?;
            warn!(
                "Dropped stale index entry for {} ({} leftover records deleted): {}",
                key, removed, e
            );
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Execute in a fresh child of `ctx` and register the outputs there
async fn run(
    ctx: &Context,
    action: &Arc<dyn Action>,
    qualified: &str,
    inputs: Inputs,
    executor: Option<String>,
) -> Result<Results> {
    let key = InvocationKey::new(qualified, inputs.bindings());
    let child = ctx.child();
    info!("Executing {} (depth {})", qualified, child.depth());

    let outputs = action
        .execute(&child, &inputs)
        .await
        .map_err(|e| MemoError::execution(qualified, e))?;
    register_outputs(&child, action.signature(), &key, outputs, executor)
}

enum Shape {
    Scalar,
    Collection(Vec<String>),
}

/// Check outputs against the declaration, alias each artifact with this
/// invocation's provenance and register the aliases in one batch
fn register_outputs(
    ctx: &Context,
    signature: &Signature,
    key: &InvocationKey,
    mut outputs: Results,
    executor: Option<String>,
) -> Result<Results> {
    let action = key.action.as_str();
    if let Some(unexpected) = outputs.names().find(|name| signature.get_output(name).is_none()) {
        return Err(MemoError::invalid_outputs(
            action,
            format!("unexpected output '{}'", unexpected),
        ));
    }

    let provenance = |output_name: &str, element: Option<ElementDescriptor>, alias_of| {
        Provenance::Action {
            invocation: key.clone(),
            output_name: output_name.to_string(),
            element,
            executor: executor.clone(),
            alias_of,
        }
    };

    let mut aliases = Vec::new();
    let mut layout = Vec::with_capacity(signature.outputs().len());
    for spec in signature.outputs() {
        let output = outputs.remove(&spec.name).ok_or_else(|| {
            MemoError::invalid_outputs(action, format!("missing output '{}'", spec.name))
        })?;
        match (spec.collection, output) {
            (false, Output::Scalar(artifact)) => {
                check_type(action, &spec.name, &spec.semantic_type, artifact.semantic_type())?;
                aliases.push(artifact.alias(provenance(&spec.name, None, artifact.uuid())));
                layout.push((spec.name.clone(), Shape::Scalar));
            }
            (true, Output::Collection(collection)) => {
                let total = collection.len();
                let mut items = Vec::with_capacity(total);
                for (idx, (item_name, artifact)) in collection.iter().enumerate() {
                    check_type(action, &spec.name, &spec.semantic_type, artifact.semantic_type())?;
                    let element = ElementDescriptor::new(item_name.clone(), idx, total);
                    aliases.push(artifact.alias(provenance(&spec.name, Some(element), artifact.uuid())));
                    items.push(item_name.clone());
                }
                layout.push((spec.name.clone(), Shape::Collection(items)));
            }
            (true, Output::Scalar(_)) => {
                return Err(MemoError::invalid_outputs(
                    action,
                    format!("output '{}' must be a collection", spec.name),
                ))
            }
            (false, Output::Collection(_)) => {
                return Err(MemoError::invalid_outputs(
                    action,
                    format!("output '{}' must be a single artifact", spec.name),
                ))
            }
        }
    }

    let mut handles = ctx.add_references(&aliases)?.into_iter();
    let mut next = || {
        handles
            .next()
            .ok_or_else(|| MemoError::internal("fewer registered outputs than produced"))
    };
    let mut results = Results::new();
    for (name, shape) in layout {
        let output = match shape {
            Shape::Scalar => Output::Scalar(next()?),
            Shape::Collection(items) => {
                let mut collection = ResultCollection::new();
                for item in items {
                    collection.insert(item, next()?);
                }
                Output::Collection(collection)
            }
        };
        results.insert(name, output);
    }
    debug!("Registered {} outputs for {}", results.len(), key);
    Ok(results)
}

fn check_type(action: &str, output: &str, declared: &str, actual: &str) -> Result<()> {
    if declared != actual {
        return Err(MemoError::invalid_outputs(
            action,
            format!(
                "output '{}' is declared as {} but an artifact of type {} was returned",
                output, declared, actual
            ),
        ));
    }
    Ok(())
}
