//! Execution contexts.
//!
//! A root [`Context`] owns the pool pair, the action registry and the
//! executors for one top-level run. Every local action execution gets a child
//! context that shares all of that and only adds its own ownership scope.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, info};
use uuid::Uuid;

use crate::artifact::Artifact;
use crate::core::config::{CacheConfig, ParallelConfig};
use crate::core::errors::{MemoError, Result};
use crate::dispatch::BoundAction;
use crate::executor::ExecutorSet;
use crate::pool::Cache;
use crate::registry::ActionRegistry;

/// State every context in a tree shares verbatim
struct Shared {
    cache: Arc<Cache>,
    registry: ActionRegistry,
    executors: Arc<ExecutorSet>,
    parallel: bool,
}

/// Resources registered by one context. Whatever is still owned when the
/// scope ends moves to the parent scope.
struct Scope {
    id: Uuid,
    depth: usize,
    parent: Option<Weak<Scope>>,
    owned: Mutex<Vec<Uuid>>,
}

impl Scope {
    fn root() -> Self {
        Self {
            id: Uuid::new_v4(),
            depth: 0,
            parent: None,
            owned: Mutex::new(Vec::new()),
        }
    }

    fn child_of(parent: &Arc<Scope>) -> Self {
        Self {
            id: Uuid::new_v4(),
            depth: parent.depth + 1,
            parent: Some(Arc::downgrade(parent)),
            owned: Mutex::new(Vec::new()),
        }
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        let owned = std::mem::take(self.owned.get_mut());
        if owned.is_empty() {
            return;
        }
        match self.parent.as_ref().and_then(Weak::upgrade) {
            Some(parent) => {
                debug!(
                    "Scope {} ended, handing {} resources to scope {}",
                    self.id,
                    owned.len(),
                    parent.id
                );
                parent.owned.lock().extend(owned);
            }
            None => debug!(
                "Scope {} ended with {} resources still in the pool",
                self.id,
                owned.len()
            ),
        }
    }
}

#[derive(Clone)]
pub struct Context {
    shared: Arc<Shared>,
    scope: Arc<Scope>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("scope", &self.scope.id)
            .field("depth", &self.scope.depth)
            .field("parallel", &self.shared.parallel)
            .field("cache", &self.shared.cache)
            .finish()
    }
}

impl Context {
    pub fn builder(registry: ActionRegistry) -> ContextBuilder {
        ContextBuilder::new(registry)
    }

    /// A root context with default configuration and no durable pool
    pub fn new(registry: ActionRegistry) -> Result<Self> {
        ContextBuilder::new(registry).build()
    }

    /// A new context sharing this one's pool pair, registry, executors and
    /// parallel flag
    pub fn child(&self) -> Context {
        Context {
            shared: Arc::clone(&self.shared),
            scope: Arc::new(Scope::child_of(&self.scope)),
        }
    }

    /// Resolve an action into a callable handle bound to this context
    pub fn get_action(&self, namespace: &str, name: &str) -> Result<BoundAction> {
        let action = self.shared.registry.lookup(namespace, name)?;
        Ok(BoundAction::new(self.clone(), namespace, action))
    }

    /// Construct a new artifact and register it with this scope
    pub fn make_value<T: Serialize>(
        &self,
        semantic_type: &str,
        view: T,
        view_type: Option<&str>,
    ) -> Result<Artifact> {
        let artifact = Artifact::import_data(semantic_type, view, view_type)?;
        self.add_reference(&artifact)
    }

    /// Save into the process pool (and the named pool, if any) and record
    /// ownership. Returns the process pool's handle.
    ///
    /// The handle is a new reference to the same resource: artifacts are
    /// immutable, so it keeps the UUID and provenance of `artifact`. Outputs
    /// get their own identity from [`Artifact::alias`] before they are
    /// registered, not here.
    pub fn add_reference(&self, artifact: &Artifact) -> Result<Artifact> {
        let mut handles = self.add_references(std::slice::from_ref(artifact))?;
        handles
            .pop()
            .ok_or_else(|| MemoError::internal("registration returned no handle"))
    }

    /// Register several artifacts under a single hold of the pool lock.
    /// Artifacts registered before a failure stay registered.
    pub(crate) fn add_references(&self, artifacts: &[Artifact]) -> Result<Vec<Artifact>> {
        let cache = &self.shared.cache;
        let _guard = cache.lock();
        let mut handles = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            let handle = cache.process_pool().save(artifact);
            self.scope.owned.lock().push(handle.uuid());
            if let Some(named) = cache.named_pool() {
                named.save(&handle)?;
            }
            debug!(
                "Registered {} ({}) in scope {}",
                handle.uuid(),
                handle.semantic_type(),
                self.scope.id
            );
            handles.push(handle);
        }
        Ok(handles)
    }

    pub fn is_parallel(&self) -> bool {
        self.shared.parallel
    }

    pub fn is_root(&self) -> bool {
        self.scope.parent.is_none()
    }

    pub fn depth(&self) -> usize {
        self.scope.depth
    }

    pub fn scope_id(&self) -> Uuid {
        self.scope.id
    }

    /// UUIDs this scope is currently responsible for
    pub fn owned(&self) -> Vec<Uuid> {
        self.scope.owned.lock().clone()
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.shared.cache
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.shared.registry
    }

    pub fn executors(&self) -> &ExecutorSet {
        &self.shared.executors
    }

    pub fn action_executor_mapping(&self) -> &HashMap<String, String> {
        self.shared.executors.action_executor_mapping()
    }

    pub fn executor_name_type_mapping(&self) -> &HashMap<String, String> {
        self.shared.executors.executor_name_type_mapping()
    }

    /// Drop everything the root scope owns from the process pool. Durable
    /// copies are kept. Returns the number of entries released.
    pub fn release(self) -> Result<usize> {
        if !self.is_root() {
            return Err(MemoError::internal("only a root context can release resources"));
        }
        let owned = std::mem::take(&mut *self.scope.owned.lock());
        let process_pool = self.shared.cache.process_pool();
        let released = owned
            .iter()
            .filter(|uuid| process_pool.remove(uuid).is_some())
            .count();
        info!("Released {} resources from scope {}", released, self.scope.id);
        Ok(released)
    }
}

/// Builder for root contexts
pub struct ContextBuilder {
    registry: ActionRegistry,
    cache: Option<Arc<Cache>>,
    cache_config: CacheConfig,
    parallel_config: ParallelConfig,
    parallel: bool,
}

impl ContextBuilder {
    pub fn new(registry: ActionRegistry) -> Self {
        Self {
            registry,
            cache: None,
            cache_config: CacheConfig::default(),
            parallel_config: ParallelConfig::default(),
            parallel: false,
        }
    }

    /// Open the pool pair from configuration when building
    pub fn with_cache_config(mut self, config: CacheConfig) -> Self {
        self.cache_config = config;
        self
    }

    /// Use an already open pool pair
    pub fn with_cache(mut self, cache: Arc<Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_parallel_config(mut self, config: ParallelConfig) -> Self {
        self.parallel_config = config;
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Build the root context. Indexes the named pool unless it already is.
    pub fn build(self) -> Result<Context> {
        let executors = self.parallel_config.build()?;
        let cache = match self.cache {
            Some(cache) => cache,
            None => Arc::new(Cache::from_config(&self.cache_config)?),
        };
        if cache.create_index()? {
            debug!("Built named pool index for new root context");
        }

        let ctx = Context {
            shared: Arc::new(Shared {
                cache,
                registry: self.registry,
                executors: Arc::new(executors),
                parallel: self.parallel,
            }),
            scope: Arc::new(Scope::root()),
        };
        info!(
            "Created root context {} (parallel: {}, named pool: {})",
            ctx.scope.id,
            ctx.shared.parallel,
            ctx.shared.cache.named_pool().is_some()
        );
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_child_inherits_shared_state() {
        let root = Context::builder(ActionRegistry::new())
            .parallel(true)
            .build()
            .unwrap();
        let child = root.child();
        let grandchild = child.child();
        assert!(child.is_parallel());
        assert!(Arc::ptr_eq(root.cache(), grandchild.cache()));
        assert_eq!(grandchild.depth(), 2);
        assert!(!child.is_root());
        assert_ne!(root.scope_id(), child.scope_id());
    }

    #[test]
    fn test_ownership_moves_to_parent() {
        let root = Context::new(ActionRegistry::new()).unwrap();
        let uuid = {
            let child = root.child();
            let artifact = child.make_value("Table", json!([1, 2]), None).unwrap();
            assert_eq!(child.owned(), vec![artifact.uuid()]);
            assert!(root.owned().is_empty());
            artifact.uuid()
        };
        assert_eq!(root.owned(), vec![uuid]);
        assert!(root.cache().process_pool().contains(&uuid));
    }

    #[test]
    fn test_release_clears_process_pool() {
        let root = Context::new(ActionRegistry::new()).unwrap();
        let cache = Arc::clone(root.cache());
        root.make_value("Table", 1, None).unwrap();
        root.make_value("Table", 2, None).unwrap();
        assert!(root.child().release().is_err());
        assert_eq!(root.release().unwrap(), 2);
        assert!(cache.process_pool().is_empty());
    }

    #[test]
    fn test_add_reference_returns_pool_handle() {
        let root = Context::new(ActionRegistry::new()).unwrap();
        let artifact = Artifact::import_data("Table", json!([3]), None).unwrap();
        let handle = root.add_reference(&artifact).unwrap();

        assert_eq!(handle.uuid(), artifact.uuid());
        assert!(handle.shares_data_with(&artifact));
        let pooled = root.cache().process_pool().load(&artifact.uuid()).unwrap();
        assert!(pooled.shares_data_with(&handle));
        assert_eq!(root.owned(), vec![artifact.uuid()]);
    }

    #[test]
    fn test_add_reference_saves_to_named_pool() {
        let path = std::env::temp_dir().join(format!("memoflow-ctx-{}", Uuid::new_v4()));
        {
            let root = Context::builder(ActionRegistry::new())
                .with_cache_config(CacheConfig::with_named_pool(&path))
                .build()
                .unwrap();
            let artifact = root.make_value("Table", json!({"a": 1}), Some("dict")).unwrap();
            let named = root.cache().named_pool().unwrap();
            assert!(named.contains(&artifact.uuid()).unwrap());
            assert!(named.is_indexed());
        }
        let _ = std::fs::remove_dir_all(&path);
    }
}
