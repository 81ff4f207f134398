//! Registry for actions, grouped by namespace.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::context::Context;
use crate::core::errors::{MemoError, Result};
use crate::results::Results;
use crate::signature::{Inputs, Signature};

/// A named, signature-typed unit of computation.
///
/// `execute` receives a child context scoped to this one invocation. Values it
/// creates through [`Context::make_value`] are owned by that scope; nested
/// calls go through [`Context::get_action`].
#[async_trait]
pub trait Action: Send + Sync {
    /// Get the name of this action
    fn name(&self) -> &str;

    /// Declared parameters and outputs
    fn signature(&self) -> &Signature;

    fn description(&self) -> Option<&str> {
        None
    }

    /// Execute the action
    async fn execute(&self, ctx: &Context, inputs: &Inputs) -> anyhow::Result<Results>;
}

/// Namespaces use dashes; callers may spell them with underscores
pub fn normalize_namespace(namespace: &str) -> String {
    namespace.replace('_', "-")
}

/// Qualified `namespace:action` name used in invocation keys
pub fn qualified_name(namespace: &str, action: &str) -> String {
    format!("{}:{}", normalize_namespace(namespace), action)
}

type Namespace = HashMap<String, Arc<dyn Action>>;

/// Registry for actions
#[derive(Clone, Default)]
pub struct ActionRegistry {
    namespaces: Arc<RwLock<HashMap<String, Namespace>>>,
}

impl ActionRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action under a namespace
    pub fn register(&self, namespace: &str, action: Arc<dyn Action>) {
        let mut namespaces = self.namespaces.write();
        namespaces
            .entry(normalize_namespace(namespace))
            .or_default()
            .insert(action.name().to_string(), action);
    }

    /// Resolve an action by namespace and name
    pub fn lookup(&self, namespace: &str, name: &str) -> Result<Arc<dyn Action>> {
        let namespace = normalize_namespace(namespace);
        let namespaces = self.namespaces.read();
        let actions = namespaces
            .get(&namespace)
            .ok_or_else(|| MemoError::namespace_not_found(namespace.clone()))?;
        actions
            .get(name)
            .cloned()
            .ok_or_else(|| MemoError::action_not_found(namespace, name))
    }

    /// Check if an action is registered
    pub fn contains(&self, namespace: &str, name: &str) -> bool {
        self.lookup(namespace, name).is_ok()
    }

    /// List all registered namespaces
    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.namespaces.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// List the actions registered under a namespace
    pub fn actions(&self, namespace: &str) -> Vec<String> {
        let namespaces = self.namespaces.read();
        let mut names: Vec<String> = namespaces
            .get(&normalize_namespace(namespace))
            .map(|actions| actions.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop {
        signature: Signature,
    }

    #[async_trait]
    impl Action for Noop {
        fn name(&self) -> &str {
            "noop"
        }

        fn signature(&self) -> &Signature {
            &self.signature
        }

        async fn execute(&self, _ctx: &Context, _inputs: &Inputs) -> anyhow::Result<Results> {
            Ok(Results::new())
        }
    }

    fn registry() -> ActionRegistry {
        let registry = ActionRegistry::new();
        registry.register(
            "dummy_plugin",
            Arc::new(Noop {
                signature: Signature::new(),
            }),
        );
        registry
    }

    #[test]
    fn test_lookup_normalizes_namespace() {
        let registry = registry();
        assert!(registry.lookup("dummy-plugin", "noop").is_ok());
        assert!(registry.lookup("dummy_plugin", "noop").is_ok());
        assert_eq!(registry.namespaces(), vec!["dummy-plugin".to_string()]);
        assert_eq!(registry.actions("dummy_plugin"), vec!["noop".to_string()]);
    }

    #[test]
    fn test_lookup_errors() {
        let registry = registry();
        assert!(matches!(
            registry.lookup("missing", "noop"),
            Err(MemoError::NamespaceNotFound { .. })
        ));
        assert!(matches!(
            registry.lookup("dummy-plugin", "missing"),
            Err(MemoError::ActionNotFound { .. })
        ));
    }

    #[test]
    fn test_qualified_name() {
        assert_eq!(qualified_name("dummy_plugin", "split"), "dummy-plugin:split");
    }
}
