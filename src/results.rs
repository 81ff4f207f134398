//! Structured action results and their reconstruction from the durable pool.

use indexmap::IndexMap;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::artifact::{Artifact, ElementDescriptor};
use crate::core::errors::{MemoError, Result};
use crate::pool::{CachedOutput, CachedOutputs, NamedPool};
use crate::signature::Signature;
use crate::value::Value;

/// Ordered-by-insertion name to artifact mapping
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultCollection {
    items: IndexMap<String, Artifact>,
}

impl ResultCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, artifact: Artifact) -> Option<Artifact> {
        self.items.insert(name.into(), artifact)
    }

    pub fn with(mut self, name: impl Into<String>, artifact: Artifact) -> Self {
        self.insert(name, artifact);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Artifact> {
        self.items.get(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.items.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &Artifact> {
        self.items.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Artifact)> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl FromIterator<(String, Artifact)> for ResultCollection {
    fn from_iter<I: IntoIterator<Item = (String, Artifact)>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

/// One named output of an action
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Scalar(Artifact),
    Collection(ResultCollection),
}

impl Output {
    pub fn is_collection(&self) -> bool {
        matches!(self, Output::Collection(_))
    }

    pub fn artifacts(&self) -> Vec<&Artifact> {
        match self {
            Output::Scalar(artifact) => vec![artifact],
            Output::Collection(collection) => collection.values().collect(),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Output::Scalar(artifact) => Value::Artifact(artifact.clone()),
            Output::Collection(collection) => Value::Collection(collection.clone()),
        }
    }
}

/// Output name to output, in declaration order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Results {
    outputs: IndexMap<String, Output>,
}

impl Results {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a scalar output
    pub fn with(mut self, name: impl Into<String>, artifact: Artifact) -> Self {
        self.outputs.insert(name.into(), Output::Scalar(artifact));
        self
    }

    /// Add a collection output
    pub fn with_collection(mut self, name: impl Into<String>, collection: ResultCollection) -> Self {
        self.outputs.insert(name.into(), Output::Collection(collection));
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, output: Output) -> Option<Output> {
        self.outputs.insert(name.into(), output)
    }

    pub fn get(&self, name: &str) -> Option<&Output> {
        self.outputs.get(name)
    }

    pub fn artifact(&self, name: &str) -> Option<&Artifact> {
        match self.outputs.get(name)? {
            Output::Scalar(artifact) => Some(artifact),
            Output::Collection(_) => None,
        }
    }

    pub fn collection(&self, name: &str) -> Option<&ResultCollection> {
        match self.outputs.get(name)? {
            Output::Collection(collection) => Some(collection),
            Output::Scalar(_) => None,
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Output> {
        self.outputs.shift_remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.outputs.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Output)> {
        self.outputs.iter()
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Every artifact across all outputs
    pub fn artifacts(&self) -> Vec<&Artifact> {
        self.outputs.values().flat_map(Output::artifacts).collect()
    }
}

/// Rebuild an action's results from an index record.
///
/// Collections are validated for completeness, then loaded in position order.
pub fn reconstruct(
    action: &str,
    signature: &Signature,
    cached: &CachedOutputs,
    pool: &NamedPool,
) -> Result<Results> {
    let mut results = Results::new();

    for spec in signature.outputs() {
        let record = cached.get(&spec.name).ok_or_else(|| MemoError::IncompleteRecord {
            action: action.to_string(),
            output: spec.name.clone(),
        })?;

        let output = match (spec.collection, record) {
            (false, CachedOutput::Scalar(uuid)) => Output::Scalar(pool.load(uuid)?),
            (true, CachedOutput::Collection(elements)) => {
                let order = collection_order(action, &spec.name, elements)?;
                let mut collection = ResultCollection::new();
                for (descriptor, uuid) in order {
                    collection.insert(descriptor.item_name.clone(), pool.load(uuid)?);
                }
                Output::Collection(collection)
            }
            (true, CachedOutput::Scalar(_)) => {
                return Err(MemoError::corrupt_collection(
                    action,
                    &spec.name,
                    "expected a collection record, found a single value",
                ))
            }
            (false, CachedOutput::Collection(_)) => {
                return Err(MemoError::corrupt_collection(
                    action,
                    &spec.name,
                    "expected a single value, found a collection record",
                ))
            }
        };
        results.insert(spec.name.clone(), output);
    }

    debug!("Reconstructed {} outputs for {}", results.len(), action);
    Ok(results)
}

/// Check that all descriptors agree on the total and that exactly that many
/// are present, then sort by position
fn collection_order<'a>(
    action: &str,
    output: &str,
    elements: &'a HashMap<ElementDescriptor, Uuid>,
) -> Result<Vec<(&'a ElementDescriptor, &'a Uuid)>> {
    let mut order: Vec<_> = elements.iter().collect();
    let Some((first, _)) = order.first() else {
        return Err(MemoError::corrupt_collection(action, output, "no elements recorded"));
    };

    let total = first.total;
    if let Some((odd, _)) = order.iter().find(|(d, _)| d.total != total) {
        return Err(MemoError::corrupt_collection(
            action,
            output,
            format!(
                "elements disagree on size: '{}' declares {}, expected {}",
                odd.item_name, odd.total, total
            ),
        ));
    }
    if order.len() != total {
        return Err(MemoError::corrupt_collection(
            action,
            output,
            format!("expected {} elements, found {}", total, order.len()),
        ));
    }

    order.sort_by_key(|(d, _)| d.idx);
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn elements(specs: &[(&str, usize, usize)]) -> HashMap<ElementDescriptor, Uuid> {
        specs
            .iter()
            .map(|(name, idx, total)| (ElementDescriptor::new(*name, *idx, *total), Uuid::new_v4()))
            .collect()
    }

    #[test]
    fn test_collection_order_sorts_by_position() {
        let elems = elements(&[("c", 2, 3), ("a", 0, 3), ("b", 1, 3)]);
        let order = collection_order("p:a", "out", &elems).unwrap();
        let names: Vec<&str> = order.iter().map(|(d, _)| d.item_name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_collection_order_rejects_short_collection() {
        let elems = elements(&[("a", 0, 5), ("b", 1, 5), ("c", 2, 5), ("d", 3, 5)]);
        let err = collection_order("p:a", "out", &elems).unwrap_err();
        assert!(matches!(err, MemoError::CorruptCollection { .. }));
    }

    #[test]
    fn test_collection_order_rejects_disagreeing_totals() {
        let elems = elements(&[("a", 0, 2), ("b", 1, 3)]);
        let err = collection_order("p:a", "out", &elems).unwrap_err();
        assert!(matches!(err, MemoError::CorruptCollection { .. }));
    }

    #[test]
    fn test_results_accessors() {
        let a = Artifact::import_data("Table", 1, None).unwrap();
        let b = Artifact::import_data("Table", 2, None).unwrap();
        let results = Results::new()
            .with("single", a.clone())
            .with_collection("many", ResultCollection::new().with("x", b.clone()));
        assert_eq!(results.artifact("single"), Some(&a));
        assert!(results.artifact("many").is_none());
        assert_eq!(results.collection("many").unwrap().get("x"), Some(&b));
        assert_eq!(results.artifacts().len(), 2);
        let names: Vec<&String> = results.names().collect();
        assert_eq!(names, vec!["single", "many"]);
    }
}
