//! Invocation-key index over the durable pool.

use std::collections::HashMap;
use uuid::Uuid;

use crate::artifact::{Artifact, ElementDescriptor, Provenance};
use crate::invocation::InvocationKey;

/// What the index holds for one output of one invocation
#[derive(Debug, Clone, PartialEq)]
pub enum CachedOutput {
    Scalar(Uuid),
    /// Unordered element descriptors; order is restored on reconstruction
    Collection(HashMap<ElementDescriptor, Uuid>),
}

impl CachedOutput {
    /// Every record this output points at
    pub fn uuids(&self) -> Vec<Uuid> {
        match self {
            CachedOutput::Scalar(uuid) => vec![*uuid],
            CachedOutput::Collection(elements) => elements.values().copied().collect(),
        }
    }
}

/// Output name to cached output for one invocation
pub type CachedOutputs = HashMap<String, CachedOutput>;

#[derive(Debug, Default)]
pub struct CacheIndex {
    entries: HashMap<InvocationKey, CachedOutputs>,
}

impl CacheIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an artifact if it carries action provenance. Returns whether it did.
    pub fn insert(&mut self, artifact: &Artifact) -> bool {
        let Provenance::Action {
            invocation,
            output_name,
            element,
            ..
        } = artifact.provenance()
        else {
            return false;
        };

        let outputs = self.entries.entry(invocation.clone()).or_default();
        match element {
            None => {
                outputs.insert(output_name.clone(), CachedOutput::Scalar(artifact.uuid()));
            }
            Some(descriptor) => {
                let entry = outputs
                    .entry(output_name.clone())
                    .or_insert_with(|| CachedOutput::Collection(HashMap::new()));
                match entry {
                    CachedOutput::Collection(elements) => {
                        elements.insert(descriptor.clone(), artifact.uuid());
                    }
                    CachedOutput::Scalar(_) => {
                        // A newer collection result replaces an older scalar one
                        let mut elements = HashMap::new();
                        elements.insert(descriptor.clone(), artifact.uuid());
                        *entry = CachedOutput::Collection(elements);
                    }
                }
            }
        }
        true
    }

    pub fn get(&self, key: &InvocationKey) -> Option<&CachedOutputs> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &InvocationKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &InvocationKey) -> Option<CachedOutputs> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
