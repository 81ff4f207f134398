use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::artifact::Artifact;

/// Ephemeral, per-run pool. Always present.
#[derive(Debug, Default, Clone)]
pub struct ProcessPool {
    data: Arc<DashMap<Uuid, Artifact>>,
}

impl ProcessPool {
    pub fn new() -> Self {
        Self {
            data: Arc::new(DashMap::new()),
        }
    }

    /// Store an artifact and return the pool's handle to it. The handle
    /// shares the artifact's data and UUID.
    pub fn save(&self, artifact: &Artifact) -> Artifact {
        let handle = artifact.clone();
        self.data.insert(artifact.uuid(), artifact.clone());
        handle
    }

    pub fn load(&self, uuid: &Uuid) -> Option<Artifact> {
        self.data.get(uuid).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, uuid: &Uuid) -> bool {
        self.data.contains_key(uuid)
    }

    pub fn remove(&self, uuid: &Uuid) -> Option<Artifact> {
        self.data.remove(uuid).map(|(_, artifact)| artifact)
    }

    pub fn uuids(&self) -> Vec<Uuid> {
        self.data.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&self) {
        self.data.clear();
    }
}
