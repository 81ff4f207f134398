//! Durable pool backed by sled.
//!
//! Artifact records are stored as zstd-compressed JSON in the `artifacts`
//! tree, keyed by UUID. The invocation-key index is rebuilt from those records
//! by [`NamedPool::create_index`], so it reflects every run that ever wrote to
//! the pool.

use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::index::{CacheIndex, CachedOutput, CachedOutputs};
use crate::artifact::{Artifact, ArtifactRecord};
use crate::core::errors::{MemoError, Result};
use crate::invocation::InvocationKey;

const ARTIFACTS_TREE: &str = "artifacts";

pub struct NamedPool {
    path: PathBuf,
    db: sled::Db,
    artifacts: sled::Tree,
    compression_level: i32,
    index: RwLock<CacheIndex>,
    indexed: AtomicBool,
}

impl std::fmt::Debug for NamedPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedPool")
            .field("path", &self.path)
            .field("indexed", &self.is_indexed())
            .finish()
    }
}

impl NamedPool {
    /// Open (or create) a durable pool at `path`
    pub fn open(path: impl AsRef<Path>, compression_level: i32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let db = sled::open(&path)?;
        let artifacts = db.open_tree(ARTIFACTS_TREE)?;
        info!("Opened named pool at {} ({} records)", path.display(), artifacts.len());
        Ok(Self {
            path,
            db,
            artifacts,
            compression_level,
            index: RwLock::new(CacheIndex::new()),
            indexed: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist an artifact. Once the pool is indexed, action outputs are
    /// indexed as they are saved.
    pub fn save(&self, artifact: &Artifact) -> Result<()> {
        let serialized = serde_json::to_vec(&artifact.to_record())?;
        let compressed = zstd::encode_all(&*serialized, self.compression_level)
            .map_err(|e| MemoError::io("compress artifact record", e))?;
        self.artifacts.insert(artifact.uuid().as_bytes(), compressed)?;

        if self.is_indexed() && self.index.write().insert(artifact) {
            if let Some(key) = artifact.provenance().invocation() {
                debug!("Indexed {} under {}", artifact.uuid(), key);
            }
        }
        Ok(())
    }

    /// Load an artifact; a missing record is `MissingStorage`
    pub fn load(&self, uuid: &Uuid) -> Result<Artifact> {
        let compressed = self
            .artifacts
            .get(uuid.as_bytes())?
            .ok_or(MemoError::MissingStorage { uuid: *uuid })?;
        Self::decode(&compressed).map(Artifact::from_record)
    }

    pub fn contains(&self, uuid: &Uuid) -> Result<bool> {
        Ok(self.artifacts.contains_key(uuid.as_bytes())?)
    }

    /// Drop stored data without touching the index
    pub fn remove(&self, uuid: &Uuid) -> Result<bool> {
        Ok(self.artifacts.remove(uuid.as_bytes())?.is_some())
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    pub fn is_indexed(&self) -> bool {
        self.indexed.load(Ordering::Acquire)
    }

    /// Build the invocation-key index from stored records. Later calls are
    /// no-ops; returns whether this call built it.
    pub fn create_index(&self) -> Result<bool> {
        if self.is_indexed() {
            debug!("Named pool at {} is already indexed", self.path.display());
            return Ok(false);
        }

        let mut index = CacheIndex::new();
        let mut skipped = 0usize;
        for entry in self.artifacts.iter() {
            let (key, value) = entry?;
            match Self::decode(&value) {
                Ok(record) => {
                    index.insert(&Artifact::from_record(record));
                }
                Err(e) => {
                    skipped += 1;
                    warn!("Skipping unreadable record {:?} while indexing: {}", Uuid::from_slice(&key).ok(), e);
                }
            }
        }

        info!(
            "Indexed named pool at {}: {} invocations, {} unreadable records",
            self.path.display(),
            index.len(),
            skipped
        );
        *self.index.write() = index;
        self.indexed.store(true, Ordering::Release);
        Ok(true)
    }

    /// Cached outputs for an invocation, if indexed
    pub fn lookup(&self, key: &InvocationKey) -> Option<CachedOutputs> {
        self.index.read().get(key).cloned()
    }

    pub fn index_contains(&self, key: &InvocationKey) -> bool {
        self.index.read().contains(key)
    }

    pub fn index_len(&self) -> usize {
        self.index.read().len()
    }

    /// Drop an invocation from the index and delete the records it still
    /// points at, so a later index build cannot bring it back. Returns how
    /// many records were deleted.
    pub fn forget(&self, key: &InvocationKey) -> Result<usize> {
        let Some(outputs) = self.index.write().remove(key) else {
            return Ok(0);
        };
        let mut removed = 0;
        for uuid in outputs.values().flat_map(CachedOutput::uuids) {
            if self.artifacts.remove(uuid.as_bytes())?.is_some() {
                removed += 1;
            }
        }
        debug!("Forgot {}: deleted {} records", key, removed);
        Ok(removed)
    }

    fn decode(compressed: &[u8]) -> Result<ArtifactRecord> {
        let bytes = zstd::decode_all(compressed)
            .map_err(|e| MemoError::io("decompress artifact record", e))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::Provenance;
    use serde_json::json;

    fn temp_pool_path() -> PathBuf {
        std::env::temp_dir().join(format!("memoflow-named-{}", Uuid::new_v4()))
    }

    fn action_output(key: &InvocationKey) -> Artifact {
        let base = Artifact::import_data("Table", json!([1, 2, 3]), None).unwrap();
        base.alias(Provenance::Action {
            invocation: key.clone(),
            output_name: "out".into(),
            element: None,
            executor: None,
            alias_of: base.uuid(),
        })
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_pool_path();
        {
            let pool = NamedPool::open(&path, 3).unwrap();
            let artifact = Artifact::import_data("Table", json!({"rows": 2}), Some("dict")).unwrap();
            pool.save(&artifact).unwrap();
            assert!(pool.contains(&artifact.uuid()).unwrap());

            let loaded = pool.load(&artifact.uuid()).unwrap();
            assert_eq!(loaded, artifact);
            assert_eq!(loaded.format(), Some("dict"));

            assert!(pool.remove(&artifact.uuid()).unwrap());
            let err = pool.load(&artifact.uuid()).unwrap_err();
            assert!(matches!(err, MemoError::MissingStorage { .. }));
        }
        let _ = std::fs::remove_dir_all(&path);
    }

    #[test]
    fn test_index_is_built_once() {
        let path = temp_pool_path();
        {
            let pool = NamedPool::open(&path, 3).unwrap();
            let key = InvocationKey::new("dummy-plugin:identity", Vec::new());
            pool.save(&action_output(&key)).unwrap();
            assert!(!pool.index_contains(&key));

            assert!(pool.create_index().unwrap());
            assert!(!pool.create_index().unwrap());
            assert_eq!(pool.index_len(), 1);
            assert!(pool.lookup(&key).is_some());
        }
        let _ = std::fs::remove_dir_all(&path);
    }

    #[test]
    fn test_saves_after_indexing_are_indexed() {
        let path = temp_pool_path();
        {
            let pool = NamedPool::open(&path, 3).unwrap();
            pool.create_index().unwrap();
            let key = InvocationKey::new("dummy-plugin:identity", Vec::new());
            pool.save(&action_output(&key)).unwrap();
            assert!(pool.index_contains(&key));
            assert_eq!(pool.forget(&key).unwrap(), 1);
            assert!(!pool.index_contains(&key));
            assert_eq!(pool.forget(&key).unwrap(), 0);
        }
        let _ = std::fs::remove_dir_all(&path);
    }

    #[test]
    fn test_forgotten_invocation_stays_gone_after_reopen() {
        let path = temp_pool_path();
        let key = InvocationKey::new("dummy-plugin:identity", Vec::new());
        {
            let pool = NamedPool::open(&path, 3).unwrap();
            pool.create_index().unwrap();
            let kept = Artifact::import_data("Table", json!(0), None).unwrap();
            pool.save(&kept).unwrap();
            pool.save(&action_output(&key)).unwrap();
            assert_eq!(pool.forget(&key).unwrap(), 1);
            assert_eq!(pool.len(), 1);
            assert!(pool.contains(&kept.uuid()).unwrap());
            pool.flush().unwrap();
        }
        {
            let pool = NamedPool::open(&path, 3).unwrap();
            pool.create_index().unwrap();
            assert!(!pool.index_contains(&key));
        }
        let _ = std::fs::remove_dir_all(&path);
    }

    #[test]
    fn test_index_survives_reopen() {
        let path = temp_pool_path();
        let key = InvocationKey::new("dummy-plugin:identity", Vec::new());
        {
            let pool = NamedPool::open(&path, 3).unwrap();
            pool.save(&action_output(&key)).unwrap();
            pool.flush().unwrap();
        }
        {
            let pool = NamedPool::open(&path, 3).unwrap();
            pool.create_index().unwrap();
            assert!(pool.index_contains(&key));
        }
        let _ = std::fs::remove_dir_all(&path);
    }
}
