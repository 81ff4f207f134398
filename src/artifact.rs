//! Stored resources.
//!
//! An [`Artifact`] is immutable and cheap to clone: its data is shared, and a
//! clone is another handle to the same resource. [`Artifact::alias`] creates a
//! new resource (new UUID) backed by the same data, which is how action outputs
//! get their own identity and provenance.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::errors::{MemoError, Result};
use crate::invocation::InvocationKey;

/// Position of one element inside a cached collection output
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementDescriptor {
    pub item_name: String,
    pub idx: usize,
    pub total: usize,
}

impl ElementDescriptor {
    pub fn new(item_name: impl Into<String>, idx: usize, total: usize) -> Self {
        Self {
            item_name: item_name.into(),
            idx,
            total,
        }
    }
}

/// Where an artifact came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Provenance {
    /// Constructed directly from a view
    Import { view_type: Option<String> },
    /// Produced as (part of) an output of an action invocation
    Action {
        invocation: InvocationKey,
        output_name: String,
        element: Option<ElementDescriptor>,
        executor: Option<String>,
        alias_of: Uuid,
    },
}

impl Provenance {
    pub fn invocation(&self) -> Option<&InvocationKey> {
        match self {
            Provenance::Action { invocation, .. } => Some(invocation),
            Provenance::Import { .. } => None,
        }
    }
}

#[derive(Debug, PartialEq)]
struct ArtifactData {
    semantic_type: String,
    format: Option<String>,
    data: serde_json::Value,
}

/// A produced value held by a pool
#[derive(Debug, Clone)]
pub struct Artifact {
    uuid: Uuid,
    data: Arc<ArtifactData>,
    provenance: Arc<Provenance>,
    created_at: DateTime<Utc>,
}

impl PartialEq for Artifact {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid && self.data == other.data
    }
}

impl Artifact {
    /// Construct a new artifact of `semantic_type` from a serializable view
    pub fn import_data<T: Serialize>(
        semantic_type: &str,
        view: T,
        view_type: Option<&str>,
    ) -> Result<Self> {
        if semantic_type.trim().is_empty() {
            return Err(MemoError::invalid_artifact("semantic type cannot be empty"));
        }
        let data = serde_json::to_value(view)?;
        Ok(Self {
            uuid: Uuid::new_v4(),
            data: Arc::new(ArtifactData {
                semantic_type: semantic_type.to_string(),
                format: view_type.map(str::to_string),
                data,
            }),
            provenance: Arc::new(Provenance::Import {
                view_type: view_type.map(str::to_string),
            }),
            created_at: Utc::now(),
        })
    }

    /// A new resource sharing this artifact's data under a fresh UUID
    pub fn alias(&self, provenance: Provenance) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            data: Arc::clone(&self.data),
            provenance: Arc::new(provenance),
            created_at: Utc::now(),
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn semantic_type(&self) -> &str {
        &self.data.semantic_type
    }

    pub fn format(&self) -> Option<&str> {
        self.data.format.as_deref()
    }

    pub fn data(&self) -> &serde_json::Value {
        &self.data.data
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Deserialize the stored data into a view type
    pub fn view<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.data.data.clone())?)
    }

    /// True if both handles share the same underlying data
    pub fn shares_data_with(&self, other: &Artifact) -> bool {
        Arc::ptr_eq(&self.data, &other.data) || self.data == other.data
    }

    pub(crate) fn to_record(&self) -> ArtifactRecord {
        ArtifactRecord {
            uuid: self.uuid,
            semantic_type: self.data.semantic_type.clone(),
            format: self.data.format.clone(),
            data: self.data.data.clone(),
            provenance: (*self.provenance).clone(),
            created_at: self.created_at,
        }
    }

    pub(crate) fn from_record(record: ArtifactRecord) -> Self {
        Self {
            uuid: record.uuid,
            data: Arc::new(ArtifactData {
                semantic_type: record.semantic_type,
                format: record.format,
                data: record.data,
            }),
            provenance: Arc::new(record.provenance),
            created_at: record.created_at,
        }
    }
}

/// Persisted shape of an artifact in the durable pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ArtifactRecord {
    pub uuid: Uuid,
    pub semantic_type: String,
    pub format: Option<String>,
    pub data: serde_json::Value,
    pub provenance: Provenance,
    pub created_at: DateTime<Utc>,
}
