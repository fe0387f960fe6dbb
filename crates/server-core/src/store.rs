//! Target persistence seam.
//!
//! Targets are always resolved for a `(target, owner)` pair; a target id
//! that exists but belongs to someone else is indistinguishable from one
//! that does not exist. The in-memory implementation backs the binary
//! (with optional JSON persistence) and the tests; a database-backed
//! implementation plugs in behind the same trait.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sg_types::TargetRecord;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StoreError {
    /// No such target for this owner. Deliberately does not distinguish
    /// "absent" from "owned by someone else".
    #[error("target {id} not found")]
    NotFound { id: i64 },

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Resolve a target by id, scoped to its owner.
    async fn fetch(&self, target_id: i64, owner_id: i64) -> Result<TargetRecord, StoreError>;

    /// Record a confirmed host fingerprint for a target. Overwrites any
    /// previous value; callers decide whether an overwrite is noteworthy.
    async fn store_fingerprint(
        &self,
        target_id: i64,
        owner_id: i64,
        fingerprint: &str,
    ) -> Result<(), StoreError>;
}

#[derive(Serialize, Deserialize)]
struct StoredTarget {
    owner_id: i64,
    #[serde(flatten)]
    record: TargetRecord,
}

/// Mutex-guarded map of targets, optionally mirrored to a JSON file.
pub struct MemoryTargetStore {
    inner: Mutex<HashMap<(i64, i64), TargetRecord>>,
    path: Option<PathBuf>,
}

impl MemoryTargetStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            path: None,
        }
    }

    /// Load targets from a JSON file, creating an empty store if the file
    /// does not exist yet. Changes are written back to the same file.
    pub fn load(path: PathBuf) -> Result<Self, StoreError> {
        let mut map = HashMap::new();
        match std::fs::read_to_string(&path) {
            Ok(raw) => {
                let stored: Vec<StoredTarget> = serde_json::from_str(&raw)?;
                for entry in stored {
                    map.insert((entry.record.id, entry.owner_id), entry.record);
                }
                debug!(path = %path.display(), targets = map.len(), "loaded target store");
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        Ok(Self {
            inner: Mutex::new(map),
            path: Some(path),
        })
    }

    pub fn insert(&self, owner_id: i64, record: TargetRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("target store poisoned");
        inner.insert((record.id, owner_id), record);
        self.persist(&inner)
    }

    fn persist(&self, inner: &HashMap<(i64, i64), TargetRecord>) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut stored: Vec<StoredTarget> = inner
            .iter()
            .map(|(&(_, owner_id), record)| StoredTarget {
                owner_id,
                record: record.clone(),
            })
            .collect();
        stored.sort_by_key(|s| (s.owner_id, s.record.id));
        std::fs::write(path, serde_json::to_vec_pretty(&stored)?)?;
        Ok(())
    }
}

impl Default for MemoryTargetStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TargetStore for MemoryTargetStore {
    async fn fetch(&self, target_id: i64, owner_id: i64) -> Result<TargetRecord, StoreError> {
        self.inner
            .lock()
            .expect("target store poisoned")
            .get(&(target_id, owner_id))
            .cloned()
            .ok_or(StoreError::NotFound { id: target_id })
    }

    async fn store_fingerprint(
        &self,
        target_id: i64,
        owner_id: i64,
        fingerprint: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("target store poisoned");
        let record = inner
            .get_mut(&(target_id, owner_id))
            .ok_or(StoreError::NotFound { id: target_id })?;
        record.host_fingerprint = Some(fingerprint.to_string());
        self.persist(&inner)
    }
}
