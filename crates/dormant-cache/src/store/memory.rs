use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{RecordMeta, StoreBackend, StoreResult};
use crate::key::SessionKey;

/// In-process backend. Records are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: RwLock<HashMap<SessionKey, (Vec<u8>, DateTime<Utc>)>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl StoreBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn put(&self, key: &SessionKey, bytes: &[u8]) -> StoreResult<()> {
        self.records
            .write()
            .insert(*key, (bytes.to_vec(), Utc::now()));
        Ok(())
    }

    fn get(&self, key: &SessionKey) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.records.read().get(key).map(|(bytes, _)| bytes.clone()))
    }

    fn delete(&self, key: &SessionKey) -> StoreResult<bool> {
        Ok(self.records.write().remove(key).is_some())
    }

    fn contains(&self, key: &SessionKey) -> StoreResult<bool> {
        Ok(self.records.read().contains_key(key))
    }

    fn list(&self) -> StoreResult<Vec<RecordMeta>> {
        Ok(self
            .records
            .read()
            .iter()
            .map(|(key, (bytes, stored_at))| RecordMeta {
                key: *key,
                size: bytes.len() as u64,
                stored_at: *stored_at,
            })
            .collect())
    }
}
