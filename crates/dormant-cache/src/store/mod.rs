//! Context store: externalization of passivated sessions.
//!
//! The cache is decoupled from storage through two layers:
//!
//! ```text
//! ContextStore               - encode/decode session state, error mapping
//!     └── StoreBackend (trait)   - byte-level records keyed by SessionKey
//!             └── MemoryBackend  - in-process map (tests, ephemeral use)
//!             └── FileBackend    - one file per session, atomic rename
//!             └── SqliteBackend  - one row per session
//! ```
//!
//! Records are a versioned JSON envelope around the serde form of the
//! session state.

mod file;
mod memory;
mod sqlite;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result, StoreError};
use crate::key::SessionKey;

pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

/// Envelope format written by this version.
pub const RECORD_FORMAT: u32 = 1;

/// Result type for backend operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Metadata about one stored record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMeta {
    pub key: SessionKey,
    /// Encoded size in bytes.
    pub size: u64,
    pub stored_at: DateTime<Utc>,
}

/// Trait for storage backends holding passivated sessions.
///
/// Backends deal in opaque bytes; encoding is the [`ContextStore`]'s job.
/// Implementations must be safe to call from many threads at once.
pub trait StoreBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Store `bytes` under `key`, replacing any existing record.
    fn put(&self, key: &SessionKey, bytes: &[u8]) -> StoreResult<()>;

    /// Fetch the record for `key`.
    fn get(&self, key: &SessionKey) -> StoreResult<Option<Vec<u8>>>;

    /// Delete the record for `key`. Returns whether a record existed.
    fn delete(&self, key: &SessionKey) -> StoreResult<bool>;

    /// Whether a record exists for `key`.
    fn contains(&self, key: &SessionKey) -> StoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Metadata for every stored record.
    fn list(&self) -> StoreResult<Vec<RecordMeta>>;
}

#[derive(Serialize)]
struct EnvelopeRef<'a, S> {
    format: u32,
    key: SessionKey,
    passivated_at: DateTime<Utc>,
    state: &'a S,
}

#[derive(Deserialize)]
struct Envelope {
    format: u32,
    key: SessionKey,
    #[allow(dead_code)]
    passivated_at: DateTime<Utc>,
    state: serde_json::Value,
}

/// Passivation target for the cache.
///
/// Cheap to clone; clones share the backend.
#[derive(Clone)]
pub struct ContextStore {
    backend: Arc<dyn StoreBackend>,
}

impl ContextStore {
    /// Wrap a backend.
    pub fn new<B: StoreBackend + 'static>(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    /// Wrap a shared backend.
    pub fn from_shared(backend: Arc<dyn StoreBackend>) -> Self {
        Self { backend }
    }

    /// In-memory store.
    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    pub fn backend(&self) -> &dyn StoreBackend {
        self.backend.as_ref()
    }

    /// Encode and store a session's state.
    pub fn passivate<S: Serialize>(&self, key: &SessionKey, state: &S) -> Result<()> {
        let envelope = EnvelopeRef {
            format: RECORD_FORMAT,
            key: *key,
            passivated_at: Utc::now(),
            state,
        };
        let bytes = serde_json::to_vec(&envelope).map_err(|e| Error::Serialization {
            key: *key,
            message: e.to_string(),
        })?;

        self.backend.put(key, &bytes)?;
        debug!(
            key = %key,
            bytes = bytes.len(),
            backend = self.backend.name(),
            "Session passivated"
        );
        Ok(())
    }

    /// Load and decode a session's state.
    ///
    /// A record that cannot be decoded is deleted before the error is returned.
    pub fn activate<S: DeserializeOwned>(&self, key: &SessionKey) -> Result<S> {
        let bytes = self.backend.get(key)?.ok_or(Error::NotFound(*key))?;

        match decode(key, &bytes) {
            Ok(state) => {
                debug!(key = %key, backend = self.backend.name(), "Session activated");
                Ok(state)
            }
            Err(message) => {
                warn!(key = %key, error = %message, "Discarding undecodable session record");
                self.backend.delete(key)?;
                Err(Error::Deserialization { key: *key, message })
            }
        }
    }

    /// Decode a record's state without activating or deleting it.
    pub fn inspect(&self, key: &SessionKey) -> Result<serde_json::Value> {
        let bytes = self.backend.get(key)?.ok_or(Error::NotFound(*key))?;
        decode(key, &bytes).map_err(|message| Error::Deserialization { key: *key, message })
    }

    /// Delete a record. Removing a missing record is not an error.
    pub fn remove(&self, key: &SessionKey) -> Result<bool> {
        Ok(self.backend.delete(key)?)
    }

    pub fn contains(&self, key: &SessionKey) -> Result<bool> {
        Ok(self.backend.contains(key)?)
    }

    /// Metadata for every passivated session.
    pub fn records(&self) -> Result<Vec<RecordMeta>> {
        Ok(self.backend.list()?)
    }

    /// Delete every record stored before `cutoff`, returning the purged keys.
    pub fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<SessionKey>> {
        let mut purged = Vec::new();
        for meta in self.backend.list()? {
            if meta.stored_at < cutoff && self.backend.delete(&meta.key)? {
                purged.push(meta.key);
            }
        }
        if !purged.is_empty() {
            debug!(count = purged.len(), "Purged expired session records");
        }
        Ok(purged)
    }
}

fn decode<S: DeserializeOwned>(key: &SessionKey, bytes: &[u8]) -> std::result::Result<S, String> {
    let envelope: Envelope = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
    if envelope.format != RECORD_FORMAT {
        return Err(format!(
            "unsupported record format {} (expected {})",
            envelope.format, RECORD_FORMAT
        ));
    }
    if envelope.key != *key {
        return Err(format!("record belongs to session {}", envelope.key));
    }
    serde_json::from_value(envelope.state).map_err(|e| e.to_string())
}
