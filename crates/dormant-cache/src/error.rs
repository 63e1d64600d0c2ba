//! Error types for stateful cache operations.

use crate::key::SessionKey;
use crate::lifecycle::{EntryState, Event, Phase};

/// Error type for stateful cache operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No such conversational instance, resident or passivated.
    #[error("Session not found: {0}")]
    NotFound(SessionKey),

    /// The session is already checked out by another caller.
    #[error("Session currently in use: {0}")]
    InUse(SessionKey),

    /// No resident slot could be freed for a create or activation.
    #[error("Cache capacity exhausted: {0}")]
    Capacity(String),

    /// Session state could not be encoded for passivation.
    #[error("Failed to serialize session {key}: {message}")]
    Serialization { key: SessionKey, message: String },

    /// Stored session state could not be decoded; the record has been discarded.
    #[error("Failed to deserialize session {key}: {message}")]
    Deserialization { key: SessionKey, message: String },

    /// A lifecycle hook failed; the session has been force-removed.
    #[error("Lifecycle hook {phase} failed for session {key}: {message}")]
    Lifecycle {
        key: SessionKey,
        phase: Phase,
        message: String,
    },

    /// A state change that the lifecycle does not allow.
    #[error("Illegal transition: {event} from {from}")]
    IllegalTransition { from: EntryState, event: Event },

    /// Error from the context store backend.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors raised by [`StoreBackend`](crate::store::StoreBackend) implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid record name: {0}")]
    InvalidRecord(String),
}

impl Error {
    /// Whether the caller may reasonably retry the operation later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Capacity(_) | Error::InUse(_))
    }
}

/// Result type for stateful cache operations.
pub type Result<T> = std::result::Result<T, Error>;
