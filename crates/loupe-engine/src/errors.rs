//! Engine error hierarchy.
//!
//! Errors are values: every public operation returns `Result`, nothing
//! panics out of the engine, and nothing is recovered by silent retry.
//! Messages for the agent-facing failures keep their exact wording
//! (`"object is locked: <id>"`, `"Content unavailable"`) because hosts
//! surface them verbatim.

use thiserror::Error;

use loupe_core::ids::{ObjectId, SessionId};
use loupe_store::StoreError;

// ─────────────────────────────────────────────────────────────────────────────
// IndexError
// ─────────────────────────────────────────────────────────────────────────────

/// Failures of the indexing protocol.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The source bytes could not be read. Nothing was written; a
    /// previously indexed object remains at its latest version.
    #[error("source unreadable: {path}: {message}")]
    SourceUnreadable {
        /// Canonical path of the source.
        path: String,
        /// Human-readable cause.
        message: String,
        /// Original I/O error.
        #[source]
        source: Option<std::io::Error>,
    },

    /// Deletion was indexed for an object that was never created.
    #[error("object not found: {0}")]
    NotFound(ObjectId),

    /// Store I/O failed; no state changed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The caller's abort signal fired before the write committed.
    #[error("operation aborted")]
    Aborted,

    /// A document failed to serialize.
    #[error("invalid document: {0}")]
    Invalid(String),
}

impl IndexError {
    /// Build a `SourceUnreadable` from an I/O error at a path.
    #[must_use]
    pub fn unreadable(path: impl Into<String>, err: std::io::Error) -> Self {
        Self::SourceUnreadable {
            path: path.into(),
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for IndexError {
    fn from(err: serde_json::Error) -> Self {
        Self::Invalid(err.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SessionError
// ─────────────────────────────────────────────────────────────────────────────

/// Failures of session-engine operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No session document exists under the id.
    #[error("session not found: {0}")]
    NotFound(SessionId),

    /// A session document already exists under the id.
    #[error("session already exists: {0}")]
    AlreadyExists(SessionId),

    /// Deactivation (or activation) of a locked object was attempted.
    #[error("object is locked: {0}")]
    Locked(ObjectId),

    /// Activation of an object with null content (stub or tombstone).
    #[error("Content unavailable")]
    ContentUnavailable,

    /// The object is not in the session index.
    #[error("object not in session index: {0}")]
    NotInIndex(ObjectId),

    /// The object is not in the metadata pool.
    #[error("object not in metadata pool: {0}")]
    NotInPool(ObjectId),

    /// The object is not in the active set.
    #[error("object not active: {0}")]
    NotActive(ObjectId),

    /// Infrastructure objects never join the content sets.
    #[error("infrastructure object cannot join content sets: {0}")]
    Infrastructure(ObjectId),

    /// An id referenced by the session resolves to nothing in the store.
    #[error("unknown object: {0}")]
    UnknownObject(ObjectId),

    /// Store I/O failed; no in-memory state changed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The caller's abort signal fired before the write committed.
    #[error("operation aborted")]
    Aborted,

    /// A session or referenced document has an unusable shape.
    #[error("invalid session document: {0}")]
    Invalid(String),
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Invalid(err.to_string())
    }
}

impl From<IndexError> for SessionError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::Store(e) => Self::Store(e),
            IndexError::Aborted => Self::Aborted,
            other => Self::Invalid(other.to_string()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// AssembleError
// ─────────────────────────────────────────────────────────────────────────────

/// Failures of context assembly.
#[derive(Debug, Error)]
pub enum AssembleError {
    /// A session-engine mutation failed while absorbing events.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Store I/O failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A document failed to serialize.
    #[error("invalid document: {0}")]
    Invalid(String),
}

impl From<serde_json::Error> for AssembleError {
    fn from(err: serde_json::Error) -> Self {
        Self::Invalid(err.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
