//! Store error hierarchy.

use thiserror::Error;

/// Convenience alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by [`crate::DocumentStore`] implementations.
///
/// Absent documents are not errors: `get` returns `Ok(None)` and callers
/// branch on it. [`StoreError::NotFound`] is reserved for operations that
/// require the id to exist (history of an unknown id, awaiting an unknown
/// transaction).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The referenced document id is not in the store.
    #[error("document not found: {0}")]
    NotFound(String),

    /// The transaction handle is unknown to the store.
    #[error("unknown transaction: {0}")]
    UnknownTx(String),

    /// The store could not serve the request. Retries are the caller's
    /// responsibility; no in-memory state changed.
    #[error("store unavailable: {message}")]
    Unavailable {
        /// Human-readable description of the failure.
        message: String,
        /// Original cause.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A document could not be serialized or deserialized.
    #[error("invalid document: {0}")]
    InvalidDocument(String),
}

impl StoreError {
    /// Create an `Unavailable` error from a message.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
            source: None,
        }
    }

    /// Set the error cause.
    #[must_use]
    pub fn with_source(self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        match self {
            Self::Unavailable { message, .. } => Self::Unavailable {
                message,
                source: Some(Box::new(source)),
            },
            other => other,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidDocument(err.to_string())
    }
}
