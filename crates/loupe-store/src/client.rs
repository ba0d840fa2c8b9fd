//! The `DocumentStore` trait: the only seam between the core and storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use loupe_core::ids::ObjectId;
use loupe_core::object::{ObjectDocument, ObjectKind};

use crate::errors::Result;

// ─────────────────────────────────────────────────────────────────────────────
// Transaction handle
// ─────────────────────────────────────────────────────────────────────────────

/// Opaque handle returned by [`DocumentStore::put`].
///
/// `put` followed by [`DocumentStore::await_tx`] is how the core obtains
/// read-after-write consistency.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHandle(String);

impl TxHandle {
    /// Wrap a store-assigned transaction identifier.
    #[must_use]
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    /// The raw transaction identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Query
// ─────────────────────────────────────────────────────────────────────────────

/// A declarative read over document fields.
///
/// Supports the shapes the core actually issues: batch-fetch by id list
/// (session resume) with an optional kind filter.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Query {
    /// Ids to fetch. Order of results follows this list; absent ids are skipped.
    pub ids: Vec<ObjectId>,
    /// Restrict results to one object kind.
    pub kind: Option<ObjectKind>,
}

impl Query {
    /// Fetch the latest version of each listed id.
    #[must_use]
    pub fn by_ids<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = ObjectId>,
    {
        Self {
            ids: ids.into_iter().collect(),
            kind: None,
        }
    }

    /// Restrict the query to one kind.
    #[must_use]
    pub fn with_kind(mut self, kind: ObjectKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// History
// ─────────────────────────────────────────────────────────────────────────────

/// One version in a document's history, oldest first.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Transaction time the version became valid (RFC 3339).
    pub valid_from: String,
    /// Strictly increasing store-wide sequence; breaks timestamp ties.
    pub sequence: u64,
    /// Content hash of the version, when the document carried one.
    pub content_hash: Option<String>,
    /// Handle of the transaction that wrote the version.
    pub tx: TxHandle,
}

// ─────────────────────────────────────────────────────────────────────────────
// DocumentStore
// ─────────────────────────────────────────────────────────────────────────────

/// A bitemporal document store, accessed by document id.
///
/// Every write appends a new temporal version at the current transaction
/// time; prior versions remain queryable by timestamp. The store never
/// enforces a schema and never coordinates concurrent writers — conflicting
/// writes on the same id become separate versions, serialized at the
/// store's transaction layer.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Submit a document write keyed by its id.
    async fn put(&self, doc: &ObjectDocument) -> Result<TxHandle>;

    /// Block until the given write is durably indexed.
    async fn await_tx(&self, tx: &TxHandle) -> Result<()>;

    /// Latest version as-of now, or `None`.
    async fn get(&self, id: &ObjectId) -> Result<Option<ObjectDocument>>;

    /// The version valid at the given transaction time, or `None`.
    async fn get_as_of(
        &self,
        id: &ObjectId,
        as_of: DateTime<Utc>,
    ) -> Result<Option<ObjectDocument>>;

    /// Ordered version history of a document, oldest first.
    ///
    /// Errors with [`crate::StoreError::NotFound`] for an unknown id.
    async fn history(&self, id: &ObjectId) -> Result<Vec<HistoryEntry>>;

    /// Declarative batch read; see [`Query`].
    async fn query(&self, q: &Query) -> Result<Vec<ObjectDocument>>;
}
