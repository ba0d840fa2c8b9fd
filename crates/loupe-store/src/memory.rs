//! In-memory bitemporal substrate.
//!
//! Per-id append-only version vectors guarded by a single `RwLock`. Each
//! accepted write gets a store-wide strictly increasing sequence number and
//! a UTC transaction timestamp; `get_as_of` resolves ties on equal
//! timestamps by sequence. Writes are durable the moment `put` returns, so
//! `await_tx` only validates the handle.
//!
//! The store is deliberately schemaless: it never inspects envelopes or
//! payloads beyond the kind filter in `query`, and it happily appends
//! duplicate-identical versions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use loupe_core::ids::ObjectId;
use loupe_core::object::ObjectDocument;

use crate::client::{DocumentStore, HistoryEntry, Query, TxHandle};
use crate::errors::{Result, StoreError};

/// One stored version of a document.
#[derive(Clone, Debug)]
struct VersionRecord {
    doc: ObjectDocument,
    valid_from: DateTime<Utc>,
    sequence: u64,
    tx: TxHandle,
}

#[derive(Default)]
struct Inner {
    versions: HashMap<ObjectId, Vec<VersionRecord>>,
    indexed_txs: HashSet<String>,
    next_sequence: u64,
}

/// In-memory [`DocumentStore`] implementation.
///
/// Cheap to clone; all clones share the same storage.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct document ids.
    #[must_use]
    pub fn document_count(&self) -> usize {
        self.inner.read().versions.len()
    }

    /// Number of versions stored for an id (0 when unknown).
    #[must_use]
    pub fn version_count(&self, id: &ObjectId) -> usize {
        self.inner
            .read()
            .versions
            .get(id)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn put(&self, doc: &ObjectDocument) -> Result<TxHandle> {
        let tx = TxHandle::from_string(format!("tx_{}", Uuid::now_v7()));
        let mut inner = self.inner.write();
        inner.next_sequence += 1;
        let record = VersionRecord {
            doc: doc.clone(),
            valid_from: Utc::now(),
            sequence: inner.next_sequence,
            tx: tx.clone(),
        };
        inner
            .versions
            .entry(doc.id.clone())
            .or_default()
            .push(record);
        let _ = inner.indexed_txs.insert(tx.as_str().to_owned());
        Ok(tx)
    }

    async fn await_tx(&self, tx: &TxHandle) -> Result<()> {
        if self.inner.read().indexed_txs.contains(tx.as_str()) {
            Ok(())
        } else {
            Err(StoreError::UnknownTx(tx.as_str().to_owned()))
        }
    }

    async fn get(&self, id: &ObjectId) -> Result<Option<ObjectDocument>> {
        Ok(self
            .inner
            .read()
            .versions
            .get(id)
            .and_then(|v| v.last())
            .map(|r| r.doc.clone()))
    }

    async fn get_as_of(
        &self,
        id: &ObjectId,
        as_of: DateTime<Utc>,
    ) -> Result<Option<ObjectDocument>> {
        Ok(self.inner.read().versions.get(id).and_then(|versions| {
            versions
                .iter()
                .filter(|r| r.valid_from <= as_of)
                .max_by_key(|r| r.sequence)
                .map(|r| r.doc.clone())
        }))
    }

    async fn history(&self, id: &ObjectId) -> Result<Vec<HistoryEntry>> {
        let inner = self.inner.read();
        let versions = inner
            .versions
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.as_str().to_owned()))?;
        Ok(versions
            .iter()
            .map(|r| HistoryEntry {
                valid_from: r.valid_from.to_rfc3339(),
                sequence: r.sequence,
                content_hash: r.doc.content_hash.clone(),
                tx: r.tx.clone(),
            })
            .collect())
    }

    async fn query(&self, q: &Query) -> Result<Vec<ObjectDocument>> {
        let inner = self.inner.read();
        let mut out = Vec::new();
        for id in &q.ids {
            let Some(record) = inner.versions.get(id).and_then(|v| v.last()) else {
                continue;
            };
            if let Some(kind) = q.kind {
                if record.doc.kind() != kind {
                    continue;
                }
            }
            out.push(record.doc.clone());
        }
        Ok(out)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
