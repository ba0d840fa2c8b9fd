//! The single funnel for all sourced-object mutation.
//!
//! Three entry points, one protocol: derive the id from the source binding,
//! hash the observed bytes, read the latest stored version, compare, and
//! write only when something changed. Unchanged sources are a strict no-op;
//! changed ones append a version; nothing ever rewrites history.
//!
//! Two clients indexing the same source concurrently both pass through this
//! protocol independently. If they observed the same on-disk state, history
//! acquires a redundant but harmless duplicate version; if not, the later
//! transaction wins as latest and both remain recoverable. There is no
//! compare-and-swap — duplicates are cheaper than coordination.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use loupe_core::hash::source_hash;
use loupe_core::ids::ObjectId;
use loupe_core::object::ObjectDocument;
use loupe_core::source::SourceBinding;
use loupe_store::DocumentStore;

use crate::errors::IndexError;

// ─────────────────────────────────────────────────────────────────────────────
// Outcomes
// ─────────────────────────────────────────────────────────────────────────────

/// What an indexing call did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexOutcome {
    /// A new object was created.
    Created,
    /// A new version was appended to an existing object.
    Updated,
    /// The stored state already matched; nothing was written.
    Unchanged,
}

/// Result of an indexing call: the object id and what happened to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Indexed {
    /// The (stable) object id.
    pub id: ObjectId,
    /// What the call did.
    pub outcome: IndexOutcome,
}

// ─────────────────────────────────────────────────────────────────────────────
// Indexer
// ─────────────────────────────────────────────────────────────────────────────

/// Runs the read-hash-compare-write protocol against the store.
///
/// Each operation is atomic from the caller's perspective: either a version
/// is appended (put + awaited) or nothing is. The abort token is checked
/// before every write, so cancellation never leaves a partial state.
#[derive(Clone)]
pub struct Indexer {
    store: Arc<dyn DocumentStore>,
    cancel: CancellationToken,
}

impl Indexer {
    /// Create an indexer over a store.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            cancel: CancellationToken::new(),
        }
    }

    /// Attach the caller's abort signal.
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The store this indexer writes through.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Full index of observed content for a source.
    ///
    /// Creates the object on first encounter, upgrades a discovery stub,
    /// appends a version when the source hash changed, and does nothing at
    /// all when it matches.
    pub async fn index_file(
        &self,
        source: &SourceBinding,
        content: &str,
    ) -> Result<Indexed, IndexError> {
        let incoming_hash = source_hash(content.as_bytes());
        let doc = ObjectDocument::file(
            source.clone(),
            Some(content.to_owned()),
            Some(incoming_hash.clone()),
        )?;
        let id = doc.id.clone();

        let outcome = match self.store.get(&id).await? {
            None => {
                self.commit(&doc).await?;
                IndexOutcome::Created
            }
            Some(existing) if existing.source_hash.as_deref() == Some(incoming_hash.as_str()) => {
                debug!(id = %id, "source unchanged, skipping write");
                IndexOutcome::Unchanged
            }
            // Stub upgrade and content change take the same write path:
            // the envelope is identical, only the payload differs.
            Some(_) => {
                self.commit(&doc).await?;
                IndexOutcome::Updated
            }
        };

        Ok(Indexed { id, outcome })
    }

    /// Record that a source exists without reading it.
    ///
    /// Creates a metadata stub (null content, null source hash) so an agent
    /// can learn about a file from ls/find/grep without paying for a read.
    /// Any existing object, stub or full, is left untouched.
    pub async fn discover_file(&self, source: &SourceBinding) -> Result<Indexed, IndexError> {
        let stub = ObjectDocument::file(source.clone(), None, None)?;
        let id = stub.id.clone();

        if self.store.get(&id).await?.is_some() {
            return Ok(Indexed {
                id,
                outcome: IndexOutcome::Unchanged,
            });
        }

        self.commit(&stub).await?;
        Ok(Indexed {
            id,
            outcome: IndexOutcome::Created,
        })
    }

    /// Record that a source disappeared from disk.
    ///
    /// Appends a tombstone version (null content, null source hash) to the
    /// existing object. Envelope, identity, and history are all preserved;
    /// a later read of the path revives the object under the same id.
    pub async fn index_file_deletion(
        &self,
        source: &SourceBinding,
    ) -> Result<Indexed, IndexError> {
        let tombstone = ObjectDocument::file(source.clone(), None, None)?;
        let id = tombstone.id.clone();

        if self.store.get(&id).await?.is_none() {
            return Err(IndexError::NotFound(id));
        }

        self.commit(&tombstone).await?;
        Ok(Indexed {
            id,
            outcome: IndexOutcome::Updated,
        })
    }

    /// Index a source by reading its canonical path from disk.
    ///
    /// Entry point for tracker callbacks and resume reconciliation: an
    /// existing file is fully indexed; a missing file becomes a tombstone
    /// (when the object exists); any other read failure is surfaced and
    /// nothing is written.
    pub async fn index_source(&self, source: &SourceBinding) -> Result<Indexed, IndexError> {
        match tokio::fs::read_to_string(Path::new(source.path())).await {
            Ok(content) => self.index_file(source, &content).await,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                self.index_file_deletion(source).await
            }
            Err(err) => Err(IndexError::unreadable(source.path(), err)),
        }
    }

    /// Write one version: abort check, put, await durability.
    async fn commit(&self, doc: &ObjectDocument) -> Result<(), IndexError> {
        if self.cancel.is_cancelled() {
            return Err(IndexError::Aborted);
        }
        let tx = self.store.put(doc).await?;
        self.store.await_tx(&tx).await?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use loupe_store::MemoryStore;

    fn setup() -> (Indexer, MemoryStore) {
        let store = MemoryStore::new();
        (Indexer::new(Arc::new(store.clone())), store)
    }

    fn src(path: &str) -> SourceBinding {
        SourceBinding::filesystem("FS1", path)
    }

    // -- index_file --

    #[tokio::test]
    async fn first_index_creates() {
        let (indexer, store) = setup();
        let result = indexer.index_file(&src("/a.ts"), "console.log(1);").await.unwrap();
        assert_eq!(result.outcome, IndexOutcome::Created);
        assert_eq!(store.version_count(&result.id), 1);

        let doc = store.get(&result.id).await.unwrap().unwrap();
        assert_eq!(doc.content.as_deref(), Some("console.log(1);"));
        assert!(doc.source_hash.is_some());
    }

    #[tokio::test]
    async fn reindex_same_bytes_is_noop() {
        let (indexer, store) = setup();
        let first = indexer.index_file(&src("/a.ts"), "body").await.unwrap();
        let second = indexer.index_file(&src("/a.ts"), "body").await.unwrap();

        assert_eq!(second.outcome, IndexOutcome::Unchanged);
        assert_eq!(first.id, second.id);
        assert_eq!(store.version_count(&first.id), 1);
    }

    #[tokio::test]
    async fn changed_bytes_append_version() {
        let (indexer, store) = setup();
        let first = indexer.index_file(&src("/a.ts"), "v1").await.unwrap();
        let second = indexer.index_file(&src("/a.ts"), "v2").await.unwrap();

        assert_eq!(second.outcome, IndexOutcome::Updated);
        assert_eq!(first.id, second.id);
        assert_eq!(store.version_count(&first.id), 2);

        let latest = store.get(&first.id).await.unwrap().unwrap();
        assert_eq!(latest.content.as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn same_binding_converges_on_same_id() {
        let (indexer, _) = setup();
        let a = indexer.index_file(&src("/a.ts"), "x").await.unwrap();
        let b = indexer.index_file(&src("/a.ts"), "x").await.unwrap();
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn different_filesystems_are_different_objects() {
        let (indexer, _) = setup();
        let a = indexer.index_file(&src("/a.ts"), "x").await.unwrap();
        let b = indexer
            .index_file(&SourceBinding::filesystem("FS2", "/a.ts"), "x")
            .await
            .unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(b.outcome, IndexOutcome::Created);
    }

    // -- discover_file --

    #[tokio::test]
    async fn discover_creates_stub() {
        let (indexer, store) = setup();
        let result = indexer.discover_file(&src("/p/x.md")).await.unwrap();
        assert_eq!(result.outcome, IndexOutcome::Created);

        let doc = store.get(&result.id).await.unwrap().unwrap();
        assert!(doc.is_stub());
        assert!(doc.content.is_none());
        assert!(doc.source_hash.is_none());
    }

    #[tokio::test]
    async fn discover_existing_is_noop() {
        let (indexer, store) = setup();
        let first = indexer.index_file(&src("/p/x.md"), "hello").await.unwrap();
        let second = indexer.discover_file(&src("/p/x.md")).await.unwrap();

        assert_eq!(second.outcome, IndexOutcome::Unchanged);
        assert_eq!(store.version_count(&first.id), 1);
        // The full content survives a later discovery.
        let doc = store.get(&first.id).await.unwrap().unwrap();
        assert_eq!(doc.content.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn stub_then_read_upgrades() {
        let (indexer, store) = setup();
        let discovered = indexer.discover_file(&src("/p/x.md")).await.unwrap();
        let read = indexer.index_file(&src("/p/x.md"), "hello").await.unwrap();

        assert_eq!(read.outcome, IndexOutcome::Updated);
        assert_eq!(discovered.id, read.id);
        assert_eq!(store.version_count(&read.id), 2);

        let doc = store.get(&read.id).await.unwrap().unwrap();
        assert_eq!(doc.content.as_deref(), Some("hello"));
        assert!(!doc.is_stub());
    }

    // -- index_file_deletion --

    #[tokio::test]
    async fn deletion_requires_existing_object() {
        let (indexer, _) = setup();
        let err = indexer.index_file_deletion(&src("/a.ts")).await.unwrap_err();
        assert!(matches!(err, IndexError::NotFound(_)));
    }

    #[tokio::test]
    async fn deletion_writes_tombstone_preserving_envelope() {
        let (indexer, store) = setup();
        let created = indexer.index_file(&src("/a.ts"), "v1").await.unwrap();
        let deleted = indexer.index_file_deletion(&src("/a.ts")).await.unwrap();

        assert_eq!(created.id, deleted.id);
        assert_eq!(deleted.outcome, IndexOutcome::Updated);

        let doc = store.get(&created.id).await.unwrap().unwrap();
        assert!(doc.content.is_none());
        assert!(doc.source_hash.is_none());

        // Envelope identical across both versions: same id, same identity hash.
        assert_eq!(doc.id, created.id);
        assert_eq!(doc.identity_hash, doc.id.as_str());
        assert!(doc.source.is_some());
        assert_eq!(store.version_count(&created.id), 2);
    }

    #[tokio::test]
    async fn deletion_then_reread_revives_same_id() {
        let (indexer, store) = setup();
        let created = indexer.index_file(&src("/a.ts"), "v1").await.unwrap();
        let _ = indexer.index_file_deletion(&src("/a.ts")).await.unwrap();
        let revived = indexer.index_file(&src("/a.ts"), "v2").await.unwrap();

        assert_eq!(created.id, revived.id);
        assert_eq!(revived.outcome, IndexOutcome::Updated);
        assert!(store.version_count(&created.id) >= 3);

        let doc = store.get(&created.id).await.unwrap().unwrap();
        assert_eq!(doc.content.as_deref(), Some("v2"));
    }

    // -- index_source --

    #[tokio::test]
    async fn index_source_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.md");
        std::fs::write(&path, "on disk").unwrap();

        let (indexer, store) = setup();
        let binding = SourceBinding::filesystem("FS1", path.to_str().unwrap());
        let result = indexer.index_source(&binding).await.unwrap();

        assert_eq!(result.outcome, IndexOutcome::Created);
        let doc = store.get(&result.id).await.unwrap().unwrap();
        assert_eq!(doc.content.as_deref(), Some("on disk"));
    }

    #[tokio::test]
    async fn index_source_missing_file_tombstones_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.md");
        std::fs::write(&path, "v1").unwrap();

        let (indexer, store) = setup();
        let binding = SourceBinding::filesystem("FS1", path.to_str().unwrap());
        let created = indexer.index_source(&binding).await.unwrap();

        std::fs::remove_file(&path).unwrap();
        let deleted = indexer.index_source(&binding).await.unwrap();

        assert_eq!(created.id, deleted.id);
        assert_eq!(deleted.outcome, IndexOutcome::Updated);
        let doc = store.get(&created.id).await.unwrap().unwrap();
        assert!(doc.content.is_none());
    }

    #[tokio::test]
    async fn index_source_missing_file_without_object_is_not_found() {
        let (indexer, _) = setup();
        let binding = SourceBinding::filesystem("FS1", "/definitely/not/here.md");
        let err = indexer.index_source(&binding).await.unwrap_err();
        assert!(matches!(err, IndexError::NotFound(_)));
    }

    // -- cancellation --

    #[tokio::test]
    async fn cancelled_token_aborts_before_write() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let indexer = Indexer::new(Arc::new(store.clone())).with_cancel_token(cancel);

        let err = indexer.index_file(&src("/a.ts"), "v1").await.unwrap_err();
        assert!(matches!(err, IndexError::Aborted));
        assert_eq!(store.document_count(), 0);
    }

    #[tokio::test]
    async fn cancelled_unchanged_path_still_succeeds() {
        // A no-op has nothing to abort: the outcome is consistent either way.
        let store = MemoryStore::new();
        let indexer = Indexer::new(Arc::new(store.clone()));
        let _ = indexer.index_file(&src("/a.ts"), "v1").await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let cancelled = Indexer::new(Arc::new(store)).with_cancel_token(cancel);
        let result = cancelled.index_file(&src("/a.ts"), "v1").await.unwrap();
        assert_eq!(result.outcome, IndexOutcome::Unchanged);
    }
}
