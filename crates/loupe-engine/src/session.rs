//! The three-tier session state machine.
//!
//! A session tracks every object it has ever encountered in the
//! **session index** (append-only), exposes a subset to the agent as
//! compact metadata lines (the **metadata pool**), and loads the full
//! content of a further subset into the render (the **active set**). The
//! **pinned set** marks pool members exempt from auto-collapse. At every
//! observable moment `active ⊆ pool ⊆ index` and `pinned ⊆ pool`.
//!
//! Every state change writes a new version of the session document and
//! awaits durability *before* mutating the in-memory sets, so an abort
//! either leaves both the store and memory untouched or commits fully.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use loupe_core::ids::{ObjectId, SessionId};
use loupe_core::object::{
    session_object_id, ChatPayload, ChatTurn, ObjectDocument, ObjectKind, Payload,
    SessionPayload,
};
use loupe_fs::FsResolver;
use loupe_store::{DocumentStore, Query};

use crate::constants::{RECENT_TOOLCALLS_PER_TURN, RECENT_TURNS_WINDOW};
use crate::errors::SessionError;
use crate::indexer::{IndexOutcome, Indexer};
use crate::tracker::TrackerSupervisor;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Auto-collapse window parameters.
///
/// After each absorbed tool-call result, the engine keeps active only the
/// last `recent_toolcalls_per_turn` tool calls from each of the last
/// `recent_turns_window` turns. Files and pinned objects are exempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AutoCollapseConfig {
    /// Tool calls kept per covered turn.
    pub recent_toolcalls_per_turn: usize,
    /// Turns covered by the window.
    pub recent_turns_window: usize,
}

impl Default for AutoCollapseConfig {
    fn default() -> Self {
        Self {
            recent_toolcalls_per_turn: RECENT_TOOLCALLS_PER_TURN,
            recent_turns_window: RECENT_TURNS_WINDOW,
        }
    }
}

/// Candidate tier state built by an operation before it commits.
#[derive(Clone, Debug)]
struct TierSets {
    index: BTreeSet<ObjectId>,
    pool: BTreeSet<ObjectId>,
    active: BTreeSet<ObjectId>,
    pinned: BTreeSet<ObjectId>,
}

// ─────────────────────────────────────────────────────────────────────────────
// SessionEngine
// ─────────────────────────────────────────────────────────────────────────────

/// Owns one session's tier sets and metadata cache.
///
/// Single-writer: nothing outside this value mutates the sets, and no
/// mutation survives a failed store write.
pub struct SessionEngine {
    store: Arc<dyn DocumentStore>,
    cancel: CancellationToken,
    session_id: SessionId,
    chat_ref: ObjectId,
    system_prompt_ref: ObjectId,
    session_index: BTreeSet<ObjectId>,
    metadata_pool: BTreeSet<ObjectId>,
    active_set: BTreeSet<ObjectId>,
    pinned_set: BTreeSet<ObjectId>,
    metadata_cache: HashMap<ObjectId, ObjectDocument>,
    collapse: AutoCollapseConfig,
}

impl std::fmt::Debug for SessionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEngine")
            .field("session_id", &self.session_id)
            .field("chat_ref", &self.chat_ref)
            .field("system_prompt_ref", &self.system_prompt_ref)
            .field("session_index", &self.session_index)
            .field("metadata_pool", &self.metadata_pool)
            .field("active_set", &self.active_set)
            .field("pinned_set", &self.pinned_set)
            .field("collapse", &self.collapse)
            .finish()
    }
}

impl SessionEngine {
    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Create a fresh session: chat, system prompt, and session documents
    /// are written, all tier sets start empty.
    pub async fn create(
        store: Arc<dyn DocumentStore>,
        session_id: SessionId,
        system_prompt: &str,
        collapse: AutoCollapseConfig,
    ) -> Result<Self, SessionError> {
        let doc_id = session_object_id(&session_id);
        if store.get(&doc_id).await?.is_some() {
            return Err(SessionError::AlreadyExists(session_id));
        }

        let chat = ObjectDocument::chat(
            &session_id,
            ChatPayload {
                turns: Vec::new(),
                session_ref: doc_id.clone(),
                turn_count: 0,
                toolcall_refs: Vec::new(),
            },
        )?;
        let prompt = ObjectDocument::system_prompt(&session_id, system_prompt.to_owned())?;

        let mut engine = Self {
            store,
            cancel: CancellationToken::new(),
            chat_ref: chat.id.clone(),
            system_prompt_ref: prompt.id.clone(),
            session_id,
            session_index: BTreeSet::new(),
            metadata_pool: BTreeSet::new(),
            active_set: BTreeSet::new(),
            pinned_set: BTreeSet::new(),
            metadata_cache: HashMap::new(),
            collapse,
        };

        engine.write_doc(&chat).await?;
        engine.write_doc(&prompt).await?;
        engine.commit(engine.sets()).await?;
        info!(session = %engine.session_id, "session created");
        Ok(engine)
    }

    /// Attach the caller's abort signal.
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    // ── Accessors ────────────────────────────────────────────────────────

    /// The session identifier.
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Id of the session's chat object.
    #[must_use]
    pub fn chat_ref(&self) -> &ObjectId {
        &self.chat_ref
    }

    /// Id of the session's system prompt object.
    #[must_use]
    pub fn system_prompt_ref(&self) -> &ObjectId {
        &self.system_prompt_ref
    }

    /// The append-only session index.
    #[must_use]
    pub fn session_index(&self) -> &BTreeSet<ObjectId> {
        &self.session_index
    }

    /// The metadata pool.
    #[must_use]
    pub fn metadata_pool(&self) -> &BTreeSet<ObjectId> {
        &self.metadata_pool
    }

    /// The active set.
    #[must_use]
    pub fn active_set(&self) -> &BTreeSet<ObjectId> {
        &self.active_set
    }

    /// The pinned set.
    #[must_use]
    pub fn pinned_set(&self) -> &BTreeSet<ObjectId> {
        &self.pinned_set
    }

    /// Cached metadata for an object, if this session has seen it.
    #[must_use]
    pub fn cached(&self, id: &ObjectId) -> Option<&ObjectDocument> {
        self.metadata_cache.get(id)
    }

    /// The store this session persists through.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    // ── Tier operations ──────────────────────────────────────────────────

    /// Record that this session learned of an object. Idempotent.
    ///
    /// Infrastructure objects (chat, system prompt, session) never enter
    /// the content sets and are silently ignored beyond the cache.
    /// Returns whether the index grew.
    pub async fn encounter(&mut self, doc: &ObjectDocument) -> Result<bool, SessionError> {
        if doc.kind().is_infrastructure() {
            debug!(id = %doc.id, kind = %doc.kind(), "ignoring infrastructure object");
            return Ok(false);
        }
        let _ = self.metadata_cache.insert(doc.id.clone(), doc.clone());
        if self.session_index.contains(&doc.id) {
            return Ok(false);
        }
        let mut sets = self.sets();
        let _ = sets.index.insert(doc.id.clone());
        self.commit(sets).await?;
        Ok(true)
    }

    /// Promote an indexed object into the metadata pool.
    pub async fn promote_to_pool(&mut self, id: &ObjectId) -> Result<(), SessionError> {
        if !self.session_index.contains(id) {
            return Err(SessionError::NotInIndex(id.clone()));
        }
        let doc = self.object_doc(id).await?;
        if !doc.kind().is_content() {
            return Err(SessionError::Infrastructure(id.clone()));
        }
        if self.metadata_pool.contains(id) {
            return Ok(());
        }
        let mut sets = self.sets();
        let _ = sets.pool.insert(id.clone());
        self.commit(sets).await
    }

    /// Load a pool member's full content into the active set.
    ///
    /// Fails when the object is locked or its latest content is null
    /// (discovery stub or tombstone).
    pub async fn activate(&mut self, id: &ObjectId) -> Result<(), SessionError> {
        if !self.metadata_pool.contains(id) {
            return Err(SessionError::NotInPool(id.clone()));
        }
        // Always read the latest version: a stub may have been upgraded
        // since this session last saw the object.
        let doc = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| SessionError::UnknownObject(id.clone()))?;
        let _ = self.metadata_cache.insert(id.clone(), doc.clone());

        if doc.kind().is_locked() {
            return Err(SessionError::Locked(id.clone()));
        }
        if doc.content.is_none() {
            return Err(SessionError::ContentUnavailable);
        }
        if self.active_set.contains(id) {
            return Ok(());
        }
        let mut sets = self.sets();
        let _ = sets.active.insert(id.clone());
        self.commit(sets).await
    }

    /// Drop an object from the active set; it stays in the pool.
    pub async fn deactivate(&mut self, id: &ObjectId) -> Result<(), SessionError> {
        if let Some(doc) = self.metadata_cache.get(id) {
            if doc.kind().is_locked() {
                return Err(SessionError::Locked(id.clone()));
            }
        } else if *id == self.chat_ref || *id == self.system_prompt_ref {
            return Err(SessionError::Locked(id.clone()));
        }
        if !self.active_set.contains(id) {
            return Err(SessionError::NotActive(id.clone()));
        }
        let mut sets = self.sets();
        let _ = sets.active.remove(id);
        self.commit(sets).await
    }

    /// Mark a pool member exempt from auto-collapse.
    pub async fn pin(&mut self, id: &ObjectId) -> Result<(), SessionError> {
        if !self.metadata_pool.contains(id) {
            return Err(SessionError::NotInPool(id.clone()));
        }
        if self.pinned_set.contains(id) {
            return Ok(());
        }
        let mut sets = self.sets();
        let _ = sets.pinned.insert(id.clone());
        self.commit(sets).await
    }

    /// Remove the auto-collapse exemption.
    pub async fn unpin(&mut self, id: &ObjectId) -> Result<(), SessionError> {
        if !self.metadata_pool.contains(id) {
            return Err(SessionError::NotInPool(id.clone()));
        }
        if !self.pinned_set.contains(id) {
            return Ok(());
        }
        let mut sets = self.sets();
        let _ = sets.pinned.remove(id);
        self.commit(sets).await
    }

    /// Absorb a freshly created tool-call object: it enters all three
    /// tiers, then the auto-collapse window is recomputed over `turns`.
    ///
    /// Returns the tool-call ids collapsed out of the active set.
    pub async fn absorb_toolcall(
        &mut self,
        doc: &ObjectDocument,
        turns: &[ChatTurn],
    ) -> Result<Vec<ObjectId>, SessionError> {
        if doc.kind() != ObjectKind::Toolcall {
            return Err(SessionError::Invalid(format!(
                "absorb_toolcall got a {} object",
                doc.kind()
            )));
        }
        let _ = self.metadata_cache.insert(doc.id.clone(), doc.clone());

        let mut sets = self.sets();
        let _ = sets.index.insert(doc.id.clone());
        let _ = sets.pool.insert(doc.id.clone());
        let _ = sets.active.insert(doc.id.clone());

        let removed = self.collapse_candidates(&sets, turns);
        for id in &removed {
            let _ = sets.active.remove(id);
        }
        self.commit(sets).await?;
        if !removed.is_empty() {
            debug!(count = removed.len(), "auto-collapsed tool calls");
        }
        Ok(removed)
    }

    /// Tool calls in the candidate active set that fall outside the keep
    /// window. Files are never collapsed; pinned objects are exempt.
    fn collapse_candidates(&self, sets: &TierSets, turns: &[ChatTurn]) -> Vec<ObjectId> {
        let keep: HashSet<ObjectId> = turns
            .iter()
            .rev()
            .take(self.collapse.recent_turns_window)
            .flat_map(|turn| {
                turn.toolcall_ids
                    .iter()
                    .rev()
                    .take(self.collapse.recent_toolcalls_per_turn)
                    .map(ObjectId::from)
            })
            .collect();

        sets.active
            .iter()
            .filter(|id| {
                if sets.pinned.contains(*id) || keep.contains(*id) {
                    return false;
                }
                self.metadata_cache
                    .get(*id)
                    .is_some_and(|doc| doc.kind() == ObjectKind::Toolcall)
            })
            .cloned()
            .collect()
    }

    // ── Resume ───────────────────────────────────────────────────────────

    /// Rebuild a session from its latest persisted document.
    ///
    /// Fetches every indexed object, reconciles sourced objects against
    /// their on-disk state (no-op / new version / tombstone), re-attaches
    /// watchers for watchable paths, and restores the tier sets. Objects
    /// whose sources are unreachable stay at their latest version.
    pub async fn resume(
        store: Arc<dyn DocumentStore>,
        session_id: &SessionId,
        resolver: &FsResolver,
        indexer: &Indexer,
        tracker: Option<&TrackerSupervisor>,
        collapse: AutoCollapseConfig,
    ) -> Result<Self, SessionError> {
        let doc_id = session_object_id(session_id);
        let session_doc = store
            .get(&doc_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(session_id.clone()))?;
        let Payload::Session(payload) = session_doc.payload else {
            return Err(SessionError::Invalid(format!(
                "document {doc_id} is not a session"
            )));
        };

        for violation in check_tier_invariants(&payload) {
            warn!(session = %session_id, %violation, "persisted session violates tier invariants");
        }

        let docs = store
            .query(&Query::by_ids(payload.session_index.iter().cloned()))
            .await?;
        let mut cache: HashMap<ObjectId, ObjectDocument> = docs
            .into_iter()
            .map(|d| (d.id.clone(), d))
            .collect();

        // Reconcile sourced objects whose filesystem is reachable from here.
        let our_filesystems: HashSet<&str> = std::iter::once(resolver.default_filesystem_id())
            .chain(resolver.mounts().iter().map(|m| m.filesystem_id.as_str()))
            .collect();

        let sourced: Vec<ObjectDocument> = cache
            .values()
            .filter(|d| d.source.is_some())
            .cloned()
            .collect();
        for doc in sourced {
            let Some(binding) = doc.source.clone() else {
                continue;
            };
            if !our_filesystems.contains(binding.filesystem_id()) {
                debug!(id = %doc.id, "source on foreign filesystem, keeping as-is");
                continue;
            }
            let outcome = match tokio::fs::read_to_string(binding.path()).await {
                Ok(content) => indexer.index_file(&binding, &content).await,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    if doc.source_hash.is_some() {
                        indexer.index_file_deletion(&binding).await
                    } else {
                        // Stub or tombstone and still no file: state matches.
                        continue;
                    }
                }
                Err(err) => {
                    warn!(id = %doc.id, path = binding.path(), error = %err,
                        "source unreadable on resume, keeping latest version");
                    continue;
                }
            };
            match outcome {
                Ok(indexed) if indexed.outcome != IndexOutcome::Unchanged => {
                    if let Some(fresh) = store.get(&indexed.id).await? {
                        let _ = cache.insert(indexed.id.clone(), fresh);
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(id = %doc.id, error = %err, "reconciliation failed, keeping latest version");
                }
            }
        }

        // Re-attach watchers for watchable mounted paths.
        if let Some(tracker) = tracker {
            for doc in cache.values() {
                let Some(binding) = &doc.source else { continue };
                let agent_path = resolver.reverse_resolve(binding.path());
                if resolver.is_watchable(&agent_path) {
                    if let Err(err) = tracker.attach(&agent_path) {
                        warn!(path = %agent_path, error = %err, "could not re-attach watcher");
                    }
                }
            }
        }

        let engine = Self {
            store,
            cancel: CancellationToken::new(),
            session_id: session_id.clone(),
            chat_ref: payload.chat_ref.clone(),
            system_prompt_ref: payload.system_prompt_ref.clone(),
            session_index: payload.session_index.iter().cloned().collect(),
            metadata_pool: payload.metadata_pool.iter().cloned().collect(),
            active_set: payload.active_set.iter().cloned().collect(),
            pinned_set: payload.pinned_set.iter().cloned().collect(),
            metadata_cache: cache,
            collapse,
        };
        info!(session = %session_id, indexed = engine.session_index.len(), "session resumed");
        Ok(engine)
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn sets(&self) -> TierSets {
        TierSets {
            index: self.session_index.clone(),
            pool: self.metadata_pool.clone(),
            active: self.active_set.clone(),
            pinned: self.pinned_set.clone(),
        }
    }

    /// Persist a candidate tier state, then adopt it in memory.
    ///
    /// The in-memory sets change only after the write is durably indexed,
    /// so there is no partial-mutation window to abort into.
    async fn commit(&mut self, sets: TierSets) -> Result<(), SessionError> {
        let doc = ObjectDocument::session(SessionPayload {
            session_id: self.session_id.clone(),
            chat_ref: self.chat_ref.clone(),
            system_prompt_ref: self.system_prompt_ref.clone(),
            session_index: sets.index.iter().cloned().collect(),
            metadata_pool: sets.pool.iter().cloned().collect(),
            active_set: sets.active.iter().cloned().collect(),
            pinned_set: sets.pinned.iter().cloned().collect(),
        })?;
        self.write_doc(&doc).await?;
        self.session_index = sets.index;
        self.metadata_pool = sets.pool;
        self.active_set = sets.active;
        self.pinned_set = sets.pinned;
        Ok(())
    }

    async fn write_doc(&self, doc: &ObjectDocument) -> Result<(), SessionError> {
        if self.cancel.is_cancelled() {
            return Err(SessionError::Aborted);
        }
        let tx = self.store.put(doc).await?;
        self.store.await_tx(&tx).await?;
        Ok(())
    }

    async fn object_doc(&mut self, id: &ObjectId) -> Result<ObjectDocument, SessionError> {
        if let Some(doc) = self.metadata_cache.get(id) {
            return Ok(doc.clone());
        }
        let doc = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| SessionError::UnknownObject(id.clone()))?;
        let _ = self.metadata_cache.insert(id.clone(), doc.clone());
        Ok(doc)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Invariant checking
// ─────────────────────────────────────────────────────────────────────────────

/// Check the subset and no-duplicates invariants of one session payload.
///
/// Returns a human-readable message per violation; empty when clean.
#[must_use]
pub fn check_tier_invariants(payload: &SessionPayload) -> Vec<String> {
    let mut violations = Vec::new();

    let index: HashSet<&ObjectId> = payload.session_index.iter().collect();
    let pool: HashSet<&ObjectId> = payload.metadata_pool.iter().collect();
    let active: HashSet<&ObjectId> = payload.active_set.iter().collect();
    let pinned: HashSet<&ObjectId> = payload.pinned_set.iter().collect();

    for id in pool.difference(&index) {
        violations.push(format!("metadata_pool must be a subset of session_index: {id}"));
    }
    for id in active.difference(&pool) {
        violations.push(format!("active_set must be a subset of metadata_pool: {id}"));
    }
    for id in pinned.difference(&pool) {
        violations.push(format!("pinned_set must be a subset of metadata_pool: {id}"));
    }

    for (name, list, set) in [
        ("session_index", &payload.session_index, &index),
        ("metadata_pool", &payload.metadata_pool, &pool),
        ("active_set", &payload.active_set, &active),
        ("pinned_set", &payload.pinned_set, &pinned),
    ] {
        if list.len() != set.len() {
            violations.push(format!("{name} contains duplicate ids"));
        }
    }

    violations
}

/// Check that `next` grew the session index monotonically from `prev`.
#[must_use]
pub fn check_append_only(prev: &SessionPayload, next: &SessionPayload) -> Vec<String> {
    let next_index: HashSet<&ObjectId> = next.session_index.iter().collect();
    prev.session_index
        .iter()
        .filter(|id| !next_index.contains(id))
        .map(|id| format!("session_index must be append-only: missing {id}"))
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use loupe_core::hash::source_hash;
    use loupe_core::ids::ToolCallId;
    use loupe_core::object::{
        chat_object_id, system_prompt_object_id, ToolStatus, ToolcallPayload,
    };
    use loupe_core::source::SourceBinding;
    use loupe_store::MemoryStore;

    fn file_doc(path: &str, content: Option<&str>) -> ObjectDocument {
        let src = SourceBinding::filesystem("FS1", path);
        ObjectDocument::file(
            src,
            content.map(str::to_owned),
            content.map(|c| source_hash(c.as_bytes())),
        )
        .unwrap()
    }

    fn toolcall_doc(engine: &SessionEngine, id: &str) -> ObjectDocument {
        ObjectDocument::toolcall(
            &ToolCallId::from(id),
            format!("output of {id}"),
            ToolcallPayload {
                tool: "bash".into(),
                args: serde_json::json!({"command": "ls"}),
                args_display: None,
                status: ToolStatus::Ok,
                chat_ref: engine.chat_ref().clone(),
                file_refs: None,
            },
        )
        .unwrap()
    }

    async fn engine_with_store() -> (SessionEngine, MemoryStore) {
        let store = MemoryStore::new();
        let engine = SessionEngine::create(
            Arc::new(store.clone()),
            SessionId::from("s1"),
            "be deliberate",
            AutoCollapseConfig::default(),
        )
        .await
        .unwrap();
        (engine, store)
    }

    /// Index a file into the store and walk it into the given tiers.
    async fn seed_file(
        engine: &mut SessionEngine,
        store: &MemoryStore,
        path: &str,
        activate: bool,
    ) -> ObjectId {
        let doc = file_doc(path, Some("content"));
        let _ = store.put(&doc).await.unwrap();
        let _ = engine.encounter(&doc).await.unwrap();
        engine.promote_to_pool(&doc.id).await.unwrap();
        if activate {
            engine.activate(&doc.id).await.unwrap();
        }
        doc.id
    }

    async fn latest_payload(store: &MemoryStore, engine: &SessionEngine) -> SessionPayload {
        let doc_id = session_object_id(engine.session_id());
        let doc = store.get(&doc_id).await.unwrap().unwrap();
        let Payload::Session(payload) = doc.payload else {
            panic!("expected session payload");
        };
        payload
    }

    // ── Creation ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn create_writes_three_documents() {
        let (engine, store) = engine_with_store().await;
        assert!(store.get(engine.chat_ref()).await.unwrap().is_some());
        assert!(store.get(engine.system_prompt_ref()).await.unwrap().is_some());

        let payload = latest_payload(&store, &engine).await;
        assert!(payload.session_index.is_empty());
        assert!(payload.metadata_pool.is_empty());
        assert!(payload.active_set.is_empty());
        assert!(payload.pinned_set.is_empty());
    }

    #[tokio::test]
    async fn create_rejects_duplicate_session() {
        let (engine, store) = engine_with_store().await;
        let err = SessionEngine::create(
            Arc::new(store),
            engine.session_id().clone(),
            "again",
            AutoCollapseConfig::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SessionError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn system_prompt_content_persisted() {
        let (engine, store) = engine_with_store().await;
        let prompt = store.get(engine.system_prompt_ref()).await.unwrap().unwrap();
        assert_eq!(prompt.content.as_deref(), Some("be deliberate"));
        assert_eq!(prompt.kind(), ObjectKind::SystemPrompt);
    }

    // ── Encounter ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn encounter_grows_index_idempotently() {
        let (mut engine, store) = engine_with_store().await;
        let doc = file_doc("/a.ts", Some("x"));
        let _ = store.put(&doc).await.unwrap();

        assert!(engine.encounter(&doc).await.unwrap());
        assert!(!engine.encounter(&doc).await.unwrap());
        assert_eq!(engine.session_index().len(), 1);

        let payload = latest_payload(&store, &engine).await;
        assert_eq!(payload.session_index, vec![doc.id]);
    }

    #[tokio::test]
    async fn encounter_ignores_infrastructure() {
        let (mut engine, store) = engine_with_store().await;
        let chat = store.get(engine.chat_ref()).await.unwrap().unwrap();
        assert!(!engine.encounter(&chat).await.unwrap());
        assert!(engine.session_index().is_empty());
    }

    // ── Promote / activate / deactivate ──────────────────────────────────

    #[tokio::test]
    async fn promote_requires_index_membership() {
        let (mut engine, _) = engine_with_store().await;
        let err = engine
            .promote_to_pool(&ObjectId::from("unseen"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotInIndex(_)));
    }

    #[tokio::test]
    async fn activate_requires_pool_membership() {
        let (mut engine, store) = engine_with_store().await;
        let doc = file_doc("/a.ts", Some("x"));
        let _ = store.put(&doc).await.unwrap();
        let _ = engine.encounter(&doc).await.unwrap();

        let err = engine.activate(&doc.id).await.unwrap_err();
        assert!(matches!(err, SessionError::NotInPool(_)));
    }

    #[tokio::test]
    async fn full_promotion_walk() {
        let (mut engine, store) = engine_with_store().await;
        let id = seed_file(&mut engine, &store, "/a.ts", true).await;

        assert!(engine.session_index().contains(&id));
        assert!(engine.metadata_pool().contains(&id));
        assert!(engine.active_set().contains(&id));
    }

    #[tokio::test]
    async fn activate_stub_is_content_unavailable() {
        let (mut engine, store) = engine_with_store().await;
        let stub = file_doc("/a.ts", None);
        let _ = store.put(&stub).await.unwrap();
        let _ = engine.encounter(&stub).await.unwrap();
        engine.promote_to_pool(&stub.id).await.unwrap();

        let err = engine.activate(&stub.id).await.unwrap_err();
        assert!(matches!(err, SessionError::ContentUnavailable));
        assert_eq!(err.to_string(), "Content unavailable");
        assert!(engine.active_set().is_empty());
    }

    #[tokio::test]
    async fn activate_sees_stub_upgrade() {
        let (mut engine, store) = engine_with_store().await;
        let stub = file_doc("/a.ts", None);
        let _ = store.put(&stub).await.unwrap();
        let _ = engine.encounter(&stub).await.unwrap();
        engine.promote_to_pool(&stub.id).await.unwrap();

        // Upgrade happens behind the session's back (another client read it).
        let full = file_doc("/a.ts", Some("now read"));
        let _ = store.put(&full).await.unwrap();

        engine.activate(&stub.id).await.unwrap();
        assert!(engine.active_set().contains(&stub.id));
    }

    #[tokio::test]
    async fn deactivate_keeps_pool_membership() {
        let (mut engine, store) = engine_with_store().await;
        let id = seed_file(&mut engine, &store, "/a.ts", true).await;

        engine.deactivate(&id).await.unwrap();
        assert!(!engine.active_set().contains(&id));
        assert!(engine.metadata_pool().contains(&id));
        assert!(engine.session_index().contains(&id));

        let payload = latest_payload(&store, &engine).await;
        assert!(check_tier_invariants(&payload).is_empty());
    }

    #[tokio::test]
    async fn deactivate_locked_objects_fails() {
        let (mut engine, _) = engine_with_store().await;
        let chat_ref = engine.chat_ref().clone();
        let err = engine.deactivate(&chat_ref).await.unwrap_err();
        assert!(matches!(err, SessionError::Locked(_)));
        assert!(err.to_string().starts_with("object is locked: "));

        let prompt_ref = engine.system_prompt_ref().clone();
        let err = engine.deactivate(&prompt_ref).await.unwrap_err();
        assert!(matches!(err, SessionError::Locked(_)));
    }

    #[tokio::test]
    async fn deactivate_inactive_fails() {
        let (mut engine, store) = engine_with_store().await;
        let id = seed_file(&mut engine, &store, "/a.ts", false).await;
        let err = engine.deactivate(&id).await.unwrap_err();
        assert!(matches!(err, SessionError::NotActive(_)));
    }

    // ── Pin / unpin ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn pin_and_unpin() {
        let (mut engine, store) = engine_with_store().await;
        let id = seed_file(&mut engine, &store, "/a.ts", false).await;

        engine.pin(&id).await.unwrap();
        assert!(engine.pinned_set().contains(&id));
        engine.unpin(&id).await.unwrap();
        assert!(!engine.pinned_set().contains(&id));
    }

    #[tokio::test]
    async fn pin_requires_pool_membership() {
        let (mut engine, _) = engine_with_store().await;
        let err = engine.pin(&ObjectId::from("unseen")).await.unwrap_err();
        assert!(matches!(err, SessionError::NotInPool(_)));
    }

    // ── Auto-collapse ────────────────────────────────────────────────────

    fn turn_with_calls(ids: &[&str]) -> ChatTurn {
        let mut turn = ChatTurn::user("do things");
        turn.toolcall_ids = ids.iter().map(|s| ToolCallId::from(*s)).collect();
        turn
    }

    async fn engine_with_collapse(config: AutoCollapseConfig) -> (SessionEngine, MemoryStore) {
        let store = MemoryStore::new();
        let engine = SessionEngine::create(
            Arc::new(store.clone()),
            SessionId::from("s1"),
            "prompt",
            config,
        )
        .await
        .unwrap();
        (engine, store)
    }

    #[tokio::test]
    async fn absorb_toolcall_enters_all_tiers() {
        let (mut engine, _) = engine_with_store().await;
        let tc = toolcall_doc(&engine, "tc-1");
        let turns = vec![turn_with_calls(&["tc-1"])];

        let removed = engine.absorb_toolcall(&tc, &turns).await.unwrap();
        assert!(removed.is_empty());
        assert!(engine.session_index().contains(&tc.id));
        assert!(engine.metadata_pool().contains(&tc.id));
        assert!(engine.active_set().contains(&tc.id));
    }

    #[tokio::test]
    async fn collapse_drops_calls_outside_window() {
        let config = AutoCollapseConfig {
            recent_toolcalls_per_turn: 1,
            recent_turns_window: 1,
        };
        let (mut engine, _) = engine_with_collapse(config).await;

        let tc1 = toolcall_doc(&engine, "tc-1");
        let tc2 = toolcall_doc(&engine, "tc-2");

        let turns = vec![turn_with_calls(&["tc-1"])];
        let _ = engine.absorb_toolcall(&tc1, &turns).await.unwrap();

        let turns = vec![turn_with_calls(&["tc-1", "tc-2"])];
        let removed = engine.absorb_toolcall(&tc2, &turns).await.unwrap();

        // Window keeps only the last call of the last turn.
        assert_eq!(removed, vec![tc1.id.clone()]);
        assert!(!engine.active_set().contains(&tc1.id));
        assert!(engine.active_set().contains(&tc2.id));
        // Collapsed calls stay in the pool.
        assert!(engine.metadata_pool().contains(&tc1.id));
    }

    #[tokio::test]
    async fn collapse_keeps_window_across_turns() {
        let config = AutoCollapseConfig {
            recent_toolcalls_per_turn: 5,
            recent_turns_window: 2,
        };
        let (mut engine, _) = engine_with_collapse(config).await;

        let tc1 = toolcall_doc(&engine, "tc-1");
        let tc2 = toolcall_doc(&engine, "tc-2");
        let tc3 = toolcall_doc(&engine, "tc-3");

        let turns = vec![turn_with_calls(&["tc-1"])];
        let _ = engine.absorb_toolcall(&tc1, &turns).await.unwrap();
        let turns = vec![turn_with_calls(&["tc-1"]), turn_with_calls(&["tc-2"])];
        let _ = engine.absorb_toolcall(&tc2, &turns).await.unwrap();
        let turns = vec![
            turn_with_calls(&["tc-1"]),
            turn_with_calls(&["tc-2"]),
            turn_with_calls(&["tc-3"]),
        ];
        let removed = engine.absorb_toolcall(&tc3, &turns).await.unwrap();

        // Two-turn window covers tc-2 and tc-3; tc-1 collapses.
        assert_eq!(removed, vec![tc1.id.clone()]);
        assert!(engine.active_set().contains(&tc2.id));
        assert!(engine.active_set().contains(&tc3.id));
    }

    #[tokio::test]
    async fn pinned_toolcalls_survive_collapse() {
        let config = AutoCollapseConfig {
            recent_toolcalls_per_turn: 1,
            recent_turns_window: 1,
        };
        let (mut engine, _) = engine_with_collapse(config).await;

        let tc1 = toolcall_doc(&engine, "tc-1");
        let tc2 = toolcall_doc(&engine, "tc-2");

        let turns = vec![turn_with_calls(&["tc-1"])];
        let _ = engine.absorb_toolcall(&tc1, &turns).await.unwrap();
        engine.pin(&tc1.id).await.unwrap();

        let turns = vec![turn_with_calls(&["tc-1", "tc-2"])];
        let removed = engine.absorb_toolcall(&tc2, &turns).await.unwrap();

        assert!(removed.is_empty());
        assert!(engine.active_set().contains(&tc1.id));
    }

    #[tokio::test]
    async fn files_are_never_auto_collapsed() {
        let config = AutoCollapseConfig {
            recent_toolcalls_per_turn: 1,
            recent_turns_window: 1,
        };
        let (mut engine, store) = engine_with_collapse(config).await;
        let file_id = seed_file(&mut engine, &store, "/a.ts", true).await;

        let tc = toolcall_doc(&engine, "tc-1");
        let turns = vec![turn_with_calls(&["tc-1"])];
        let removed = engine.absorb_toolcall(&tc, &turns).await.unwrap();

        assert!(removed.is_empty());
        assert!(engine.active_set().contains(&file_id));
    }

    // ── Abort semantics ──────────────────────────────────────────────────

    #[tokio::test]
    async fn aborted_operation_leaves_state_unchanged() {
        let (engine, store) = engine_with_store().await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut engine = engine.with_cancel_token(cancel);

        let doc = file_doc("/a.ts", Some("x"));
        let _ = store.put(&doc).await.unwrap();
        let before = store.version_count(&session_object_id(engine.session_id()));

        let err = engine.encounter(&doc).await.unwrap_err();
        assert!(matches!(err, SessionError::Aborted));
        assert!(engine.session_index().is_empty());
        assert_eq!(
            store.version_count(&session_object_id(engine.session_id())),
            before
        );
    }

    // ── Persistence shape ────────────────────────────────────────────────

    #[tokio::test]
    async fn every_state_change_appends_a_session_version() {
        let (mut engine, store) = engine_with_store().await;
        let doc_id = session_object_id(engine.session_id());
        let after_create = store.version_count(&doc_id);

        let _ = seed_file(&mut engine, &store, "/a.ts", true).await;
        // encounter + promote + activate = three more versions.
        assert_eq!(store.version_count(&doc_id), after_create + 3);
    }

    #[tokio::test]
    async fn successive_versions_grow_index_monotonically() {
        let (mut engine, store) = engine_with_store().await;
        let _ = seed_file(&mut engine, &store, "/a.ts", false).await;
        let prev = latest_payload(&store, &engine).await;
        let _ = seed_file(&mut engine, &store, "/b.ts", false).await;
        let next = latest_payload(&store, &engine).await;

        assert!(check_append_only(&prev, &next).is_empty());
        assert!(next.session_index.len() > prev.session_index.len());
    }

    // ── Invariant checkers ───────────────────────────────────────────────

    fn payload_with(
        index: &[&str],
        pool: &[&str],
        active: &[&str],
        pinned: &[&str],
    ) -> SessionPayload {
        let ids = |xs: &[&str]| xs.iter().map(|s| ObjectId::from(*s)).collect();
        let sid = SessionId::from("s1");
        SessionPayload {
            session_id: sid.clone(),
            chat_ref: chat_object_id(&sid),
            system_prompt_ref: system_prompt_object_id(&sid),
            session_index: ids(index),
            metadata_pool: ids(pool),
            active_set: ids(active),
            pinned_set: ids(pinned),
        }
    }

    #[test]
    fn tier_invariants_clean() {
        let payload = payload_with(&["a", "b"], &["a"], &["a"], &[]);
        assert!(check_tier_invariants(&payload).is_empty());
    }

    #[test]
    fn tier_invariants_catch_subset_violations() {
        let payload = payload_with(&["a"], &["a", "b"], &["c"], &["d"]);
        let violations = check_tier_invariants(&payload);
        assert!(violations.iter().any(|v| v.contains("metadata_pool") && v.contains('b')));
        assert!(violations.iter().any(|v| v.contains("active_set") && v.contains('c')));
        assert!(violations.iter().any(|v| v.contains("pinned_set") && v.contains('d')));
    }

    #[test]
    fn tier_invariants_catch_duplicates() {
        let payload = payload_with(&["a", "a"], &[], &[], &[]);
        let violations = check_tier_invariants(&payload);
        assert!(violations.iter().any(|v| v.contains("duplicate")));
    }

    #[test]
    fn append_only_checker_flags_missing_ids() {
        let prev = payload_with(&["a", "b"], &[], &[], &[]);
        let next = payload_with(&["a", "c"], &[], &[], &[]);
        let violations = check_append_only(&prev, &next);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("session_index must be append-only"));
        assert!(violations[0].contains('b'));
    }

    #[test]
    fn append_only_checker_accepts_growth() {
        let prev = payload_with(&["a"], &[], &[], &[]);
        let next = payload_with(&["a", "b"], &[], &[], &[]);
        assert!(check_append_only(&prev, &next).is_empty());
    }
}
