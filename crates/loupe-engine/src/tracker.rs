//! Tracker supervisor: keeps file watchers attached at canonical paths and
//! feeds change events back into the indexer.
//!
//! One watcher handle per canonical path. Change events re-enter the
//! indexing funnel (`upsert` → read + index, `unlink` → tombstone), so a
//! watched file behaves exactly like one the agent re-read by hand.
//! Watcher failures are logged and the object stays indexed. There is no
//! retry contract; the next explicit read re-observes the state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use loupe_core::source::SourceBinding;
use loupe_fs::FsResolver;

use crate::indexer::Indexer;
use crate::watch::{FsEvent, FsEventKind, WatchLoop};

struct Inner {
    resolver: Arc<FsResolver>,
    indexer: Indexer,
    watch: Mutex<WatchLoop>,
    watched: Mutex<HashMap<PathBuf, SourceBinding>>,
    cancel: CancellationToken,
}

/// Supervises per-path watchers for one session.
///
/// Cheap to clone; all clones share the watcher and the watched-path map.
/// Teardown is explicit via [`TrackerSupervisor::shutdown`].
#[derive(Clone)]
pub struct TrackerSupervisor {
    inner: Arc<Inner>,
}

impl TrackerSupervisor {
    /// Build the supervisor and spawn its event-drain task.
    pub fn start(resolver: Arc<FsResolver>, indexer: Indexer) -> Result<Self, notify::Error> {
        let (watch, rx) = WatchLoop::new()?;
        let inner = Arc::new(Inner {
            resolver,
            indexer,
            watch: Mutex::new(watch),
            watched: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        });
        let supervisor = Self {
            inner: Arc::clone(&inner),
        };
        let _ = tokio::spawn(drain(inner, rx));
        Ok(supervisor)
    }

    /// Attach a watcher for an agent-visible path.
    ///
    /// Returns `false` when the path is not watchable (no mount covers it).
    /// Idempotent: re-attaching a watched path is harmless.
    pub fn attach(&self, agent_path: &str) -> Result<bool, notify::Error> {
        let resolved = self.inner.resolver.resolve(agent_path);
        if !resolved.is_mounted {
            debug!(path = agent_path, "path not watchable, skipping watcher");
            return Ok(false);
        }
        let binding =
            SourceBinding::filesystem(resolved.filesystem_id, &resolved.canonical_path);
        let canonical = PathBuf::from(binding.path());

        let mut watched = self.inner.watched.lock();
        if watched.contains_key(&canonical) {
            return Ok(true);
        }
        self.inner.watch.lock().watch(&canonical)?;
        info!(path = %canonical.display(), "watcher attached");
        let _ = watched.insert(canonical, binding);
        Ok(true)
    }

    /// Detach the watcher at a canonical path, if any.
    pub fn detach(&self, canonical_path: &str) {
        let path = PathBuf::from(canonical_path);
        let removed = self.inner.watched.lock().remove(&path);
        if removed.is_some() {
            if let Err(err) = self.inner.watch.lock().unwatch(&path) {
                warn!(path = %path.display(), error = %err, "unwatch failed");
            }
        }
    }

    /// Detach every watcher and stop the drain task. Called on session end.
    pub fn shutdown(&self) {
        let paths: Vec<PathBuf> = self.inner.watched.lock().keys().cloned().collect();
        for path in paths {
            self.detach(&path.to_string_lossy());
        }
        self.inner.cancel.cancel();
    }

    /// Number of currently watched paths.
    #[must_use]
    pub fn watched_count(&self) -> usize {
        self.inner.watched.lock().len()
    }

    /// Whether a canonical path currently has a watcher.
    #[must_use]
    pub fn is_watching(&self, canonical_path: &str) -> bool {
        self.inner
            .watched
            .lock()
            .contains_key(Path::new(canonical_path))
    }

    /// Route one change event into the indexer.
    ///
    /// Exposed for tests; the drain task calls this for every bridged event.
    pub async fn dispatch(&self, event: FsEvent) {
        dispatch_event(&self.inner, event).await;
    }
}

async fn drain(inner: Arc<Inner>, mut rx: mpsc::UnboundedReceiver<FsEvent>) {
    loop {
        tokio::select! {
            () = inner.cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => dispatch_event(&inner, event).await,
                None => break,
            },
        }
    }
}

async fn dispatch_event(inner: &Inner, event: FsEvent) {
    let binding = inner.watched.lock().get(&event.path).cloned();
    let Some(binding) = binding else {
        // Events can trail a detach; nothing tracks this path anymore.
        return;
    };

    let result = match event.kind {
        FsEventKind::Upsert => inner.indexer.index_source(&binding).await,
        FsEventKind::Unlink => inner.indexer.index_file_deletion(&binding).await,
    };
    match result {
        Ok(indexed) => {
            debug!(id = %indexed.id, outcome = ?indexed.outcome, path = %event.path.display(),
                "watched change indexed");
        }
        Err(err) => {
            warn!(path = %event.path.display(), error = %err,
                "failed to index watched change, object remains at latest version");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
