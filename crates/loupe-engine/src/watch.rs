//! Thin wrapper over the platform file-change notifier.
//!
//! notify callbacks run on a notify-internal thread; events are forwarded
//! to a tokio mpsc channel and processed on the async executor by the
//! tracker supervisor. Only the upsert/unlink distinction survives the
//! mapping; everything else about the platform event is noise to the
//! indexer.

use std::path::{Path, PathBuf};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::warn;

/// A change observed at a watched canonical path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FsEvent {
    /// The path the event fired at.
    pub path: PathBuf,
    /// What happened.
    pub kind: FsEventKind,
}

/// The two event shapes the indexer cares about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FsEventKind {
    /// Content appeared or changed.
    Upsert,
    /// The path was removed.
    Unlink,
}

/// Map a platform event kind onto the upsert/unlink dichotomy.
#[must_use]
pub fn map_event_kind(kind: &EventKind) -> Option<FsEventKind> {
    match kind {
        EventKind::Create(_) | EventKind::Modify(_) => Some(FsEventKind::Upsert),
        EventKind::Remove(_) => Some(FsEventKind::Unlink),
        _ => None,
    }
}

/// Owns the platform watcher and the bridge into async.
pub struct WatchLoop {
    watcher: RecommendedWatcher,
}

impl WatchLoop {
    /// Build the watcher; returns the receiving end of the event bridge.
    pub fn new() -> Result<(Self, mpsc::UnboundedReceiver<FsEvent>), notify::Error> {
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if let Some(kind) = map_event_kind(&event.kind) {
                        for path in event.paths {
                            // Receiver gone means the supervisor shut down;
                            // nothing left to notify.
                            let _ = tx.send(FsEvent { path, kind });
                        }
                    }
                }
                Err(err) => warn!(error = %err, "file watcher error"),
            },
            Config::default(),
        )?;
        Ok((Self { watcher }, rx))
    }

    /// Subscribe to a single canonical path.
    pub fn watch(&mut self, path: &Path) -> Result<(), notify::Error> {
        self.watcher.watch(path, RecursiveMode::NonRecursive)
    }

    /// Drop the subscription for a canonical path.
    pub fn unwatch(&mut self, path: &Path) -> Result<(), notify::Error> {
        self.watcher.unwatch(path)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
