//! Source bindings: the immutable description of what a sourced object tracks.
//!
//! A source binding is a tagged union keyed on `type`. Each variant fully
//! determines how the identity hash is computed, how the source hash is
//! computed, and which tracker subsystem applies. Variants are switched
//! exhaustively; adding one (s3, git, ...) means adding its hashing rules
//! here, not extending anything at runtime.
//!
//! The filesystem variant carries the canonical (post-mount-translation)
//! absolute path. Identity is sensitive to every byte of the encoding, so
//! paths are normalized before a binding is constructed.

use serde::{Deserialize, Serialize};

/// What an object tracks in the outside world.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SourceBinding {
    /// A file on a named filesystem, at its canonical absolute path.
    #[serde(rename_all = "camelCase")]
    Filesystem {
        /// Identifier of the filesystem the path lives on (64-hex, trusted).
        filesystem_id: String,
        /// Canonical absolute path: no `.`/`..`/empty segments, no trailing slash.
        path: String,
    },
}

impl SourceBinding {
    /// Build a filesystem binding, normalizing the path.
    #[must_use]
    pub fn filesystem(filesystem_id: impl Into<String>, path: &str) -> Self {
        Self::Filesystem {
            filesystem_id: filesystem_id.into(),
            path: normalize_path(path),
        }
    }

    /// The canonical path of the tracked source.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Filesystem { path, .. } => path,
        }
    }

    /// The filesystem identifier of the tracked source.
    #[must_use]
    pub fn filesystem_id(&self) -> &str {
        match self {
            Self::Filesystem { filesystem_id, .. } => filesystem_id,
        }
    }
}

/// Normalize a path to canonical form.
///
/// Lexical only; nothing touches the disk. Empty and `.` segments are
/// dropped, `..` pops the previous segment, the result is always absolute
/// and carries no trailing slash (except the root itself).
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                let _ = segments.pop();
            }
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        "/".to_owned()
    } else {
        format!("/{}", segments.join("/"))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
