//! Mount translation between agent-visible and canonical paths.
//!
//! The resolver is configured with a default filesystem identifier and an
//! ordered list of mount mappings. Resolution finds the longest agent
//! prefix that covers the path on a path-segment boundary: `/workspace`
//! matches `/workspace/src` but never `/workspacex`.

use serde::{Deserialize, Serialize};

use loupe_core::source::{normalize_path, SourceBinding};

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// One mount: an agent-visible prefix translated to a canonical prefix on a
/// named filesystem.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountMapping {
    /// Prefix as the agent names it.
    pub agent_prefix: String,
    /// Canonical prefix on the host.
    pub canonical_prefix: String,
    /// Filesystem the canonical prefix lives on.
    pub filesystem_id: String,
    /// Whether writes through this mount are permitted.
    pub writable: bool,
}

/// Result of resolving an agent-visible path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Canonical absolute path.
    pub canonical_path: String,
    /// Filesystem the path lives on.
    pub filesystem_id: String,
    /// Whether a mount matched (canonical path is host-visible).
    pub is_mounted: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// FsResolver
// ─────────────────────────────────────────────────────────────────────────────

/// Translates agent-visible paths to canonical paths and filesystem ids.
#[derive(Clone, Debug)]
pub struct FsResolver {
    default_filesystem_id: String,
    mounts: Vec<MountMapping>,
}

impl FsResolver {
    /// Create a resolver. Mount prefixes are normalized on the way in so a
    /// configured trailing slash cannot defeat prefix matching.
    #[must_use]
    pub fn new(default_filesystem_id: impl Into<String>, mounts: Vec<MountMapping>) -> Self {
        let mounts = mounts
            .into_iter()
            .map(|m| MountMapping {
                agent_prefix: normalize_path(&m.agent_prefix),
                canonical_prefix: normalize_path(&m.canonical_prefix),
                ..m
            })
            .collect();
        Self {
            default_filesystem_id: default_filesystem_id.into(),
            mounts,
        }
    }

    /// A resolver with no mounts; every path is canonical already.
    #[must_use]
    pub fn unmounted(default_filesystem_id: impl Into<String>) -> Self {
        Self::new(default_filesystem_id, Vec::new())
    }

    /// The default filesystem identifier.
    #[must_use]
    pub fn default_filesystem_id(&self) -> &str {
        &self.default_filesystem_id
    }

    /// Configured mounts.
    #[must_use]
    pub fn mounts(&self) -> &[MountMapping] {
        &self.mounts
    }

    /// Resolve an agent-visible path.
    ///
    /// Longest matching agent prefix wins; without a match the path is
    /// returned unchanged under the default filesystem id.
    #[must_use]
    pub fn resolve(&self, agent_path: &str) -> ResolvedPath {
        let path = normalize_path(agent_path);
        let best = self
            .mounts
            .iter()
            .filter(|m| prefix_matches(&m.agent_prefix, &path))
            .max_by_key(|m| m.agent_prefix.len());

        match best {
            Some(mount) => ResolvedPath {
                canonical_path: substitute_prefix(&path, &mount.agent_prefix, &mount.canonical_prefix),
                filesystem_id: mount.filesystem_id.clone(),
                is_mounted: true,
            },
            None => ResolvedPath {
                canonical_path: path,
                filesystem_id: self.default_filesystem_id.clone(),
                is_mounted: false,
            },
        }
    }

    /// Map a canonical path back to the agent-visible form, for display.
    ///
    /// Longest matching canonical prefix wins; falls back to the canonical
    /// path unchanged.
    #[must_use]
    pub fn reverse_resolve(&self, canonical_path: &str) -> String {
        let path = normalize_path(canonical_path);
        let best = self
            .mounts
            .iter()
            .filter(|m| prefix_matches(&m.canonical_prefix, &path))
            .max_by_key(|m| m.canonical_prefix.len());

        match best {
            Some(mount) => substitute_prefix(&path, &mount.canonical_prefix, &mount.agent_prefix),
            None => path,
        }
    }

    /// Whether the path can be subscribed to by a file-change notifier:
    /// true iff a mount matched, making the canonical path host-visible.
    #[must_use]
    pub fn is_watchable(&self, agent_path: &str) -> bool {
        self.resolve(agent_path).is_mounted
    }

    /// Build the source binding for an agent-visible path.
    #[must_use]
    pub fn source_for(&self, agent_path: &str) -> SourceBinding {
        let resolved = self.resolve(agent_path);
        SourceBinding::filesystem(resolved.filesystem_id, &resolved.canonical_path)
    }
}

/// Prefix match on path-segment boundaries.
fn prefix_matches(prefix: &str, path: &str) -> bool {
    if !path.starts_with(prefix) {
        return false;
    }
    if path.len() == prefix.len() {
        return true;
    }
    prefix == "/" || path.as_bytes()[prefix.len()] == b'/'
}

/// Replace `from` with `to` at the head of `path` (both already matched on a
/// segment boundary), keeping the result canonical.
fn substitute_prefix(path: &str, from: &str, to: &str) -> String {
    // A root prefix consumed no segment, so the remainder keeps its slash.
    let remainder = if from == "/" { path } else { &path[from.len()..] };
    if remainder.is_empty() {
        to.to_owned()
    } else if to == "/" {
        remainder.to_owned()
    } else {
        format!("{to}{remainder}")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
