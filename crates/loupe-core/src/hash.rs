//! The three digests that link object identity across processes.
//!
//! All three are SHA-256 rendered as 64-character lowercase hex, computed
//! over the canonical JSON form from [`crate::canonical`]. Any divergence
//! here silently forks object identity across clients, so every rule stays
//! in this module:
//!
//! - **Identity hash**: over `{type, source}` for sourced objects (and it
//!   *is* the object id); over `type || assigned_id` for unsourced ones.
//! - **Source hash**: over the raw external bytes; drives change detection.
//! - **Content hash**: over the mutable payload with exactly `source_hash`
//!   and `content_hash` removed first. The removal happens on a clone, never
//!   on the caller's value.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::canonical::to_canonical_string;
use crate::object::ObjectKind;
use crate::source::SourceBinding;

/// Identity hash of a sourced object: SHA-256 of the canonical JSON of
/// `{type, source}`. Equal bindings yield equal ids, by construction.
#[must_use]
pub fn sourced_identity_hash(kind: ObjectKind, source: &SourceBinding) -> String {
    let envelope = serde_json::json!({
        "type": kind.as_str(),
        "source": source,
    });
    hex_sha256(to_canonical_string(&envelope).as_bytes())
}

/// Identity hash of an unsourced object: SHA-256 of `type || assigned_id`.
#[must_use]
pub fn unsourced_identity_hash(kind: ObjectKind, assigned_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(assigned_id.as_bytes());
    hex::encode(hasher.finalize())
}

/// Source hash: SHA-256 over the raw external bytes.
#[must_use]
pub fn source_hash(raw: &[u8]) -> String {
    hex_sha256(raw)
}

/// Content hash: SHA-256 of the canonical form of the mutable payload with
/// the `source_hash` and `content_hash` keys removed.
///
/// Operates on a clone; the caller's value is never mutated.
#[must_use]
pub fn content_hash(payload: &Value) -> String {
    let mut scrubbed = payload.clone();
    if let Value::Object(map) = &mut scrubbed {
        let _ = map.remove("source_hash");
        let _ = map.remove("content_hash");
    }
    hex_sha256(to_canonical_string(&scrubbed).as_bytes())
}

fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
