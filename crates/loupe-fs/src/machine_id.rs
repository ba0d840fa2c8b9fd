//! Default filesystem identifier derivation.
//!
//! The identifier names "this machine's filesystem" inside source bindings,
//! so it must be stable across restarts and identical for every process on
//! the machine. It is derived once at startup from the machine identity
//! file, hashed so the raw id never leaves the host. Peers trust it; there
//! is no verification.

use std::sync::OnceLock;

use sha2::{Digest, Sha256};
use tracing::debug;

const MACHINE_ID_PATHS: &[&str] = &["/etc/machine-id", "/var/lib/dbus/machine-id"];
const HOSTNAME_PATH: &str = "/etc/hostname";

static DEFAULT_FILESYSTEM_ID: OnceLock<String> = OnceLock::new();

/// The default filesystem identifier for this machine, derived once per
/// process.
///
/// Preference order: machine-id file, hostname, and finally a fixed marker
/// so startup never fails. Every branch hashes, so the result is always
/// 64-hex.
#[must_use]
pub fn default_filesystem_id() -> String {
    DEFAULT_FILESYSTEM_ID.get_or_init(derive).clone()
}

fn derive() -> String {
    if let Some(raw) = machine_id_file() {
        return hex_sha256(raw.trim());
    }
    if let Some(name) = hostname() {
        debug!("no machine-id file, deriving filesystem id from hostname");
        return hex_sha256(name.trim());
    }
    debug!("no machine identity available, using fixed marker");
    hex_sha256("loupe-unknown-host")
}

fn machine_id_file() -> Option<String> {
    MACHINE_ID_PATHS
        .iter()
        .find_map(|p| std::fs::read_to_string(p).ok())
}

fn hostname() -> Option<String> {
    std::fs::read_to_string(HOSTNAME_PATH)
        .ok()
        .or_else(|| std::env::var("HOSTNAME").ok())
        .filter(|s| !s.trim().is_empty())
}

fn hex_sha256(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        assert_eq!(default_filesystem_id(), default_filesystem_id());
    }

    #[test]
    fn id_is_64_lowercase_hex() {
        let id = default_filesystem_id();
        assert_eq!(id.len(), 64);
        assert!(id
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn hashing_is_stable() {
        assert_eq!(
            hex_sha256("loupe-unknown-host"),
            hex_sha256("loupe-unknown-host")
        );
        assert_ne!(hex_sha256("a"), hex_sha256("b"));
    }
}
