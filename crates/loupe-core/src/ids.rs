//! Branded ID newtypes for type safety.
//!
//! Every entity in the Loupe system has a distinct ID type implemented as a
//! newtype wrapper around `String`. This prevents accidentally passing a
//! session ID where an object ID is expected.
//!
//! Unlike most systems, object IDs here are never random: sourced objects
//! derive their ID from the identity hash of their source binding, and
//! unsourced objects use deterministic schemes (`chat:{session}`,
//! `session:{session}`, `system_prompt:{session}`, or the provider-supplied
//! tool-call identifier). Only [`SessionId`] mints fresh values, as UUID v7.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Identifier of a versioned object document in the store.
    ///
    /// Equal to the identity hash for sourced objects; a deterministic
    /// scheme string for unsourced ones.
    ObjectId
}

branded_id! {
    /// Identifier of a session, stable across pause/resume.
    SessionId
}

branded_id! {
    /// Provider-supplied identifier of a tool call within a session.
    ToolCallId
}

impl SessionId {
    /// Mint a new random session ID (UUID v7, time-ordered).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<ToolCallId> for ObjectId {
    fn from(id: ToolCallId) -> Self {
        Self(id.0)
    }
}

impl From<&ToolCallId> for ObjectId {
    fn from(id: &ToolCallId) -> Self {
        Self(id.0.clone())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
