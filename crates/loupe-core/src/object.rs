//! The versioned object document model.
//!
//! An object is a document with two zones. The **envelope** (`id`, `type`,
//! `source`, `identity_hash`) is set at creation and byte-identical across
//! every version. The **mutable payload** (`content`, `source_hash`,
//! `content_hash`, plus the per-kind fields) is replaced on each write.
//! Objects are never destroyed: deletion on disk produces a new version with
//! null content and null source hash, and the id never changes.
//!
//! On the wire each object is one flat JSON document keyed by `xt/id`. The
//! per-kind payload is an internally-tagged enum on `type`, so the tag lands
//! at the top level of the flat document.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::hash::{content_hash, sourced_identity_hash, unsourced_identity_hash};
use crate::ids::{ObjectId, SessionId, ToolCallId};
use crate::source::SourceBinding;

// ─────────────────────────────────────────────────────────────────────────────
// Object kinds
// ─────────────────────────────────────────────────────────────────────────────

/// The type of an object document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    /// A tracked file (the only sourced kind).
    File,
    /// A tool-call result, keyed by the provider's tool-call id.
    Toolcall,
    /// The accumulated conversation of one session. Locked.
    Chat,
    /// The system prompt of one session. Locked.
    SystemPrompt,
    /// The session document holding the tier sets.
    Session,
}

impl ObjectKind {
    /// Wire name of the kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Toolcall => "toolcall",
            Self::Chat => "chat",
            Self::SystemPrompt => "system_prompt",
            Self::Session => "session",
        }
    }

    /// Whether objects of this kind are bound to an external source.
    #[must_use]
    pub fn is_sourced(self) -> bool {
        matches!(self, Self::File)
    }

    /// Locked kinds can never be deactivated.
    #[must_use]
    pub fn is_locked(self) -> bool {
        matches!(self, Self::Chat | Self::SystemPrompt)
    }

    /// Infrastructure kinds never appear in any session's content sets.
    #[must_use]
    pub fn is_infrastructure(self) -> bool {
        matches!(self, Self::Chat | Self::SystemPrompt | Self::Session)
    }

    /// Content kinds are eligible for the metadata pool and active set.
    #[must_use]
    pub fn is_content(self) -> bool {
        matches!(self, Self::File | Self::Toolcall)
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Per-kind payloads
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of a tool execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    /// The tool ran to completion.
    Ok,
    /// The tool reported an error.
    Fail,
}

impl fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("ok"),
            Self::Fail => f.write_str("fail"),
        }
    }
}

/// Payload fields specific to `file` objects.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilePayload {
    /// Extension-derived file type.
    pub file_type: String,
    /// Character count of the latest content (0 for stubs and tombstones).
    pub char_count: u64,
}

/// Payload fields specific to `toolcall` objects.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolcallPayload {
    /// Tool name as reported by the host.
    pub tool: String,
    /// Tool arguments (JSON as received).
    pub args: Value,
    /// Compact human-readable argument rendering for metadata lines.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args_display: Option<String>,
    /// Whether the tool succeeded.
    pub status: ToolStatus,
    /// Back-reference to the chat this call belongs to.
    pub chat_ref: ObjectId,
    /// File objects this call referenced, when the host reported paths.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_refs: Option<Vec<ObjectId>>,
}

/// One turn of conversation inside a chat payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    /// The user content opening this turn.
    pub user: String,
    /// The assistant response, once received.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant: Option<String>,
    /// Model that produced the assistant response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Tool calls absorbed during this turn, in arrival order.
    pub toolcall_ids: Vec<ToolCallId>,
}

impl ChatTurn {
    /// Start a new turn from user content.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            user: content.into(),
            assistant: None,
            model: None,
            toolcall_ids: Vec::new(),
        }
    }
}

/// Payload fields specific to `chat` objects.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatPayload {
    /// Conversation turns in order.
    pub turns: Vec<ChatTurn>,
    /// The session this chat belongs to.
    pub session_ref: ObjectId,
    /// Number of turns (denormalized).
    pub turn_count: u64,
    /// Every tool call ever absorbed into this chat.
    pub toolcall_refs: Vec<ObjectId>,
}

/// Payload fields specific to `system_prompt` objects (content only).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemPromptPayload {}

/// Payload fields specific to `session` objects: the tier sets.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionPayload {
    /// The session identifier.
    pub session_id: SessionId,
    /// Id of the session's chat object.
    pub chat_ref: ObjectId,
    /// Id of the session's system prompt object.
    pub system_prompt_ref: ObjectId,
    /// Every object this session has ever encountered. Append-only.
    pub session_index: Vec<ObjectId>,
    /// Objects visible to the agent as compact metadata lines.
    pub metadata_pool: Vec<ObjectId>,
    /// Objects whose full content is loaded into the render.
    pub active_set: Vec<ObjectId>,
    /// Pool members exempt from auto-collapse.
    pub pinned_set: Vec<ObjectId>,
}

/// The per-kind portion of the mutable payload, tagged on `type`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// `file`
    File(FilePayload),
    /// `toolcall`
    Toolcall(ToolcallPayload),
    /// `chat`
    Chat(ChatPayload),
    /// `system_prompt`
    SystemPrompt(SystemPromptPayload),
    /// `session`
    Session(SessionPayload),
}

impl Payload {
    /// The object kind this payload belongs to.
    #[must_use]
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::File(_) => ObjectKind::File,
            Self::Toolcall(_) => ObjectKind::Toolcall,
            Self::Chat(_) => ObjectKind::Chat,
            Self::SystemPrompt(_) => ObjectKind::SystemPrompt,
            Self::Session(_) => ObjectKind::Session,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Envelope
// ─────────────────────────────────────────────────────────────────────────────

/// The immutable zone of an object, identical across all its versions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    /// Stable object identifier.
    pub id: ObjectId,
    /// Object kind.
    pub kind: ObjectKind,
    /// Source binding, if sourced.
    pub source: Option<SourceBinding>,
    /// Identity hash (equals the id for sourced objects).
    pub identity_hash: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// ObjectDocument
// ─────────────────────────────────────────────────────────────────────────────

/// One version of an object, as stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectDocument {
    /// Stable object identifier (store document key).
    #[serde(rename = "xt/id")]
    pub id: ObjectId,
    /// Source binding, or null for unsourced objects.
    pub source: Option<SourceBinding>,
    /// Identity hash of the envelope.
    pub identity_hash: String,
    /// Literal text content, or null (stub, tombstone, set-only documents).
    pub content: Option<String>,
    /// SHA-256 of the raw source bytes, or null.
    pub source_hash: Option<String>,
    /// SHA-256 of the mutable payload (excluding itself and `source_hash`).
    pub content_hash: Option<String>,
    /// Per-kind payload; contributes the `type` tag to the flat document.
    #[serde(flatten)]
    pub payload: Payload,
}

impl ObjectDocument {
    /// The object's kind.
    #[must_use]
    pub fn kind(&self) -> ObjectKind {
        self.payload.kind()
    }

    /// The immutable envelope of this version.
    #[must_use]
    pub fn envelope(&self) -> Envelope {
        Envelope {
            id: self.id.clone(),
            kind: self.kind(),
            source: self.source.clone(),
            identity_hash: self.identity_hash.clone(),
        }
    }

    /// A discovery stub: sourced, never read (null content, null source hash).
    ///
    /// Tombstoned files share this shape; both render as unread.
    #[must_use]
    pub fn is_stub(&self) -> bool {
        self.source.is_some() && self.content.is_none() && self.source_hash.is_none()
    }

    /// The mutable payload as a flat JSON object: everything except the
    /// envelope keys. This is the value the content hash is computed over.
    pub fn mutable_payload_value(&self) -> serde_json::Result<Value> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            let _ = map.remove("xt/id");
            let _ = map.remove("type");
            let _ = map.remove("source");
            let _ = map.remove("identity_hash");
        }
        Ok(value)
    }

    /// Compute and set `content_hash` from the current mutable payload.
    pub fn finalize(mut self) -> serde_json::Result<Self> {
        let payload = self.mutable_payload_value()?;
        self.content_hash = Some(content_hash(&payload));
        Ok(self)
    }

    // ── Constructors ─────────────────────────────────────────────────────

    /// Build a `file` document version for the given binding.
    ///
    /// `content` and `source_hash` are both `None` for stubs and tombstones.
    pub fn file(
        source: SourceBinding,
        content: Option<String>,
        source_hash: Option<String>,
    ) -> serde_json::Result<Self> {
        let identity = sourced_identity_hash(ObjectKind::File, &source);
        let char_count = content.as_deref().map_or(0, |c| c.chars().count() as u64);
        let file_type = file_type_of(source.path());
        Self {
            id: ObjectId::from(identity.clone()),
            source: Some(source),
            identity_hash: identity,
            content,
            source_hash,
            content_hash: None,
            payload: Payload::File(FilePayload {
                file_type,
                char_count,
            }),
        }
        .finalize()
    }

    /// Build a `toolcall` document from a provider tool-call id.
    pub fn toolcall(
        id: &ToolCallId,
        content: String,
        payload: ToolcallPayload,
    ) -> serde_json::Result<Self> {
        let object_id = ObjectId::from(id);
        Self {
            identity_hash: unsourced_identity_hash(ObjectKind::Toolcall, object_id.as_str()),
            id: object_id,
            source: None,
            content: Some(content),
            source_hash: None,
            content_hash: None,
            payload: Payload::Toolcall(payload),
        }
        .finalize()
    }

    /// Build a `chat` document for a session.
    pub fn chat(session: &SessionId, payload: ChatPayload) -> serde_json::Result<Self> {
        let id = chat_object_id(session);
        Self {
            identity_hash: unsourced_identity_hash(ObjectKind::Chat, id.as_str()),
            id,
            source: None,
            content: None,
            source_hash: None,
            content_hash: None,
            payload: Payload::Chat(payload),
        }
        .finalize()
    }

    /// Build a `system_prompt` document for a session.
    pub fn system_prompt(session: &SessionId, text: String) -> serde_json::Result<Self> {
        let id = system_prompt_object_id(session);
        Self {
            identity_hash: unsourced_identity_hash(ObjectKind::SystemPrompt, id.as_str()),
            id,
            source: None,
            content: Some(text),
            source_hash: None,
            content_hash: None,
            payload: Payload::SystemPrompt(SystemPromptPayload {}),
        }
        .finalize()
    }

    /// Build a `session` document from its tier sets.
    pub fn session(payload: SessionPayload) -> serde_json::Result<Self> {
        let id = session_object_id(&payload.session_id);
        Self {
            identity_hash: unsourced_identity_hash(ObjectKind::Session, id.as_str()),
            id,
            source: None,
            content: None,
            source_hash: None,
            content_hash: None,
            payload: Payload::Session(payload),
        }
        .finalize()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Deterministic unsourced id schemes
// ─────────────────────────────────────────────────────────────────────────────

/// Id of the chat object of a session.
#[must_use]
pub fn chat_object_id(session: &SessionId) -> ObjectId {
    ObjectId::from(format!("chat:{session}"))
}

/// Id of the session document of a session.
#[must_use]
pub fn session_object_id(session: &SessionId) -> ObjectId {
    ObjectId::from(format!("session:{session}"))
}

/// Id of the system prompt object of a session.
#[must_use]
pub fn system_prompt_object_id(session: &SessionId) -> ObjectId {
    ObjectId::from(format!("system_prompt:{session}"))
}

/// Extension-derived file type, lowercased; `unknown` when there is none.
#[must_use]
pub fn file_type_of(path: &str) -> String {
    std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map_or_else(|| "unknown".to_owned(), str::to_ascii_lowercase)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
