//! Context assembly: from the host's raw message stream to the ordered
//! LLM-facing render.
//!
//! The assembler consumes the harness-supplied message array through a
//! monotonic cursor. The host array is a transient event log: when it
//! shrinks (compaction, session restore) the cursor resets to the new
//! length and nothing is replayed, because the engine's state is canonical.
//! No diffing, no reconciliation.
//!
//! The render is a fixed four-block sequence. Blocks 1–3 (system prompt,
//! metadata pool, chat history) form a stable prefix for provider-side
//! prompt caching; block 4 (active content) is the volatile tail.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use loupe_core::ids::{ObjectId, ToolCallId};
use loupe_core::object::{
    session_object_id, ChatPayload, ChatTurn, ObjectDocument, Payload, ToolStatus,
    ToolcallPayload,
};
use loupe_fs::FsResolver;
use loupe_store::Query;

use crate::constants::ARGS_DISPLAY_MAX_CHARS;
use crate::errors::AssembleError;
use crate::session::SessionEngine;

// ─────────────────────────────────────────────────────────────────────────────
// Host messages
// ─────────────────────────────────────────────────────────────────────────────

/// One entry of the host's append-only message array.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "camelCase")]
pub enum HostMessage {
    /// A user turn.
    User {
        /// User content.
        content: String,
    },
    /// The assistant response to the current turn.
    Assistant {
        /// Assistant content.
        content: String,
        /// Model that produced it.
        #[serde(skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },
    /// A tool execution result.
    #[serde(rename_all = "camelCase")]
    ToolResult {
        /// Provider-supplied tool-call id (unique within the session).
        tool_call_id: ToolCallId,
        /// Tool name.
        tool: String,
        /// Tool arguments as reported by the host.
        args: Value,
        /// Result text.
        content: String,
        /// Whether the tool succeeded.
        ok: bool,
        /// File objects the call referenced, when the host resolved paths.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        file_refs: Vec<ObjectId>,
    },
}

impl HostMessage {
    /// Convenience constructor for a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    /// Convenience constructor for an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>, model: Option<String>) -> Self {
        Self::Assistant {
            content: content.into(),
            model,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rendered output
// ─────────────────────────────────────────────────────────────────────────────

/// Message role in the LLM-facing render.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System message.
    System,
    /// User message.
    User,
    /// Assistant message.
    Assistant,
}

/// One message of the assembled render.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RenderedMessage {
    /// Role.
    pub role: Role,
    /// Full text content.
    pub content: String,
}

/// What one `absorb` call did.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AbsorbOutcome {
    /// Host messages consumed this call.
    pub consumed: usize,
    /// The host replaced its array; the cursor was reset, nothing consumed.
    pub cursor_reset: bool,
    /// Tool calls auto-collapsed out of the active set.
    pub collapsed: Vec<ObjectId>,
}

// ─────────────────────────────────────────────────────────────────────────────
// ContextAssembler
// ─────────────────────────────────────────────────────────────────────────────

/// Cursor-based consumer of the host event stream and renderer of the
/// LLM-facing message sequence.
pub struct ContextAssembler {
    cursor: usize,
    chat: ChatPayload,
}

impl ContextAssembler {
    /// Assembler for a freshly created session.
    #[must_use]
    pub fn new(engine: &SessionEngine) -> Self {
        Self {
            cursor: 0,
            chat: ChatPayload {
                turns: Vec::new(),
                session_ref: session_object_id(engine.session_id()),
                turn_count: 0,
                toolcall_refs: Vec::new(),
            },
        }
    }

    /// Assembler for a resumed session: chat state is loaded from the
    /// store, and the cursor starts at the host's current array length so
    /// nothing is replayed.
    pub async fn resume(
        engine: &SessionEngine,
        host_len: usize,
    ) -> Result<Self, AssembleError> {
        let chat = match engine.store().get(engine.chat_ref()).await? {
            Some(ObjectDocument {
                payload: Payload::Chat(chat),
                ..
            }) => chat,
            Some(_) => {
                return Err(AssembleError::Invalid(format!(
                    "document {} is not a chat",
                    engine.chat_ref()
                )))
            }
            None => {
                return Err(AssembleError::Invalid(format!(
                    "chat document {} missing",
                    engine.chat_ref()
                )))
            }
        };
        Ok(Self {
            cursor: host_len,
            chat,
        })
    }

    /// Current cursor position into the host array.
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// The accumulated chat turns.
    #[must_use]
    pub fn turns(&self) -> &[ChatTurn] {
        &self.chat.turns
    }

    // ── Consumption ──────────────────────────────────────────────────────

    /// Consume the unseen suffix of the host message array.
    ///
    /// A shrunken array means the harness replaced its log: the cursor
    /// resets to the new length and nothing is consumed or replayed.
    pub async fn absorb(
        &mut self,
        engine: &mut SessionEngine,
        messages: &[HostMessage],
    ) -> Result<AbsorbOutcome, AssembleError> {
        if messages.len() < self.cursor {
            debug!(
                old_cursor = self.cursor,
                new_len = messages.len(),
                "host replaced its message array, resetting cursor"
            );
            self.cursor = messages.len();
            return Ok(AbsorbOutcome {
                cursor_reset: true,
                ..AbsorbOutcome::default()
            });
        }

        let fresh = &messages[self.cursor..];
        if fresh.is_empty() {
            return Ok(AbsorbOutcome::default());
        }

        let mut outcome = AbsorbOutcome::default();
        let mut chat_dirty = false;

        for message in fresh {
            match message {
                HostMessage::User { content } => {
                    self.chat.turns.push(ChatTurn::user(content.clone()));
                    chat_dirty = true;
                }
                HostMessage::Assistant { content, model } => {
                    if self.chat.turns.is_empty() {
                        self.chat.turns.push(ChatTurn::user(String::new()));
                    }
                    if let Some(turn) = self.chat.turns.last_mut() {
                        turn.assistant = Some(content.clone());
                        turn.model = model.clone();
                    }
                    chat_dirty = true;
                }
                HostMessage::ToolResult {
                    tool_call_id,
                    tool,
                    args,
                    content,
                    ok,
                    file_refs,
                } => {
                    let collapsed = self
                        .absorb_tool_result(
                            engine,
                            tool_call_id,
                            tool,
                            args,
                            content,
                            *ok,
                            file_refs,
                        )
                        .await?;
                    outcome.collapsed.extend(collapsed);
                    chat_dirty = true;
                }
            }
            self.cursor += 1;
            outcome.consumed += 1;
        }

        if chat_dirty {
            self.persist_chat(engine).await?;
        }
        Ok(outcome)
    }

    /// Turn a tool result into an unsourced tool-call object, thread it
    /// through the tiers, and recompute the collapse window.
    async fn absorb_tool_result(
        &mut self,
        engine: &mut SessionEngine,
        tool_call_id: &ToolCallId,
        tool: &str,
        args: &Value,
        content: &str,
        ok: bool,
        file_refs: &[ObjectId],
    ) -> Result<Vec<ObjectId>, AssembleError> {
        let payload = ToolcallPayload {
            tool: tool.to_owned(),
            args: args.clone(),
            args_display: Some(render_args(args)),
            status: if ok { ToolStatus::Ok } else { ToolStatus::Fail },
            chat_ref: engine.chat_ref().clone(),
            file_refs: (!file_refs.is_empty()).then(|| file_refs.to_vec()),
        };
        let doc = ObjectDocument::toolcall(tool_call_id, content.to_owned(), payload)?;

        let tx = engine.store().put(&doc).await?;
        engine.store().await_tx(&tx).await?;

        if self.chat.turns.is_empty() {
            self.chat.turns.push(ChatTurn::user(String::new()));
        }
        if let Some(turn) = self.chat.turns.last_mut() {
            turn.toolcall_ids.push(tool_call_id.clone());
        }
        self.chat.toolcall_refs.push(ObjectId::from(tool_call_id));

        Ok(engine.absorb_toolcall(&doc, &self.chat.turns).await?)
    }

    /// Write the chat document version reflecting the absorbed state.
    async fn persist_chat(&mut self, engine: &SessionEngine) -> Result<(), AssembleError> {
        self.chat.turn_count = self.chat.turns.len() as u64;
        let doc = ObjectDocument::chat(engine.session_id(), self.chat.clone())?;
        let tx = engine.store().put(&doc).await?;
        engine.store().await_tx(&tx).await?;
        Ok(())
    }

    // ── Render ───────────────────────────────────────────────────────────

    /// Produce the ordered LLM-facing message sequence.
    ///
    /// 1. System message with the system prompt.
    /// 2. One user message rendering the metadata pool, one line per member.
    /// 3. The chat history, turn by turn; tool results appear as
    ///    `toolcall_ref` metadata lines only.
    /// 4. One user message per active object with its full content.
    pub async fn render(
        &self,
        engine: &SessionEngine,
        resolver: &FsResolver,
    ) -> Result<Vec<RenderedMessage>, AssembleError> {
        let mut out = Vec::new();

        // Block 1: system prompt.
        let prompt_text = engine
            .store()
            .get(engine.system_prompt_ref())
            .await?
            .and_then(|d| d.content)
            .unwrap_or_default();
        out.push(RenderedMessage {
            role: Role::System,
            content: prompt_text,
        });

        // Block 2: metadata pool. Pool iteration order is the sorted id
        // order of the underlying set, so the block is stable for caching.
        let pool_ids: Vec<ObjectId> = engine.metadata_pool().iter().cloned().collect();
        let pool_docs = engine.store().query(&Query::by_ids(pool_ids)).await?;
        let mut lines = vec!["METADATA_POOL".to_owned()];
        for doc in &pool_docs {
            lines.push(metadata_line(doc, resolver));
        }
        out.push(RenderedMessage {
            role: Role::User,
            content: lines.join("\n"),
        });

        // Block 3: chat history.
        for turn in &self.chat.turns {
            out.push(RenderedMessage {
                role: Role::User,
                content: turn.user.clone(),
            });
            if let Some(assistant) = &turn.assistant {
                out.push(RenderedMessage {
                    role: Role::Assistant,
                    content: assistant.clone(),
                });
            }
            for id in &turn.toolcall_ids {
                out.push(RenderedMessage {
                    role: Role::User,
                    content: toolcall_ref_line(&ObjectId::from(id), &pool_docs),
                });
            }
        }

        // Block 4: active content, sorted id order.
        for id in engine.active_set() {
            let doc = match pool_docs.iter().find(|d| d.id == *id) {
                Some(doc) => doc.clone(),
                None => match engine.store().get(id).await? {
                    Some(doc) => doc,
                    None => continue,
                },
            };
            if doc.kind().is_infrastructure() {
                continue;
            }
            let Some(content) = doc.content else { continue };
            out.push(RenderedMessage {
                role: Role::User,
                content: format!("ACTIVE_CONTENT id={id}\n{content}"),
            });
        }

        Ok(out)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Line formats
// ─────────────────────────────────────────────────────────────────────────────

fn metadata_line(doc: &ObjectDocument, resolver: &FsResolver) -> String {
    match &doc.payload {
        Payload::File(file) => {
            let display = doc
                .source
                .as_ref()
                .map_or_else(String::new, |s| resolver.reverse_resolve(s.path()));
            if doc.content.is_none() {
                format!(
                    "id={} type=file path={} file_type={} [unread]",
                    doc.id, display, file.file_type
                )
            } else {
                format!(
                    "id={} type=file path={} file_type={} char_count={}",
                    doc.id, display, file.file_type, file.char_count
                )
            }
        }
        Payload::Toolcall(tc) => match &tc.args_display {
            Some(args) if !args.is_empty() => format!(
                "id={} type=toolcall tool={} status={} args={}",
                doc.id, tc.tool, tc.status, args
            ),
            _ => format!(
                "id={} type=toolcall tool={} status={}",
                doc.id, tc.tool, tc.status
            ),
        },
        // Infrastructure never reaches the pool; render defensively anyway.
        _ => format!("id={} type={}", doc.id, doc.kind()),
    }
}

fn toolcall_ref_line(id: &ObjectId, pool_docs: &[ObjectDocument]) -> String {
    match pool_docs.iter().find(|d| d.id == *id) {
        Some(ObjectDocument {
            payload: Payload::Toolcall(tc),
            ..
        }) => format!("toolcall_ref id={id} tool={} status={}", tc.tool, tc.status),
        _ => format!("toolcall_ref id={id}"),
    }
}

/// Compact single-line rendering of tool arguments.
fn render_args(args: &Value) -> String {
    let rendered = match args {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| format!("{k}={}", compact_value(v)))
            .collect::<Vec<_>>()
            .join(" "),
        other => other.to_string(),
    };
    truncate_chars(&rendered, ARGS_DISPLAY_MAX_CHARS)
}

fn compact_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_owned();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
