//! # loupe-engine
//!
//! The session-facing half of the Loupe context manager.
//!
//! - **Indexer**: the read-hash-compare-write funnel every sourced-object
//!   mutation goes through: no-op for unchanged sources, append-only
//!   version for changed ones, stubs for discovered-but-unread files,
//!   tombstones for deletions.
//! - **Session engine**: the three context tiers (session index ⊇ metadata
//!   pool ⊇ active set) plus the pinned set, with activation semantics,
//!   auto-collapse, durable persistence, and pause/resume reconciliation.
//! - **Context assembler**: cursor-based consumption of the host message
//!   stream and the ordered, cache-stable LLM-facing render.
//! - **Tracker supervisor / watch loop**: file watchers at canonical paths
//!   feeding change events back into the indexer.

#![deny(unsafe_code)]

pub mod assembler;
pub mod constants;
pub mod errors;
pub mod indexer;
pub mod session;
pub mod tracker;
pub mod watch;

pub use assembler::{ContextAssembler, HostMessage, RenderedMessage, Role};
pub use errors::{AssembleError, IndexError, SessionError};
pub use indexer::{IndexOutcome, Indexed, Indexer};
pub use session::{AutoCollapseConfig, SessionEngine};
pub use tracker::TrackerSupervisor;
