//! # loupe-core
//!
//! Foundation types for the Loupe context manager.
//!
//! This crate provides the shared vocabulary that all other Loupe crates
//! depend on:
//!
//! - **Branded IDs**: `ObjectId`, `SessionId`, `ToolCallId` as newtypes for type safety
//! - **Canonical JSON**: the deterministic serialization every hash is computed over
//! - **Hashing**: identity, source, and content digests (SHA-256, lowercase hex)
//! - **Source bindings**: the tagged union describing what a sourced object tracks
//! - **Object documents**: envelope/payload split with typed per-kind payloads

#![deny(unsafe_code)]

pub mod canonical;
pub mod hash;
pub mod ids;
pub mod logging;
pub mod object;
pub mod source;
