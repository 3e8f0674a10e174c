//! Rust SDK for the LLM streaming and file manager services.
//!
//! The crate is organized by transport surface:
//! - `client`: facade combining the REST routes and token streaming.
//! - `stream`: Socket.IO token streaming, sessions, and callback adapters.
//! - `chat_api`: REST client for status, catalog, audio, and one-shot requests.
//! - `file_manager`: REST client for bucket file storage.
//! - `config`, `retry`, `error_body`: shared configuration and helpers.

/// REST client for the chat service routes.
pub mod chat_api;
/// Combined REST and streaming client.
pub mod client;
/// Service endpoints, timeouts, and environment overrides.
pub mod config;
/// Human-readable messages for failed HTTP responses.
pub mod error_body;
/// File manager client and file DTOs.
pub mod file_manager;
/// Retry and timeout helpers used across the SDK.
pub mod retry;
/// Token streaming client, protocol types, and session state machine.
pub mod stream;

