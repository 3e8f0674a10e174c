//! Token streaming over Socket.IO.
//!
//! - `packet`: Engine.IO / Socket.IO text packet codec.
//! - `proto`: typed request, wire payload builder, and event decoder.
//! - `client`: websocket transport, handshake budget, and session factory.
//! - `session`: single-request state machine with guaranteed teardown.
//! - `sink`: callback adapter isolating caller sink failures.

/// Websocket transport and session factory.
pub mod client;
/// Engine.IO / Socket.IO packet codec.
pub mod packet;
/// Request model and event decoding.
pub mod proto;
/// Streaming session state machine.
pub mod session;
/// Token sinks and the callback adapter.
pub mod sink;
