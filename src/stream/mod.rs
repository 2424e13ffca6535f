//! Realtime event stream modules.
//!
//! - `client`: websocket worker, reconnect state machine and stream handle.
//! - `classify`: read-failure classification driving reconnect decisions.
//! - `heartbeat`: per-connection keepalive ticker.

/// Read-failure classification.
pub mod classify;
/// Websocket connection worker and consumer handle.
pub mod client;
mod heartbeat;
