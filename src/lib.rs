//! Rust client for an Eclair node's HTTP RPC and realtime event stream.
//!
//! The crate is organized by transport surface:
//! - `rpc`: authenticated multipart-form RPC calls.
//! - `stream`: auto-reconnecting websocket event stream.
//! - `endpoint`: host normalization and Basic authentication.
//! - `config`: recognized configuration options.
//! - `document`: path-queryable JSON values returned by both transports.
//! - `backoff`: dial retry spacing.

/// Dial retry spacing used by the event stream.
pub mod backoff;
/// Client configuration and environment loading.
pub mod config;
/// Path-queryable JSON documents.
pub mod document;
/// Node address and credential handling.
pub mod endpoint;
/// RPC client, parameters and error types.
pub mod rpc;
/// Realtime event stream client.
pub mod stream;

pub use config::{ClientConfig, ConfigError};
pub use document::Document;
pub use endpoint::{Credentials, Endpoint};
pub use rpc::{EndpointStyle, Params, RpcClient, RpcError};
pub use stream::classify::ReconnectPolicy;
pub use stream::client::{EventStream, EventStreamClient, StreamStatus};
