//! Transport sessions.
//!
//! A transport owns one physical connection to one tool server and moves
//! JSON-RPC envelopes across it.  Two variants share the [`Transport`]
//! contract:
//!
//! - [`SseTransport`] -- a long-lived event stream delivers responses, requests
//!   are POSTed to an endpoint the server announces on that stream.
//! - [`StreamableHttpTransport`] -- every request is a single POST, scoped to a
//!   server-issued session by a header.

mod sse;
mod streamable;

pub use sse::SseTransport;
pub use streamable::{SESSION_HEADER, StreamableHttpTransport};

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::JsonRpcRequest;

/// The contract shared by every transport variant.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The configured server name (used in logs and errors).
    fn server_name(&self) -> &str;

    /// Allocate the next request id.  Ids are monotonic and never reused
    /// while the transport is open.
    fn next_request_id(&self) -> u64;

    /// Send one envelope.
    ///
    /// Returns the raw response message for requests, `None` for
    /// notifications.  A JSON-RPC `error` object is *not* treated as a
    /// failure here; the protocol client interprets it.
    async fn send(&self, request: JsonRpcRequest) -> Result<Option<serde_json::Value>>;

    /// Tear the connection down.  Safe to call more than once and on a
    /// transport whose connect never completed; failures are logged, never
    /// returned.
    async fn close(&self);
}

/// Build the shared HTTP client for a server.
pub(crate) fn build_http_client(
    server: &str,
    config: &crate::config::ServerConfig,
) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .default_headers(config.header_map()?)
        .connect_timeout(config.timeout())
        .build()
        .map_err(|e| crate::error::McpError::Connection {
            server: server.to_owned(),
            reason: format!("failed to build HTTP client: {e}"),
        })
}
