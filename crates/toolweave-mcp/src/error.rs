//! Tool-protocol error types.
//!
//! Every failure in the transport, protocol client, and client pool surfaces
//! as an [`McpError`].  Variants are grouped by the stage that failed so
//! callers can tell a bad configuration apart from a dead connection or a
//! server-side JSON-RPC error.

/// Unified error type for the tool-protocol client.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    // -- Configuration -------------------------------------------------------
    /// The server configuration is malformed or fails validation.
    #[error("config error: {reason}")]
    Config { reason: String },

    // -- Connection ----------------------------------------------------------
    /// The connection to the server could not be established or was lost.
    #[error("{server} - connection failed: {reason}")]
    Connection { server: String, reason: String },

    /// The announced request endpoint does not share the connection origin.
    ///
    /// Never retried: a server announcing a foreign endpoint is treated as
    /// hostile.
    #[error("{server} - endpoint origin does not match connection origin: {endpoint}")]
    OriginMismatch { server: String, endpoint: String },

    /// The background event-stream listener exited without announcing an
    /// endpoint or reporting an error.
    #[error("{server} - event stream listener died unexpectedly")]
    ListenerDied { server: String },

    /// A request was attempted before the connection was usable.
    #[error("{server} - not connected")]
    NotConnected { server: String },

    /// A request other than `initialize` was attempted before the handshake.
    #[error("{server} - `{method}` called before initialize")]
    NotInitialized { server: String, method: String },

    // -- Transport -----------------------------------------------------------
    /// The server answered a request with a non-success HTTP status.
    #[error("{server} - server returned {status}: {body}")]
    Http {
        server: String,
        status: u16,
        body: String,
    },

    /// The HTTP layer failed (network error, invalid body, etc.).
    #[error("{server} - transport error: {reason}")]
    Transport { server: String, reason: String },

    /// No response arrived within the configured read timeout.
    #[error("{server} - timed out after {seconds:.1}s waiting for {what}")]
    Timeout {
        server: String,
        seconds: f64,
        what: String,
    },

    // -- Protocol ------------------------------------------------------------
    /// The server returned a JSON-RPC `error` object.
    #[error("{server} - {method} error {code}: {message}")]
    Protocol {
        server: String,
        method: String,
        code: i64,
        message: String,
    },

    /// A response payload did not have the expected shape.
    #[error("{server} - malformed {method} response: {reason}")]
    MalformedResponse {
        server: String,
        method: String,
        reason: String,
    },

    // -- Pool ----------------------------------------------------------------
    /// No connected server exposes a tool with this name.
    #[error("tool not found: `{tool_name}`")]
    ToolNotFound { tool_name: String },

    // -- Serialization -------------------------------------------------------
    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the protocol crate.
pub type Result<T> = std::result::Result<T, McpError>;

impl McpError {
    /// Whether retrying the same operation could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::Transport { .. } | Self::Timeout { .. } => true,
            Self::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Wrap a [`reqwest::Error`] raised while talking to `server`.
    pub(crate) fn transport(server: &str, err: reqwest::Error) -> Self {
        Self::Transport {
            server: server.to_owned(),
            reason: err.to_string(),
        }
    }
}
