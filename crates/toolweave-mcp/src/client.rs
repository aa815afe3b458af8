//! Protocol client.
//!
//! [`McpClient`] speaks the tool protocol (`initialize`, `tools/list`,
//! `tools/call`) over any [`Transport`].  It owns exactly one transport and
//! enforces that the handshake completes before anything else is sent.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::{Map, Value, json};

use crate::config::{ServerConfig, TransportKind};
use crate::error::{McpError, Result};
use crate::protocol::{
    JsonRpcRequest, JsonRpcResponse, McpToolDefinition, ToolsListResult, call_tool_params,
    initialize_params, methods,
};
use crate::transport::{SseTransport, StreamableHttpTransport, Transport};

/// A connected, initialized client for one tool server.
pub struct McpClient {
    name: String,
    transport: Box<dyn Transport>,
    server_info: OnceLock<Value>,
    closed: AtomicBool,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("name", &self.name)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl McpClient {
    /// Connect to a server and run the handshake.
    ///
    /// On any failure the half-open transport is closed before the error is
    /// returned.
    pub async fn connect(name: &str, config: &ServerConfig) -> Result<Self> {
        let transport: Box<dyn Transport> = match config.transport {
            TransportKind::Sse => Box::new(SseTransport::connect(name, config).await?),
            TransportKind::StreamableHttp => Box::new(StreamableHttpTransport::new(name, config)?),
        };

        let client = Self::with_transport(transport);
        if let Err(e) = client.initialize().await {
            tracing::error!(server = %name, error = %e, "initialize failed");
            client.close().await;
            return Err(e);
        }
        Ok(client)
    }

    /// Wrap an already-connected transport.  [`initialize`](Self::initialize)
    /// must be called before any other operation.
    pub fn with_transport(transport: Box<dyn Transport>) -> Self {
        Self {
            name: transport.server_name().to_owned(),
            transport,
            server_info: OnceLock::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// The configured server name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the handshake has completed.
    pub fn is_initialized(&self) -> bool {
        self.server_info.get().is_some()
    }

    /// The `initialize` result reported by the server, once known.
    pub fn server_info(&self) -> Option<&Value> {
        self.server_info.get()
    }

    /// Run the protocol handshake.
    ///
    /// A JSON-RPC error in the response is fatal.  On success the
    /// `notifications/initialized` notification is sent.
    pub async fn initialize(&self) -> Result<()> {
        let result = self.request(methods::INITIALIZE, initialize_params()).await?;

        self.transport
            .send(JsonRpcRequest::notification(methods::INITIALIZED, json!({})))
            .await?;

        let protocol = result
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_owned();
        tracing::info!(server = %self.name, protocol = %protocol, "server initialized");

        // A concurrent second handshake keeps the first result.
        let _ = self.server_info.set(result);
        Ok(())
    }

    /// List the tools the server declares.
    pub async fn list_tools(&self) -> Result<Vec<McpToolDefinition>> {
        self.ensure_initialized(methods::TOOLS_LIST)?;
        let result = self.request(methods::TOOLS_LIST, json!({})).await?;

        let list: ToolsListResult =
            serde_json::from_value(result).map_err(|e| McpError::MalformedResponse {
                server: self.name.clone(),
                method: methods::TOOLS_LIST.into(),
                reason: e.to_string(),
            })?;

        tracing::debug!(server = %self.name, count = list.tools.len(), "listed tools");
        Ok(list.tools)
    }

    /// Invoke one tool.
    ///
    /// Returns the `content` array of the result when present, otherwise the
    /// whole result object (progress-style payloads carry no `content`).
    pub async fn call_tool(&self, name: &str, arguments: &Map<String, Value>) -> Result<Value> {
        self.ensure_initialized(methods::TOOLS_CALL)?;

        tracing::debug!(server = %self.name, tool = %name, "calling tool");
        let result = self
            .request(methods::TOOLS_CALL, call_tool_params(name, arguments))
            .await?;

        Ok(match result {
            Value::Object(mut obj) => match obj.remove("content") {
                Some(content) => content,
                None => Value::Object(obj),
            },
            other => other,
        })
    }

    /// Close the underlying transport.  Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.transport.close().await;
        tracing::debug!(server = %self.name, "client closed");
    }

    fn ensure_initialized(&self, method: &str) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(McpError::NotInitialized {
                server: self.name.clone(),
                method: method.to_owned(),
            })
        }
    }

    /// Send one request and unwrap the JSON-RPC envelope.
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.transport.next_request_id();
        let raw = self
            .transport
            .send(JsonRpcRequest::new(id, method, params))
            .await?
            .ok_or_else(|| McpError::MalformedResponse {
                server: self.name.clone(),
                method: method.to_owned(),
                reason: "no response to a request".into(),
            })?;

        let response: JsonRpcResponse =
            serde_json::from_value(raw).map_err(|e| McpError::MalformedResponse {
                server: self.name.clone(),
                method: method.to_owned(),
                reason: e.to_string(),
            })?;

        if let Some(err) = response.error {
            return Err(McpError::Protocol {
                server: self.name.clone(),
                method: method.to_owned(),
                code: err.code,
                message: err.message,
            });
        }

        response.result.ok_or_else(|| McpError::MalformedResponse {
            server: self.name.clone(),
            method: method.to_owned(),
            reason: "response has neither result nor error".into(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
