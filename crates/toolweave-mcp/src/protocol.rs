//! JSON-RPC 2.0 envelopes and the tool-protocol payload types.
//!
//! Only the request shapes needed for tool discovery and invocation are
//! modelled: `initialize`, `notifications/initialized`, `tools/list`, and
//! `tools/call`.  The protocol version targeted is `2024-11-05`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// The protocol version sent during `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// The client name reported during `initialize`.
pub const CLIENT_NAME: &str = "toolweave";

/// The client version reported during `initialize`.
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Method names used by the client.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
}

// ---------------------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request or notification.
///
/// Notifications carry no `id` and never receive a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Request identifier; `None` for notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// The method to invoke.
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: Value,
}

impl JsonRpcRequest {
    /// Build a request that expects a response.
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    /// Build a notification (no id, no response).
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id: None,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always `"2.0"`.
    #[serde(default)]
    pub jsonrpc: String,
    /// Echoed from the request.
    #[serde(default)]
    pub id: Option<Value>,
    /// Present on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Present on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code (negative numbers are reserved by JSON-RPC).
    #[serde(default)]
    pub code: i64,
    /// Human-readable error message.
    #[serde(default)]
    pub message: String,
    /// Optional structured data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Extract a numeric request id from a raw incoming message.
///
/// Servers echo the id they received; string ids holding a number are
/// accepted as well.
pub fn message_id(message: &Value) -> Option<u64> {
    match message.get("id")? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tool-protocol payloads
// ---------------------------------------------------------------------------

/// Build the `initialize` parameters.
pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": CLIENT_NAME,
            "version": CLIENT_VERSION,
        }
    })
}

/// Build the `tools/call` parameters.
pub fn call_tool_params(name: &str, arguments: &Map<String, Value>) -> Value {
    json!({
        "name": name,
        "arguments": arguments,
    })
}

/// A tool as declared by a remote server in `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpToolDefinition {
    /// The machine-readable tool name.
    pub name: String,
    /// Human-readable description of the tool.
    #[serde(default)]
    pub description: String,
    /// JSON Schema describing the tool's input parameters.
    #[serde(rename = "inputSchema", default = "empty_schema")]
    pub input_schema: Value,
}

fn empty_schema() -> Value {
    json!({"type": "object"})
}

/// The `result` body of a `tools/list` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolsListResult {
    /// Tools declared by the server.
    #[serde(default)]
    pub tools: Vec<McpToolDefinition>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
