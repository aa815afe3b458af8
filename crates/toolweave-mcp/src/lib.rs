//! Tool-protocol client for toolweave.
//!
//! Connects to remote tool servers over JSON-RPC 2.0, using either an
//! event-stream transport ([`SseTransport`]) or a session-token HTTP
//! transport ([`StreamableHttpTransport`]).  [`McpClient`] runs the protocol
//! on top of one transport and [`McpClientPool`] routes tool calls across
//! every configured server.

pub mod client;
pub mod config;
pub mod error;
pub mod pool;
pub mod protocol;
pub mod sse;
pub mod transport;

pub use client::McpClient;
pub use config::{ServerConfig, ServersConfig, TransportKind};
pub use error::{McpError, Result};
pub use pool::{McpClientPool, RESULT_PREFIX, RetryPolicy, render_tool_result};
pub use protocol::{JsonRpcRequest, JsonRpcResponse, McpToolDefinition};
pub use transport::{SESSION_HEADER, SseTransport, StreamableHttpTransport, Transport};
