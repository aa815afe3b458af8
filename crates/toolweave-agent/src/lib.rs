//! Function-calling agent loop for toolweave.
//!
//! [`FunctionCallingAgent`] alternates between a model, reached through
//! [`ModelInvoker`], and tools: local ones run by a [`ToolInvoker`] and remote
//! ones served by a [`RemoteToolSource`] (normally a
//! [`toolweave_mcp::McpClientPool`]).  Progress is reported to a
//! [`RunObserver`].

pub mod error;
pub mod model;
pub mod observer;
pub mod orchestrator;
pub mod prompt;
pub mod remote;
pub mod stream;
pub mod tools;
pub mod types;
pub mod usage;

pub use error::{AgentError, Result};
pub use model::{
    ModelChunk, ModelConfig, ModelFeature, ModelInvoker, ModelOutput, ModelRequest, ModelResult,
    RawToolCall, ToolCallDelta,
};
pub use observer::{NoopObserver, RunObserver, TracingObserver};
pub use orchestrator::{AgentParams, DEFAULT_MAX_ITERATIONS, FunctionCallingAgent, RunSummary};
pub use remote::RemoteToolSource;
pub use stream::StreamAccumulator;
pub use tools::{LocalTool, NoLocalTools, ToolInvokeMessage, ToolInvoker, ToolProviderType};
pub use types::{
    ContentPart, MessageContent, PromptMessage, Role, ToolCall, ToolDescriptor, ToolResult,
};
pub use usage::{Usage, UsageAccumulator};
