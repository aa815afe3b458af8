//! Agent error types.
//!
//! Configuration and model failures abort a run and surface as
//! [`AgentError`].  Tool failures never do: they are folded into the
//! conversation as error text so the model can react to them.

use toolweave_mcp::McpError;

/// Unified error type for the agent loop.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    // -- Input ---------------------------------------------------------------
    /// The run parameters are missing or out of range.
    #[error("invalid parameters: {reason}")]
    InvalidParameters { reason: String },

    /// The remote server configuration could not be parsed.
    #[error("config error: {reason}")]
    Config { reason: String },

    // -- Model ---------------------------------------------------------------
    /// The model invoker failed.
    #[error("model invocation failed: {reason}")]
    ModelInvocation { reason: String },

    /// The model output could not be interpreted (e.g. tool-call arguments
    /// that are not a JSON object).
    #[error("model output parse error: {reason}")]
    ModelParse { reason: String },

    // -- Tools ---------------------------------------------------------------
    /// A local tool invocation failed.  Caught by the loop and turned into
    /// error text; returned by [`crate::ToolInvoker`] implementations.
    #[error("tool `{tool_name}` failed: {reason}")]
    ToolInvocation { tool_name: String, reason: String },

    // -- Upstream ------------------------------------------------------------
    /// A tool-protocol error (pool construction, discovery, or a call).
    #[error(transparent)]
    Mcp(#[from] McpError),
}

/// Convenience alias used throughout the agent crate.
pub type Result<T> = std::result::Result<T, AgentError>;
