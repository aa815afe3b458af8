//! Conversation and tool types.
//!
//! These model what flows between the loop, the model invoker, and the tool
//! invokers.  They are provider-agnostic; a [`crate::ModelInvoker`]
//! implementation translates them into its own wire format.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use toolweave_mcp::McpToolDefinition;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// The role of a participant in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions that shape model behavior.
    System,
    /// Input from the human user.
    User,
    /// Output from the model.
    Assistant,
    /// Result of a tool invocation, fed back to the model.
    Tool,
}

/// One block of a multi-part message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentPart {
    /// Plain text.
    Text { data: String },
    /// An image, as a URL or data URI.
    Image { data: String },
    /// Any other attachment, as a URL or data URI.
    File { data: String },
}

impl ContentPart {
    /// The raw payload of the part.
    pub fn data(&self) -> &str {
        match self {
            Self::Text { data } | Self::Image { data } | Self::File { data } => data,
        }
    }

    /// The part as it appears in a text-only prompt: text stays, media
    /// becomes a placeholder.
    pub fn placeholder_text(&self) -> &str {
        match self {
            Self::Text { data } => data,
            Self::Image { .. } => "[image]",
            Self::File { .. } => "[file]",
        }
    }
}

/// Message content: plain text or a list of parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl MessageContent {
    /// The fragments a caller sees for this content: the whole text, or the
    /// payload of every part in order.
    pub fn fragments(&self) -> Vec<&str> {
        match self {
            Self::Text(text) => vec![text.as_str()],
            Self::Parts(parts) => parts.iter().map(ContentPart::data).collect(),
        }
    }

    /// All fragments concatenated.
    pub fn concatenated(&self) -> String {
        self.fragments().concat()
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.is_empty(),
            Self::Parts(parts) => parts.is_empty(),
        }
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    /// Who produced this message.
    pub role: Role,

    /// The message body.  Empty for assistant messages that only carry tool
    /// calls.
    #[serde(default)]
    pub content: MessageContent,

    /// Tool calls requested by the assistant.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// For tool messages: the call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// For tool messages: the tool that produced it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl PromptMessage {
    fn new(role: Role, content: MessageContent) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, MessageContent::Text(content.into()))
    }

    /// Create a plain-text user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, MessageContent::Text(content.into()))
    }

    /// Create a multi-part user message.
    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self::new(Role::User, MessageContent::Parts(parts))
    }

    /// Create an assistant text message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, MessageContent::Text(content.into()))
    }

    /// Create an assistant message carrying tool calls and no text.
    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::new(Role::Assistant, MessageContent::default())
        }
    }

    /// Create a tool result message.
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            name: Some(tool_name.into()),
            ..Self::new(Role::Tool, MessageContent::Text(content.into()))
        }
    }

    /// The message body as a single string.
    pub fn text(&self) -> String {
        self.content.concatenated()
    }
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identifier assigned by the model; echoed back with the result.
    pub id: String,
    /// The tool to invoke.
    pub name: String,
    /// Arguments keyed by parameter name.
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// A tool offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema for the arguments; always carries `properties` and
    /// `required`.
    pub parameters: Value,
}

impl ToolDescriptor {
    /// Build a descriptor, normalizing the schema.
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: normalize_schema(parameters),
        }
    }
}

impl From<&McpToolDefinition> for ToolDescriptor {
    fn from(def: &McpToolDefinition) -> Self {
        Self::new(def.name.clone(), def.description.clone(), def.input_schema.clone())
    }
}

/// Ensure a parameter schema is an object with `properties` and `required`.
pub fn normalize_schema(schema: Value) -> Value {
    let mut schema = match schema {
        Value::Object(obj) => obj,
        _ => {
            let mut obj = Map::new();
            obj.insert("type".into(), json!("object"));
            obj
        }
    };
    schema.entry("properties").or_insert_with(|| json!({}));
    schema.entry("required").or_insert_with(|| json!([]));
    Value::Object(schema)
}

/// The outcome of one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The [`ToolCall::id`] this result answers.
    pub tool_call_id: String,
    pub tool_name: String,
    /// The parameters the tool actually received.
    pub input: Map<String, Value>,
    /// Text fed back to the model.
    pub output: String,
    /// Set when the call could not be resolved or failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(call: &ToolCall, input: Map<String, Value>, output: impl Into<String>) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            input,
            output: output.into(),
            error: None,
        }
    }

    /// A failed call.  The error text doubles as the output so the model
    /// sees it.
    pub fn failure(call: &ToolCall, input: Map<String, Value>, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            input,
            output: error.clone(),
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
