//! The model boundary.
//!
//! Inference itself is supplied by the embedding application through
//! [`ModelInvoker`].  The loop hands it a [`ModelRequest`] and gets back
//! either a stream of [`ModelChunk`]s or one [`ModelResult`].

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AgentError, Result};
use crate::types::{MessageContent, PromptMessage, ToolCall, ToolDescriptor};
use crate::usage::Usage;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Capabilities a model may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelFeature {
    ToolCall,
    MultiToolCall,
    /// Tool calls can be delivered while streaming.
    StreamToolCall,
    Vision,
    Document,
}

/// The model a run talks to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: String,
    pub model: String,

    /// Provider-specific sampling parameters, passed through untouched.
    /// A `stop` array here becomes the stop words of every call.
    #[serde(default)]
    pub completion_params: Map<String, Value>,

    #[serde(default)]
    pub features: Vec<ModelFeature>,

    /// Earlier conversation turns, placed after the instruction and before
    /// the query.
    #[serde(default)]
    pub history: Vec<PromptMessage>,
}

impl ModelConfig {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn with_feature(mut self, feature: ModelFeature) -> Self {
        if !self.features.contains(&feature) {
            self.features.push(feature);
        }
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.completion_params.insert(key.into(), value);
        self
    }

    /// Whether calls should be streamed.
    pub fn streams_tool_calls(&self) -> bool {
        self.features.contains(&ModelFeature::StreamToolCall)
    }

    /// Stop words from `completion_params.stop`.
    pub fn stop_words(&self) -> Vec<String> {
        self.completion_params
            .get("stop")
            .and_then(Value::as_array)
            .map(|words| {
                words
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

/// One model call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelRequest {
    pub provider: String,
    pub model: String,
    pub completion_params: Map<String, Value>,
    pub messages: Vec<PromptMessage>,
    /// Empty on the final round of a multi-round run.
    pub tools: Vec<ToolDescriptor>,
    pub stop: Vec<String>,
    pub stream: bool,
}

/// A fragment of a tool call delivered while streaming.
///
/// Fragments sharing an `index` belong to the same call: the id and name
/// usually arrive first and the argument JSON follows in pieces.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallDelta {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: String,
}

impl ToolCallDelta {
    /// A complete call in a single fragment.
    pub fn complete(
        index: usize,
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            index,
            id: Some(id.into()),
            name: Some(name.into()),
            arguments: arguments.into(),
        }
    }
}

/// One streamed chunk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelChunk {
    pub content: Option<MessageContent>,
    pub tool_calls: Vec<ToolCallDelta>,
    pub usage: Option<Usage>,
}

impl ModelChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: Some(MessageContent::Text(text.into())),
            ..Self::default()
        }
    }

    pub fn tool_call(delta: ToolCallDelta) -> Self {
        Self {
            tool_calls: vec![delta],
            ..Self::default()
        }
    }

    pub fn usage(usage: Usage) -> Self {
        Self {
            usage: Some(usage),
            ..Self::default()
        }
    }
}

/// A tool call in a blocking result; arguments are still raw JSON text.
#[derive(Debug, Clone, PartialEq)]
pub struct RawToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl RawToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Parse the arguments into a [`ToolCall`].
    pub fn parse(self) -> Result<ToolCall> {
        let arguments = parse_arguments(&self.name, &self.arguments)?;
        Ok(ToolCall {
            id: self.id,
            name: self.name,
            arguments,
        })
    }
}

/// A complete, non-streamed model result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResult {
    pub content: MessageContent,
    pub tool_calls: Vec<RawToolCall>,
    pub usage: Option<Usage>,
}

/// What a model call produced.
pub enum ModelOutput {
    Stream(BoxStream<'static, Result<ModelChunk>>),
    Blocking(ModelResult),
}

impl std::fmt::Debug for ModelOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream(_) => f.write_str("ModelOutput::Stream(..)"),
            Self::Blocking(result) => f.debug_tuple("ModelOutput::Blocking").field(result).finish(),
        }
    }
}

/// Runs model inference on behalf of the loop.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    /// Invoke the model once.  Implementations should honor
    /// [`ModelRequest::stream`] but may return either output form.
    async fn invoke(&self, request: ModelRequest) -> Result<ModelOutput>;
}

/// Parse tool-call arguments.  Empty text means no arguments.
pub fn parse_arguments(tool_name: &str, raw: &str) -> Result<Map<String, Value>> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(AgentError::ModelParse {
            reason: format!("arguments for `{tool_name}` must be a JSON object, got {other}"),
        }),
        Err(e) => Err(AgentError::ModelParse {
            reason: format!("invalid JSON in `{tool_name}` arguments: {e}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stop_words_come_from_completion_params() {
        let config = ModelConfig::new("openai", "gpt-4o")
            .with_param("stop", json!(["Observation:", 3, "END"]))
            .with_param("temperature", json!(0.2));
        assert_eq!(config.stop_words(), vec!["Observation:", "END"]);
        assert!(ModelConfig::new("a", "b").stop_words().is_empty());
    }

    #[test]
    fn streaming_follows_declared_feature() {
        let config = ModelConfig::new("openai", "gpt-4o");
        assert!(!config.streams_tool_calls());
        let config = config
            .with_feature(ModelFeature::StreamToolCall)
            .with_feature(ModelFeature::StreamToolCall);
        assert!(config.streams_tool_calls());
        assert_eq!(config.features.len(), 1);
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: ModelConfig = serde_json::from_value(json!({
            "provider": "anthropic",
            "model": "claude",
            "features": ["tool-call", "stream-tool-call"]
        }))
        .unwrap();
        assert!(config.streams_tool_calls());
        assert!(config.history.is_empty());
    }

    #[test]
    fn empty_arguments_parse_to_empty_map() {
        assert!(parse_arguments("t", "").unwrap().is_empty());
        assert!(parse_arguments("t", "  ").unwrap().is_empty());
    }

    #[test]
    fn invalid_arguments_are_parse_errors() {
        assert!(matches!(
            parse_arguments("t", "{\"city\":"),
            Err(AgentError::ModelParse { .. })
        ));
        assert!(matches!(
            parse_arguments("t", "[1,2]"),
            Err(AgentError::ModelParse { .. })
        ));
    }

    #[test]
    fn raw_call_parses_into_tool_call() {
        let call = RawToolCall::new("c1", "weather", r#"{"city":"Paris"}"#)
            .parse()
            .unwrap();
        assert_eq!(call.arguments["city"], "Paris");
    }
}
