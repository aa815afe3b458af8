//! Locally registered tools.
//!
//! Local tools are executed by the embedding application through
//! [`ToolInvoker`].  Their responses come back as a list of typed
//! [`ToolInvokeMessage`]s which [`render_tool_messages`] folds into the text
//! the model sees.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::Result;
use crate::types::ToolDescriptor;

/// Shown to the model in place of a generated image.
pub const IMAGE_NOTICE: &str = "image has been created and sent to user already, you do not need to create it, just tell the user to check it now.";

/// Where a local tool comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolProviderType {
    #[default]
    #[serde(rename = "builtin")]
    BuiltIn,
    Plugin,
    Api,
    Workflow,
    App,
}

/// A tool the embedding application can run itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalTool {
    pub provider: String,
    #[serde(default)]
    pub provider_type: ToolProviderType,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema of the arguments the model fills in.
    #[serde(default = "empty_object_schema")]
    pub parameters: Value,
    /// Parameters fixed by configuration.  The model's arguments are laid
    /// over these and win on conflict.
    #[serde(default)]
    pub runtime_parameters: Map<String, Value>,
}

fn empty_object_schema() -> Value {
    json!({"type": "object"})
}

impl LocalTool {
    pub fn new(provider: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            provider_type: ToolProviderType::default(),
            name: name.into(),
            description: String::new(),
            parameters: empty_object_schema(),
            runtime_parameters: Map::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_runtime_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.runtime_parameters.insert(key.into(), value);
        self
    }

    /// The descriptor offered to the model.
    pub fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(&self.name, &self.description, self.parameters.clone())
    }

    /// Runtime parameters overlaid with the model's arguments.
    pub fn invocation_parameters(&self, arguments: &Map<String, Value>) -> Map<String, Value> {
        let mut params = self.runtime_parameters.clone();
        params.extend(arguments.iter().map(|(k, v)| (k.clone(), v.clone())));
        params
    }
}

/// One piece of a local tool's response.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInvokeMessage {
    Text(String),
    Link(String),
    Image(String),
    ImageLink(String),
    Json(Value),
    Blob { mime_type: String, data: Vec<u8> },
    Variable { name: String, value: Value },
}

/// Fold a tool's response messages into the text fed back to the model.
pub fn render_tool_messages(messages: &[ToolInvokeMessage]) -> String {
    let mut out = String::new();
    for message in messages {
        match message {
            ToolInvokeMessage::Text(text) => out.push_str(text),
            ToolInvokeMessage::Link(link) => {
                out.push_str(&format!("result link: {link}. please tell user to check it."));
            }
            ToolInvokeMessage::Image(_) | ToolInvokeMessage::ImageLink(_) => out.push_str(IMAGE_NOTICE),
            ToolInvokeMessage::Json(value) => out.push_str(&format!("tool response: {value}.")),
            other => out.push_str(&format!("tool response: {other:?}.")),
        }
    }
    out
}

/// Runs local tools on behalf of the loop.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(
        &self,
        provider_type: ToolProviderType,
        provider: &str,
        tool_name: &str,
        parameters: Map<String, Value>,
    ) -> Result<Vec<ToolInvokeMessage>>;
}

/// A [`ToolInvoker`] for runs without local tools.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLocalTools;

#[async_trait]
impl ToolInvoker for NoLocalTools {
    async fn invoke(
        &self,
        _provider_type: ToolProviderType,
        _provider: &str,
        tool_name: &str,
        _parameters: Map<String, Value>,
    ) -> Result<Vec<ToolInvokeMessage>> {
        Err(crate::error::AgentError::ToolInvocation {
            tool_name: tool_name.to_owned(),
            reason: "no local tool invoker configured".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_each_message_kind() {
        let rendered = render_tool_messages(&[
            ToolInvokeMessage::Text("done. ".into()),
            ToolInvokeMessage::Link("https://x.test/r".into()),
        ]);
        assert_eq!(
            rendered,
            "done. result link: https://x.test/r. please tell user to check it."
        );

        assert_eq!(
            render_tool_messages(&[ToolInvokeMessage::ImageLink("https://x.test/i.png".into())]),
            IMAGE_NOTICE
        );
        assert_eq!(
            render_tool_messages(&[ToolInvokeMessage::Json(json!({"temp": 18}))]),
            "tool response: {\"temp\":18}."
        );
    }

    #[test]
    fn other_messages_render_as_debug() {
        let rendered = render_tool_messages(&[ToolInvokeMessage::Variable {
            name: "n".into(),
            value: json!(1),
        }]);
        assert!(rendered.starts_with("tool response: Variable"));
        assert!(rendered.ends_with('.'));
    }

    #[test]
    fn model_arguments_override_runtime_parameters() {
        let tool = LocalTool::new("time", "current_time")
            .with_runtime_parameter("timezone", json!("UTC"))
            .with_runtime_parameter("format", json!("%H:%M"));

        let mut args = Map::new();
        args.insert("timezone".into(), json!("Europe/Paris"));
        let params = tool.invocation_parameters(&args);

        assert_eq!(params["timezone"], "Europe/Paris");
        assert_eq!(params["format"], "%H:%M");
    }

    #[test]
    fn provider_type_uses_wire_names() {
        assert_eq!(
            serde_json::to_value(ToolProviderType::BuiltIn).unwrap(),
            json!("builtin")
        );
        let t: ToolProviderType = serde_json::from_value(json!("workflow")).unwrap();
        assert_eq!(t, ToolProviderType::Workflow);
    }

    #[test]
    fn descriptor_schema_is_normalized() {
        let d = LocalTool::new("p", "t").descriptor();
        assert_eq!(d.parameters["required"], json!([]));
    }
}
