//! Agent runs against real tool servers speaking the event-stream transport.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use toolweave_agent::{
    AgentError, AgentParams, FunctionCallingAgent, MessageContent, ModelConfig, ModelInvoker,
    ModelOutput, ModelRequest, ModelResult, RawToolCall, Result, Role,
};

// ---------------------------------------------------------------------------
// Tool server
// ---------------------------------------------------------------------------

/// One tool, answered with fixed text.
struct ToolServer {
    tool: &'static str,
    answer: &'static str,
    outbox: Mutex<Option<mpsc::UnboundedSender<Event>>>,
    calls: Mutex<Vec<Value>>,
}

impl ToolServer {
    async fn spawn(tool: &'static str, answer: &'static str) -> (Arc<Self>, String) {
        let server = Arc::new(Self {
            tool,
            answer,
            outbox: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        });
        let app = Router::new()
            .route("/sse", get(stream))
            .route("/messages", post(message))
            .with_state(Arc::clone(&server));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (server, format!("http://{addr}/sse"))
    }

    fn calls(&self) -> Vec<Value> {
        self.calls.lock().unwrap().clone()
    }

    fn reply(&self, request: &Value) -> Option<Value> {
        let id = request.get("id")?.clone();
        let result = match request["method"].as_str().unwrap_or_default() {
            "initialize" => json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": self.tool, "version": "1.0.0"},
            }),
            "tools/list" => json!({"tools": [{
                "name": self.tool,
                "description": format!("The {} tool", self.tool),
                "inputSchema": {
                    "type": "object",
                    "properties": {"city": {"type": "string"}},
                    "required": ["city"],
                },
            }]}),
            "tools/call" => {
                self.calls.lock().unwrap().push(request["params"].clone());
                json!({"content": [{"type": "text", "text": self.answer}]})
            }
            _ => return None,
        };
        Some(json!({"jsonrpc": "2.0", "id": id, "result": result}))
    }
}

async fn stream(
    State(server): State<Arc<ToolServer>>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::unbounded_channel();
    let _ = tx.send(Event::default().event("endpoint").data("/messages"));
    *server.outbox.lock().unwrap() = Some(tx);

    Sse::new(futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (Ok::<_, Infallible>(event), rx))
    }))
}

async fn message(State(server): State<Arc<ToolServer>>, Json(request): Json<Value>) -> StatusCode {
    if let Some(reply) = server.reply(&request) {
        if let Some(tx) = server.outbox.lock().unwrap().as_ref() {
            let _ = tx.send(Event::default().event("message").data(reply.to_string()));
        }
    }
    StatusCode::ACCEPTED
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ScriptedModel {
    outputs: Mutex<VecDeque<ModelOutput>>,
    requests: Mutex<Vec<ModelRequest>>,
}

#[async_trait]
impl ModelInvoker for ScriptedModel {
    async fn invoke(&self, request: ModelRequest) -> Result<ModelOutput> {
        self.requests.lock().unwrap().push(request);
        self.outputs
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AgentError::ModelInvocation {
                reason: "script exhausted".into(),
            })
    }
}

fn output(text: &str, tool_calls: Vec<RawToolCall>) -> ModelOutput {
    ModelOutput::Blocking(ModelResult {
        content: MessageContent::Text(text.into()),
        tool_calls,
        usage: None,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn tool_calls_reach_the_server_that_owns_the_tool() {
    let (weather, weather_url) = ToolServer::spawn("get_weather", "18C, clear").await;
    let (search, search_url) = ToolServer::spawn("search", "no results").await;
    let servers = json!({"mcpServers": {
        "weather": {"url": weather_url},
        "search": {"url": search_url, "transport": "sse"},
    }});

    let model = Arc::new(ScriptedModel {
        outputs: Mutex::new(VecDeque::from([
            output("", vec![RawToolCall::new("call_1", "get_weather", r#"{"city": "Paris"}"#)]),
            output("It is 18C and clear in Paris.", Vec::new()),
        ])),
        ..ScriptedModel::default()
    });

    let summary = FunctionCallingAgent::new(model.clone())
        .run(
            AgentParams::new("Weather in Paris?", ModelConfig::new("openai", "gpt-4o"))
                .with_servers_config(servers.to_string()),
        )
        .await
        .unwrap();

    assert_eq!(summary.rounds, 2);
    assert_eq!(summary.answer, "It is 18C and clear in Paris.");

    let requests = model.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 2);
    let mut offered: Vec<_> = requests[0].tools.iter().map(|t| t.name.as_str()).collect();
    offered.sort_unstable();
    assert_eq!(offered, vec!["get_weather", "search"]);
    assert_eq!(requests[0].tools[0].parameters["required"], json!(["city"]));

    let tool_messages: Vec<_> = requests[1]
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .collect();
    assert_eq!(tool_messages.len(), 1);
    assert_eq!(tool_messages[0].tool_call_id.as_deref(), Some("call_1"));
    assert_eq!(tool_messages[0].text(), "Tool execution result: 18C, clear");

    let calls = weather.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0]["name"], "get_weather");
    assert_eq!(calls[0]["arguments"]["city"], "Paris");
    assert!(search.calls().is_empty());
}

#[tokio::test]
async fn unreachable_server_fails_the_run_before_the_model_is_called() {
    let model = Arc::new(ScriptedModel::default());
    let servers = json!({"a": {"url": "http://127.0.0.1:1/sse", "timeout": 1}});

    let err = FunctionCallingAgent::new(model.clone())
        .run(
            AgentParams::new("hi", ModelConfig::new("openai", "gpt-4o"))
                .with_servers_config(servers.to_string()),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AgentError::Mcp(_)), "got {err:?}");
    assert!(model.requests.lock().unwrap().is_empty());
}
