//! In-process tool servers for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use futures::Stream;
use serde_json::{Value, json};
use tokio::sync::mpsc;

pub const SESSION: &str = "sess-1";

/// Bind a router to an ephemeral port and serve it in the background.
pub async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// A scripted tool server usable behind either transport.
#[derive(Default)]
pub struct FakeServer {
    tools: Vec<Value>,
    replies: HashMap<String, Value>,
    endpoint: Option<String>,
    hold_first_call: bool,
    fail_initialize: bool,
    failing_calls: Mutex<usize>,
    outbox: Mutex<Option<mpsc::UnboundedSender<Event>>>,
    held: Mutex<Option<Value>>,
    calls_seen: Mutex<usize>,
    pub received: Mutex<Vec<Value>>,
    pub sessions_seen: Mutex<Vec<Option<String>>>,
    pub deleted: Mutex<Option<String>>,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a tool that answers with one text block.
    pub fn tool(self, name: &str, text: &str) -> Self {
        self.tool_result(name, json!({"content": [{"type": "text", "text": text}]}))
    }

    /// Declare a tool that answers with an arbitrary `result`.
    pub fn tool_result(mut self, name: &str, result: Value) -> Self {
        self.tools.push(json!({
            "name": name,
            "description": format!("The {name} tool"),
            "inputSchema": {
                "type": "object",
                "properties": {"city": {"type": "string"}},
            }
        }));
        self.replies.insert(name.to_owned(), json!({"result": result}));
        self
    }

    /// Announce this endpoint instead of the default relative one.
    pub fn endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = Some(endpoint.to_owned());
        self
    }

    /// Hold the first `tools/call` response until the second one is sent.
    pub fn hold_first_call(mut self) -> Self {
        self.hold_first_call = true;
        self
    }

    pub fn fail_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    /// Answer the first `count` event-stream `tools/call` POSTs with 503.
    pub fn fail_calls(self, count: usize) -> Self {
        *self.failing_calls.lock().unwrap() = count;
        self
    }

    /// Consume one scripted call failure, if any are left.
    fn take_call_failure(&self, request: &Value) -> bool {
        if request["method"] != "tools/call" {
            return false;
        }
        let mut left = self.failing_calls.lock().unwrap();
        if *left == 0 {
            return false;
        }
        *left -= 1;
        true
    }

    /// Methods received so far, in arrival order.
    pub fn methods(&self) -> Vec<String> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .map(|r| r["method"].as_str().unwrap_or_default().to_owned())
            .collect()
    }

    /// Arguments of every `tools/call` received.
    pub fn calls(&self) -> Vec<Value> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r["method"] == "tools/call")
            .map(|r| r["params"].clone())
            .collect()
    }

    /// Serve the event-stream variant; returns the stream URL.
    pub async fn spawn_sse(self) -> (Arc<Self>, String) {
        let state = Arc::new(self);
        let app = Router::new()
            .route("/sse", get(sse_stream))
            .route("/messages", post(sse_message))
            .with_state(Arc::clone(&state));
        let addr = serve(app).await;
        (state, format!("http://{addr}/sse"))
    }

    /// Serve the session-token variant; returns the request URL.
    pub async fn spawn_streamable(self) -> (Arc<Self>, String) {
        let state = Arc::new(self);
        let app = Router::new()
            .route("/mcp", post(streamable_message).delete(streamable_delete))
            .with_state(Arc::clone(&state));
        let addr = serve(app).await;
        (state, format!("http://{addr}/mcp"))
    }

    fn respond(&self, request: &Value) -> Option<Value> {
        let id = request.get("id")?.clone();
        let method = request["method"].as_str().unwrap_or_default();
        let mut reply = match method {
            "initialize" if self.fail_initialize => {
                json!({"error": {"code": -32600, "message": "unsupported protocol version"}})
            }
            "initialize" => json!({"result": {
                "protocolVersion": "2024-11-05",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "fake", "version": "0.0.0"},
            }}),
            "tools/list" => json!({"result": {"tools": self.tools}}),
            "tools/call" => {
                let name = request["params"]["name"].as_str().unwrap_or_default();
                self.replies.get(name).cloned().unwrap_or_else(|| {
                    json!({"error": {"code": -32602, "message": format!("Unknown tool: {name}")}})
                })
            }
            other => json!({"error": {"code": -32601, "message": format!("Method not found: {other}")}}),
        };
        reply["jsonrpc"] = json!("2.0");
        reply["id"] = id;
        Some(reply)
    }

    fn push(&self, message: Value) {
        if let Some(tx) = self.outbox.lock().unwrap().as_ref() {
            let _ = tx.send(Event::default().event("message").data(message.to_string()));
        }
    }
}

// ---------------------------------------------------------------------------
// Event-stream handlers
// ---------------------------------------------------------------------------

async fn sse_stream(
    State(server): State<Arc<FakeServer>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::unbounded_channel();
    let endpoint = server
        .endpoint
        .clone()
        .unwrap_or_else(|| "/messages?session_id=abc".to_owned());
    let _ = tx.send(Event::default().event("endpoint").data(endpoint));
    *server.outbox.lock().unwrap() = Some(tx);

    Sse::new(futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (Ok::<_, Infallible>(event), rx))
    }))
}

async fn sse_message(State(server): State<Arc<FakeServer>>, Json(request): Json<Value>) -> StatusCode {
    server.received.lock().unwrap().push(request.clone());
    if server.take_call_failure(&request) {
        return StatusCode::SERVICE_UNAVAILABLE;
    }

    let Some(reply) = server.respond(&request) else {
        return StatusCode::ACCEPTED;
    };

    if server.hold_first_call && request["method"] == "tools/call" {
        let seen = {
            let mut seen = server.calls_seen.lock().unwrap();
            *seen += 1;
            *seen
        };
        if seen == 1 {
            *server.held.lock().unwrap() = Some(reply);
            return StatusCode::ACCEPTED;
        }
        server.push(reply);
        let held = server.held.lock().unwrap().take();
        if let Some(held) = held {
            server.push(held);
        }
        return StatusCode::ACCEPTED;
    }

    server.push(reply);
    StatusCode::ACCEPTED
}

/// A stream URL that always answers 500.
pub async fn spawn_broken_sse() -> String {
    let app = Router::new().route("/sse", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }));
    let addr = serve(app).await;
    format!("http://{addr}/sse")
}

/// A stream URL whose stream ends without announcing an endpoint.
pub async fn spawn_silent_sse() -> String {
    let app = Router::new().route(
        "/sse",
        get(|| async { Sse::new(futures::stream::empty::<Result<Event, Infallible>>()) }),
    );
    let addr = serve(app).await;
    format!("http://{addr}/sse")
}

// ---------------------------------------------------------------------------
// Session-token handlers
// ---------------------------------------------------------------------------

async fn streamable_message(
    State(server): State<Arc<FakeServer>>,
    headers: HeaderMap,
    Json(request): Json<Value>,
) -> Response {
    let accepts_stream = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("application/json") && v.contains("text/event-stream"));
    if !accepts_stream {
        return (StatusCode::NOT_ACCEPTABLE, "bad accept header").into_response();
    }

    let session = headers
        .get("mcp-session-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    server.sessions_seen.lock().unwrap().push(session.clone());
    server.received.lock().unwrap().push(request.clone());

    let method = request["method"].as_str().unwrap_or_default().to_owned();
    if method != "initialize" && session.as_deref() != Some(SESSION) {
        return (StatusCode::BAD_REQUEST, "missing session").into_response();
    }

    let Some(reply) = server.respond(&request) else {
        return StatusCode::ACCEPTED.into_response();
    };

    match method.as_str() {
        "initialize" => ([("mcp-session-id", SESSION)], Json(reply)).into_response(),
        "tools/call" => {
            // Answer through an event-stream body, preceded by an unrelated
            // notification.
            let body = format!(
                "event: message\ndata: {}\n\nevent: message\ndata: {}\n\n",
                json!({"jsonrpc": "2.0", "method": "notifications/progress", "params": {}}),
                reply
            );
            ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
        }
        _ => Json(reply).into_response(),
    }
}

async fn streamable_delete(State(server): State<Arc<FakeServer>>, headers: HeaderMap) -> StatusCode {
    let session = headers
        .get("mcp-session-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    *server.deleted.lock().unwrap() = session;
    StatusCode::OK
}
