//! Session-token HTTP transport.
//!
//! Every envelope is one POST to the configured URL.  The server may assign a
//! session id in a response header; once captured it is echoed on every later
//! request.  Responses arrive either as a plain JSON body or as a short event
//! stream carrying the reply.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap};
use serde_json::Value;
use url::Url;

use super::{Transport, build_http_client};
use crate::config::{ServerConfig, redact_url};
use crate::error::{McpError, Result};
use crate::protocol::{JsonRpcRequest, message_id};
use crate::sse::SseDecoder;

/// Header carrying the server-assigned session id.
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

const ACCEPT_BOTH: &str = "application/json, text/event-stream";

/// Session-token HTTP transport for one tool server.
#[derive(Debug)]
pub struct StreamableHttpTransport {
    name: String,
    url: Url,
    http: reqwest::Client,
    timeout: Duration,
    read_timeout: Duration,
    next_id: AtomicU64,
    session: Mutex<Option<String>>,
    closed: AtomicBool,
}

impl StreamableHttpTransport {
    /// Prepare a transport.  No network traffic happens until the first send.
    pub fn new(name: &str, config: &ServerConfig) -> Result<Self> {
        config.validate(name)?;
        let url = config.parsed_url()?;
        let http = build_http_client(name, config)?;

        tracing::info!(server = %name, url = %redact_url(&url), "prepared session transport");

        Ok(Self {
            name: name.to_owned(),
            url,
            http,
            timeout: config.timeout(),
            read_timeout: config.read_timeout(),
            next_id: AtomicU64::new(0),
            session: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// The session id assigned by the server, if any.
    pub fn session_id(&self) -> Option<String> {
        self.session.lock().ok().and_then(|s| s.clone())
    }

    fn remember_session(&self, headers: &HeaderMap) {
        let Some(value) = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) else {
            return;
        };
        if let Ok(mut slot) = self.session.lock()
            && slot.as_deref() != Some(value)
        {
            tracing::debug!(server = %self.name, "session id assigned");
            *slot = Some(value.to_owned());
        }
    }

    fn malformed(&self, method: &str, reason: impl Into<String>) -> McpError {
        McpError::MalformedResponse {
            server: self.name.clone(),
            method: method.to_owned(),
            reason: reason.into(),
        }
    }

    /// Pull the reply to `id` out of an event-stream response body.
    async fn read_event_stream(
        &self,
        resp: reqwest::Response,
        id: u64,
        method: &str,
    ) -> Result<Value> {
        let mut decoder = SseDecoder::new();
        let mut stream = resp.bytes_stream();

        loop {
            let next = tokio::time::timeout(self.read_timeout, stream.next())
                .await
                .map_err(|_| McpError::Timeout {
                    server: self.name.clone(),
                    seconds: self.read_timeout.as_secs_f64(),
                    what: format!("response to request {id}"),
                })?;

            let finished = next.is_none();
            let events = match next {
                Some(chunk) => {
                    let chunk = chunk.map_err(|e| McpError::transport(&self.name, e))?;
                    decoder.feed(&chunk)
                }
                None => decoder.finish().into_iter().collect(),
            };

            for event in events.into_iter().filter(|e| e.event == "message") {
                match serde_json::from_str::<Value>(&event.data) {
                    Ok(message) if message_id(&message) == Some(id) => return Ok(message),
                    Ok(message) => {
                        tracing::debug!(server = %self.name, message = %message, "skipping unrelated message");
                    }
                    Err(e) => {
                        tracing::warn!(server = %self.name, error = %e, "discarding malformed server message");
                    }
                }
            }

            if finished {
                return Err(self.malformed(method, "event stream ended without a reply"));
            }
        }
    }

    /// Read a plain JSON response body.
    async fn read_json(&self, resp: reqwest::Response, id: u64, method: &str) -> Result<Value> {
        let text = tokio::time::timeout(self.read_timeout, resp.text())
            .await
            .map_err(|_| McpError::Timeout {
                server: self.name.clone(),
                seconds: self.read_timeout.as_secs_f64(),
                what: format!("response to request {id}"),
            })?
            .map_err(|e| McpError::transport(&self.name, e))?;

        if text.trim().is_empty() {
            return Err(self.malformed(method, "empty response body"));
        }

        match serde_json::from_str::<Value>(&text)? {
            // A batch reply: pick ours.
            Value::Array(messages) => messages
                .into_iter()
                .find(|m| message_id(m) == Some(id))
                .ok_or_else(|| self.malformed(method, format!("no reply with id {id} in batch"))),
            message => Ok(message),
        }
    }
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    fn server_name(&self) -> &str {
        &self.name
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn send(&self, request: JsonRpcRequest) -> Result<Option<Value>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(McpError::NotConnected {
                server: self.name.clone(),
            });
        }

        tracing::debug!(
            server = %self.name,
            method = %request.method,
            request_id = ?request.id,
            "sending client message"
        );

        let mut builder = self
            .http
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, ACCEPT_BOTH)
            .json(&request);
        if let Some(session) = self.session_id() {
            builder = builder.header(SESSION_HEADER, session);
        }

        let resp = tokio::time::timeout(self.timeout, builder.send())
            .await
            .map_err(|_| McpError::Timeout {
                server: self.name.clone(),
                seconds: self.timeout.as_secs_f64(),
                what: format!("`{}` to be accepted", request.method),
            })?
            .map_err(|e| McpError::transport(&self.name, e))?;

        let status = resp.status();
        tracing::debug!(server = %self.name, status = status.as_u16(), "client message sent");
        self.remember_session(resp.headers());

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(McpError::Http {
                server: self.name.clone(),
                status: status.as_u16(),
                body,
            });
        }

        let Some(id) = request.id else {
            return Ok(None);
        };

        let is_stream = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        let message = if is_stream {
            self.read_event_stream(resp, id, &request.method).await?
        } else {
            self.read_json(resp, id, &request.method).await?
        };
        Ok(Some(message))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        // Ending the session is a courtesy; servers may not support it.
        if let Some(session) = self.session_id() {
            let result = self
                .http
                .delete(self.url.clone())
                .header(SESSION_HEADER, session)
                .timeout(self.timeout)
                .send()
                .await;
            match result {
                Ok(resp) => tracing::debug!(
                    server = %self.name,
                    status = resp.status().as_u16(),
                    "session ended"
                ),
                Err(e) => tracing::warn!(server = %self.name, error = %e, "failed to end session"),
            }
        }

        tracing::debug!(server = %self.name, "session transport closed");
    }
}
