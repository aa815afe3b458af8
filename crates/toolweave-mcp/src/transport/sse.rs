//! Event-stream transport.
//!
//! One background listener task per connection owns the `GET` event stream.
//! It is the only writer of the response queue and the only setter of the
//! listener state.  Callers POST their request to the announced endpoint and
//! then wait on a shared [`Notify`], pulling the message whose id matches
//! their request out of the queue and leaving every other message in place.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use serde_json::Value;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use url::Url;

use super::{Transport, build_http_client};
use crate::config::{ServerConfig, redact_url};
use crate::error::{McpError, Result};
use crate::protocol::{JsonRpcRequest, message_id};
use crate::sse::{SseDecoder, SseEvent};

/// How long `close` waits for the listener task to wind down.
const LISTENER_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Listener state
// ---------------------------------------------------------------------------

/// What the listener has observed so far.  Only the listener writes it.
#[derive(Debug, Clone)]
enum ListenerState {
    /// Waiting for the `endpoint` event.
    Connecting,
    /// The server announced where requests must be POSTed.
    Ready(Url),
    /// The listener hit a fatal condition.
    Failed(ListenerFault),
    /// The event stream ended cleanly.
    Stopped,
}

/// Why the listener gave up.
#[derive(Debug, Clone)]
enum ListenerFault {
    /// The stream could not be opened (network error or non-2xx status).
    Connection(String),
    /// The announced endpoint is on a different origin.
    Origin(String),
    /// The stream broke or went idle after it was opened.
    Stream(String),
}

impl ListenerFault {
    fn to_error(&self, server: &str) -> McpError {
        match self {
            Self::Connection(reason) | Self::Stream(reason) => McpError::Connection {
                server: server.to_owned(),
                reason: reason.clone(),
            },
            Self::Origin(endpoint) => McpError::OriginMismatch {
                server: server.to_owned(),
                endpoint: endpoint.clone(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Response queue
// ---------------------------------------------------------------------------

/// FIFO of server messages awaiting a caller.
#[derive(Debug, Default)]
pub(crate) struct MessageQueue {
    inner: Mutex<VecDeque<Value>>,
}

impl MessageQueue {
    pub(crate) fn push(&self, message: Value) {
        self.lock().push_back(message);
    }

    /// Remove and return the first message whose id is `id`.  Messages for
    /// other ids keep their relative order.
    pub(crate) fn take(&self, id: u64) -> Option<Value> {
        let mut queue = self.lock();
        let pos = queue.iter().position(|m| message_id(m) == Some(id))?;
        queue.remove(pos)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Value>> {
        // A panic while holding the lock cannot leave the deque half-updated.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// State shared between the listener task and callers.
#[derive(Debug)]
struct Shared {
    queue: MessageQueue,
    ready: Notify,
    alive: AtomicBool,
}

/// Marks the listener dead and wakes every waiter when the task ends,
/// including on abort or panic.
struct ListenerGuard(Arc<Shared>);

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.0.alive.store(false, Ordering::Release);
        self.0.ready.notify_waiters();
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Event-stream transport for one tool server.
pub struct SseTransport {
    name: String,
    url: Url,
    http: reqwest::Client,
    timeout: Duration,
    read_timeout: Duration,
    next_id: AtomicU64,
    shared: Arc<Shared>,
    state: watch::Receiver<ListenerState>,
    listener: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for SseTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseTransport")
            .field("name", &self.name)
            .field("url", &redact_url(&self.url))
            .field("endpoint", &self.endpoint())
            .finish()
    }
}

impl SseTransport {
    /// Open the event stream and wait until the server announces its request
    /// endpoint.
    ///
    /// # Errors
    ///
    /// - [`McpError::Connection`] if the stream cannot be opened or breaks
    ///   before the endpoint arrives.
    /// - [`McpError::OriginMismatch`] if the endpoint is on another origin.
    /// - [`McpError::ListenerDied`] if the stream ends without an endpoint.
    /// - [`McpError::Timeout`] if nothing happens within the connect timeout.
    pub async fn connect(name: &str, config: &ServerConfig) -> Result<Self> {
        config.validate(name)?;
        let url = config.parsed_url()?;
        let http = build_http_client(name, config)?;

        let shared = Arc::new(Shared {
            queue: MessageQueue::default(),
            ready: Notify::new(),
            alive: AtomicBool::new(true),
        });
        let (state_tx, state_rx) = watch::channel(ListenerState::Connecting);

        tracing::info!(server = %name, url = %redact_url(&url), "connecting to event stream");

        let handle = tokio::spawn(listen(
            name.to_owned(),
            http.clone(),
            url.clone(),
            config.timeout(),
            config.read_timeout(),
            Arc::clone(&shared),
            state_tx,
        ));

        let transport = Self {
            name: name.to_owned(),
            url,
            http,
            timeout: config.timeout(),
            read_timeout: config.read_timeout(),
            next_id: AtomicU64::new(0),
            shared,
            state: state_rx,
            listener: Mutex::new(Some(handle)),
            closed: AtomicBool::new(false),
        };

        match transport.await_endpoint().await {
            Ok(endpoint) => {
                tracing::info!(server = %name, endpoint = %redact_url(&endpoint), "event stream ready");
                Ok(transport)
            }
            Err(e) => {
                tracing::error!(server = %name, error = %e, "event stream connection failed");
                transport.close().await;
                Err(e)
            }
        }
    }

    /// The announced request endpoint, once known.
    pub fn endpoint(&self) -> Option<Url> {
        match &*self.state.borrow() {
            ListenerState::Ready(endpoint) => Some(endpoint.clone()),
            _ => None,
        }
    }

    async fn await_endpoint(&self) -> Result<Url> {
        let mut rx = self.state.clone();
        let wait = async {
            loop {
                let current = rx.borrow_and_update().clone();
                match current {
                    ListenerState::Ready(endpoint) => return Ok(endpoint),
                    ListenerState::Failed(fault) => return Err(fault.to_error(&self.name)),
                    ListenerState::Stopped => {
                        return Err(McpError::ListenerDied {
                            server: self.name.clone(),
                        });
                    }
                    ListenerState::Connecting => {}
                }

                if rx.changed().await.is_err() {
                    // The listener is gone.  It may still have left a verdict.
                    let last = rx.borrow().clone();
                    return match last {
                        ListenerState::Ready(endpoint) => Ok(endpoint),
                        ListenerState::Failed(fault) => Err(fault.to_error(&self.name)),
                        _ => Err(McpError::ListenerDied {
                            server: self.name.clone(),
                        }),
                    };
                }
            }
        };

        tokio::time::timeout(self.timeout, wait)
            .await
            .map_err(|_| McpError::Timeout {
                server: self.name.clone(),
                seconds: self.timeout.as_secs_f64(),
                what: "endpoint announcement".into(),
            })?
    }

    /// Resolve the endpoint to POST to, or explain why there is none.
    fn post_target(&self) -> Result<Url> {
        if self.closed.load(Ordering::Acquire) {
            return Err(McpError::NotConnected {
                server: self.name.clone(),
            });
        }
        let current = self.state.borrow().clone();
        match current {
            ListenerState::Ready(endpoint) => Ok(endpoint),
            ListenerState::Failed(fault) => Err(fault.to_error(&self.name)),
            ListenerState::Stopped => Err(McpError::ListenerDied {
                server: self.name.clone(),
            }),
            ListenerState::Connecting => Err(McpError::NotConnected {
                server: self.name.clone(),
            }),
        }
    }

    /// Error to report when the listener is no longer alive.
    fn listener_error(&self) -> McpError {
        if self.closed.load(Ordering::Acquire) {
            return McpError::NotConnected {
                server: self.name.clone(),
            };
        }
        let current = self.state.borrow().clone();
        match current {
            ListenerState::Failed(fault) => fault.to_error(&self.name),
            _ => McpError::ListenerDied {
                server: self.name.clone(),
            },
        }
    }

    /// Block until the message answering request `id` arrives.
    async fn await_response(&self, id: u64) -> Result<Value> {
        let deadline = tokio::time::Instant::now() + self.read_timeout;

        loop {
            // Register interest before inspecting the queue so a message
            // pushed in between is not missed.
            let notified = self.shared.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.shared.queue.take(id) {
                tracing::debug!(server = %self.name, request_id = id, "matched response");
                return Ok(message);
            }

            if !self.shared.alive.load(Ordering::Acquire) {
                return Err(self.listener_error());
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(McpError::Timeout {
                    server: self.name.clone(),
                    seconds: self.read_timeout.as_secs_f64(),
                    what: format!("response to request {id}"),
                });
            }
        }
    }
}

#[async_trait]
impl Transport for SseTransport {
    fn server_name(&self) -> &str {
        &self.name
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn send(&self, request: JsonRpcRequest) -> Result<Option<Value>> {
        let endpoint = self.post_target()?;

        tracing::debug!(
            server = %self.name,
            method = %request.method,
            request_id = ?request.id,
            "sending client message"
        );

        let resp = self
            .http
            .post(endpoint)
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| McpError::transport(&self.name, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(McpError::Http {
                server: self.name.clone(),
                status: status.as_u16(),
                body,
            });
        }
        tracing::debug!(server = %self.name, status = status.as_u16(), "client message accepted");

        match request.id {
            Some(id) => self.await_response(id).await.map(Some),
            None => Ok(None),
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let handle = self.listener.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            handle.abort();
            match tokio::time::timeout(LISTENER_JOIN_TIMEOUT, handle).await {
                Ok(Err(e)) if e.is_panic() => {
                    tracing::warn!(server = %self.name, "event stream listener panicked");
                }
                Err(_) => {
                    tracing::warn!(server = %self.name, "event stream listener did not stop in time");
                }
                _ => {}
            }
        }

        tracing::debug!(server = %self.name, "event stream transport closed");
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.listener.lock()
            && let Some(handle) = slot.take()
        {
            handle.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Listener task
// ---------------------------------------------------------------------------

async fn listen(
    server: String,
    http: reqwest::Client,
    url: Url,
    timeout: Duration,
    read_timeout: Duration,
    shared: Arc<Shared>,
    state: watch::Sender<ListenerState>,
) {
    let _guard = ListenerGuard(Arc::clone(&shared));

    match run_listener(&server, &http, &url, timeout, read_timeout, &shared, &state).await {
        Ok(()) => {
            tracing::info!(server = %server, "event stream ended");
            state.send_replace(ListenerState::Stopped);
        }
        Err(fault) => {
            tracing::warn!(server = %server, fault = ?fault, "event stream listener failed");
            state.send_replace(ListenerState::Failed(fault));
        }
    }
}

async fn run_listener(
    server: &str,
    http: &reqwest::Client,
    url: &Url,
    timeout: Duration,
    read_timeout: Duration,
    shared: &Shared,
    state: &watch::Sender<ListenerState>,
) -> std::result::Result<(), ListenerFault> {
    let request = http
        .get(url.clone())
        .header(ACCEPT, "text/event-stream")
        .send();

    let resp = tokio::time::timeout(timeout, request)
        .await
        .map_err(|_| ListenerFault::Connection(format!("no response within {:.1}s", timeout.as_secs_f64())))?
        .map_err(|e| ListenerFault::Connection(e.to_string()))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(ListenerFault::Connection(format!("server returned {status}")));
    }
    tracing::debug!(server = %server, "event stream established");

    let mut decoder = SseDecoder::new();
    let mut stream = resp.bytes_stream();

    loop {
        let next = tokio::time::timeout(read_timeout, stream.next())
            .await
            .map_err(|_| {
                ListenerFault::Stream(format!("no data for {:.1}s", read_timeout.as_secs_f64()))
            })?;

        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk.map_err(|e| ListenerFault::Stream(format!("stream read error: {e}")))?;

        for event in decoder.feed(&chunk) {
            handle_event(server, url, event, shared, state)?;
        }
    }

    if let Some(event) = decoder.finish() {
        handle_event(server, url, event, shared, state)?;
    }
    Ok(())
}

fn handle_event(
    server: &str,
    url: &Url,
    event: SseEvent,
    shared: &Shared,
    state: &watch::Sender<ListenerState>,
) -> std::result::Result<(), ListenerFault> {
    tracing::trace!(server = %server, event = %event.event, "received event");

    match event.event.as_str() {
        "endpoint" => {
            let endpoint = resolve_endpoint(url, event.data.trim())?;
            tracing::info!(server = %server, endpoint = %redact_url(&endpoint), "received endpoint");
            state.send_replace(ListenerState::Ready(endpoint));
        }
        "message" => match serde_json::from_str::<Value>(&event.data) {
            Ok(message) if message_id(&message).is_some() => {
                shared.queue.push(message);
                shared.ready.notify_waiters();
            }
            Ok(message) => {
                tracing::debug!(server = %server, message = %message, "server notification");
            }
            Err(e) => {
                tracing::warn!(server = %server, error = %e, "discarding malformed server message");
            }
        },
        other => {
            tracing::warn!(server = %server, event = other, "unknown event");
        }
    }
    Ok(())
}

/// Resolve an announced endpoint against the stream URL and enforce that it
/// stays on the same origin.
fn resolve_endpoint(base: &Url, announced: &str) -> std::result::Result<Url, ListenerFault> {
    let endpoint = base
        .join(announced)
        .map_err(|e| ListenerFault::Stream(format!("invalid endpoint `{announced}`: {e}")))?;

    if !same_origin(base, &endpoint) {
        return Err(ListenerFault::Origin(endpoint.to_string()));
    }
    Ok(endpoint)
}

fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn queue_takes_matching_id_and_keeps_others_in_order() {
        let queue = MessageQueue::default();
        queue.push(json!({"id": 5, "result": "five"}));
        queue.push(json!({"id": 7, "result": "seven"}));
        queue.push(json!({"id": 3, "result": "three"}));

        let three = queue.take(3).unwrap();
        assert_eq!(three["result"], "three");
        assert_eq!(queue.len(), 2);

        // Asking for an id that has not arrived leaves the queue intact.
        assert!(queue.take(9).is_none());
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.take(5).unwrap()["result"], "five");
        assert_eq!(queue.take(7).unwrap()["result"], "seven");
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn queue_returns_first_of_duplicate_ids() {
        let queue = MessageQueue::default();
        queue.push(json!({"id": 1, "result": "first"}));
        queue.push(json!({"id": 1, "result": "second"}));
        assert_eq!(queue.take(1).unwrap()["result"], "first");
        assert_eq!(queue.take(1).unwrap()["result"], "second");
    }

    #[test]
    fn relative_endpoint_resolves_against_stream_url() {
        let base = Url::parse("http://127.0.0.1:8000/sse").unwrap();
        let endpoint = resolve_endpoint(&base, "/messages/?session_id=abc").unwrap();
        assert_eq!(
            endpoint.as_str(),
            "http://127.0.0.1:8000/messages/?session_id=abc"
        );
    }

    #[test]
    fn absolute_endpoint_on_same_origin_is_accepted() {
        let base = Url::parse("https://tools.example.com/sse").unwrap();
        let endpoint = resolve_endpoint(&base, "https://tools.example.com:443/post").unwrap();
        assert_eq!(endpoint.path(), "/post");
    }

    #[test]
    fn endpoint_with_foreign_host_is_rejected() {
        let base = Url::parse("http://127.0.0.1:8000/sse").unwrap();
        let fault = resolve_endpoint(&base, "http://evil.example.com/messages").unwrap_err();
        assert!(matches!(fault, ListenerFault::Origin(_)));
    }

    #[test]
    fn endpoint_with_foreign_scheme_or_port_is_rejected() {
        let base = Url::parse("http://127.0.0.1:8000/sse").unwrap();
        assert!(matches!(
            resolve_endpoint(&base, "https://127.0.0.1:8000/messages"),
            Err(ListenerFault::Origin(_))
        ));
        assert!(matches!(
            resolve_endpoint(&base, "http://127.0.0.1:9000/messages"),
            Err(ListenerFault::Origin(_))
        ));
    }

    #[test]
    fn fault_maps_to_typed_error() {
        let err = ListenerFault::Origin("http://evil/".into()).to_error("a");
        assert!(matches!(err, McpError::OriginMismatch { .. }));
        let err = ListenerFault::Connection("server returned 500".into()).to_error("a");
        assert!(matches!(err, McpError::Connection { .. }));
    }
}
