//! Client pool.
//!
//! [`McpClientPool`] owns one [`McpClient`] per configured server, merges
//! their tool catalogs, and routes each tool call to the server that declared
//! the tool.  Construction is all-or-nothing: if any server fails to connect,
//! the ones that did connect are closed again and the error is returned.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::join_all;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::client::McpClient;
use crate::config::ServersConfig;
use crate::error::{McpError, Result};
use crate::protocol::McpToolDefinition;

/// Prefix of every rendered tool result.
pub const RESULT_PREFIX: &str = "Tool execution result: ";

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// How tool calls are retried after a retryable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per call, the first one included.  `1` disables retries.
    pub attempts: u32,

    /// Pause between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 2,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            delay: Duration::ZERO,
        }
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// Merged catalog plus tool-name ownership.
#[derive(Debug, Default)]
struct Catalog {
    discovered: bool,
    tools: Vec<McpToolDefinition>,
    owners: HashMap<String, String>,
}

/// A set of connected tool-protocol clients.
#[derive(Debug)]
pub struct McpClientPool {
    clients: BTreeMap<String, McpClient>,
    catalog: RwLock<Catalog>,
    retry: RetryPolicy,
    closed: AtomicBool,
}

impl McpClientPool {
    /// Connect and initialize every configured server concurrently.
    ///
    /// # Errors
    ///
    /// The first failure (in server-name order) is returned after every
    /// client that did connect has been closed.
    pub async fn connect(config: &ServersConfig) -> Result<Self> {
        config.validate()?;

        let attempts = join_all(
            config
                .iter()
                .map(|(name, server)| async move { (name.clone(), McpClient::connect(name, server).await) }),
        )
        .await;

        let mut clients = Vec::with_capacity(attempts.len());
        let mut first_error = None;
        for (name, attempt) in attempts {
            match attempt {
                Ok(client) => clients.push(client),
                Err(e) => {
                    tracing::error!(server = %name, error = %e, "failed to connect tool server");
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            join_all(clients.iter().map(McpClient::close)).await;
            return Err(e);
        }

        tracing::info!(servers = clients.len(), "tool server pool connected");
        Ok(Self::from_clients(clients))
    }

    /// Build a pool from clients that are already initialized.
    pub fn from_clients(clients: impl IntoIterator<Item = McpClient>) -> Self {
        Self {
            clients: clients
                .into_iter()
                .map(|c| (c.name().to_owned(), c))
                .collect(),
            catalog: RwLock::new(Catalog::default()),
            retry: RetryPolicy::default(),
            closed: AtomicBool::new(false),
        }
    }

    /// Replace the retry policy used by [`execute_tool`](Self::execute_tool).
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Names of the owned servers, in lexicographic order.
    pub fn server_names(&self) -> Vec<String> {
        self.clients.keys().cloned().collect()
    }

    /// The client for a server, if owned.
    pub fn client(&self, server: &str) -> Option<&McpClient> {
        self.clients.get(server)
    }

    /// Query every server's catalog and merge them.
    ///
    /// Servers are queried in name order.  When two servers declare the same
    /// tool name the later one owns it and its definition replaces the
    /// earlier one in the merged list.
    pub async fn fetch_tools(&self) -> Result<Vec<McpToolDefinition>> {
        let mut tools: Vec<McpToolDefinition> = Vec::new();
        let mut owners: HashMap<String, String> = HashMap::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for (server, client) in &self.clients {
            let declared = client.list_tools().await?;
            tracing::info!(server = %server, count = declared.len(), "discovered tools");

            for tool in declared {
                if let Some(previous) = owners.insert(tool.name.clone(), server.clone())
                    && previous != *server
                {
                    tracing::warn!(
                        tool = %tool.name,
                        previous = %previous,
                        server = %server,
                        "tool name declared by two servers, later server wins"
                    );
                }
                match index.get(&tool.name) {
                    Some(&pos) => tools[pos] = tool,
                    None => {
                        index.insert(tool.name.clone(), tools.len());
                        tools.push(tool);
                    }
                }
            }
        }

        let mut catalog = self.catalog.write().await;
        catalog.discovered = true;
        catalog.tools = tools.clone();
        catalog.owners = owners;
        Ok(tools)
    }

    /// The merged catalog from the last discovery (empty before discovery).
    pub async fn tools(&self) -> Vec<McpToolDefinition> {
        self.catalog.read().await.tools.clone()
    }

    /// The server owning a tool, per the last discovery.
    pub async fn owner_of(&self, tool_name: &str) -> Option<String> {
        self.catalog.read().await.owners.get(tool_name).cloned()
    }

    /// Call a tool on whichever server owns it and render the result as text.
    ///
    /// Discovery runs first if it has not happened yet.  Retryable failures
    /// (see [`McpError::is_retryable`]) are retried per the pool's
    /// [`RetryPolicy`].
    ///
    /// # Errors
    ///
    /// [`McpError::ToolNotFound`] if no server declares the tool; otherwise
    /// the last error from the owning client.
    pub async fn execute_tool(&self, tool_name: &str, arguments: &Map<String, Value>) -> Result<String> {
        if !self.catalog.read().await.discovered {
            self.fetch_tools().await?;
        }

        let client = self
            .owner_of(tool_name)
            .await
            .and_then(|server| self.clients.get(&server))
            .ok_or_else(|| McpError::ToolNotFound {
                tool_name: tool_name.to_owned(),
            })?;

        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        let result = loop {
            match client.call_tool(tool_name, arguments).await {
                Ok(result) => break result,
                Err(e) if e.is_retryable() && attempt < attempts => {
                    tracing::warn!(
                        server = %client.name(),
                        tool = %tool_name,
                        attempt,
                        attempts,
                        error = %e,
                        "tool call failed, retrying"
                    );
                    tokio::time::sleep(self.retry.delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(server = %client.name(), tool = %tool_name, attempt, error = %e, "tool call failed");
                    return Err(e);
                }
            }
        };
        log_progress(client.name(), tool_name, &result);

        Ok(format!("{RESULT_PREFIX}{}", render_tool_result(&result)))
    }

    /// Close every client.  Idempotent; one client's teardown never blocks
    /// the others.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        join_all(self.clients.values().map(McpClient::close)).await;
        tracing::info!(servers = self.clients.len(), "tool server pool closed");
    }
}

/// Render a raw `tools/call` payload as text.
///
/// Text content blocks contribute their text; any other block contributes
/// its compact JSON.  Blocks are joined with newlines.
pub fn render_tool_result(result: &Value) -> String {
    match result {
        Value::Array(blocks) => blocks
            .iter()
            .map(|block| match (block.get("type").and_then(Value::as_str), block.get("text")) {
                (Some("text"), Some(Value::String(text))) => text.clone(),
                _ => block.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn log_progress(server: &str, tool: &str, result: &Value) {
    let progress = result.get("progress").and_then(Value::as_f64);
    let total = result.get("total").and_then(Value::as_f64);
    if let (Some(progress), Some(total)) = (progress, total)
        && total > 0.0
    {
        tracing::info!(
            server = %server,
            tool = %tool,
            progress,
            total,
            percentage = %format!("{:.1}%", progress / total * 100.0),
            "tool progress"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
