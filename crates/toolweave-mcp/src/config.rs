//! Remote tool server configuration.
//!
//! A configuration is a mapping from server name to [`ServerConfig`],
//! optionally wrapped under a top-level `mcpServers` key:
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "weather": { "url": "http://127.0.0.1:8000/sse", "timeout": 30 },
//!     "search":  { "url": "http://127.0.0.1:9000/mcp", "transport": "streamable_http" }
//!   }
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::error::{McpError, Result};

/// Key under which server maps may be wrapped.
const WRAPPER_KEY: &str = "mcpServers";

fn default_timeout() -> f64 {
    60.0
}

fn default_sse_read_timeout() -> f64 {
    300.0
}

/// Largest accepted timeout, in seconds (one day).
pub const MAX_TIMEOUT_SECS: f64 = 86_400.0;

/// Seconds to a `Duration`, capped at [`MAX_TIMEOUT_SECS`].  Values that are
/// not a valid duration (negative, NaN) fall back to `default`.
fn bounded_duration(seconds: f64, default: f64) -> Duration {
    Duration::try_from_secs_f64(seconds.min(MAX_TIMEOUT_SECS))
        .unwrap_or_else(|_| Duration::from_secs_f64(default))
}

fn check_timeout(server: &str, field: &str, seconds: f64) -> Result<()> {
    let in_range = seconds > 0.0 && seconds <= MAX_TIMEOUT_SECS;
    if !in_range || Duration::try_from_secs_f64(seconds).is_err() {
        return Err(McpError::Config {
            reason: format!(
                "server `{server}` {field} must be positive and at most {MAX_TIMEOUT_SECS} seconds, got {seconds}"
            ),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Transport kind
// ---------------------------------------------------------------------------

/// How the client talks to a server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Long-lived event stream for responses plus a POST endpoint for requests.
    #[default]
    Sse,
    /// Single request/response POST channel scoped by a session header.
    StreamableHttp,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sse => write!(f, "sse"),
            Self::StreamableHttp => write!(f, "streamable_http"),
        }
    }
}

// ---------------------------------------------------------------------------
// Server config
// ---------------------------------------------------------------------------

/// Connection settings for one remote tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Event-stream URL (SSE) or request URL (streamable HTTP).
    pub url: String,

    /// Transport variant.
    #[serde(default)]
    pub transport: TransportKind,

    /// Extra headers sent with every request (e.g. authorization).
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Connect / request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: f64,

    /// Maximum idle time on the event stream, and the bound on waiting for a
    /// correlated response, in seconds.
    #[serde(default = "default_sse_read_timeout")]
    pub sse_read_timeout: f64,
}

impl ServerConfig {
    /// An event-stream server config with default timeouts.
    pub fn sse(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            transport: TransportKind::Sse,
            headers: HashMap::new(),
            timeout: default_timeout(),
            sse_read_timeout: default_sse_read_timeout(),
        }
    }

    /// A session-token server config with default timeouts.
    pub fn streamable_http(url: impl Into<String>) -> Self {
        Self {
            transport: TransportKind::StreamableHttp,
            ..Self::sse(url)
        }
    }

    /// Add a header sent with every request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Override both timeouts (seconds).
    pub fn with_timeouts(mut self, timeout: f64, sse_read_timeout: f64) -> Self {
        self.timeout = timeout;
        self.sse_read_timeout = sse_read_timeout;
        self
    }

    /// Connect / request timeout.
    pub fn timeout(&self) -> Duration {
        bounded_duration(self.timeout, default_timeout())
    }

    /// Event-stream idle / response-wait timeout.
    pub fn read_timeout(&self) -> Duration {
        bounded_duration(self.sse_read_timeout, default_sse_read_timeout())
    }

    /// Parse and return the configured URL.
    pub fn parsed_url(&self) -> Result<Url> {
        Url::parse(&self.url).map_err(|e| McpError::Config {
            reason: format!("invalid url `{}`: {e}", self.url),
        })
    }

    /// Build the default header map from the configured headers.
    pub fn header_map(&self) -> Result<HeaderMap> {
        let mut map = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| McpError::Config {
                reason: format!("invalid header name `{name}`: {e}"),
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| McpError::Config {
                reason: format!("invalid value for header `{name}`: {e}"),
            })?;
            map.insert(name, value);
        }
        Ok(map)
    }

    /// Check the config for errors that would only surface at connect time.
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(McpError::Config {
                reason: format!("server `{name}` has no url"),
            });
        }
        let url = self.parsed_url()?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(McpError::Config {
                reason: format!("server `{name}` url must be http(s), got `{}`", url.scheme()),
            });
        }
        check_timeout(name, "timeout", self.timeout)?;
        check_timeout(name, "sse_read_timeout", self.sse_read_timeout)?;
        self.header_map()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Servers config
// ---------------------------------------------------------------------------

/// The full set of configured servers, keyed by name.
///
/// Iteration is in lexicographic name order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServersConfig {
    servers: BTreeMap<String, ServerConfig>,
}

impl ServersConfig {
    /// Build from an explicit set of servers.
    pub fn new(servers: impl IntoIterator<Item = (String, ServerConfig)>) -> Self {
        Self {
            servers: servers.into_iter().collect(),
        }
    }

    /// Parse a JSON document, accepting the optional `mcpServers` wrapper.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json).map_err(|e| McpError::Config {
            reason: format!("server config must be valid JSON: {e}"),
        })?;
        Self::from_value(value)
    }

    /// Parse a TOML document, accepting the optional `mcpServers` wrapper.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let value: Value = toml::from_str(text).map_err(|e| McpError::Config {
            reason: format!("server config must be valid TOML: {e}"),
        })?;
        Self::from_value(value)
    }

    /// Read a config file; `.toml` files are parsed as TOML, anything else as
    /// JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| McpError::Config {
            reason: format!("failed to read {}: {e}", path.display()),
        })?;

        let config = if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            Self::from_toml_str(&content)?
        } else {
            Self::from_json_str(&content)?
        };

        tracing::info!(path = %path.display(), servers = config.len(), "server config loaded");
        Ok(config)
    }

    fn from_value(mut value: Value) -> Result<Self> {
        if let Some(inner) = value.get_mut(WRAPPER_KEY) {
            value = inner.take();
        }
        if !value.is_object() {
            return Err(McpError::Config {
                reason: "server config must be an object mapping names to servers".into(),
            });
        }
        let config: Self = serde_json::from_value(value).map_err(|e| McpError::Config {
            reason: format!("invalid server config: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every server entry.
    pub fn validate(&self) -> Result<()> {
        self.servers
            .iter()
            .try_for_each(|(name, server)| server.validate(name))
    }

    /// Iterate over `(name, config)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ServerConfig)> {
        self.servers.iter()
    }

    /// Look up one server.
    pub fn get(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.get(name)
    }

    /// Number of configured servers.
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// Whether no servers are configured.
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

/// Strip the query string from a URL for logging (it may carry tokens).
pub fn redact_url(url: &Url) -> String {
    let mut clean = url.clone();
    clean.set_query(None);
    clean.set_fragment(None);
    clean.to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
