//! Remote tools.
//!
//! The loop sees remote tool servers through [`RemoteToolSource`];
//! [`McpClientPool`] is the production implementation.

use async_trait::async_trait;
use serde_json::{Map, Value};
use toolweave_mcp::McpClientPool;

use crate::error::Result;
use crate::types::ToolDescriptor;

/// A catalog of remotely executed tools.
#[async_trait]
pub trait RemoteToolSource: Send + Sync {
    /// Discover every available tool.
    async fn discover(&self) -> Result<Vec<ToolDescriptor>>;

    /// Run a tool and return its rendered output.
    async fn execute(&self, tool_name: &str, arguments: &Map<String, Value>) -> Result<String>;

    /// Release connections.  Must not fail.
    async fn close(&self);
}

#[async_trait]
impl RemoteToolSource for McpClientPool {
    async fn discover(&self) -> Result<Vec<ToolDescriptor>> {
        let tools = self.fetch_tools().await?;
        Ok(tools.iter().map(ToolDescriptor::from).collect())
    }

    async fn execute(&self, tool_name: &str, arguments: &Map<String, Value>) -> Result<String> {
        Ok(self.execute_tool(tool_name, arguments).await?)
    }

    async fn close(&self) {
        McpClientPool::close(self).await;
    }
}
