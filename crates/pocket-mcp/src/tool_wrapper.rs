//! Wrapper exposing a remote MCP tool through the local `Tool` trait

use async_trait::async_trait;
use pocket_core::Result;
use pocket_tools::Tool;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::client::McpClient;
use crate::conversions::render_content;
use crate::types::McpTool;

pub const TOOL_PREFIX: &str = "mcp";

/// Local name for a remote tool: `mcp_<server>_<tool>`.
pub fn wrapper_name(server: &str, tool: &str) -> String {
    format!("{}_{}_{}", TOOL_PREFIX, server, tool)
}

pub struct McpToolWrapper {
    name: String,
    /// Name the server knows the tool by
    remote_name: String,
    description: String,
    parameters: Value,
    server_name: String,
    client: Arc<McpClient>,
}

impl McpToolWrapper {
    pub fn new(tool_def: McpTool, client: Arc<McpClient>) -> Self {
        let server_name = client.name().to_string();
        let description = tool_def
            .description
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| tool_def.name.clone());
        // An empty schema object means the server declared no parameters
        let parameters = tool_def
            .input_schema
            .filter(|s| !s.is_null() && !s.as_object().is_some_and(|o| o.is_empty()))
            .unwrap_or_else(|| json!({"type": "object", "properties": {}}));

        Self {
            name: wrapper_name(&server_name, &tool_def.name),
            remote_name: tool_def.name,
            description,
            parameters,
            server_name,
            client,
        }
    }
}

#[async_trait]
impl Tool for McpToolWrapper {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    async fn execute(&self, args: Value) -> Result<String> {
        debug!(
            "Executing MCP tool '{}' from server '{}'",
            self.remote_name, self.server_name
        );

        let result = self.client.call_tool(&self.remote_name, args).await?;
        if result.is_error.unwrap_or(false) {
            warn!(
                "MCP tool '{}' on server '{}' reported an error result",
                self.remote_name, self.server_name
            );
        }

        Ok(render_content(&result.content))
    }
}
