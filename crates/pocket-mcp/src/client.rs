//! MCP client implementation

use pocket_core::{PocketError, Result};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use crate::transport::Transport;
use crate::types::{
    InitializeParams, InitializeResult, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    ListToolsResult, McpTool, ToolCallParams, ToolCallResult,
};

/// A live session with one MCP server.
///
/// Requests are serialized through the transport lock, so a session can be
/// shared (`Arc<McpClient>`) by every tool wrapper it backs.
pub struct McpClient {
    /// Server name for identification
    name: String,

    transport: Mutex<Box<dyn Transport>>,

    request_id: AtomicU64,

    /// Timeout for each request
    timeout: Duration,

    closed: AtomicBool,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("closed", &self.closed)
            .finish()
    }
}

impl McpClient {
    pub fn new(name: impl Into<String>, transport: Box<dyn Transport>, timeout_ms: u64) -> Self {
        Self {
            name: name.into(),
            transport: Mutex::new(transport),
            request_id: AtomicU64::new(1),
            timeout: Duration::from_millis(timeout_ms),
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn next_request_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Perform the `initialize` handshake and send `notifications/initialized`.
    pub async fn initialize(&self) -> Result<InitializeResult> {
        debug!("Initializing MCP client: {}", self.name);

        let params = serde_json::to_value(InitializeParams::default())?;
        let result: InitializeResult = self.request("initialize", Some(params)).await?;

        info!(
            "MCP client '{}' initialized with protocol version: {}",
            self.name, result.protocol_version
        );
        if let Some(server_info) = &result.server_info {
            info!(
                "Connected to MCP server: {} v{}",
                server_info.name, server_info.version
            );
        }

        let notification = JsonRpcNotification::new("notifications/initialized", None);
        self.transport
            .lock()
            .await
            .send_notification(notification)
            .await?;

        Ok(result)
    }

    /// List every tool the server exposes, following pagination cursors.
    pub async fn list_tools(&self) -> Result<Vec<McpTool>> {
        debug!("Listing tools from MCP server: {}", self.name);

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen_cursors = HashSet::new();
        loop {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let page: ListToolsResult = self.request("tools/list", params).await?;
            tools.extend(page.tools);

            match page.next_cursor.filter(|c| !c.is_empty()) {
                Some(next) => {
                    if !seen_cursors.insert(next.clone()) {
                        return Err(PocketError::McpError(format!(
                            "MCP server '{}' repeated tools/list cursor '{}' after {} tools",
                            self.name,
                            next,
                            tools.len()
                        )));
                    }
                    cursor = Some(next);
                }
                None => break,
            }
        }

        debug!("Discovered {} tools from MCP server '{}'", tools.len(), self.name);
        Ok(tools)
    }

    /// Call a tool on the MCP server
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult> {
        debug!("Calling MCP tool '{}' on server '{}'", name, self.name);

        let arguments = if arguments.is_null() { json!({}) } else { arguments };
        let params = serde_json::to_value(ToolCallParams {
            name: name.to_string(),
            arguments,
        })?;

        self.request("tools/call", Some(params)).await
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, params: Option<Value>) -> Result<T> {
        let response = self.send_request(method, params).await?;

        if let Some(error) = response.error {
            return Err(PocketError::McpError(format!(
                "'{}' on server '{}' failed: {} (code {})",
                method, self.name, error.message, error.code
            )));
        }

        let result = response.result.ok_or_else(|| {
            PocketError::McpError(format!("'{}' response from '{}' missing result", method, self.name))
        })?;
        Ok(serde_json::from_value(result)?)
    }

    /// Send a request and wait for the response with the same id
    async fn send_request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PocketError::McpError(format!(
                "MCP session '{}' is closed",
                self.name
            )));
        }

        let id = self.next_request_id();
        let request = JsonRpcRequest::new(id, method, params);

        let mut transport = self.transport.lock().await;
        let exchange = async {
            transport.send_request(request).await?;
            loop {
                match transport.receive_response().await? {
                    Some(response) if response.answers(id) => return Ok(response),
                    Some(response) => {
                        warn!(
                            "Received response for different request: {} (expected: {})",
                            response.id, id
                        );
                    }
                    None => {
                        return Err(PocketError::McpError(format!(
                            "MCP server '{}' closed the connection before answering '{}'",
                            self.name, method
                        )));
                    }
                }
            }
        };

        timeout(self.timeout, exchange).await.map_err(|_| {
            PocketError::McpError(format!(
                "Request '{}' to '{}' timed out after {}ms",
                method,
                self.name,
                self.timeout.as_millis()
            ))
        })?
    }

    pub async fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.transport.lock().await.is_connected().await
    }

    /// Close the session. Only the first call reaches the transport.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        debug!("Closing MCP client: {}", self.name);
        self.transport.lock().await.close().await
    }
}
