//! MCP Manager: connects configured servers and projects their tools into the registry
//!
//! Each server is set up inside its own isolation boundary. A server that is
//! misconfigured, unreachable or fails partway through registration is
//! logged and skipped; it never prevents the remaining servers from loading.

use pocket_config::McpServerConfig;
use pocket_core::Result;
use pocket_tools::{Tool, ToolRegistry};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::client::McpClient;
use crate::tool_wrapper::McpToolWrapper;
use crate::transport::{DefaultConnector, TransportConnector};

/// Outcome of connecting a set of servers.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConnectReport {
    /// Servers that connected, with the number of tools each registered
    pub connected: Vec<(String, usize)>,
    /// Servers that failed, with the cause
    pub failed: Vec<(String, String)>,
    /// Servers skipped because neither a command nor a URL was configured
    pub skipped: Vec<String>,
}

impl ConnectReport {
    pub fn tool_count(&self) -> usize {
        self.connected.iter().map(|(_, count)| count).sum()
    }
}

/// Handle to a connected MCP server
struct McpServerHandle {
    client: Arc<McpClient>,
    tools: Vec<String>,
}

pub struct McpManager<C: TransportConnector = DefaultConnector> {
    tool_registry: Arc<ToolRegistry>,
    connector: C,
    /// Live sessions in connection order
    servers: Vec<McpServerHandle>,
}

impl McpManager<DefaultConnector> {
    pub fn new(tool_registry: Arc<ToolRegistry>) -> Self {
        Self::with_connector(tool_registry, DefaultConnector)
    }
}

impl<C: TransportConnector> McpManager<C> {
    pub fn with_connector(tool_registry: Arc<ToolRegistry>, connector: C) -> Self {
        Self {
            tool_registry,
            connector,
            servers: Vec::new(),
        }
    }

    /// Connect every configured server and register its tools.
    pub async fn connect_servers(
        &mut self,
        servers: &BTreeMap<String, McpServerConfig>,
    ) -> ConnectReport {
        let mut report = ConnectReport::default();

        for (name, config) in servers {
            match self.connect_server(name, config).await {
                Ok(Some(count)) => report.connected.push((name.clone(), count)),
                Ok(None) => report.skipped.push(name.clone()),
                Err(e) => {
                    error!("MCP server '{}': failed to connect: {}", name, e);
                    report.failed.push((name.clone(), e.to_string()));
                }
            }
        }

        if !servers.is_empty() {
            info!(
                "MCP setup complete: {} connected, {} failed, {} skipped, {} tools registered",
                report.connected.len(),
                report.failed.len(),
                report.skipped.len(),
                report.tool_count()
            );
        }

        report
    }

    /// Set up one server. `Ok(None)` means it was skipped for lack of a transport.
    pub async fn connect_server(&mut self, name: &str, config: &McpServerConfig) -> Result<Option<usize>> {
        let Some(spec) = config.transport() else {
            warn!("MCP server '{}': no command or url configured, skipping", name);
            return Ok(None);
        };

        debug!("MCP server '{}': opening {} transport", name, spec.kind());
        let transport = self.connector.connect(name, &spec, config.timeout_ms).await?;
        let client = Arc::new(McpClient::new(name, transport, config.timeout_ms));

        match self.register_tools(&client).await {
            Ok(tools) => {
                let count = tools.len();
                info!("MCP server '{}': connected, {} tools registered", name, count);
                self.servers.push(McpServerHandle { client, tools });
                Ok(Some(count))
            }
            Err(e) => {
                if let Err(close_err) = client.close().await {
                    warn!("Error closing MCP client '{}': {}", name, close_err);
                }
                Err(e)
            }
        }
    }

    /// Handshake, list and register. On failure nothing from this server stays registered.
    async fn register_tools(&self, client: &Arc<McpClient>) -> Result<Vec<String>> {
        client.initialize().await?;
        let tool_defs = client.list_tools().await?;

        let mut registered: Vec<String> = Vec::with_capacity(tool_defs.len());
        for tool_def in tool_defs {
            let wrapper = McpToolWrapper::new(tool_def, Arc::clone(client));
            let tool_name = wrapper.name().to_string();

            if let Err(e) = self.tool_registry.register(wrapper) {
                for name in &registered {
                    self.tool_registry.unregister(name);
                }
                return Err(e);
            }

            debug!("MCP: registered tool '{}' from server '{}'", tool_name, client.name());
            registered.push(tool_name);
        }

        Ok(registered)
    }

    /// Names of connected servers, in connection order
    pub fn list_servers(&self) -> Vec<String> {
        self.servers.iter().map(|s| s.client.name().to_string()).collect()
    }

    /// Tools registered by a connected server
    pub fn server_tools(&self, name: &str) -> Option<&[String]> {
        self.servers
            .iter()
            .find(|s| s.client.name() == name)
            .map(|s| s.tools.as_slice())
    }

    /// Close every session in reverse connection order and unregister its tools.
    pub async fn close_all(&mut self) {
        info!("Closing {} MCP sessions", self.servers.len());

        while let Some(handle) = self.servers.pop() {
            for tool in &handle.tools {
                self.tool_registry.unregister(tool);
            }
            if let Err(e) = handle.client.close().await {
                warn!("Error closing MCP client '{}': {}", handle.client.name(), e);
            }
        }
    }
}
