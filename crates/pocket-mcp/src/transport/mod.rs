//! Transport layer for MCP communication
//!
//! Provides transport abstractions for MCP communication with support for:
//! - Stdio (process-based) transport
//! - Streamable HTTP transport

use async_trait::async_trait;
use pocket_config::TransportSpec;
use pocket_core::Result;
use std::fmt::Debug;

use crate::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

pub mod http;
pub mod stdio;

pub use http::StreamableHttpTransport;
pub use stdio::StdioTransport;

/// Transport trait for MCP communication
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Send a JSON-RPC request
    async fn send_request(&mut self, request: JsonRpcRequest) -> Result<()>;

    /// Send a JSON-RPC notification (no response expected)
    async fn send_notification(&mut self, notification: JsonRpcNotification) -> Result<()>;

    /// Wait for the next JSON-RPC response. `None` means the peer has no
    /// further responses to deliver (stream closed).
    async fn receive_response(&mut self) -> Result<Option<JsonRpcResponse>>;

    /// Check if transport is connected
    async fn is_connected(&self) -> bool;

    /// Close the transport connection
    async fn close(&mut self) -> Result<()>;
}

/// Opens the transport for a configured server.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(
        &self,
        server: &str,
        spec: &TransportSpec,
        timeout_ms: u64,
    ) -> Result<Box<dyn Transport>>;
}

/// Connector that spawns processes for stdio servers and speaks HTTP to URL servers.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultConnector;

#[async_trait]
impl TransportConnector for DefaultConnector {
    async fn connect(
        &self,
        server: &str,
        spec: &TransportSpec,
        timeout_ms: u64,
    ) -> Result<Box<dyn Transport>> {
        match spec {
            TransportSpec::Stdio { command, args, env } => {
                let transport = StdioTransport::spawn(server, command, args, env)?;
                Ok(Box::new(transport))
            }
            TransportSpec::Http { url, headers } => {
                let transport = StreamableHttpTransport::new(url, headers, timeout_ms)?;
                Ok(Box::new(transport))
            }
        }
    }
}
