//! MCP (Model Context Protocol) integration
//!
//! Connects to external MCP servers over stdio or streamable HTTP, discovers
//! their tools and registers one local wrapper per remote tool in a
//! [`pocket_tools::ToolRegistry`]. Wrapper names take the form
//! `mcp_<server>_<tool>` so identically named tools on different servers
//! never collide.

pub mod client;
pub mod conversions;
pub mod manager;
pub mod tool_wrapper;
pub mod transport;
pub mod types;

pub use client::McpClient;
pub use conversions::{render_content, NO_OUTPUT};
pub use manager::{ConnectReport, McpManager};
pub use tool_wrapper::{wrapper_name, McpToolWrapper};
pub use transport::{
    DefaultConnector, StdioTransport, StreamableHttpTransport, Transport, TransportConnector,
};
pub use types::{ContentBlock, McpTool, ToolCallResult};
