//! Stdio transport implementation for process-based MCP servers

use async_trait::async_trait;
use pocket_core::{PocketError, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::Transport;
use crate::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// Stdio transport for process-based MCP servers.
///
/// Messages are newline-delimited JSON on the child's stdin/stdout. The child
/// is killed when the transport is closed or dropped.
pub struct StdioTransport {
    server: String,
    command: String,
    args: Vec<String>,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    response_rx: mpsc::UnboundedReceiver<JsonRpcResponse>,
    connected: Arc<AtomicBool>,
}

impl std::fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport")
            .field("server", &self.server)
            .field("command", &self.command)
            .field("args", &self.args)
            .finish()
    }
}

impl StdioTransport {
    /// Spawn the server process and start reading its output.
    pub fn spawn(
        server: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self> {
        info!("Starting MCP server '{}' via stdio: {} {:?}", server, command, args);

        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            PocketError::McpError(format!("Failed to spawn MCP server process '{}': {}", command, e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PocketError::McpError("Failed to get process stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PocketError::McpError("Failed to get process stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| PocketError::McpError("Failed to get process stderr".into()))?;

        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));

        let connected_clone = connected.clone();
        let server_name = server.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        debug!("Received from MCP server '{}': {}", server_name, trimmed);

                        let message: Value = match serde_json::from_str(trimmed) {
                            Ok(message) => message,
                            Err(e) => {
                                debug!("Non-JSON output from '{}': {} - {}", server_name, trimmed, e);
                                continue;
                            }
                        };

                        match JsonRpcResponse::from_message(&message) {
                            Some(response) => {
                                if response_tx.send(response).is_err() {
                                    break;
                                }
                            }
                            None => debug!(
                                "Ignoring server-initiated message from '{}': {}",
                                server_name, trimmed
                            ),
                        }
                    }
                    Ok(None) => {
                        info!("MCP server '{}' stdout closed", server_name);
                        break;
                    }
                    Err(e) => {
                        error!("Error reading from MCP server '{}' stdout: {}", server_name, e);
                        break;
                    }
                }
            }
            connected_clone.store(false, Ordering::SeqCst);
        });

        let server_name = server.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    debug!("MCP server '{}' stderr: {}", server_name, trimmed);
                }
            }
        });

        Ok(Self {
            server: server.to_string(),
            command: command.to_string(),
            args: args.to_vec(),
            child: Some(child),
            stdin: Some(stdin),
            response_rx,
            connected,
        })
    }

    async fn write_line<T: Serialize>(&mut self, message: &T) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| PocketError::McpError("Process stdin not available".into()))?;

        let mut json = serde_json::to_string(message)?;
        debug!("Sending to MCP server '{}': {}", self.server, json);
        json.push('\n');

        stdin
            .write_all(json.as_bytes())
            .await
            .map_err(|e| PocketError::McpError(format!("Failed to write to stdin: {}", e)))?;
        stdin
            .flush()
            .await
            .map_err(|e| PocketError::McpError(format!("Failed to flush stdin: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send_request(&mut self, request: JsonRpcRequest) -> Result<()> {
        self.write_line(&request).await
    }

    async fn send_notification(&mut self, notification: JsonRpcNotification) -> Result<()> {
        self.write_line(&notification).await
    }

    async fn receive_response(&mut self) -> Result<Option<JsonRpcResponse>> {
        Ok(self.response_rx.recv().await)
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&mut self) -> Result<()> {
        info!("Closing stdio transport for '{}'", self.server);

        if let Some(mut stdin) = self.stdin.take() {
            if let Err(e) = stdin.shutdown().await {
                debug!("Error closing stdin of '{}': {}", self.server, e);
            }
        }

        if let Some(mut child) = self.child.take() {
            match child.kill().await {
                Ok(()) => info!("MCP server process '{}' terminated", self.server),
                Err(e) => warn!("Failed to kill MCP server process '{}': {}", self.server, e),
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}
