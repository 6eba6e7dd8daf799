//! Streamable HTTP transport implementation for URL-based MCP servers
//!
//! Every client message is POSTed to the server URL. The server answers
//! either with a JSON body or with an SSE stream carrying the response.
//! A session id handed out by the server is replayed on later requests.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use pocket_core::{PocketError, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::{debug, info};

use super::Transport;
use crate::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

const SESSION_HEADER: &str = "mcp-session-id";

pub struct StreamableHttpTransport {
    url: String,
    client: reqwest::Client,
    session_id: Option<String>,
    pending: VecDeque<JsonRpcResponse>,
    connected: bool,
}

impl std::fmt::Debug for StreamableHttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamableHttpTransport")
            .field("url", &self.url)
            .field("session_id", &self.session_id)
            .field("connected", &self.connected)
            .finish()
    }
}

impl StreamableHttpTransport {
    pub fn new(url: &str, headers: &HashMap<String, String>, timeout_ms: u64) -> Result<Self> {
        info!("Connecting to MCP server via streamable HTTP: {}", url);

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(PocketError::McpError(format!(
                "MCP server URL must start with http:// or https://: {}",
                url
            )));
        }

        let mut default_headers = HeaderMap::new();
        for (key, value) in headers {
            let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                PocketError::McpError(format!("Invalid header name '{}': {}", key, e))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                PocketError::McpError(format!("Invalid header value for '{}': {}", key, e))
            })?;
            default_headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .default_headers(default_headers)
            .build()
            .map_err(|e| PocketError::McpError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            url: url.to_string(),
            client,
            session_id: None,
            pending: VecDeque::new(),
            connected: true,
        })
    }

    /// POST one message and queue whatever responses come back.
    async fn post<T: Serialize>(&mut self, message: &T, expected_id: Option<u64>) -> Result<()> {
        let mut request = self
            .client
            .post(&self.url)
            .header(ACCEPT, "application/json, text/event-stream")
            .json(message);
        if let Some(session_id) = &self.session_id {
            request = request.header(SESSION_HEADER, session_id);
        }

        let response = request.send().await.map_err(|e| {
            self.connected = false;
            PocketError::McpError(format!("Failed to send HTTP request to {}: {}", self.url, e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PocketError::McpError(format!(
                "HTTP request failed with status {}: {}",
                status, body
            )));
        }

        if let Some(session_id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            if self.session_id.as_deref() != Some(session_id) {
                debug!("MCP session id for {}: {}", self.url, session_id);
                self.session_id = Some(session_id.to_string());
            }
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if content_type.starts_with("text/event-stream") {
            let mut events = response.bytes_stream().eventsource();
            while let Some(event) = events.next().await {
                let event = event
                    .map_err(|e| PocketError::McpError(format!("SSE stream error: {}", e)))?;
                if event.data.trim().is_empty() {
                    continue;
                }
                let answered = self.queue_message(&event.data, expected_id)?;
                if answered {
                    break;
                }
            }
        } else if content_type.starts_with("application/json") {
            let body = response
                .text()
                .await
                .map_err(|e| PocketError::McpError(format!("Failed to read response body: {}", e)))?;
            if !body.trim().is_empty() {
                self.queue_message(&body, expected_id)?;
            }
        }

        Ok(())
    }

    /// Queue responses found in a JSON payload (single message or batch).
    /// Returns true once the response for `expected_id` has been queued.
    fn queue_message(&mut self, payload: &str, expected_id: Option<u64>) -> Result<bool> {
        let value: Value = serde_json::from_str(payload)?;
        let messages = match value {
            Value::Array(items) => items,
            other => vec![other],
        };

        let mut answered = false;
        for message in &messages {
            match JsonRpcResponse::from_message(message) {
                Some(response) => {
                    answered |= expected_id.is_some_and(|id| response.answers(id));
                    self.pending.push_back(response);
                }
                None => debug!("Ignoring server-initiated message from {}: {}", self.url, message),
            }
        }
        Ok(answered)
    }
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    async fn send_request(&mut self, request: JsonRpcRequest) -> Result<()> {
        let id = request.id;
        self.post(&request, Some(id)).await
    }

    async fn send_notification(&mut self, notification: JsonRpcNotification) -> Result<()> {
        self.post(&notification, None).await
    }

    async fn receive_response(&mut self) -> Result<Option<JsonRpcResponse>> {
        Ok(self.pending.pop_front())
    }

    async fn is_connected(&self) -> bool {
        self.connected
    }

    async fn close(&mut self) -> Result<()> {
        info!("Closing streamable HTTP transport for {}", self.url);

        if let Some(session_id) = self.session_id.take() {
            let result = self
                .client
                .delete(&self.url)
                .header(SESSION_HEADER, session_id)
                .send()
                .await;
            if let Err(e) = result {
                debug!("Failed to terminate MCP session at {}: {}", self.url, e);
            }
        }

        self.connected = false;
        self.pending.clear();
        Ok(())
    }
}
