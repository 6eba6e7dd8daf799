//! In-memory MCP servers for exercising the client and manager without processes.

use async_trait::async_trait;
use pocket_config::TransportSpec;
use pocket_core::{PocketError, Result};
use pocket_mcp::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use pocket_mcp::{Transport, TransportConnector};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// How a fake server behaves once connected.
#[derive(Clone)]
pub enum Behavior {
    /// Serve the given tools; `tools/call` answers with `content` for that tool name
    Serve {
        tools: Vec<Value>,
        results: HashMap<String, Value>,
    },
    /// The transport cannot be opened at all
    Unreachable,
    /// `initialize` returns a JSON-RPC error
    RejectInitialize,
    /// `tools/list` pages keyed by request cursor (`""` for the first page),
    /// each with the tools and the `nextCursor` to return
    Paged {
        pages: HashMap<String, (Vec<Value>, Option<String>)>,
    },
    /// Accepts requests and never answers
    Silent,
}

impl Behavior {
    pub fn serve(tools: Vec<Value>) -> Self {
        Behavior::Serve {
            tools,
            results: HashMap::new(),
        }
    }

    pub fn with_result(mut self, tool: &str, result: Value) -> Self {
        if let Behavior::Serve { results, .. } = &mut self {
            results.insert(tool.to_string(), result);
        }
        self
    }

    pub fn paged(pages: &[(&str, Vec<Value>, Option<&str>)]) -> Self {
        Behavior::Paged {
            pages: pages
                .iter()
                .map(|(cursor, tools, next)| {
                    (cursor.to_string(), (tools.clone(), next.map(str::to_string)))
                })
                .collect(),
        }
    }
}

#[derive(Clone, Default)]
pub struct FakeConnector {
    servers: HashMap<String, Behavior>,
    pub closes: Arc<AtomicUsize>,
    pub calls: Arc<Mutex<Vec<(String, Value)>>>,
    /// Number of `tools/list` requests received, across servers
    pub list_calls: Arc<AtomicUsize>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn server(mut self, name: &str, behavior: Behavior) -> Self {
        self.servers.insert(name.to_string(), behavior);
        self
    }
}

#[async_trait]
impl TransportConnector for FakeConnector {
    async fn connect(
        &self,
        server: &str,
        _spec: &TransportSpec,
        _timeout_ms: u64,
    ) -> Result<Box<dyn Transport>> {
        match self.servers.get(server) {
            None | Some(Behavior::Unreachable) => Err(PocketError::McpError(format!(
                "connection refused for '{}'",
                server
            ))),
            Some(behavior) => Ok(Box::new(FakeTransport {
                behavior: behavior.clone(),
                pending: VecDeque::new(),
                closes: self.closes.clone(),
                calls: self.calls.clone(),
                list_calls: self.list_calls.clone(),
                open: true,
            })),
        }
    }
}

pub struct FakeTransport {
    behavior: Behavior,
    pending: VecDeque<JsonRpcResponse>,
    closes: Arc<AtomicUsize>,
    calls: Arc<Mutex<Vec<(String, Value)>>>,
    list_calls: Arc<AtomicUsize>,
    open: bool,
}

impl std::fmt::Debug for FakeTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeTransport").field("open", &self.open).finish()
    }
}

impl FakeTransport {
    fn answer(&self, request: &JsonRpcRequest) -> JsonRpcResponse {
        match (&self.behavior, request.method.as_str()) {
            (Behavior::RejectInitialize, _) => {
                JsonRpcResponse::failure(request.id, -32600, "unsupported protocol version")
            }
            (Behavior::Unreachable | Behavior::Silent, _) => {
                unreachable!("these servers never answer")
            }
            (_, "initialize") => JsonRpcResponse::success(
                request.id,
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "fake", "version": "1.0.0"}
                }),
            ),
            (Behavior::Serve { tools, .. }, "tools/list") => {
                self.list_calls.fetch_add(1, Ordering::SeqCst);
                JsonRpcResponse::success(request.id, json!({ "tools": tools }))
            }
            (Behavior::Paged { pages }, "tools/list") => {
                self.list_calls.fetch_add(1, Ordering::SeqCst);
                let cursor = request
                    .params
                    .as_ref()
                    .and_then(|p| p["cursor"].as_str())
                    .unwrap_or_default();
                match pages.get(cursor) {
                    Some((tools, next)) => JsonRpcResponse::success(
                        request.id,
                        json!({ "tools": tools, "nextCursor": next }),
                    ),
                    None => JsonRpcResponse::failure(request.id, -32602, format!("unknown cursor {}", cursor)),
                }
            }
            (Behavior::Serve { results, .. }, "tools/call") => {
                let params = request.params.clone().unwrap_or_default();
                let name = params["name"].as_str().unwrap_or_default().to_string();
                self.calls
                    .lock()
                    .unwrap()
                    .push((name.clone(), params["arguments"].clone()));
                let result = results
                    .get(&name)
                    .cloned()
                    .unwrap_or_else(|| json!({ "content": [] }));
                JsonRpcResponse::success(request.id, result)
            }
            (_, other) => JsonRpcResponse::failure(request.id, -32601, format!("unknown method {}", other)),
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send_request(&mut self, request: JsonRpcRequest) -> Result<()> {
        if matches!(self.behavior, Behavior::Silent) {
            return Ok(());
        }
        let response = self.answer(&request);
        self.pending.push_back(response);
        Ok(())
    }

    async fn send_notification(&mut self, _notification: JsonRpcNotification) -> Result<()> {
        Ok(())
    }

    async fn receive_response(&mut self) -> Result<Option<JsonRpcResponse>> {
        if matches!(self.behavior, Behavior::Silent) {
            std::future::pending::<()>().await;
        }
        Ok(self.pending.pop_front())
    }

    async fn is_connected(&self) -> bool {
        self.open
    }

    async fn close(&mut self) -> Result<()> {
        self.open = false;
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn tool(name: &str) -> Value {
    json!({
        "name": name,
        "description": format!("{} tool", name),
        "inputSchema": {
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"]
        }
    })
}
