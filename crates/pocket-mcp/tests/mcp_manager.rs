mod support;

use pocket_config::McpServerConfig;
use pocket_mcp::{McpManager, NO_OUTPUT};
use pocket_tools::ToolRegistry;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use support::{tool, Behavior, FakeConnector};

fn servers(entries: &[(&str, McpServerConfig)]) -> BTreeMap<String, McpServerConfig> {
    entries
        .iter()
        .map(|(name, config)| (name.to_string(), config.clone()))
        .collect()
}

fn stdio() -> McpServerConfig {
    McpServerConfig::stdio("fake-mcp-server", vec![])
}

#[tokio::test]
async fn registers_one_wrapper_per_remote_tool() {
    let registry = Arc::new(ToolRegistry::new());
    let connector = FakeConnector::new()
        .server("files", Behavior::serve(vec![tool("read"), tool("write"), tool("list")]));
    let mut manager = McpManager::with_connector(registry.clone(), connector);

    let report = manager.connect_servers(&servers(&[("files", stdio())])).await;

    assert_eq!(report.connected, vec![("files".to_string(), 3)]);
    assert_eq!(
        registry.list(),
        vec!["mcp_files_list", "mcp_files_read", "mcp_files_write"]
    );
    assert_eq!(manager.list_servers(), vec!["files"]);
    assert_eq!(manager.server_tools("files").unwrap().len(), 3);
}

#[tokio::test]
async fn identical_remote_names_do_not_collide_across_servers() {
    let registry = Arc::new(ToolRegistry::new());
    let connector = FakeConnector::new()
        .server("alpha", Behavior::serve(vec![tool("search")]))
        .server("beta", Behavior::serve(vec![tool("search")]));
    let mut manager = McpManager::with_connector(registry.clone(), connector);

    let report = manager
        .connect_servers(&servers(&[("alpha", stdio()), ("beta", stdio())]))
        .await;

    assert_eq!(report.tool_count(), 2);
    assert!(report.failed.is_empty());
    assert_eq!(registry.list(), vec!["mcp_alpha_search", "mcp_beta_search"]);
}

#[tokio::test]
async fn valid_stdio_server_survives_unreachable_url_server() {
    let registry = Arc::new(ToolRegistry::new());
    let connector = FakeConnector::new()
        .server("serverA", Behavior::serve(vec![tool("echo")]))
        .server("serverB", Behavior::Unreachable);
    let mut manager = McpManager::with_connector(registry.clone(), connector);

    let report = manager
        .connect_servers(&servers(&[
            ("serverA", stdio()),
            ("serverB", McpServerConfig::http("http://definitely-not-a-host.invalid/mcp")),
        ]))
        .await;

    assert_eq!(registry.list(), vec!["mcp_serverA_echo"]);
    assert_eq!(report.connected, vec![("serverA".to_string(), 1)]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "serverB");
    assert!(report.failed[0].1.contains("connection refused"));
}

#[tokio::test]
async fn server_without_transport_is_skipped() {
    let registry = Arc::new(ToolRegistry::new());
    let connector = FakeConnector::new().server("ok", Behavior::serve(vec![tool("ping")]));
    let mut manager = McpManager::with_connector(registry.clone(), connector);

    let report = manager
        .connect_servers(&servers(&[
            ("empty", McpServerConfig::default()),
            ("ok", stdio()),
        ]))
        .await;

    assert_eq!(report.skipped, vec!["empty"]);
    assert!(report.failed.is_empty());
    assert_eq!(registry.list(), vec!["mcp_ok_ping"]);
}

#[tokio::test]
async fn failed_handshake_closes_session_once_and_registers_nothing() {
    let registry = Arc::new(ToolRegistry::new());
    let connector = FakeConnector::new().server("picky", Behavior::RejectInitialize);
    let closes = connector.closes.clone();
    let mut manager = McpManager::with_connector(registry.clone(), connector);

    let report = manager.connect_servers(&servers(&[("picky", stdio())])).await;

    assert!(registry.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].1.contains("unsupported protocol version"));
    assert_eq!(closes.load(Ordering::SeqCst), 1);

    manager.close_all().await;
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn registration_collision_rolls_back_the_server() {
    let registry = Arc::new(ToolRegistry::new());
    // The same remote tool listed twice produces the same wrapper name.
    let connector = FakeConnector::new()
        .server("dup", Behavior::serve(vec![tool("a"), tool("b"), tool("a")]))
        .server("fine", Behavior::serve(vec![tool("c")]));
    let closes = connector.closes.clone();
    let mut manager = McpManager::with_connector(registry.clone(), connector);

    let report = manager
        .connect_servers(&servers(&[("dup", stdio()), ("fine", stdio())]))
        .await;

    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].1.contains("already registered"));
    assert_eq!(registry.list(), vec!["mcp_fine_c"]);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn close_all_tears_down_each_session_exactly_once() {
    let registry = Arc::new(ToolRegistry::new());
    let connector = FakeConnector::new()
        .server("one", Behavior::serve(vec![tool("x")]))
        .server("two", Behavior::serve(vec![tool("y")]));
    let closes = connector.closes.clone();
    let mut manager = McpManager::with_connector(registry.clone(), connector);

    manager
        .connect_servers(&servers(&[("one", stdio()), ("two", stdio())]))
        .await;
    assert_eq!(registry.len(), 2);

    manager.close_all().await;
    manager.close_all().await;

    assert_eq!(closes.load(Ordering::SeqCst), 2);
    assert!(registry.is_empty());
    assert!(manager.list_servers().is_empty());
}

#[tokio::test]
async fn wrapper_forwards_arguments_and_joins_text() {
    let registry = Arc::new(ToolRegistry::new());
    let connector = FakeConnector::new().server(
        "serverA",
        Behavior::serve(vec![tool("echo")]).with_result(
            "echo",
            json!({"content": [
                {"type": "text", "text": "hello"},
                {"type": "text", "text": "world"}
            ]}),
        ),
    );
    let calls = connector.calls.clone();
    let mut manager = McpManager::with_connector(registry.clone(), connector);
    manager.connect_servers(&servers(&[("serverA", stdio())])).await;

    let output = registry
        .execute("mcp_serverA_echo", json!({"text": "hello world"}))
        .await
        .unwrap();

    assert_eq!(output, "hello\nworld");
    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "echo");
    assert_eq!(calls[0].1, json!({"text": "hello world"}));
}

#[tokio::test]
async fn wrapper_stringifies_non_text_blocks() {
    let registry = Arc::new(ToolRegistry::new());
    let image = json!({"type": "image", "data": "aGk=", "mimeType": "image/png"});
    let connector = FakeConnector::new().server(
        "media",
        Behavior::serve(vec![tool("snap")]).with_result(
            "snap",
            json!({"content": [image.clone(), image.clone()]}),
        ),
    );
    let mut manager = McpManager::with_connector(registry.clone(), connector);
    manager.connect_servers(&servers(&[("media", stdio())])).await;

    let output = registry
        .execute("mcp_media_snap", json!({"text": "cheese"}))
        .await
        .unwrap();

    assert_eq!(output, format!("{}\n{}", image, image));
}

#[tokio::test]
async fn wrapper_reports_sentinel_for_empty_content() {
    let registry = Arc::new(ToolRegistry::new());
    let connector = FakeConnector::new().server("quiet", Behavior::serve(vec![tool("noop")]));
    let mut manager = McpManager::with_connector(registry.clone(), connector);
    manager.connect_servers(&servers(&[("quiet", stdio())])).await;

    let output = registry
        .execute("mcp_quiet_noop", json!({"text": ""}))
        .await
        .unwrap();

    assert_eq!(output, NO_OUTPUT);
}

#[tokio::test]
async fn wrapper_defaults_description_and_schema() {
    let registry = Arc::new(ToolRegistry::new());
    let connector = FakeConnector::new().server(
        "bare",
        Behavior::serve(vec![
            json!({"name": "ping"}),
            json!({"name": "pong", "description": "", "inputSchema": {}}),
        ]),
    );
    let mut manager = McpManager::with_connector(registry.clone(), connector);
    manager.connect_servers(&servers(&[("bare", stdio())])).await;

    let tool = registry.get("mcp_bare_ping").unwrap();
    assert_eq!(tool.description(), "ping");
    assert_eq!(tool.parameters(), json!({"type": "object", "properties": {}}));

    // An empty schema object counts as no schema.
    let tool = registry.get("mcp_bare_pong").unwrap();
    assert_eq!(tool.description(), "pong");
    assert_eq!(tool.parameters(), json!({"type": "object", "properties": {}}));

    // With an empty-object schema any object is accepted, including no arguments.
    let output = registry.execute("mcp_bare_ping", json!({})).await.unwrap();
    assert_eq!(output, NO_OUTPUT);
}

#[tokio::test]
async fn calls_after_close_fail_cleanly() {
    let registry = Arc::new(ToolRegistry::new());
    let connector = FakeConnector::new().server("gone", Behavior::serve(vec![tool("echo")]));
    let mut manager = McpManager::with_connector(registry.clone(), connector);
    manager.connect_servers(&servers(&[("gone", stdio())])).await;

    let tool = registry.get("mcp_gone_echo").unwrap();
    manager.close_all().await;

    let err = tool.execute(json!({"text": "hi"})).await.unwrap_err();
    assert!(err.to_string().contains("closed"));
}

#[tokio::test]
async fn paginated_tool_list_is_followed_to_the_last_page() {
    let registry = Arc::new(ToolRegistry::new());
    let connector = FakeConnector::new().server(
        "big",
        Behavior::paged(&[
            ("", vec![tool("a")], Some("p2")),
            ("p2", vec![tool("b")], Some("p3")),
            ("p3", vec![tool("c")], None),
        ]),
    );
    let list_calls = connector.list_calls.clone();
    let mut manager = McpManager::with_connector(registry.clone(), connector);

    let report = manager.connect_servers(&servers(&[("big", stdio())])).await;

    assert_eq!(report.connected, vec![("big".to_string(), 3)]);
    assert_eq!(registry.list(), vec!["mcp_big_a", "mcp_big_b", "mcp_big_c"]);
    assert_eq!(list_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn cycling_cursor_fails_that_server_without_blocking_the_next() {
    let registry = Arc::new(ToolRegistry::new());
    let connector = FakeConnector::new()
        .server(
            "cycler",
            Behavior::paged(&[
                ("", vec![tool("a")], Some("p2")),
                ("p2", vec![tool("b")], Some("p3")),
                ("p3", vec![tool("c")], Some("p2")),
            ]),
        )
        .server("zeta", Behavior::serve(vec![tool("ok")]));
    let closes = connector.closes.clone();
    let list_calls = connector.list_calls.clone();
    let mut manager = McpManager::with_connector(registry.clone(), connector);

    let report = manager
        .connect_servers(&servers(&[("cycler", stdio()), ("zeta", stdio())]))
        .await;

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "cycler");
    assert!(report.failed[0].1.contains("repeated tools/list cursor 'p2'"));
    assert_eq!(report.connected, vec![("zeta".to_string(), 1)]);
    assert_eq!(registry.list(), vec!["mcp_zeta_ok"]);
    // Three pages for the cycler, one for zeta.
    assert_eq!(list_calls.load(Ordering::SeqCst), 4);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn silent_server_times_out_and_is_closed() {
    let registry = Arc::new(ToolRegistry::new());
    let connector = FakeConnector::new()
        .server("mute", Behavior::Silent)
        .server("ok", Behavior::serve(vec![tool("ping")]));
    let closes = connector.closes.clone();
    let mut manager = McpManager::with_connector(registry.clone(), connector);

    let mut mute = stdio();
    mute.timeout_ms = 1500;
    let started = tokio::time::Instant::now();
    let report = manager
        .connect_servers(&servers(&[("mute", mute), ("ok", stdio())]))
        .await;

    assert!(started.elapsed() >= Duration::from_millis(1500));
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "mute");
    assert!(report.failed[0].1.contains("timed out after 1500ms"));
    assert_eq!(report.connected, vec![("ok".to_string(), 1)]);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}
