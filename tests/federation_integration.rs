use federated_chat::mcp::config::load_descriptors;
use federated_chat::mcp::manager::LifecycleState;
use federated_chat::mcp::pool::ConnectionState;
use federated_chat::mcp::{DispatchError, FederationManager};
use federated_chat::testing::{MockConnector, MockServer};
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".json")
        .tempfile()
        .expect("Failed to create mcp.json");
    file.write_all(contents.as_bytes()).unwrap();
    file
}

const MCP_JSON: &str = r#"{
  "mcpServers": {
    "time": { "transport": "stdio", "command": "time-server" },
    "my.server": { "transport": "stdio", "command": "other-server", "args": ["--quiet"] },
    "broken": { "transport": "streamed", "url": "http://127.0.0.1:1/mcp" },
    "off": { "transport": "stdio", "command": "never", "enabled": false }
  }
}"#;

struct Fixture {
    manager: FederationManager,
    time: MockServer,
    other: MockServer,
    off: MockServer,
}

async fn fixture() -> Fixture {
    let file = write_config(MCP_JSON);
    let descriptors = load_descriptors(file.path()).expect("Failed to load descriptors");
    assert_eq!(descriptors.len(), 4);

    let time = MockServer::new()
        .with_tool("now", "Current time")
        .with_connect_delay(Duration::from_millis(20));
    let other = MockServer::new().with_tool_schema(
        "get-time",
        "Time in a zone",
        json!({
            "type": "object",
            "properties": { "zone": { "type": "string" } },
            "required": ["zone"]
        }),
    );
    let off = MockServer::new().with_tool("hidden", "Never listed");

    let connector = MockConnector::new()
        .with_server("time", time.clone())
        .with_server("my.server", other.clone())
        .with_server("broken", MockServer::new().failing_connect())
        .with_server("off", off.clone());

    let manager = FederationManager::new(Arc::new(connector));
    let connected = manager.initialize(&descriptors).await.unwrap();
    assert_eq!(connected, 2);

    Fixture {
        manager,
        time,
        other,
        off,
    }
}

#[tokio::test]
async fn test_federated_catalog_is_namespaced_and_cached() {
    let f = fixture().await;
    assert_eq!(f.manager.state().await, LifecycleState::Ready);

    let tools = f.manager.list_tools().await;
    let mut names: Vec<_> = tools.iter().map(|t| t.prefixed_name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["my_x2eserver-get-time", "time-now"]);

    // Second listing is served from cache.
    f.manager.list_tools().await;
    assert_eq!(f.time.list_calls(), 1);
    assert_eq!(f.other.list_calls(), 1);

    // Disabled servers are never contacted.
    assert_eq!(f.off.connect_calls(), 0);
    assert_eq!(
        f.manager.raw_server_id("my_x2eserver").await.as_deref(),
        Some("my.server")
    );
}

#[tokio::test]
async fn test_failed_server_is_isolated() {
    let f = fixture().await;

    let statuses = f.manager.server_statuses().await;
    let broken = statuses.iter().find(|s| s.id == "broken").unwrap();
    assert_eq!(broken.state, ConnectionState::Failed);
    assert!(broken.error.as_deref().unwrap_or_default().contains("connection refused"));
    assert!(statuses.iter().all(|s| s.id != "off"));

    let err = f.manager.call_tool("broken-anything", json!({})).await.unwrap_err();
    assert!(matches!(err, DispatchError::NoClient { .. }));

    // Siblings keep working.
    let out = f.manager.call_tool("time-now", json!({})).await.unwrap();
    assert_eq!(out["tool"], "now");
}

#[tokio::test]
async fn test_dispatch_splits_on_first_separator() {
    let f = fixture().await;

    let out = f
        .manager
        .call_tool("my_x2eserver-get-time", json!({ "zone": "UTC" }))
        .await
        .unwrap();
    assert_eq!(out["tool"], "get-time");
    assert_eq!(out["arguments"]["zone"], "UTC");

    let err = f.manager.call_tool("time-later", json!({})).await.unwrap_err();
    assert!(matches!(err, DispatchError::ToolNotFound { .. }));

    let err = f.manager.call_tool("nosuchserver", json!({})).await.unwrap_err();
    assert!(matches!(err, DispatchError::NoClient { .. }));
}

#[tokio::test]
async fn test_dispose_closes_and_resets() {
    let f = fixture().await;

    let report = f.manager.dispose().await;
    assert!(report.is_clean());
    assert_eq!(report.closed, 2);
    assert_eq!(f.time.close_calls(), 1);
    assert_eq!(f.manager.state().await, LifecycleState::Idle);

    let err = f.manager.call_tool("time-now", json!({})).await.unwrap_err();
    assert!(matches!(err, DispatchError::NoClient { .. }));
}

#[tokio::test]
async fn test_teardown_failures_are_collected() {
    let file = write_config(
        r#"{ "mcpServers": {
            "a": { "transport": "stdio", "command": "a" },
            "b": { "transport": "stdio", "command": "b" }
        } }"#,
    );
    let descriptors = load_descriptors(file.path()).unwrap();
    let a = MockServer::new().failing_close();
    let b = MockServer::new();
    let manager = FederationManager::new(Arc::new(
        MockConnector::new()
            .with_server("a", a.clone())
            .with_server("b", b.clone()),
    ));
    manager.initialize(&descriptors).await.unwrap();

    let report = manager.dispose().await;
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].server, "a");
    assert_eq!(b.close_calls(), 1);
    assert_eq!(manager.state().await, LifecycleState::Idle);
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let file = write_config(r#"{ "mcpServers": { "x": { "transport": "streamed", "url": "not a url" } } }"#);
    assert!(load_descriptors(file.path()).is_err());

    let file = write_config("{ not json");
    assert!(load_descriptors(file.path()).is_err());
}
