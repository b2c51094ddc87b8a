use axum_test::TestServer;
use federated_chat::AppState;
use federated_chat::llm::ChatStreamOrchestrator;
use federated_chat::mcp::FederationManager;
use federated_chat::normalized::NormalizedEvent;
use federated_chat::server::router;
use federated_chat::testing::{
    MockConnector, MockServer, ScriptedDriver, ScriptedFactory, stdio_descriptor, test_settings,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

async fn server_with(driver: ScriptedDriver) -> TestServer {
    let connector = MockConnector::new()
        .with_server("time", MockServer::new().with_tool("now", "Current time"))
        .with_server("flaky", MockServer::new().with_tool("boom", "Always fails").failing_calls())
        .with_server("down", MockServer::new().failing_connect());
    let federation = Arc::new(FederationManager::new(Arc::new(connector)));
    federation
        .initialize(&[
            stdio_descriptor("time"),
            stdio_descriptor("flaky"),
            stdio_descriptor("down"),
        ])
        .await
        .unwrap();

    let orchestrator = Arc::new(ChatStreamOrchestrator::new(
        test_settings(),
        Arc::new(ScriptedFactory::new(driver)),
        Arc::clone(&federation),
    ));

    TestServer::new(router(AppState::new(federation, orchestrator))).unwrap()
}

async fn server() -> TestServer {
    server_with(ScriptedDriver::new()).await
}

fn delta(text: &str) -> NormalizedEvent {
    NormalizedEvent::MessageDelta {
        text: text.to_string(),
    }
}

/// `(event, data)` pairs from an SSE body.
fn parse_sse(body: &str) -> Vec<(String, Value)> {
    body.split("\n\n")
        .filter_map(|frame| {
            let mut name = None;
            let mut data = None;
            for line in frame.lines() {
                if let Some(v) = line.strip_prefix("event:") {
                    name = Some(v.trim().to_string());
                } else if let Some(v) = line.strip_prefix("data:") {
                    data = serde_json::from_str(v.trim()).ok();
                }
            }
            Some((name?, data?))
        })
        .collect()
}

#[tokio::test]
async fn test_health() {
    let server = server().await;
    let body: Value = server.get("/health").await.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["federation"], "ready");
    assert_eq!(body["streaming"], false);
}

#[tokio::test]
async fn test_list_and_refresh_tools() {
    let server = server().await;

    let body: Value = server.get("/api/tools").await.json();
    let mut names: Vec<_> = body["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["prefixed_name"].as_str().unwrap().to_string())
        .collect();
    names.sort_unstable();
    assert_eq!(names, vec!["flaky-boom", "time-now"]);

    let response = server.post("/api/tools/refresh").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["tools"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_server_statuses() {
    let server = server().await;
    let body: Value = server.get("/api/servers").await.json();
    let servers = body["servers"].as_array().unwrap();
    assert_eq!(servers.len(), 3);

    let down = servers.iter().find(|s| s["id"] == "down").unwrap();
    assert_eq!(down["state"], "failed");
    assert!(down["error"].as_str().is_some());
}

#[tokio::test]
async fn test_call_tool() {
    let server = server().await;

    let response = server
        .post("/api/tools/call")
        .json(&json!({ "name": "time-now", "arguments": { "zone": "UTC" } }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["result"]["tool"], "now");
    assert_eq!(body["result"]["arguments"]["zone"], "UTC");
}

#[tokio::test]
async fn test_call_tool_errors() {
    let server = server().await;

    let response = server
        .post("/api/tools/call")
        .json(&json!({ "name": "down-anything" }))
        .expect_failure()
        .await;
    response.assert_status_not_found();
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "NO_CLIENT");

    let response = server
        .post("/api/tools/call")
        .json(&json!({ "name": "time-later" }))
        .expect_failure()
        .await;
    response.assert_status_not_found();
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "TOOL_NOT_FOUND");

    let response = server
        .post("/api/tools/call")
        .json(&json!({ "name": "flaky-boom" }))
        .expect_failure()
        .await;
    response.assert_status(axum::http::StatusCode::BAD_GATEWAY);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "INVOCATION_FAILURE");
}

#[tokio::test]
async fn test_chat_stream_sse() {
    let driver = ScriptedDriver::new().step(vec![delta("Hel"), delta("lo"), NormalizedEvent::Done]);
    let server = server_with(driver).await;

    let response = server
        .post("/api/chat/stream")
        .json(&json!({
            "messages": [{ "role": "user", "content": "hi" }],
            "skip_preamble": true
        }))
        .await;
    response.assert_status_ok();

    let frames = parse_sse(&response.text());
    let names: Vec<_> = frames.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["message.delta", "message.delta", "done", "outcome"]);

    assert_eq!(frames[0].1["type"], "message.delta");
    assert_eq!(frames[0].1["data"]["text"], "Hel");

    let outcome = &frames[3].1;
    assert_eq!(outcome["outcome"], "completed");
    assert_eq!(outcome["text"], "Hello");
}

#[tokio::test]
async fn test_chat_stream_reports_errors_as_outcome() {
    let driver = ScriptedDriver::new().fail_with(federated_chat::llm::ProviderError::new(
        429,
        json!({ "error": { "code": "quota_exceeded", "message": "slow down" } }).to_string(),
    ));
    let server = server_with(driver).await;

    let response = server
        .post("/api/chat/stream")
        .json(&json!({ "messages": [{ "role": "user", "content": "hi" }] }))
        .await;
    response.assert_status_ok();

    let frames = parse_sse(&response.text());
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].0, "outcome");
    assert_eq!(frames[0].1["outcome"], "rate_limited");
    assert_eq!(frames[0].1["quota"]["code"], "quota_exceeded");
}

#[tokio::test]
async fn test_abort_running_stream() {
    let driver = ScriptedDriver::new().step(vec![delta("thinking")]).hang_after_step();
    let server = server_with(driver).await;

    let idle: Value = server.post("/api/chat/abort").await.json();
    assert_eq!(idle["aborted"], false);

    let stream = server
        .post("/api/chat/stream")
        .json(&json!({ "messages": [{ "role": "user", "content": "hi" }] }));
    let abort = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        server.post("/api/chat/abort").await.json::<Value>()
    };
    let (response, aborted) = tokio::join!(async { stream.await }, abort);

    assert_eq!(aborted["aborted"], true);
    let frames = parse_sse(&response.text());
    assert_eq!(frames.last().unwrap().1["outcome"], "aborted");
}
