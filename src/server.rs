use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::AppState;
use crate::config::AppConfig;
use crate::llm::{Message, RequestType, StreamOptions, StreamOutcome};
use crate::mcp::{DispatchError, ToolDescriptor};
use crate::normalized::{NormalizedEvent, event_json, event_name};

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/tools", get(list_tools))
        .route("/api/tools/refresh", post(refresh_tools))
        .route("/api/tools/call", post(call_tool))
        .route("/api/servers", get(list_servers))
        .route("/api/chat/stream", post(chat_stream))
        .route("/api/chat/abort", post(abort_chat))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Serve until ctrl-c / SIGTERM.
pub async fn serve(config: &AppConfig, state: AppState) -> anyhow::Result<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(name: "server.stopped", "Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install ctrl-c handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutdown signal received");
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// JSON error body: `{"error": {"code", "message"}}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "error": { "code": self.code, "message": self.message } });
        (self.status, Json(body)).into_response()
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        let status = match &err {
            DispatchError::NoClient { .. } | DispatchError::ToolNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            DispatchError::InvocationFailure { .. } => StatusCode::BAD_GATEWAY,
        };
        Self {
            status,
            code: err.code(),
            message: err.to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Federation Handlers
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ToolListResponse {
    tools: Vec<ToolDescriptor>,
}

/// GET /health
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "federation": state.federation.state().await,
        "streaming": state.orchestrator.is_streaming(),
    }))
}

/// GET /api/tools - Federated tools, from cache after the first call.
async fn list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    let tools = state.federation.list_tools().await;
    Json(ToolListResponse {
        tools: tools.as_ref().clone(),
    })
}

/// POST /api/tools/refresh - Re-fetch every manifest.
async fn refresh_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    let tools = state.federation.refresh_tools().await;
    info!(name: "mcp.catalog.refreshed", tool_count = tools.len(), "Tool catalog refreshed");
    Json(ToolListResponse {
        tools: tools.as_ref().clone(),
    })
}

#[derive(Debug, Deserialize)]
struct CallToolRequest {
    /// Prefixed tool name.
    name: String,
    #[serde(default = "empty_object")]
    arguments: serde_json::Value,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// POST /api/tools/call - Pass-through to the dispatcher.
async fn call_tool(
    State(state): State<AppState>,
    Json(req): Json<CallToolRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    tracing::info!(tool_name = %req.name, "Direct tool call");
    let result = state.federation.call_tool(&req.name, req.arguments).await?;
    Ok(Json(json!({ "result": result })))
}

/// GET /api/servers - Connection state per configured server.
async fn list_servers(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "servers": state.federation.server_statuses().await }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Chat Handlers
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatStreamRequest {
    messages: Vec<Message>,
    #[serde(default)]
    request_type: RequestType,
    #[serde(default)]
    skip_preamble: bool,
}

fn sse_from_event(event: &NormalizedEvent) -> Event {
    Event::default().event(event_name(event)).data(event_json(event))
}

fn sse_from_outcome(outcome: &StreamOutcome) -> Event {
    let json = serde_json::to_string(outcome).unwrap_or_else(|_| "{}".to_string());
    Event::default().event("outcome").data(json)
}

/// POST /api/chat/stream - SSE of normalized events, then one `outcome` event.
///
/// Dropping the connection cancels the stream.
async fn chat_stream(
    State(state): State<AppState>,
    Json(req): Json<ChatStreamRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send> {
    let (tx, rx) = mpsc::unbounded_channel::<NormalizedEvent>();
    let token = CancellationToken::new();
    let options = StreamOptions {
        cancellation_token: Some(token.clone()),
        skip_preamble: req.skip_preamble,
    };

    let orchestrator = Arc::clone(&state.orchestrator);
    let handle = tokio::spawn(async move {
        orchestrator
            .stream(req.messages, req.request_type, options, &tx)
            .await
    });

    let guard = token.drop_guard();
    let events = UnboundedReceiverStream::new(rx).map(|event| Ok(sse_from_event(&event)));
    let outcome = futures::stream::once(async move {
        let outcome = handle.await.unwrap_or_else(|e| StreamOutcome::Errored {
            message: format!("stream task failed: {e}"),
            code: None,
        });
        // Finished normally; nothing left to cancel.
        let _ = guard.disarm();
        Ok(sse_from_outcome(&outcome))
    });

    Sse::new(events.chain(outcome))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

/// POST /api/chat/abort
async fn abort_chat(State(state): State<AppState>) -> Json<serde_json::Value> {
    let aborted = state.orchestrator.abort_stream();
    Json(json!({ "aborted": aborted }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_error_status() {
        let err: ApiError = DispatchError::NoClient {
            tool: "x-y".to_string(),
        }
        .into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.code, "NO_CLIENT");

        let err: ApiError = DispatchError::InvocationFailure {
            server: "s".to_string(),
            tool: "t".to_string(),
            message: "boom".to_string(),
        }
        .into();
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
    }
}
