//! Federated chat server.
//!
//! Entry point: loads configuration, connects capability servers and serves
//! the HTTP/SSE API until shutdown.

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use federated_chat::AppState;
use federated_chat::config::{AppConfig, LoggingConfig};
use federated_chat::llm::{ChatStreamOrchestrator, HttpDriverFactory};
use federated_chat::mcp::{FederationManager, RmcpConnector, ServerDescriptor, config::load_descriptors};

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // Initialize tracing (M-LOG-STRUCTURED)
    let registry = tracing_subscriber::registry().with(filter);
    if logging.json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

fn load_servers(config: &AppConfig) -> anyhow::Result<Vec<ServerDescriptor>> {
    let path = &config.mcp.config_path;
    if !path.exists() {
        warn!(
            name: "mcp.config.missing",
            path = %path.display(),
            "No capability server config found; starting without tools"
        );
        return Ok(Vec::new());
    }
    load_descriptors(path).with_context(|| format!("loading {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present)
    let _ = dotenv();

    let config = AppConfig::load().context("loading configuration")?;
    init_tracing(&config.logging);

    let settings = config.llm.to_settings();
    if let Err(e) = settings.validate() {
        warn!(error = %e, "LLM settings are invalid; streams will fail until fixed");
    }
    info!(
        name: "llm.config.loaded",
        base_url = %settings.base_url,
        model = %settings.model,
        protocol = ?settings.effective_protocol(),
        "LLM configuration loaded"
    );

    // Capability servers: connect once at startup
    let descriptors = load_servers(&config)?;
    let federation = Arc::new(FederationManager::new(Arc::new(RmcpConnector)));
    federation.initialize(&descriptors).await?;

    let tools = federation.list_tools().await;
    for tool in tools.iter() {
        info!(name: "mcp.tool.discovered", tool = %tool.prefixed_name, "Capability tool discovered");
    }

    let orchestrator = Arc::new(
        ChatStreamOrchestrator::new(
            settings,
            Arc::new(HttpDriverFactory::default()),
            Arc::clone(&federation),
        )
        .with_limits(config.llm.limits()),
    );

    let state = AppState::new(Arc::clone(&federation), orchestrator);
    let served = federated_chat::server::serve(&config, state).await;

    let report = federation.dispose().await;
    info!(
        name: "mcp.federation.disposed",
        closed = report.closed,
        failures = report.failures.len(),
        "Capability servers closed"
    );

    served
}
