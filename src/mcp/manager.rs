//! Federation manager.
//!
//! Owns the connection pool, the name mapping, the tool catalog and the
//! dispatcher, and exposes the request/response surface used by the UI and
//! the orchestrator: list tools, refresh tools, call tool.
//!
//! Construct one per application and share it as `Arc<FederationManager>`.
//! Lifecycle transitions (`initialize`, `dispose`) are serialized; calls that
//! arrive mid-transition wait for it to finish.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use super::catalog::{ToolCatalog, ToolDescriptor};
use super::client::Connector;
use super::config::ServerDescriptor;
use super::dispatcher::ToolDispatcher;
use super::error::{DispatchError, ManagerError, TeardownReport};
use super::namespace::NameMapping;
use super::pool::{ConnectedServer, ServerConnectionPool, ServerStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    Initializing,
    Ready,
    Disposing,
}

pub struct FederationManager {
    connector: Arc<dyn Connector>,
    transition: Mutex<()>,
    state: RwLock<LifecycleState>,
    pool: RwLock<ServerConnectionPool>,
    mapping: RwLock<NameMapping>,
    catalog: ToolCatalog,
    dispatcher: ToolDispatcher,
}

impl std::fmt::Debug for FederationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederationManager")
            .field("catalog", &self.catalog)
            .finish_non_exhaustive()
    }
}

impl FederationManager {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            transition: Mutex::new(()),
            state: RwLock::new(LifecycleState::Idle),
            pool: RwLock::new(ServerConnectionPool::new()),
            mapping: RwLock::new(NameMapping::default()),
            catalog: ToolCatalog::new(),
            dispatcher: ToolDispatcher::new(),
        }
    }

    pub async fn state(&self) -> LifecycleState {
        *self.state.read().await
    }

    /// Connect every enabled descriptor.
    ///
    /// Individual server failures are recorded, not returned. Errors only on
    /// lifecycle misuse or an escaped-id collision.
    #[tracing::instrument(skip_all, fields(server_count = descriptors.len()))]
    pub async fn initialize(&self, descriptors: &[ServerDescriptor]) -> Result<usize, ManagerError> {
        let _guard = self.transition.lock().await;
        if *self.state.read().await != LifecycleState::Idle {
            return Err(ManagerError::AlreadyInitialized);
        }
        *self.state.write().await = LifecycleState::Initializing;

        let mapping = match NameMapping::build(descriptors.iter().map(|d| d.id.as_str())) {
            Ok(m) => m,
            Err(e) => {
                *self.state.write().await = LifecycleState::Idle;
                return Err(e.into());
            }
        };
        *self.mapping.write().await = mapping;

        let connected = self
            .pool
            .write()
            .await
            .initialize_all(descriptors, self.connector.as_ref())
            .await;

        *self.state.write().await = LifecycleState::Ready;
        tracing::info!(
            name: "mcp.federation.ready",
            connected = connected,
            configured = descriptors.len(),
            "Federation manager ready"
        );
        Ok(connected)
    }

    /// Close all connections and return to `Idle`. Always completes.
    #[tracing::instrument(skip_all)]
    pub async fn dispose(&self) -> TeardownReport {
        let _guard = self.transition.lock().await;
        if *self.state.read().await == LifecycleState::Idle {
            return TeardownReport::default();
        }
        *self.state.write().await = LifecycleState::Disposing;

        self.dispatcher.invalidate().await;
        self.catalog.invalidate().await;
        let report = self.pool.write().await.close().await;
        *self.mapping.write().await = NameMapping::default();

        *self.state.write().await = LifecycleState::Idle;
        if report.is_clean() {
            tracing::info!(closed = report.closed, "Federation manager disposed");
        } else {
            tracing::warn!(
                closed = report.closed,
                failures = report.failures.len(),
                "Federation manager disposed with failures"
            );
        }
        report
    }

    async fn connected(&self) -> Vec<ConnectedServer> {
        self.pool.read().await.connected()
    }

    /// Federated tools across every connected server.
    pub async fn list_tools(&self) -> Arc<Vec<ToolDescriptor>> {
        let servers = self.connected().await;
        self.catalog.list_all(&servers).await
    }

    /// Re-fetch every manifest and drop cached callables.
    pub async fn refresh_tools(&self) -> Arc<Vec<ToolDescriptor>> {
        let servers = self.connected().await;
        self.dispatcher.invalidate().await;
        self.catalog.refresh(&servers).await
    }

    /// Call a tool by prefixed name.
    pub async fn call_tool(
        &self,
        prefixed_name: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, DispatchError> {
        let servers = self.connected().await;
        self.dispatcher.call(prefixed_name, args, &servers).await
    }

    pub async fn server_statuses(&self) -> Vec<ServerStatus> {
        self.pool.read().await.statuses()
    }

    /// Raw server id for an escaped prefix.
    pub async fn raw_server_id(&self, escaped: &str) -> Option<String> {
        self.mapping.read().await.raw(escaped).map(ToString::to_string)
    }
}
