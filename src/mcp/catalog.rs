//! Tool manifest cache.
//!
//! Manifests are fetched once per session. A second [`ToolCatalog::list_all`]
//! returns the cached sequence without touching the network; only
//! [`ToolCatalog::refresh`] forces a re-fetch.

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::error::CatalogFetchError;
use super::namespace::compose;
use super::pool::ConnectedServer;
use super::schema::ParamValidator;

/// A federated tool, as exposed to the model and the UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    /// Name as reported by the owning server.
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    /// Escaped id of the owning server.
    pub server: String,
    /// `<escapedServer>-<name>`.
    pub prefixed_name: String,
}

impl ToolDescriptor {
    #[must_use]
    pub fn validator(&self) -> ParamValidator {
        ParamValidator::from_schema(&self.input_schema)
    }
}

#[derive(Debug, Default)]
pub struct ToolCatalog {
    cache: RwLock<Option<Arc<Vec<ToolDescriptor>>>>,
}

impl ToolCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached tools, fetching them on first use.
    pub async fn list_all(&self, servers: &[ConnectedServer]) -> Arc<Vec<ToolDescriptor>> {
        if let Some(cached) = self.cache.read().await.as_ref() {
            if !cached.is_empty() {
                return Arc::clone(cached);
            }
        }

        let mut cache = self.cache.write().await;
        // Another caller may have filled it while we waited for the lock.
        if let Some(cached) = cache.as_ref() {
            if !cached.is_empty() {
                return Arc::clone(cached);
            }
        }

        let tools = Arc::new(fetch_all(servers).await);
        tracing::info!(
            name: "mcp.catalog.fetched",
            server_count = servers.len(),
            tool_count = tools.len(),
            "Tool catalog fetched"
        );
        if !tools.is_empty() {
            *cache = Some(Arc::clone(&tools));
        }
        tools
    }

    /// Drop the cache and fetch again.
    pub async fn refresh(&self, servers: &[ConnectedServer]) -> Arc<Vec<ToolDescriptor>> {
        self.invalidate().await;
        self.list_all(servers).await
    }

    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    /// Current cache contents, if any.
    pub async fn cached(&self) -> Option<Arc<Vec<ToolDescriptor>>> {
        self.cache.read().await.clone()
    }
}

async fn fetch_all(servers: &[ConnectedServer]) -> Vec<ToolDescriptor> {
    let mut pending: FuturesUnordered<_> = servers.iter().map(fetch_one).collect();

    let mut tools = Vec::new();
    while let Some(result) = pending.next().await {
        match result {
            Ok(mut batch) => tools.append(&mut batch),
            Err(e) => {
                tracing::warn!(server = %e.server, error = %e.message, "tools/list failed, skipping server");
            }
        }
    }
    tools
}

async fn fetch_one(server: &ConnectedServer) -> Result<Vec<ToolDescriptor>, CatalogFetchError> {
    let manifest = server
        .client
        .list_tools()
        .await
        .map_err(|e| CatalogFetchError {
            server: server.id.clone(),
            message: format!("{e:#}"),
        })?;

    tracing::debug!(server = %server.id, tool_count = manifest.len(), "tools listed");

    Ok(manifest
        .into_iter()
        .map(|t| ToolDescriptor {
            prefixed_name: compose(&server.id, &t.name),
            server: server.escaped_id.clone(),
            name: t.name,
            description: t.description,
            input_schema: t.input_schema,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::pool::ServerConnectionPool;
    use crate::testing::{MockConnector, MockServer, stdio_descriptor};

    async fn pool_with(connector: &MockConnector, ids: &[&str]) -> ServerConnectionPool {
        let descriptors: Vec<_> = ids.iter().map(|id| stdio_descriptor(id)).collect();
        let mut pool = ServerConnectionPool::new();
        pool.initialize_all(&descriptors, connector).await;
        pool
    }

    #[tokio::test]
    async fn test_list_all_is_cached() {
        let time = MockServer::new().with_tool("now", "Current time");
        let search = MockServer::new().with_tool("query", "Search");
        let connector = MockConnector::new()
            .with_server("time", time.clone())
            .with_server("web.search", search.clone());
        let pool = pool_with(&connector, &["time", "web.search"]).await;
        let catalog = ToolCatalog::new();

        let first = catalog.list_all(&pool.connected()).await;
        let second = catalog.list_all(&pool.connected()).await;

        assert_eq!(first.len(), 2);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(time.list_calls(), 1);
        assert_eq!(search.list_calls(), 1);

        let names: Vec<&str> = first.iter().map(|t| t.prefixed_name.as_str()).collect();
        assert!(names.contains(&"time-now"));
        assert!(names.contains(&"web_x2esearch-query"));
    }

    #[tokio::test]
    async fn test_refresh_refetches() {
        let time = MockServer::new().with_tool("now", "Current time");
        let connector = MockConnector::new().with_server("time", time.clone());
        let pool = pool_with(&connector, &["time"]).await;
        let catalog = ToolCatalog::new();

        catalog.list_all(&pool.connected()).await;
        catalog.refresh(&pool.connected()).await;

        assert_eq!(time.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_server_contributes_nothing() {
        let ok = MockServer::new().with_tool("now", "Current time");
        let broken = MockServer::new().with_tool("x", "never listed").failing_list();
        let connector = MockConnector::new()
            .with_server("ok", ok)
            .with_server("broken", broken);
        let pool = pool_with(&connector, &["ok", "broken"]).await;

        let tools = ToolCatalog::new().list_all(&pool.connected()).await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].server, "ok");
    }

    #[tokio::test]
    async fn test_empty_result_is_not_cached() {
        let empty = MockServer::new();
        let connector = MockConnector::new().with_server("empty", empty.clone());
        let pool = pool_with(&connector, &["empty"]).await;
        let catalog = ToolCatalog::new();

        catalog.list_all(&pool.connected()).await;
        catalog.list_all(&pool.connected()).await;

        assert_eq!(empty.list_calls(), 2);
        assert!(catalog.cached().await.is_none());
    }
}
