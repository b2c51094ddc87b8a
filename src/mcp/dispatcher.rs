//! Routing of prefixed tool calls to their owning server.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::client::CapabilityClient;
use super::error::DispatchError;
use super::namespace::dispatch;
use super::pool::ConnectedServer;

/// A resolved binding for one prefixed tool name.
#[derive(Clone)]
pub struct CachedCallable {
    pub server: String,
    pub tool: String,
    client: Arc<dyn CapabilityClient>,
}

impl std::fmt::Debug for CachedCallable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedCallable")
            .field("server", &self.server)
            .field("tool", &self.tool)
            .finish_non_exhaustive()
    }
}

impl CachedCallable {
    async fn invoke(&self, args: serde_json::Value) -> Result<serde_json::Value, DispatchError> {
        self.client
            .call_tool(&self.tool, args)
            .await
            .map_err(|e| {
                tracing::error!(
                    server = %self.server,
                    tool_name = %self.tool,
                    error = %e,
                    "Tool invocation failed"
                );
                DispatchError::InvocationFailure {
                    server: self.server.clone(),
                    tool: self.tool.clone(),
                    message: format!("{e:#}"),
                }
            })
    }
}

/// Resolves and invokes prefixed tool names.
///
/// Callables are cached lazily and only dropped by [`ToolDispatcher::invalidate`],
/// which the manager calls on catalog refresh and teardown.
#[derive(Debug, Default)]
pub struct ToolDispatcher {
    callables: RwLock<HashMap<String, CachedCallable>>,
}

impl ToolDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `prefixed_name` with `args` on the server that owns it.
    pub async fn call(
        &self,
        prefixed_name: &str,
        args: serde_json::Value,
        servers: &[ConnectedServer],
    ) -> Result<serde_json::Value, DispatchError> {
        let callable = self.resolve(prefixed_name, servers).await?;

        tracing::debug!(
            tool = %prefixed_name,
            server = %callable.server,
            "Dispatching tool call"
        );
        callable.invoke(args).await
    }

    async fn resolve(
        &self,
        prefixed_name: &str,
        servers: &[ConnectedServer],
    ) -> Result<CachedCallable, DispatchError> {
        let no_client = || DispatchError::NoClient {
            tool: prefixed_name.to_string(),
        };

        let (escaped_server, tool_name) = dispatch(prefixed_name).ok_or_else(no_client)?;
        let server = servers
            .iter()
            .find(|s| s.escaped_id == escaped_server)
            .ok_or_else(no_client)?;

        if let Some(cached) = self.callables.read().await.get(prefixed_name) {
            return Ok(cached.clone());
        }

        let manifest = server.client.list_tools().await.map_err(|e| {
            tracing::error!(server = %server.id, error = %e, "tools/list failed during dispatch");
            DispatchError::InvocationFailure {
                server: server.id.clone(),
                tool: tool_name.to_string(),
                message: format!("{e:#}"),
            }
        })?;

        if !manifest.iter().any(|t| t.name == tool_name) {
            return Err(DispatchError::ToolNotFound {
                server: server.id.clone(),
                tool: tool_name.to_string(),
            });
        }

        let callable = CachedCallable {
            server: server.id.clone(),
            tool: tool_name.to_string(),
            client: Arc::clone(&server.client),
        };
        self.callables
            .write()
            .await
            .insert(prefixed_name.to_string(), callable.clone());
        Ok(callable)
    }

    /// Drop every cached callable.
    pub async fn invalidate(&self) {
        self.callables.write().await.clear();
    }

    pub async fn cached_len(&self) -> usize {
        self.callables.read().await.len()
    }
}
