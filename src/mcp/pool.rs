//! Connection pool for capability servers.
//!
//! Every enabled descriptor gets exactly one [`Connection`]. Connects and
//! closes run concurrently and are isolated from each other: a failing server
//! is recorded as [`ConnectionState::Failed`] and its siblings carry on.

use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::client::{CapabilityClient, Connector};
use super::config::ServerDescriptor;
use super::error::{ConnectionError, TeardownFailure, TeardownReport};
use super::namespace::escape;

/// Lifecycle of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
    Closed,
}

/// One server's connection, owned by the pool.
pub struct Connection {
    descriptor: ServerDescriptor,
    escaped_id: String,
    state: ConnectionState,
    client: Option<Arc<dyn CapabilityClient>>,
    last_error: Option<String>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.descriptor.id)
            .field("state", &self.state)
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}

impl Connection {
    fn new(descriptor: ServerDescriptor) -> Self {
        let escaped_id = escape(&descriptor.id);
        Self {
            descriptor,
            escaped_id,
            state: ConnectionState::Disconnected,
            client: None,
            last_error: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }
}

/// Call handle for a connected server.
#[derive(Clone)]
pub struct ConnectedServer {
    pub id: String,
    pub escaped_id: String,
    pub client: Arc<dyn CapabilityClient>,
}

impl std::fmt::Debug for ConnectedServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectedServer")
            .field("id", &self.id)
            .field("escaped_id", &self.escaped_id)
            .finish_non_exhaustive()
    }
}

/// Point-in-time view of one server, for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub id: String,
    pub escaped_id: String,
    pub transport: &'static str,
    pub state: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default)]
pub struct ServerConnectionPool {
    connections: BTreeMap<String, Connection>,
}

impl ServerConnectionPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect every enabled descriptor concurrently.
    ///
    /// Never fails: each attempt settles into `Connected` or `Failed`.
    /// Returns the number of servers that connected.
    pub async fn initialize_all(
        &mut self,
        descriptors: &[ServerDescriptor],
        connector: &dyn Connector,
    ) -> usize {
        let enabled: Vec<&ServerDescriptor> = descriptors.iter().filter(|d| d.enabled).collect();

        for d in descriptors.iter().filter(|d| !d.enabled) {
            tracing::debug!(server = %d.id, "capability server disabled, skipping");
        }

        for d in &enabled {
            let mut conn = Connection::new((*d).clone());
            conn.state = ConnectionState::Connecting;
            self.connections.insert(d.id.clone(), conn);
        }

        let attempts = enabled.iter().map(|d| async move {
            let result = connect_one(d, connector).await;
            (d.id.clone(), result)
        });
        let results = join_all(attempts).await;

        let mut connected = 0;
        for (id, result) in results {
            let Some(conn) = self.connections.get_mut(&id) else {
                continue;
            };
            match result {
                Ok(client) => {
                    tracing::info!(
                        name: "mcp.server.connected",
                        server = %id,
                        transport = conn.descriptor.transport.kind(),
                        "Capability server connected"
                    );
                    conn.state = ConnectionState::Connected;
                    conn.client = Some(client);
                    conn.last_error = None;
                    connected += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        name: "mcp.server.failed",
                        server = %id,
                        error = %e,
                        "Capability server failed to connect"
                    );
                    conn.state = ConnectionState::Failed;
                    conn.last_error = Some(e.to_string());
                }
            }
        }

        connected
    }

    /// Close every live connection concurrently and reset the pool.
    pub async fn close(&mut self) -> TeardownReport {
        let live: Vec<(String, Arc<dyn CapabilityClient>)> = self
            .connections
            .values()
            .filter_map(|c| c.client.clone().map(|client| (c.descriptor.id.clone(), client)))
            .collect();

        let results = join_all(live.into_iter().map(|(id, client)| async move {
            let res = client.close().await;
            (id, res)
        }))
        .await;

        let mut report = TeardownReport::default();
        for (id, res) in results {
            match res {
                Ok(()) => {
                    tracing::debug!(server = %id, "capability server closed");
                    report.closed += 1;
                }
                Err(e) => {
                    tracing::warn!(server = %id, error = %e, "failed to close capability server");
                    report.failures.push(TeardownFailure {
                        server: id,
                        message: e.to_string(),
                    });
                }
            }
        }

        for conn in self.connections.values_mut() {
            conn.state = ConnectionState::Closed;
            conn.client = None;
        }
        self.connections.clear();
        report
    }

    /// Handles for every `Connected` server, ordered by raw id.
    #[must_use]
    pub fn connected(&self) -> Vec<ConnectedServer> {
        self.connections
            .values()
            .filter(|c| c.state == ConnectionState::Connected)
            .filter_map(|c| {
                c.client.clone().map(|client| ConnectedServer {
                    id: c.descriptor.id.clone(),
                    escaped_id: c.escaped_id.clone(),
                    client,
                })
            })
            .collect()
    }

    #[must_use]
    pub fn connected_count(&self) -> usize {
        self.connections
            .values()
            .filter(|c| c.state == ConnectionState::Connected)
            .count()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Connection> {
        self.connections.get(id)
    }

    #[must_use]
    pub fn statuses(&self) -> Vec<ServerStatus> {
        self.connections
            .values()
            .map(|c| ServerStatus {
                id: c.descriptor.id.clone(),
                escaped_id: c.escaped_id.clone(),
                transport: c.descriptor.transport.kind(),
                state: c.state,
                error: c.last_error.clone(),
            })
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }
}

async fn connect_one(
    descriptor: &ServerDescriptor,
    connector: &dyn Connector,
) -> Result<Arc<dyn CapabilityClient>, ConnectionError> {
    let attempt = connector.connect(descriptor);
    let result = match descriptor.timeout {
        Some(limit) => tokio::time::timeout(limit, attempt)
            .await
            .map_err(|_| ConnectionError::Timeout {
                server: descriptor.id.clone(),
                secs: limit.as_secs(),
            })?,
        None => attempt.await,
    };
    result.map_err(|e| ConnectionError::Connect {
        server: descriptor.id.clone(),
        message: format!("{e:#}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockConnector, MockServer, stdio_descriptor};
    use std::time::Duration;

    #[tokio::test]
    async fn test_one_failure_does_not_affect_siblings() {
        let connector = MockConnector::new()
            .with_server("a", MockServer::new())
            .with_server("b", MockServer::new().failing_connect())
            .with_server("c", MockServer::new());
        let descriptors = vec![
            stdio_descriptor("a"),
            stdio_descriptor("b"),
            stdio_descriptor("c"),
        ];

        let mut pool = ServerConnectionPool::new();
        let connected = pool.initialize_all(&descriptors, &connector).await;

        assert_eq!(connected, 2);
        assert_eq!(pool.connected_count(), 2);
        assert_eq!(pool.get("b").unwrap().state(), ConnectionState::Failed);
        let ids: Vec<String> = pool.connected().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["a".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn test_disabled_descriptor_is_skipped() {
        let server = MockServer::new();
        let connector = MockConnector::new().with_server("off", server.clone());
        let descriptors = vec![stdio_descriptor("off").disabled()];

        let mut pool = ServerConnectionPool::new();
        pool.initialize_all(&descriptors, &connector).await;

        assert!(pool.is_empty());
        assert_eq!(server.connect_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_marks_failed() {
        let connector = MockConnector::new()
            .with_server("slow", MockServer::new().with_connect_delay(Duration::from_secs(60)));
        let descriptors = vec![stdio_descriptor("slow").with_timeout(Duration::from_secs(1))];

        let mut pool = ServerConnectionPool::new();
        let connected = pool.initialize_all(&descriptors, &connector).await;

        assert_eq!(connected, 0);
        let status = &pool.statuses()[0];
        assert_eq!(status.state, ConnectionState::Failed);
        assert!(status.error.as_deref().unwrap().contains("did not connect"));
    }

    #[tokio::test]
    async fn test_close_collects_failures_and_resets() {
        let ok = MockServer::new();
        let bad = MockServer::new().failing_close();
        let connector = MockConnector::new()
            .with_server("ok", ok.clone())
            .with_server("bad", bad.clone());
        let descriptors = vec![stdio_descriptor("ok"), stdio_descriptor("bad")];

        let mut pool = ServerConnectionPool::new();
        pool.initialize_all(&descriptors, &connector).await;
        let report = pool.close().await;

        assert_eq!(report.closed, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].server, "bad");
        assert!(pool.is_empty());
        assert_eq!(ok.close_calls(), 1);
        assert_eq!(bad.close_calls(), 1);
    }
}
