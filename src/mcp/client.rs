//! Capability server client boundary.
//!
//! The federation layer only needs four operations from a server: connect,
//! list tools, call a tool and close. [`Connector`] and [`CapabilityClient`]
//! capture exactly that, and [`RmcpConnector`] implements them on top of
//! `rmcp` for stdio child processes and streamable HTTP endpoints.

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use rmcp::{
    model::CallToolRequestParam,
    service::{Peer, RoleClient, ServiceExt},
    transport::{
        StreamableHttpClientTransport, TokioChildProcess,
        streamable_http_client::StreamableHttpClientTransportConfig,
    },
};
use serde::Serialize;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Mutex;

use super::config::{ServerDescriptor, Transport};

/// One entry of a server's tool manifest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolManifest {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A live connection to one capability server.
#[async_trait]
pub trait CapabilityClient: Send + Sync {
    async fn list_tools(&self) -> anyhow::Result<Vec<ToolManifest>>;

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value>;

    async fn close(&self) -> anyhow::Result<()>;
}

/// Opens connections from descriptors.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, descriptor: &ServerDescriptor)
    -> anyhow::Result<Arc<dyn CapabilityClient>>;
}

type DynClientService = rmcp::service::RunningService<
    RoleClient,
    Box<dyn rmcp::service::DynService<RoleClient>>,
>;

/// `rmcp`-backed connector.
#[derive(Debug, Default, Clone, Copy)]
pub struct RmcpConnector;

#[async_trait]
impl Connector for RmcpConnector {
    async fn connect(
        &self,
        descriptor: &ServerDescriptor,
    ) -> anyhow::Result<Arc<dyn CapabilityClient>> {
        let name = &descriptor.id;
        let service: DynClientService = match &descriptor.transport {
            Transport::Stdio {
                command,
                args,
                env,
                cwd,
            } => {
                let mut cmd = Command::new(command);
                cmd.args(args);
                for (k, v) in env {
                    cmd.env(k, v);
                }
                if let Some(dir) = cwd {
                    cmd.current_dir(dir);
                }

                let transport = TokioChildProcess::new(cmd)
                    .with_context(|| format!("failed to spawn stdio MCP server '{name}'"))?;
                ().into_dyn()
                    .serve(transport)
                    .await
                    .with_context(|| format!("failed to connect stdio MCP server '{name}'"))?
            }

            Transport::Streamed { url, headers } => {
                let transport = if headers.is_empty() {
                    StreamableHttpClientTransport::from_uri(url.clone())
                } else {
                    let mut header_map = reqwest::header::HeaderMap::new();
                    for (k, v) in headers {
                        let key = reqwest::header::HeaderName::from_bytes(k.as_bytes())
                            .with_context(|| format!("invalid header name '{k}' for '{name}'"))?;
                        // Values may carry secrets, keep them out of error messages.
                        let value = reqwest::header::HeaderValue::from_str(v)
                            .map_err(|_| anyhow!("invalid value for header '{k}' on '{name}'"))?;
                        header_map.insert(key, value);
                    }
                    let http = reqwest::Client::builder()
                        .default_headers(header_map)
                        .build()
                        .context("failed to build HTTP client")?;
                    StreamableHttpClientTransport::with_client(
                        http,
                        StreamableHttpClientTransportConfig::with_uri(url.clone()),
                    )
                };
                ().into_dyn()
                    .serve(transport)
                    .await
                    .with_context(|| format!("failed to connect remote MCP server '{name}'"))?
            }
        };

        Ok(Arc::new(RmcpClient {
            server: name.clone(),
            peer: service.peer().clone(),
            service: Mutex::new(Some(service)),
        }))
    }
}

/// Client over a running `rmcp` service.
pub struct RmcpClient {
    server: String,
    peer: Peer<RoleClient>,
    service: Mutex<Option<DynClientService>>,
}

impl std::fmt::Debug for RmcpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RmcpClient")
            .field("server", &self.server)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CapabilityClient for RmcpClient {
    async fn list_tools(&self) -> anyhow::Result<Vec<ToolManifest>> {
        let tools = self
            .peer
            .list_all_tools()
            .await
            .with_context(|| format!("tools/list failed for MCP server '{}'", self.server))?;

        Ok(tools
            .into_iter()
            .map(|t| ToolManifest {
                name: t.name.to_string(),
                description: t.description.as_deref().unwrap_or("").to_string(),
                input_schema: serde_json::Value::Object((*t.input_schema).clone()),
            })
            .collect())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        let res = self
            .peer
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments: arguments.as_object().cloned(),
            })
            .await
            .with_context(|| format!("tools/call failed for {}::{name}", self.server))?;

        // Tool-level errors (`isError`) are part of the payload and reach the model as-is.
        Ok(serde_json::to_value(res)?)
    }

    async fn close(&self) -> anyhow::Result<()> {
        let Some(service) = self.service.lock().await.take() else {
            return Ok(());
        };
        service
            .cancel()
            .await
            .with_context(|| format!("failed to stop MCP server '{}'", self.server))?;
        Ok(())
    }
}
