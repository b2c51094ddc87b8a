//! In-memory test doubles for capability servers and model drivers.
//!
//! Compiled for this crate's unit tests and, behind the `testing` feature,
//! for the integration tests under `tests/`. Release builds leave it out.
//! Nothing here touches the network or spawns processes.
//!
//! ```rust
//! use federated_chat::testing::{MockConnector, MockServer};
//!
//! let server = MockServer::new().with_tool("now", "Current time");
//! let connector = MockConnector::new().with_server("time", server.clone());
//! assert_eq!(server.connect_calls(), 0);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};

use crate::llm::{
    DriverFactory, EventSink, EventStream, LlmDriver, LlmProtocol, LlmRequest, LlmSettings,
    Provider, ProviderError,
};
use crate::mcp::{CapabilityClient, Connector, ServerDescriptor, ToolManifest, Transport};
use crate::normalized::NormalizedEvent;

#[derive(Debug, Default)]
struct Counters {
    connect: AtomicUsize,
    list: AtomicUsize,
    call: AtomicUsize,
    close: AtomicUsize,
}

/// A scripted capability server. Clones share call counters.
#[derive(Debug, Clone, Default)]
pub struct MockServer {
    tools: Vec<ToolManifest>,
    fail_connect: bool,
    fail_list: bool,
    fail_calls: bool,
    fail_close: bool,
    connect_delay: Option<Duration>,
    counters: Arc<Counters>,
}

impl MockServer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool that accepts any object.
    #[must_use]
    pub fn with_tool(self, name: &str, description: &str) -> Self {
        self.with_tool_schema(name, description, json!({ "type": "object", "properties": {} }))
    }

    #[must_use]
    pub fn with_tool_schema(mut self, name: &str, description: &str, input_schema: Value) -> Self {
        self.tools.push(ToolManifest {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
        });
        self
    }

    #[must_use]
    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    #[must_use]
    pub fn failing_list(mut self) -> Self {
        self.fail_list = true;
        self
    }

    #[must_use]
    pub fn failing_calls(mut self) -> Self {
        self.fail_calls = true;
        self
    }

    #[must_use]
    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    #[must_use]
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    pub fn connect_calls(&self) -> usize {
        self.counters.connect.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.counters.list.load(Ordering::SeqCst)
    }

    pub fn call_calls(&self) -> usize {
        self.counters.call.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.counters.close.load(Ordering::SeqCst)
    }
}

struct MockClient {
    server: MockServer,
}

#[async_trait]
impl CapabilityClient for MockClient {
    async fn list_tools(&self) -> anyhow::Result<Vec<ToolManifest>> {
        self.server.counters.list.fetch_add(1, Ordering::SeqCst);
        if self.server.fail_list {
            bail!("tools/list refused");
        }
        Ok(self.server.tools.clone())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> anyhow::Result<Value> {
        self.server.counters.call.fetch_add(1, Ordering::SeqCst);
        if self.server.fail_calls {
            bail!("tool '{name}' crashed");
        }
        Ok(json!({ "tool": name, "arguments": arguments }))
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.server.counters.close.fetch_add(1, Ordering::SeqCst);
        if self.server.fail_close {
            bail!("close timed out");
        }
        Ok(())
    }
}

/// Connects descriptors to [`MockServer`]s by id.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    servers: HashMap<String, MockServer>,
}

impl MockConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_server(mut self, id: &str, server: MockServer) -> Self {
        self.servers.insert(id.to_string(), server);
        self
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, descriptor: &ServerDescriptor) -> anyhow::Result<Arc<dyn CapabilityClient>> {
        let server = self
            .servers
            .get(&descriptor.id)
            .ok_or_else(|| anyhow!("no mock server registered for '{}'", descriptor.id))?;
        server.counters.connect.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = server.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if server.fail_connect {
            bail!("connection refused");
        }
        Ok(Arc::new(MockClient {
            server: server.clone(),
        }))
    }
}

/// Enabled stdio descriptor with a placeholder command.
#[must_use]
pub fn stdio_descriptor(id: &str) -> ServerDescriptor {
    ServerDescriptor::new(
        id,
        Transport::Stdio {
            command: "mock".to_string(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
        },
    )
}

/// Settings that pass validation without pointing anywhere real.
#[must_use]
pub fn test_settings() -> LlmSettings {
    LlmSettings {
        base_url: "http://127.0.0.1:9".to_string(),
        api_key: None,
        model: "test-model".to_string(),
        protocol: LlmProtocol::Chat,
        provider: Provider::Generic,
        parallel_tool_calls: None,
    }
}

#[derive(Debug, Default)]
struct Script {
    steps: Vec<Vec<NormalizedEvent>>,
    failure: Option<ProviderError>,
    hang: bool,
    cursor: AtomicUsize,
    requests: Mutex<Vec<LlmRequest>>,
}

/// A model driver that replays one scripted event list per round trip.
///
/// Round trips past the end of the script produce an empty stream.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDriver {
    script: Arc<Script>,
}

impl ScriptedDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn edit(mut self, f: impl FnOnce(&mut Script)) -> Self {
        // Builders normally run before the driver is shared; copy if not.
        if Arc::get_mut(&mut self.script).is_none() {
            self.script = Arc::new(Script {
                steps: self.script.steps.clone(),
                failure: self.script.failure.clone(),
                hang: self.script.hang,
                ..Script::default()
            });
        }
        if let Some(script) = Arc::get_mut(&mut self.script) {
            f(script);
        }
        self
    }

    /// Append one round trip.
    #[must_use]
    pub fn step(self, events: Vec<NormalizedEvent>) -> Self {
        self.edit(|s| s.steps.push(events))
    }

    /// Reject every request with this provider error.
    #[must_use]
    pub fn fail_with(self, error: ProviderError) -> Self {
        self.edit(|s| s.failure = Some(error))
    }

    /// Keep each stream open after its scripted events until cancelled.
    #[must_use]
    pub fn hang_after_step(self) -> Self {
        self.edit(|s| s.hang = true)
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.script
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl LlmDriver for ScriptedDriver {
    async fn stream(&self, req: LlmRequest) -> anyhow::Result<EventStream> {
        self.script
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(req);

        if let Some(err) = &self.script.failure {
            return Err(err.clone().into());
        }

        let index = self.script.cursor.fetch_add(1, Ordering::SeqCst);
        let events = self.script.steps.get(index).cloned().unwrap_or_default();
        let scripted = futures::stream::iter(events.into_iter().map(Ok));

        if self.script.hang {
            Ok(Box::pin(scripted.chain(futures::stream::pending())))
        } else {
            Ok(Box::pin(scripted))
        }
    }
}

/// Resolves every request to the same driver, or always fails.
#[derive(Debug, Clone)]
pub struct ScriptedFactory {
    driver: Option<ScriptedDriver>,
    error: String,
}

impl ScriptedFactory {
    #[must_use]
    pub fn new(driver: ScriptedDriver) -> Self {
        Self {
            driver: Some(driver),
            error: String::new(),
        }
    }

    #[must_use]
    pub fn failing(message: &str) -> Self {
        Self {
            driver: None,
            error: message.to_string(),
        }
    }
}

impl DriverFactory for ScriptedFactory {
    fn resolve(&self, _settings: &LlmSettings) -> anyhow::Result<Arc<dyn LlmDriver>> {
        match &self.driver {
            Some(driver) => Ok(Arc::new(driver.clone())),
            None => Err(anyhow!("{}", self.error)),
        }
    }
}

/// Records every event it receives.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<NormalizedEvent>>,
}

impl CollectingSink {
    pub fn events(&self) -> Vec<NormalizedEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EventSink for CollectingSink {
    fn send(&self, event: NormalizedEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
