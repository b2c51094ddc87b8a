//! Chat stream orchestrator with tool loop execution.
//!
//! The orchestrator manages one streamed model interaction end to end:
//! 1. Prepend the platform preamble (unless skipped)
//! 2. Resolve a driver and merge built-in and federated tools
//! 3. Stream the response, forwarding every event to the sink in order
//! 4. Execute tool calls and feed results back to the model
//! 5. Repeat until the model answers without tools or the step cap is hit
//!
//! Every call to [`ChatStreamOrchestrator::stream`] resolves to exactly one
//! [`StreamOutcome`]; failures are classified, never raised.
//!
//! # Example
//!
//! ```rust,ignore
//! use federated_chat::llm::{ChatStreamOrchestrator, HttpDriverFactory, Message, RequestType, StreamOptions};
//!
//! let orchestrator = ChatStreamOrchestrator::new(settings, Arc::new(HttpDriverFactory::default()), federation);
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! let outcome = orchestrator
//!     .stream(vec![Message::user("What time is it?")], RequestType::Chat, StreamOptions::default(), &tx)
//!     .await;
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use futures::StreamExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::mcp::FederationManager;
use crate::normalized::NormalizedEvent;

use super::prompt::{Platform, system_preamble};
use super::stream::ToolCallRecord;
use super::tools::{NativeTool, ToolSet, default_builtins};
use super::{
    DriverFactory, EventSink, EventStream, LlmRequest, LlmSettings, Message, MessageRole,
    ProviderError, RequestType, StreamEnvelope, StreamOptions, StreamOutcome, ToolCall,
    ToolCallFunction, Usage,
};

/// Default cap on model round trips per stream.
pub const DEFAULT_MAX_STEPS: usize = 10;

/// Default output token budget per round trip.
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 4096;

/// Bounds applied to every stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamLimits {
    pub max_steps: usize,
    pub max_output_tokens: u32,
}

impl Default for StreamLimits {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }
}

/// Reasons a stream stops early that are not provider errors.
#[derive(Debug, Error)]
enum Interrupt {
    #[error("stream aborted")]
    Aborted,

    #[error("model did not finish within {0} tool round trips")]
    StepLimit(usize),

    #[error("{message}")]
    Model {
        message: String,
        code: Option<String>,
    },
}

/// Accumulated state for a streaming tool call.
#[derive(Debug, Default, Clone)]
struct ToolCallAccumulator {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// One in-flight invocation.
struct StreamSession {
    request_id: String,
    token: CancellationToken,
    text: String,
    final_text: String,
    usage: Usage,
    steps: usize,
    tool_calls: Vec<ToolCallRecord>,
    event_count: usize,
}

impl StreamSession {
    fn new(token: CancellationToken) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            token,
            text: String::new(),
            final_text: String::new(),
            usage: Usage::default(),
            steps: 0,
            tool_calls: Vec::new(),
            event_count: 0,
        }
    }

    fn forward(&mut self, sink: &dyn EventSink, event: NormalizedEvent) {
        self.event_count += 1;
        sink.send(event);
    }

    fn into_envelope(self) -> StreamEnvelope {
        StreamEnvelope {
            request_id: self.request_id,
            message: Message::assistant(self.final_text),
            text: self.text,
            usage: self.usage,
            steps: self.steps,
            tool_calls: self.tool_calls,
            event_count: self.event_count,
        }
    }
}

struct ActiveStream {
    generation: u64,
    token: CancellationToken,
}

/// Drives streamed model responses with federated tool calls.
pub struct ChatStreamOrchestrator {
    settings: LlmSettings,
    limits: StreamLimits,
    drivers: Arc<dyn DriverFactory>,
    federation: Arc<FederationManager>,
    builtins: Vec<Arc<dyn NativeTool>>,
    active: Mutex<Option<ActiveStream>>,
    generation: AtomicU64,
}

#[allow(clippy::missing_fields_in_debug)]
impl std::fmt::Debug for ChatStreamOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatStreamOrchestrator")
            .field("settings", &self.settings)
            .field("limits", &self.limits)
            .field("builtins", &self.builtins.len())
            .field("streaming", &self.is_streaming())
            .finish()
    }
}

impl ChatStreamOrchestrator {
    pub fn new(
        settings: LlmSettings,
        drivers: Arc<dyn DriverFactory>,
        federation: Arc<FederationManager>,
    ) -> Self {
        Self {
            settings,
            limits: StreamLimits::default(),
            drivers,
            federation,
            builtins: default_builtins(),
            active: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_limits(mut self, limits: StreamLimits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn with_builtins(mut self, builtins: Vec<Arc<dyn NativeTool>>) -> Self {
        self.builtins = builtins;
        self
    }

    #[must_use]
    pub fn settings(&self) -> &LlmSettings {
        &self.settings
    }

    #[must_use]
    pub fn limits(&self) -> StreamLimits {
        self.limits
    }

    fn active(&self) -> MutexGuard<'_, Option<ActiveStream>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.active()
            .as_ref()
            .is_some_and(|a| !a.token.is_cancelled())
    }

    /// Cancel the active stream. Returns whether one was active.
    pub fn abort_stream(&self) -> bool {
        match self.active().as_ref() {
            Some(active) if !active.token.is_cancelled() => {
                active.token.cancel();
                tracing::info!(name: "llm.stream.abort", "Abort requested for active stream");
                true
            }
            _ => false,
        }
    }

    fn track(&self, token: CancellationToken) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let previous = self.active().replace(ActiveStream { generation, token });
        if previous.is_some_and(|p| !p.token.is_cancelled()) {
            tracing::warn!("New stream started while another is active; tracking the newest");
        }
        generation
    }

    fn untrack(&self, generation: u64) {
        let mut active = self.active();
        if active.as_ref().is_some_and(|a| a.generation == generation) {
            *active = None;
        }
    }

    /// Run one streamed response and classify how it ended.
    pub async fn stream(
        &self,
        messages: Vec<Message>,
        request_type: RequestType,
        options: StreamOptions,
        sink: &dyn EventSink,
    ) -> StreamOutcome {
        let token = options.cancellation_token.unwrap_or_default();
        let generation = self.track(token.clone());
        let mut session = StreamSession::new(token.clone());
        let request_id = session.request_id.clone();

        tracing::info!(
            name: "llm.stream.start",
            request_id = %request_id,
            request_type = request_type.as_str(),
            message_count = messages.len(),
            model = %self.settings.model,
            "Starting chat stream"
        );

        let result = self
            .run(&mut session, messages, request_type, options.skip_preamble, sink)
            .await;
        self.untrack(generation);

        let outcome = match result {
            Ok(()) => StreamOutcome::Completed(session.into_envelope()),
            Err(e) => classify(&e, &token),
        };

        match &outcome {
            StreamOutcome::Errored { message, .. } => tracing::warn!(
                name: "llm.stream.end",
                request_id = %request_id,
                outcome = outcome.kind(),
                error = %message,
                "Chat stream ended"
            ),
            _ => tracing::info!(
                name: "llm.stream.end",
                request_id = %request_id,
                outcome = outcome.kind(),
                "Chat stream ended"
            ),
        }
        outcome
    }

    async fn run(
        &self,
        session: &mut StreamSession,
        messages: Vec<Message>,
        request_type: RequestType,
        skip_preamble: bool,
        sink: &dyn EventSink,
    ) -> anyhow::Result<()> {
        let driver = self
            .drivers
            .resolve(&self.settings)
            .context("failed to resolve model client")?;

        let tools = if request_type.uses_tools() {
            ToolSet::merge(&self.builtins, &self.federation.list_tools().await)
        } else {
            ToolSet::default()
        };
        let definitions = tools.definitions();

        let mut history = Vec::with_capacity(messages.len() + 1);
        if !skip_preamble {
            history.push(system_preamble(&Platform::current(), tools.len()).to_wire());
        }
        history.extend(messages.iter().map(Message::to_wire));

        let headers = vec![
            ("X-Request-Type".to_string(), request_type.as_str().to_string()),
            ("X-Request-Id".to_string(), session.request_id.clone()),
        ];
        let token = session.token.clone();

        for step in 1..=self.limits.max_steps {
            session.steps = step;
            tracing::debug!(
                request_id = %session.request_id,
                step = step,
                message_count = history.len(),
                tool_count = definitions.len(),
                "Starting model round trip"
            );

            let req = LlmRequest {
                messages: history.clone(),
                tools: definitions.clone(),
                max_output_tokens: Some(self.limits.max_output_tokens),
                headers: headers.clone(),
                cancel: token.clone(),
            };

            let events = tokio::select! {
                biased;
                () = token.cancelled() => return Err(Interrupt::Aborted.into()),
                events = driver.stream(req) => events?,
            };

            let (text, calls) = consume(session, events, sink).await?;
            if calls.is_empty() {
                session.final_text = text;
                return Ok(());
            }

            history.push(
                Message {
                    role: MessageRole::Assistant,
                    content: text,
                    tool_call_id: None,
                    tool_calls: Some(calls.clone()),
                }
                .to_wire(),
            );

            for call in &calls {
                let (content, success) = self.execute(&tools, call, &token).await?;
                session.forward(
                    sink,
                    NormalizedEvent::ToolResult {
                        id: call.id.clone(),
                        name: call.function.name.clone(),
                        content: content.clone(),
                        success,
                    },
                );
                session.tool_calls.push(ToolCallRecord {
                    id: call.id.clone(),
                    name: call.function.name.clone(),
                    success,
                });
                history.push(serde_json::json!({
                    "role": "tool",
                    "tool_call_id": call.id,
                    "content": content,
                }));
            }
        }

        tracing::error!(
            request_id = %session.request_id,
            max_steps = self.limits.max_steps,
            "Maximum tool round trips exceeded"
        );
        Err(Interrupt::StepLimit(self.limits.max_steps).into())
    }

    /// Run one tool call. Tool failures become error strings for the model.
    async fn execute(
        &self,
        tools: &ToolSet,
        call: &ToolCall,
        token: &CancellationToken,
    ) -> Result<(String, bool), Interrupt> {
        let name = &call.function.name;
        let args = match parse_arguments(&call.function.arguments) {
            Ok(args) => args,
            Err(e) => {
                tracing::warn!(tool_id = %call.id, tool_name = %name, error = %e, "Unparseable tool arguments");
                return Ok((format!("Error: invalid arguments JSON: {e}"), false));
            }
        };

        tracing::info!(tool_id = %call.id, tool_name = %name, "Executing tool call");
        let result = tokio::select! {
            biased;
            () = token.cancelled() => return Err(Interrupt::Aborted),
            result = tools.invoke(name, args, &self.federation) => result,
        };

        Ok(match result {
            Ok(value) => {
                let content = match value {
                    serde_json::Value::String(s) => s,
                    other => serde_json::to_string(&other).unwrap_or_default(),
                };
                tracing::info!(
                    tool_id = %call.id,
                    tool_name = %name,
                    result_length = content.len(),
                    "Tool call succeeded"
                );
                (content, true)
            }
            Err(e) => {
                tracing::error!(tool_id = %call.id, tool_name = %name, error = %e, "Tool call failed");
                (format!("Error: {e}"), false)
            }
        })
    }
}

/// Read one round trip, forwarding events in arrival order.
///
/// Every event reaches the sink except the `Done` of a round trip that
/// requested tools; only the last round trip's `Done` is forwarded.
/// Returns the round trip's text and the tool calls the model requested.
async fn consume(
    session: &mut StreamSession,
    mut events: EventStream,
    sink: &dyn EventSink,
) -> anyhow::Result<(String, Vec<ToolCall>)> {
    let token = session.token.clone();
    let mut pending: BTreeMap<usize, ToolCallAccumulator> = BTreeMap::new();
    let mut text = String::new();

    loop {
        let next = tokio::select! {
            biased;
            () = token.cancelled() => return Err(Interrupt::Aborted.into()),
            next = events.next() => next,
        };
        let Some(event) = next else { break };
        let event = event?;

        match &event {
            NormalizedEvent::MessageDelta { text: delta } => text.push_str(delta),
            NormalizedEvent::ToolCallDelta {
                call_index,
                id,
                name,
                arguments_delta,
            } => {
                let acc = pending.entry(*call_index).or_default();
                if acc.id.is_none() {
                    acc.id.clone_from(id);
                }
                if acc.name.is_none() {
                    acc.name.clone_from(name);
                }
                if let Some(delta) = arguments_delta {
                    acc.arguments.push_str(delta);
                }
            }
            NormalizedEvent::ToolCallComplete {
                call_index,
                id,
                name,
                arguments_json,
            } => {
                let acc = pending.entry(*call_index).or_default();
                acc.id = Some(id.clone());
                acc.name = Some(name.clone());
                acc.arguments.clone_from(arguments_json);
            }
            NormalizedEvent::Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens,
            } => session
                .usage
                .add(*prompt_tokens, *completion_tokens, *total_tokens),
            NormalizedEvent::Error { message, code } => {
                let err = Interrupt::Model {
                    message: message.clone(),
                    code: code.clone(),
                };
                session.forward(sink, event);
                return Err(err.into());
            }
            // More round trips follow; the final one carries the display's done.
            NormalizedEvent::Done if has_calls(&pending) => continue,
            _ => {}
        }
        session.forward(sink, event);
    }

    // Drivers end their stream quietly when the token fires.
    if token.is_cancelled() {
        return Err(Interrupt::Aborted.into());
    }

    session.text.push_str(&text);
    let calls = pending
        .into_values()
        .filter_map(|acc| {
            Some(ToolCall {
                id: acc.id?,
                call_type: "function".to_string(),
                function: ToolCallFunction {
                    name: acc.name?,
                    arguments: acc.arguments,
                },
            })
        })
        .collect();
    Ok((text, calls))
}

fn has_calls(pending: &BTreeMap<usize, ToolCallAccumulator>) -> bool {
    pending.values().any(|a| a.id.is_some() && a.name.is_some())
}

fn parse_arguments(raw: &str) -> serde_json::Result<serde_json::Value> {
    if raw.trim().is_empty() {
        return Ok(serde_json::Value::Object(serde_json::Map::new()));
    }
    serde_json::from_str(raw)
}

/// Map a failed run to its terminal outcome.
fn classify(err: &anyhow::Error, token: &CancellationToken) -> StreamOutcome {
    if token.is_cancelled() {
        return StreamOutcome::Aborted;
    }

    if let Some(provider) = err.downcast_ref::<ProviderError>() {
        if let Some(quota) = provider.quota() {
            return StreamOutcome::RateLimited { quota };
        }
        let message = if provider.json_body().is_some() {
            provider.body.clone()
        } else {
            provider.message()
        };
        return StreamOutcome::Errored {
            message,
            code: Some(provider.status.to_string()),
        };
    }

    match err.downcast_ref::<Interrupt>() {
        Some(Interrupt::Aborted) => StreamOutcome::Aborted,
        Some(Interrupt::StepLimit(_)) => StreamOutcome::Errored {
            message: err.to_string(),
            code: Some("MAX_STEPS".to_string()),
        },
        Some(Interrupt::Model { message, code }) => StreamOutcome::Errored {
            message: message.clone(),
            code: code.clone(),
        },
        None => StreamOutcome::Errored {
            message: format!("{err:#}"),
            code: None,
        },
    }
}
