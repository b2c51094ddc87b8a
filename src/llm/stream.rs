//! Per-stream types: options, event sinks and outcome classification.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{Message, QuotaInfo};
use crate::normalized::NormalizedEvent;

/// What a stream is for. Sent to the provider as `X-Request-Type`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    #[default]
    Chat,
    Agent,
    Title,
}

impl RequestType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Agent => "agent",
            Self::Title => "title",
        }
    }

    /// Title generation runs without tools.
    #[must_use]
    pub fn uses_tools(self) -> bool {
        !matches!(self, Self::Title)
    }
}

#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    /// Caller-supplied token. A fresh one is created when absent.
    pub cancellation_token: Option<CancellationToken>,
    /// Do not prepend the platform system preamble.
    pub skip_preamble: bool,
}

/// Token usage summed over every round trip of one stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn add(&mut self, prompt: u64, completion: u64, total: u64) {
        self.prompt_tokens += prompt;
        self.completion_tokens += completion;
        self.total_tokens += total;
    }
}

/// A tool invocation made during the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub success: bool,
}

/// Everything a completed stream produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamEnvelope {
    pub request_id: String,
    /// Final assistant message (text of the last round trip).
    pub message: Message,
    /// Assistant text across every round trip.
    pub text: String,
    pub usage: Usage,
    /// Model round trips taken.
    pub steps: usize,
    pub tool_calls: Vec<ToolCallRecord>,
    /// Partial events forwarded to the sink.
    pub event_count: usize,
}

/// How a stream ended. Exactly one per `stream()` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StreamOutcome {
    Completed(StreamEnvelope),
    RateLimited { quota: QuotaInfo },
    Errored {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
    Aborted,
}

impl StreamOutcome {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Completed(_) => "completed",
            Self::RateLimited { .. } => "rate_limited",
            Self::Errored { .. } => "errored",
            Self::Aborted => "aborted",
        }
    }
}

/// Receives partial events as they arrive, in order.
pub trait EventSink: Send + Sync {
    fn send(&self, event: NormalizedEvent);
}

impl EventSink for mpsc::UnboundedSender<NormalizedEvent> {
    fn send(&self, event: NormalizedEvent) {
        // A dropped receiver means nobody is watching; the stream carries on.
        let _ = mpsc::UnboundedSender::send(self, event);
    }
}

/// Adapts a closure into an [`EventSink`].
pub struct FnSink<F>(pub F);

impl<F> std::fmt::Debug for FnSink<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnSink").finish_non_exhaustive()
    }
}

impl<F> EventSink for FnSink<F>
where
    F: Fn(NormalizedEvent) + Send + Sync,
{
    fn send(&self, event: NormalizedEvent) {
        (self.0)(event);
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn send(&self, _event: NormalizedEvent) {}
}
