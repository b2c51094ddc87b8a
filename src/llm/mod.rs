//! LLM drivers and the chat streaming orchestrator.
//!
//! This module provides protocol-agnostic abstractions for streaming from
//! Large Language Models, supporting both `OpenAI` Chat Completions and
//! Responses APIs, plus the orchestration layer that runs tool round trips
//! against the federation manager.
//!
//! # Overview
//!
//! - [`LlmDriver`] is the streaming interface every protocol implements.
//! - [`DriverFactory`] resolves a driver from [`LlmSettings`] per stream.
//! - [`ChatStreamOrchestrator`] runs one streamed response end to end and
//!   classifies how it ended (see [`StreamOutcome`]).
//!
//! # Drivers
//!
//! - [`ChatCompletionsDriver`]: `OpenAI` Chat Completions API (`/v1/chat/completions`)
//! - [`ResponsesDriver`]: `OpenAI` Responses API (`/v1/responses`)
//!
//! # Example
//!
//! ```rust
//! use federated_chat::llm::{LlmProtocol, LlmSettings, Provider};
//!
//! let settings = LlmSettings {
//!     base_url: "https://api.openai.com".to_string(),
//!     api_key: Some("sk-...".to_string()),
//!     model: "gpt-4o".to_string(),
//!     protocol: LlmProtocol::Chat,
//!     provider: Provider::OpenAI,
//!     parallel_tool_calls: None,
//! };
//! assert!(settings.validate().is_ok());
//! ```

pub mod chat_completions;
pub mod error;
pub mod orchestrator;
pub mod prompt;
pub mod provider;
pub mod responses;
pub mod stream;
pub mod tools;

pub use chat_completions::ChatCompletionsDriver;
pub use error::{ProviderError, QuotaInfo};
pub use orchestrator::{ChatStreamOrchestrator, StreamLimits};
pub use provider::Provider;
pub use responses::ResponsesDriver;
pub use stream::{
    EventSink, RequestType, StreamEnvelope, StreamOptions, StreamOutcome, Usage,
};
pub use tools::{NativeTool, ToolSet};

use std::pin::Pin;
use std::sync::Arc;

use anyhow::{Context, bail};
use futures::Stream;
use tokio_util::sync::CancellationToken;

use crate::normalized::NormalizedEvent;

/// Boxed event stream returned by every driver.
pub type EventStream = Pin<Box<dyn Stream<Item = anyhow::Result<NormalizedEvent>> + Send>>;

/// LLM connection and model settings.
#[derive(Clone)]
pub struct LlmSettings {
    /// Base URL for the LLM API (e.g., `https://api.openai.com`).
    pub base_url: String,
    /// Optional API key for authentication.
    pub api_key: Option<String>,
    /// Model identifier (e.g., `gpt-4o`).
    pub model: String,
    /// Protocol to use for communication.
    pub protocol: LlmProtocol,
    /// Provider type (auto-detected from `base_url` if not specified).
    pub provider: Provider,
    /// Whether to enable parallel tool calls (provider-dependent).
    pub parallel_tool_calls: Option<bool>,
}

impl std::fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("protocol", &self.protocol)
            .field("provider", &self.provider)
            .field("parallel_tool_calls", &self.parallel_tool_calls)
            .finish()
    }
}

impl LlmSettings {
    /// Check that a driver can be built from these settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the model is blank or the base URL is not an
    /// absolute `http(s)` URL.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.model.trim().is_empty() {
            bail!("no model configured");
        }
        let url = url::Url::parse(&self.base_url)
            .with_context(|| format!("invalid LLM base URL '{}'", self.base_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("LLM base URL must be http(s), got '{}'", url.scheme());
        }
        Ok(())
    }

    /// The concrete protocol after resolving [`LlmProtocol::Auto`].
    #[must_use]
    pub fn effective_protocol(&self) -> LlmProtocol {
        match self.protocol {
            // Chat Completions is the widely supported default; Responses is opt-in.
            LlmProtocol::Auto => LlmProtocol::Chat,
            p => p,
        }
    }
}

/// LLM protocol variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LlmProtocol {
    /// Automatically detect protocol based on the provider.
    #[default]
    Auto,
    /// `OpenAI` Responses API (`/v1/responses`).
    Responses,
    /// `OpenAI` Chat Completions API (`/v1/chat/completions`).
    Chat,
}

impl LlmProtocol {
    /// Parse a protocol name, falling back to `Auto`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "responses" => Self::Responses,
            "chat" => Self::Chat,
            _ => Self::Auto,
        }
    }
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    /// Role of the message author.
    pub role: MessageRole,
    /// Text content of the message.
    #[serde(default)]
    pub content: String,
    /// Optional tool call ID (for tool responses).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Optional tool calls made by the assistant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Message {
    fn plain(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::Assistant, content)
    }

    /// Wire form for a Chat Completions style `messages` array.
    #[must_use]
    pub fn to_wire(&self) -> serde_json::Value {
        let mut v = serde_json::json!({
            "role": self.role,
            "content": self.content,
        });
        if let Some(id) = &self.tool_call_id {
            v["tool_call_id"] = serde_json::Value::String(id.clone());
        }
        if let Some(calls) = &self.tool_calls {
            v["tool_calls"] = serde_json::to_value(calls).unwrap_or_default();
            if self.content.is_empty() {
                v["content"] = serde_json::Value::Null;
            }
        }
        v
    }
}

/// Role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System prompt.
    System,
    /// User message.
    User,
    /// Assistant response.
    Assistant,
    /// Tool response.
    Tool,
}

/// A tool call made by the assistant.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolCall {
    /// Unique identifier for this tool call.
    pub id: String,
    /// Type of tool (always "function" for now).
    #[serde(rename = "type")]
    pub call_type: String,
    /// Function details.
    pub function: ToolCallFunction,
}

/// Function details in a tool call.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolCallFunction {
    /// Function name.
    pub name: String,
    /// Arguments as JSON string.
    pub arguments: String,
}

/// Request to an LLM driver.
#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    /// Conversation messages in Chat Completions wire form.
    pub messages: Vec<serde_json::Value>,
    /// Available tools in `OpenAI` function schema format.
    pub tools: Vec<serde_json::Value>,
    /// Output token cap for this round trip.
    pub max_output_tokens: Option<u32>,
    /// Extra request headers (request type tagging and similar).
    pub headers: Vec<(String, String)>,
    /// Drivers stop reading the response body once this fires.
    pub cancel: CancellationToken,
}

/// Trait for LLM streaming drivers.
///
/// Implementations of this trait provide streaming access to LLM responses,
/// emitting [`NormalizedEvent`]s as the model generates output.
#[async_trait::async_trait]
pub trait LlmDriver: Send + Sync {
    /// Stream a response from the LLM.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails. Non-success HTTP statuses are
    /// returned as [`ProviderError`].
    async fn stream(&self, req: LlmRequest) -> anyhow::Result<EventStream>;
}

/// Resolves the model client for a stream.
pub trait DriverFactory: Send + Sync {
    /// # Errors
    ///
    /// Returns an error when no usable driver can be built from `settings`.
    fn resolve(&self, settings: &LlmSettings) -> anyhow::Result<Arc<dyn LlmDriver>>;
}

/// Builds HTTP drivers that share one connection pool.
#[derive(Debug, Clone, Default)]
pub struct HttpDriverFactory {
    http: reqwest::Client,
}

impl HttpDriverFactory {
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl DriverFactory for HttpDriverFactory {
    fn resolve(&self, settings: &LlmSettings) -> anyhow::Result<Arc<dyn LlmDriver>> {
        settings.validate()?;
        let driver: Arc<dyn LlmDriver> = match settings.effective_protocol() {
            LlmProtocol::Responses => Arc::new(ResponsesDriver::with_client(
                self.http.clone(),
                settings.clone(),
            )),
            LlmProtocol::Chat | LlmProtocol::Auto => Arc::new(ChatCompletionsDriver::with_client(
                self.http.clone(),
                settings.clone(),
            )),
        };
        Ok(driver)
    }
}

/// Apply auth and headers, send, and turn non-success statuses into
/// [`ProviderError`].
pub(crate) async fn send_checked(
    settings: &LlmSettings,
    rb: reqwest::RequestBuilder,
    headers: &[(String, String)],
) -> anyhow::Result<reqwest::Response> {
    let mut rb = rb;
    if let Some(k) = &settings.api_key {
        rb = match settings.provider.auth_header() {
            Some(name) => rb.header(name, k),
            None => rb.bearer_auth(k),
        };
    }
    for (k, v) in settings.provider.extra_headers() {
        rb = rb.header(k, v);
    }
    for (k, v) in headers {
        rb = rb.header(k.as_str(), v.as_str());
    }

    let resp = rb.send().await.context("failed to reach LLM provider")?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        tracing::warn!(
            name: "llm.provider.error",
            status = status.as_u16(),
            body_len = body.len(),
            "Provider returned an error status"
        );
        return Err(ProviderError::new(status.as_u16(), body).into());
    }
    Ok(resp)
}

/// Find the position of a double newline in the buffer.
pub(crate) fn find_double_newline(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}
