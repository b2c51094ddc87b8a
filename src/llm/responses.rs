//! OpenAI Responses API driver.
//!
//! This module implements the [`LlmDriver`] trait for the OpenAI Responses
//! API (`/v1/responses`), supporting streaming responses with rich event types.
//! Chat-style history and tool definitions are converted to the Responses
//! input shape before sending.

use futures::StreamExt;
use serde_json::{Value, json};

use crate::normalized::NormalizedEvent;

use super::{EventStream, LlmDriver, LlmRequest, LlmSettings, find_double_newline, send_checked};

/// Driver for the OpenAI Responses API.
///
/// Connects to `/v1/responses` and streams responses as [`NormalizedEvent`]s.
/// This driver supports extended event types like thinking and reasoning.
#[derive(Clone)]
pub struct ResponsesDriver {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl std::fmt::Debug for ResponsesDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponsesDriver")
            .field("settings", &self.settings)
            .finish()
    }
}

impl ResponsesDriver {
    /// Create a new Responses driver with the given settings.
    #[must_use]
    pub fn new(settings: LlmSettings) -> Self {
        Self::with_client(reqwest::Client::new(), settings)
    }

    /// Create a driver that shares an existing HTTP client.
    #[must_use]
    pub fn with_client(http: reqwest::Client, settings: LlmSettings) -> Self {
        Self { http, settings }
    }

    fn build_body(&self, req: &LlmRequest) -> Value {
        let mut body = json!({
            "model": self.settings.model,
            "stream": true,
            "input": to_responses_input(&req.messages),
        });
        if !req.tools.is_empty() {
            body["tools"] = Value::Array(req.tools.iter().map(to_responses_tool).collect());
        }
        if let Some(max) = req.max_output_tokens {
            body["max_output_tokens"] = max.into();
        }
        body
    }
}

/// Convert Chat Completions messages to Responses `input` items.
fn to_responses_input(messages: &[Value]) -> Vec<Value> {
    let mut items = Vec::with_capacity(messages.len());
    for m in messages {
        match m["role"].as_str() {
            Some("tool") => items.push(json!({
                "type": "function_call_output",
                "call_id": m["tool_call_id"],
                "output": m["content"],
            })),
            Some("assistant") if m["tool_calls"].is_array() => {
                if let Some(text) = m["content"].as_str().filter(|t| !t.is_empty()) {
                    items.push(json!({ "role": "assistant", "content": text }));
                }
                for tc in m["tool_calls"].as_array().into_iter().flatten() {
                    items.push(json!({
                        "type": "function_call",
                        "call_id": tc["id"],
                        "name": tc["function"]["name"],
                        "arguments": tc["function"]["arguments"],
                    }));
                }
            }
            _ => items.push(json!({ "role": m["role"], "content": m["content"] })),
        }
    }
    items
}

/// Flatten an `OpenAI` function tool definition.
fn to_responses_tool(tool: &Value) -> Value {
    match tool.get("function") {
        Some(f) => json!({
            "type": "function",
            "name": f["name"],
            "description": f["description"],
            "parameters": f["parameters"],
        }),
        None => tool.clone(),
    }
}

fn delta_text(v: &Value) -> Option<String> {
    v.get("delta")
        .and_then(|x| x.as_str())
        .filter(|d| !d.is_empty())
        .map(ToString::to_string)
}

/// Map one named Responses event to normalized events.
fn parse_event(event: &str, data: &str) -> anyhow::Result<Vec<NormalizedEvent>> {
    if data == "[DONE]" {
        return Ok(vec![NormalizedEvent::Done]);
    }

    let v: Value = serde_json::from_str(data)?;
    let call_index = || v.get("output_index").and_then(Value::as_u64).unwrap_or(0) as usize;
    let mut out = Vec::new();

    match event {
        // Text output delta
        "response.output_text.delta" => {
            if let Some(text) = delta_text(&v) {
                out.push(NormalizedEvent::MessageDelta { text });
            }
        }

        // Thinking delta (for models that expose reasoning)
        "response.thinking.delta" => {
            if let Some(text) = delta_text(&v) {
                out.push(NormalizedEvent::ThinkingDelta { text });
            }
        }

        "response.reasoning.delta" | "response.reasoning_summary_text.delta" => {
            if let Some(text) = delta_text(&v) {
                out.push(NormalizedEvent::ReasoningDelta { text });
            }
        }

        // Tool call events
        "response.function_call_arguments.delta" => {
            out.push(NormalizedEvent::ToolCallDelta {
                call_index: call_index(),
                id: None,
                name: None,
                arguments_delta: v.get("delta").and_then(|x| x.as_str()).map(ToString::to_string),
            });
        }

        "response.output_item.added" => {
            if let Some(item) = v.get("item").filter(|i| i["type"] == "function_call") {
                out.push(NormalizedEvent::ToolCallDelta {
                    call_index: call_index(),
                    id: item.get("call_id").and_then(|x| x.as_str()).map(ToString::to_string),
                    name: item.get("name").and_then(|x| x.as_str()).map(ToString::to_string),
                    arguments_delta: None,
                });
            }
        }

        "response.output_item.done" => {
            if let Some(item) = v.get("item").filter(|i| i["type"] == "function_call") {
                out.push(NormalizedEvent::ToolCallComplete {
                    call_index: call_index(),
                    id: item.get("call_id").and_then(|x| x.as_str()).unwrap_or_default().to_string(),
                    name: item.get("name").and_then(|x| x.as_str()).unwrap_or_default().to_string(),
                    arguments_json: item
                        .get("arguments")
                        .and_then(|x| x.as_str())
                        .unwrap_or("{}")
                        .to_string(),
                });
            }
        }

        "response.completed" | "response.done" => {
            if let Some(u) = v.get("response").and_then(|r| r.get("usage")).filter(|u| u.is_object()) {
                let field = |k: &str| u.get(k).and_then(Value::as_u64).unwrap_or(0);
                out.push(NormalizedEvent::Usage {
                    prompt_tokens: field("input_tokens"),
                    completion_tokens: field("output_tokens"),
                    total_tokens: field("total_tokens"),
                });
            }
            out.push(NormalizedEvent::Done);
        }

        "response.failed" | "error" => {
            let err = v
                .get("response")
                .and_then(|r| r.get("error"))
                .or_else(|| v.get("error"))
                .unwrap_or(&v);
            out.push(NormalizedEvent::Error {
                message: err
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("provider stream error")
                    .to_string(),
                code: err.get("code").and_then(|c| c.as_str()).map(ToString::to_string),
            });
        }

        // Ignore unknown events
        _ => {}
    }

    Ok(out)
}

#[async_trait::async_trait]
impl LlmDriver for ResponsesDriver {
    async fn stream(&self, req: LlmRequest) -> anyhow::Result<EventStream> {
        let url = self.settings.provider.build_responses_url(&self.settings.base_url);
        let body = self.build_body(&req);

        tracing::debug!(
            name: "llm.responses.request",
            url = %url,
            message_count = req.messages.len(),
            tool_count = req.tools.len(),
            "Sending responses request"
        );

        let rb = self.http.post(&url).json(&body);
        let resp = send_checked(&self.settings, rb, &req.headers).await?;
        let byte_stream = resp.bytes_stream();
        let cancel = req.cancel;

        let out = async_stream::try_stream! {
            let mut buf = Vec::<u8>::new();
            let mut current_event_name: Option<String> = None;

            futures::pin_mut!(byte_stream);
            loop {
                let next = tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    next = byte_stream.next() => next,
                };
                let Some(chunk) = next else { break };
                let chunk = chunk?;
                buf.extend_from_slice(&chunk);

                while let Some(pos) = find_double_newline(&buf) {
                    let frame = buf.drain(..pos + 2).collect::<Vec<_>>();
                    let text = String::from_utf8_lossy(&frame);

                    let mut data_line: Option<String> = None;

                    for line in text.lines() {
                        let line = line.trim();
                        if line.starts_with("event:") {
                            current_event_name = Some(line.trim_start_matches("event:").trim().to_string());
                        } else if line.starts_with("data:") {
                            data_line = Some(line.trim_start_matches("data:").trim().to_string());
                        }
                    }

                    if let Some(d) = data_line {
                        let ev = current_event_name.clone().unwrap_or_default();
                        for event in parse_event(&ev, &d)? {
                            yield event;
                        }
                    }
                }
            }
        };

        Ok(Box::pin(out))
    }
}
