//! OpenAI Chat Completions API driver.
//!
//! This module implements the [`LlmDriver`] trait for the OpenAI Chat Completions
//! API (`/v1/chat/completions`), supporting streaming responses, tool calls and
//! usage reporting (`stream_options.include_usage`).

use std::collections::BTreeMap;

use futures::StreamExt;

use crate::normalized::NormalizedEvent;

use super::{EventStream, LlmDriver, LlmRequest, LlmSettings, find_double_newline, send_checked};

/// Accumulated state for a streaming tool call.
#[derive(Default)]
struct ToolAccum {
    id: Option<String>,
    name: Option<String>,
    args: String,
}

/// Turns `data:` payloads into normalized events.
#[derive(Default)]
struct ChunkParser {
    tool_accum: BTreeMap<usize, ToolAccum>,
}

impl ChunkParser {
    fn parse(&mut self, data: &str) -> anyhow::Result<Vec<NormalizedEvent>> {
        let mut out = Vec::new();
        if data == "[DONE]" {
            out.push(NormalizedEvent::Done);
            return Ok(out);
        }

        let v: serde_json::Value = serde_json::from_str(data)?;

        if let Some(err) = v.get("error") {
            out.push(NormalizedEvent::Error {
                message: err
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("provider stream error")
                    .to_string(),
                code: err.get("code").and_then(|c| c.as_str()).map(ToString::to_string),
            });
            return Ok(out);
        }

        let choice = &v["choices"][0];
        let delta = &choice["delta"];

        // Assistant text delta
        if let Some(s) = delta.get("content").and_then(|x| x.as_str()) {
            if !s.is_empty() {
                out.push(NormalizedEvent::MessageDelta {
                    text: s.to_string(),
                });
            }
        }

        // Some OpenAI-compatible servers stream reasoning separately.
        if let Some(s) = delta.get("reasoning_content").and_then(|x| x.as_str()) {
            if !s.is_empty() {
                out.push(NormalizedEvent::ReasoningDelta {
                    text: s.to_string(),
                });
            }
        }

        // Tool calls streaming deltas
        if let Some(arr) = delta.get("tool_calls").and_then(|x| x.as_array()) {
            for tc in arr {
                let idx = tc.get("index").and_then(serde_json::Value::as_u64).unwrap_or(0) as usize;
                let id = tc.get("id").and_then(|x| x.as_str()).map(ToString::to_string);
                let name = tc
                    .get("function")
                    .and_then(|f| f.get("name"))
                    .and_then(|x| x.as_str())
                    .map(ToString::to_string);
                let args_delta = tc
                    .get("function")
                    .and_then(|f| f.get("arguments"))
                    .and_then(|x| x.as_str())
                    .map(ToString::to_string);

                let entry = self.tool_accum.entry(idx).or_default();
                if entry.id.is_none() {
                    entry.id.clone_from(&id);
                }
                if entry.name.is_none() {
                    entry.name.clone_from(&name);
                }
                if let Some(ad) = &args_delta {
                    entry.args.push_str(ad);
                }

                out.push(NormalizedEvent::ToolCallDelta {
                    call_index: idx,
                    id,
                    name,
                    arguments_delta: args_delta,
                });
            }
        }

        // Completion boundary: emit assembled tool calls
        if choice.get("finish_reason").and_then(|x| x.as_str()) == Some("tool_calls") {
            for (idx, a) in std::mem::take(&mut self.tool_accum) {
                if let (Some(id), Some(name)) = (a.id, a.name) {
                    out.push(NormalizedEvent::ToolCallComplete {
                        call_index: idx,
                        id,
                        name,
                        arguments_json: a.args,
                    });
                }
            }
        }

        // Final usage chunk (choices is empty)
        if let Some(u) = v.get("usage").filter(|u| u.is_object()) {
            let field = |k: &str| u.get(k).and_then(serde_json::Value::as_u64).unwrap_or(0);
            out.push(NormalizedEvent::Usage {
                prompt_tokens: field("prompt_tokens"),
                completion_tokens: field("completion_tokens"),
                total_tokens: field("total_tokens"),
            });
        }

        Ok(out)
    }
}

/// Driver for the OpenAI Chat Completions API.
///
/// Connects to `/v1/chat/completions` and streams responses as
/// [`NormalizedEvent`]s.
#[derive(Clone)]
pub struct ChatCompletionsDriver {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl std::fmt::Debug for ChatCompletionsDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsDriver")
            .field("settings", &self.settings)
            .finish()
    }
}

impl ChatCompletionsDriver {
    /// Create a new Chat Completions driver with the given settings.
    #[must_use]
    pub fn new(settings: LlmSettings) -> Self {
        Self::with_client(reqwest::Client::new(), settings)
    }

    /// Create a driver that shares an existing HTTP client.
    #[must_use]
    pub fn with_client(http: reqwest::Client, settings: LlmSettings) -> Self {
        Self { http, settings }
    }

    fn build_body(&self, req: &LlmRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.settings.model,
            "stream": true,
            "stream_options": { "include_usage": true },
            "messages": req.messages,
        });
        if !req.tools.is_empty() {
            body["tools"] = serde_json::Value::Array(req.tools.clone());
            if let Some(parallel) = self.settings.parallel_tool_calls {
                if self.settings.provider.supports_parallel_tools() {
                    body["parallel_tool_calls"] = serde_json::Value::Bool(parallel);
                }
            }
        }
        if let Some(max) = req.max_output_tokens {
            body[self.settings.provider.max_tokens_field()] = max.into();
        }
        body
    }
}

#[async_trait::async_trait]
impl LlmDriver for ChatCompletionsDriver {
    async fn stream(&self, req: LlmRequest) -> anyhow::Result<EventStream> {
        let url = self
            .settings
            .provider
            .build_chat_url(&self.settings.base_url, &self.settings.model);
        let body = self.build_body(&req);

        tracing::debug!(
            name: "llm.chat.request",
            url = %url,
            message_count = req.messages.len(),
            tool_count = req.tools.len(),
            "Sending chat completions request"
        );

        let rb = self.http.post(&url).json(&body);
        let resp = send_checked(&self.settings, rb, &req.headers).await?;
        let byte_stream = resp.bytes_stream();
        let cancel = req.cancel;

        let out = async_stream::try_stream! {
            let mut buf = Vec::<u8>::new();
            let mut parser = ChunkParser::default();

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

                    for line in text.lines() {
                        let line = line.trim();
                        if !line.starts_with("data:") {
                            continue;
                        }
                        let data = line.trim_start_matches("data:").trim();
                        for event in parser.parse(data)? {
                            yield event;
                        }
                    }
                }
            }
        };

        Ok(Box::pin(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmProtocol, Provider};

    fn driver(provider: Provider) -> ChatCompletionsDriver {
        ChatCompletionsDriver::new(LlmSettings {
            base_url: "http://localhost".to_string(),
            api_key: None,
            model: "m".to_string(),
            protocol: LlmProtocol::Chat,
            provider,
            parallel_tool_calls: Some(true),
        })
    }

    #[test]
    fn test_body_includes_usage_and_token_cap() {
        let req = LlmRequest {
            max_output_tokens: Some(256),
            tools: vec![serde_json::json!({"type": "function"})],
            ..LlmRequest::default()
        };
        let body = driver(Provider::Generic).build_body(&req);
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert_eq!(body["max_tokens"], 256);
        assert!(body.get("parallel_tool_calls").is_none());

        let body = driver(Provider::OpenAI).build_body(&req);
        assert_eq!(body["max_completion_tokens"], 256);
        assert_eq!(body["parallel_tool_calls"], true);
    }

    #[test]
    fn test_body_omits_empty_tools() {
        let body = driver(Provider::Generic).build_body(&LlmRequest::default());
        assert!(body.get("tools").is_none());
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn test_parse_text_and_tool_calls() {
        let mut p = ChunkParser::default();
        let events = p
            .parse(r#"{"choices":[{"delta":{"content":"Hi"}}]}"#)
            .unwrap();
        assert_eq!(events, vec![NormalizedEvent::MessageDelta { text: "Hi".to_string() }]);

        p.parse(r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"time-now","arguments":"{\"a\""}}]}}]}"#)
            .unwrap();
        p.parse(r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":":1}"}}]}}]}"#)
            .unwrap();
        let events = p
            .parse(r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#)
            .unwrap();
        assert_eq!(
            events,
            vec![NormalizedEvent::ToolCallComplete {
                call_index: 0,
                id: "c1".to_string(),
                name: "time-now".to_string(),
                arguments_json: r#"{"a":1}"#.to_string(),
            }]
        );
    }

    #[test]
    fn test_parse_usage_and_done() {
        let mut p = ChunkParser::default();
        let events = p
            .parse(r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#)
            .unwrap();
        assert_eq!(
            events,
            vec![NormalizedEvent::Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }]
        );
        assert_eq!(p.parse("[DONE]").unwrap(), vec![NormalizedEvent::Done]);
    }

    #[test]
    fn test_parse_in_stream_error() {
        let mut p = ChunkParser::default();
        let events = p
            .parse(r#"{"error":{"message":"overloaded","code":"server_busy"}}"#)
            .unwrap();
        assert!(matches!(
            &events[0],
            NormalizedEvent::Error { message, code: Some(code) } if message == "overloaded" && code == "server_busy"
        ));
        assert!(p.parse("not json").is_err());
    }
}
