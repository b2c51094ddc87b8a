//! Normalized event types for streaming LLM responses.
//!
//! This module defines a unified event model that abstracts over different LLM
//! protocols (Chat Completions, Responses API) and is forwarded, in order, to
//! the display layer.
//!
//! # Event Types
//!
//! - Message deltas for incremental text output
//! - Tool call lifecycle (delta, complete, result)
//! - Extended model output (thinking, reasoning)
//! - Usage accounting and stream end (usage, error, done)
//!
//! # Example
//!
//! ```rust
//! use federated_chat::normalized::{NormalizedEvent, event_json, event_name};
//!
//! let event = NormalizedEvent::MessageDelta {
//!     text: "Hello".to_string(),
//! };
//! assert_eq!(event_name(&event), "message.delta");
//! assert!(event_json(&event).contains("Hello"));
//! ```

use serde::{Deserialize, Serialize};

/// Normalized streaming events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum NormalizedEvent {
    // ─────────────────────────────────────────────────────────────────────
    // Message Content
    // ─────────────────────────────────────────────────────────────────────
    /// Incremental text delta from the assistant's response.
    #[serde(rename = "message.delta")]
    MessageDelta {
        /// The text fragment to append.
        text: String,
    },

    /// Incremental thinking delta (for models that expose this).
    #[serde(rename = "thinking.delta")]
    ThinkingDelta { text: String },

    /// Incremental reasoning delta (chain-of-thought output).
    #[serde(rename = "reasoning.delta")]
    ReasoningDelta { text: String },

    // ─────────────────────────────────────────────────────────────────────
    // Tool Calls
    // ─────────────────────────────────────────────────────────────────────
    /// Incremental tool call delta (streaming tool call assembly).
    #[serde(rename = "tool_call.delta")]
    ToolCallDelta {
        /// Index of this tool call in the current batch.
        call_index: usize,
        /// Tool call ID (may arrive in first delta or later).
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        /// Tool/function name (may arrive in first delta or later).
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// Incremental arguments JSON fragment.
        #[serde(skip_serializing_if = "Option::is_none")]
        arguments_delta: Option<String>,
    },

    /// Tool call is fully assembled and ready for execution.
    #[serde(rename = "tool_call.complete")]
    ToolCallComplete {
        call_index: usize,
        id: String,
        name: String,
        /// Complete arguments as JSON string.
        arguments_json: String,
    },

    /// Result from executing a tool.
    #[serde(rename = "tool_result")]
    ToolResult {
        /// Tool call ID this result corresponds to.
        id: String,
        name: String,
        /// Result content (typically JSON).
        content: String,
        #[serde(default = "default_true")]
        success: bool,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Accounting, Errors and Completion
    // ─────────────────────────────────────────────────────────────────────
    /// Token usage reported by the provider for one model round trip.
    #[serde(rename = "usage")]
    Usage {
        prompt_tokens: u64,
        completion_tokens: u64,
        total_tokens: u64,
    },

    /// An error reported inside the stream.
    #[serde(rename = "error")]
    Error {
        message: String,
        /// Optional error code for programmatic handling.
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    /// The model finished this response.
    #[serde(rename = "done")]
    Done,
}

fn default_true() -> bool {
    true
}

/// JSON payload for the SSE `data:` line.
///
/// Never fails: a serialization error becomes an `error` event payload.
///
/// ```rust
/// use federated_chat::normalized::{NormalizedEvent, event_json};
///
/// assert_eq!(event_json(&NormalizedEvent::Done), r#"{"type":"done"}"#);
/// ```
pub fn event_json(evt: &NormalizedEvent) -> String {
    serde_json::to_string(evt).unwrap_or_else(|e| {
        serde_json::json!({ "type": "error", "data": { "message": e.to_string() } }).to_string()
    })
}

/// Get the SSE event name for a [`NormalizedEvent`].
pub fn event_name(evt: &NormalizedEvent) -> &'static str {
    match evt {
        NormalizedEvent::MessageDelta { .. } => "message.delta",
        NormalizedEvent::ThinkingDelta { .. } => "thinking.delta",
        NormalizedEvent::ReasoningDelta { .. } => "reasoning.delta",
        NormalizedEvent::ToolCallDelta { .. } => "tool_call.delta",
        NormalizedEvent::ToolCallComplete { .. } => "tool_call.complete",
        NormalizedEvent::ToolResult { .. } => "tool_result",
        NormalizedEvent::Usage { .. } => "usage",
        NormalizedEvent::Error { .. } => "error",
        NormalizedEvent::Done => "done",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_delta_serialization() {
        let event = NormalizedEvent::MessageDelta {
            text: "Hello".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("message.delta"));
        assert!(json.contains("Hello"));
    }

    #[test]
    fn test_event_json_is_adjacently_tagged() {
        let json = event_json(&NormalizedEvent::Error {
            message: "boom".to_string(),
            code: None,
        });
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["type"], "error");
        assert_eq!(v["data"]["message"], "boom");
    }

    #[test]
    fn test_tool_result_defaults_to_success() {
        let event: NormalizedEvent = serde_json::from_str(
            r#"{"type":"tool_result","data":{"id":"c1","name":"time-now","content":"{}"}}"#,
        )
        .unwrap();
        assert!(matches!(event, NormalizedEvent::ToolResult { success: true, .. }));
    }

    #[test]
    fn test_usage_event_name() {
        let event = NormalizedEvent::Usage {
            prompt_tokens: 1,
            completion_tokens: 2,
            total_tokens: 3,
        };
        assert_eq!(event_name(&event), "usage");
    }
}
