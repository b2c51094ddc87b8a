//! Provider error capture and quota classification.
//!
//! Drivers turn non-success HTTP responses into a [`ProviderError`] carrying
//! the status and raw body, so the orchestrator can tell quota exhaustion
//! apart from every other failure.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Statuses providers use for quota exhaustion.
const QUOTA_STATUSES: [u16; 2] = [403, 429];

/// Error codes that mark a body as a quota payload.
const QUOTA_CODES: [&str; 3] = ["quota_exceeded", "insufficient_quota", "QUOTA_EXCEEDED"];

/// A structured error returned by the model provider.
#[derive(Debug, Clone, Error)]
#[error("provider returned HTTP {status}: {}", self.message())]
pub struct ProviderError {
    pub status: u16,
    pub body: String,
}

/// Parsed quota payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaInfo {
    pub status: u16,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    limit: Option<u64>,
    #[serde(default)]
    used: Option<u64>,
    #[serde(default)]
    reset_at: Option<String>,
}

impl ProviderError {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// The body as JSON, if it is JSON.
    #[must_use]
    pub fn json_body(&self) -> Option<serde_json::Value> {
        serde_json::from_str(&self.body).ok()
    }

    /// Best human-readable message: `error.message` from a structured body,
    /// else the raw body, else the status.
    #[must_use]
    pub fn message(&self) -> String {
        if let Ok(env) = serde_json::from_str::<ErrorEnvelope>(&self.body) {
            if let Some(msg) = env.error.message {
                return msg;
            }
        }
        let trimmed = self.body.trim();
        if trimmed.is_empty() {
            format!("HTTP {}", self.status)
        } else {
            trimmed.to_string()
        }
    }

    /// Quota details when this is a quota-exceeded error with a parseable body.
    #[must_use]
    pub fn quota(&self) -> Option<QuotaInfo> {
        if !QUOTA_STATUSES.contains(&self.status) {
            return None;
        }
        let env: ErrorEnvelope = serde_json::from_str(&self.body).ok()?;
        let code = [env.error.code.as_deref(), env.error.kind.as_deref()]
            .into_iter()
            .flatten()
            .find(|c| QUOTA_CODES.contains(c))?
            .to_string();

        Some(QuotaInfo {
            status: self.status,
            code,
            message: env.error.message,
            limit: env.error.limit,
            used: env.error.used,
            reset_at: env.error.reset_at,
        })
    }
}
