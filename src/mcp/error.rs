//! Error taxonomy for the federation layer.
//!
//! Per-server failures ([`ConnectionError`], [`CatalogFetchError`]) never
//! leave the concurrent task that produced them; they are recorded and the
//! affected server contributes nothing. [`DispatchError`] is the only error a
//! tool caller ever sees.

use thiserror::Error;

/// Failure to bring up a single capability server.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The transport could not be started or the handshake failed.
    #[error("failed to connect capability server '{server}': {message}")]
    Connect { server: String, message: String },

    /// The per-descriptor connect timeout elapsed.
    #[error("capability server '{server}' did not connect within {secs}s")]
    Timeout { server: String, secs: u64 },
}

/// Failure to fetch one server's tool manifest.
#[derive(Debug, Error)]
#[error("tools/list failed for capability server '{server}': {message}")]
pub struct CatalogFetchError {
    pub server: String,
    pub message: String,
}

/// Failure to route or execute a prefixed tool call.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No connected server owns the escaped id embedded in the tool name.
    #[error("no connected capability server for tool '{tool}'")]
    NoClient { tool: String },

    /// The server is connected but does not expose the requested tool.
    #[error("tool '{tool}' not found on capability server '{server}'")]
    ToolNotFound { server: String, tool: String },

    /// The server rejected or failed the invocation.
    #[error("tools/call failed for {server}::{tool}: {message}")]
    InvocationFailure {
        server: String,
        tool: String,
        message: String,
    },
}

impl DispatchError {
    /// Short machine-readable code used by the HTTP surface.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoClient { .. } => "NO_CLIENT",
            Self::ToolNotFound { .. } => "TOOL_NOT_FOUND",
            Self::InvocationFailure { .. } => "INVOCATION_FAILURE",
        }
    }
}

/// Descriptor file loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read capability server config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid capability server config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("capability server '{server}': {reason}")]
    InvalidDescriptor { server: String, reason: String },

    /// Two distinct raw ids escape to the same namespace prefix.
    #[error("capability servers '{first}' and '{second}' both map to tool prefix '{escaped}'")]
    EscapedIdCollision {
        first: String,
        second: String,
        escaped: String,
    },
}

/// Lifecycle misuse of the federation manager.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("federation manager is already initialized")]
    AlreadyInitialized,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// One non-fatal failure collected during teardown.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TeardownFailure {
    pub server: String,
    pub message: String,
}

/// Aggregate of everything that went wrong while closing connections.
///
/// Teardown always completes; callers decide whether to surface this.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct TeardownReport {
    pub closed: usize,
    pub failures: Vec<TeardownFailure>,
}

impl TeardownReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_error_codes() {
        let err = DispatchError::NoClient {
            tool: "x-y".to_string(),
        };
        assert_eq!(err.code(), "NO_CLIENT");
        assert!(err.to_string().contains("x-y"));

        let err = DispatchError::ToolNotFound {
            server: "time".to_string(),
            tool: "later".to_string(),
        };
        assert_eq!(err.code(), "TOOL_NOT_FOUND");
    }

    #[test]
    fn test_teardown_report_clean() {
        let mut report = TeardownReport::default();
        assert!(report.is_clean());
        report.failures.push(TeardownFailure {
            server: "a".to_string(),
            message: "boom".to_string(),
        });
        assert!(!report.is_clean());
    }
}
