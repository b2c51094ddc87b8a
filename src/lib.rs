//! Federated tool chat.
//!
//! Connects to any number of MCP capability servers, merges their tools into
//! one namespaced catalog, and streams model responses that may call those
//! tools across several round trips.
//!
//! # Modules
//!
//! - [`mcp`]: server pool, catalog, dispatch and lifecycle
//! - [`llm`]: provider drivers and the streaming orchestrator
//! - [`normalized`]: provider-independent streaming events
//! - [`server`]: HTTP/SSE surface
//! - [`config`]: layered application configuration
//! - `testing`: in-memory doubles for servers and drivers (`testing` feature)

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::assigning_clones)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::default_trait_access)]
#![allow(clippy::unused_async)]

pub mod config;
pub mod llm;
pub mod mcp;
pub mod normalized;
pub mod server;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

use std::sync::Arc;

use llm::ChatStreamOrchestrator;
use mcp::FederationManager;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Capability server federation.
    pub federation: Arc<FederationManager>,
    /// Streams chat responses with federated tools.
    pub orchestrator: Arc<ChatStreamOrchestrator>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("federation", &self.federation)
            .field("orchestrator", &self.orchestrator)
            .finish()
    }
}

impl AppState {
    #[must_use]
    pub fn new(federation: Arc<FederationManager>, orchestrator: Arc<ChatStreamOrchestrator>) -> Self {
        Self {
            federation,
            orchestrator,
        }
    }
}
