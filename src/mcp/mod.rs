//! Tool federation over Model Context Protocol (MCP) servers.
//!
//! Capability servers are configured in `mcp.json` (see [`config`]), connected
//! concurrently by the [`pool`], and their tools are merged into one flat
//! namespace of prefixed names (see [`namespace`]):
//!
//! ```text
//! <escapedServer>-<rawTool>      e.g.  time-now, my_x2eserver-get-time
//! ```
//!
//! The [`manager::FederationManager`] ties the pieces together and is the
//! only type most callers need.

pub mod catalog;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod manager;
pub mod namespace;
pub mod pool;
pub mod schema;

pub use catalog::ToolDescriptor;
pub use client::{CapabilityClient, Connector, RmcpConnector, ToolManifest};
pub use config::{ServerDescriptor, Transport};
pub use error::{DispatchError, ManagerError, TeardownReport};
pub use manager::FederationManager;
pub use schema::ParamValidator;
