//! Capability server descriptors.
//!
//! Descriptors are read from `mcp.json`:
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "time": {
//!       "transport": "stdio",
//!       "command": "npx",
//!       "args": ["-y", "@mcpcentral/mcp-time"]
//!     },
//!     "search": {
//!       "transport": "streamed",
//!       "url": "https://mcp.example.com/mcp/",
//!       "headers": { "Authorization": "Bearer ${SEARCH_TOKEN}" },
//!       "enabled": false
//!     }
//!   }
//! }
//! ```
//!
//! `${VAR}` placeholders in env values, headers and urls are expanded from the
//! process environment at load time.

use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use url::Url;

use super::error::ConfigError;
use super::namespace::NameMapping;

/// How to reach a capability server.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum Transport {
    /// Spawn a child process and speak over stdin/stdout.
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default)]
        cwd: Option<PathBuf>,
    },
    /// Streamable HTTP endpoint.
    Streamed {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

impl Transport {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stdio { .. } => "stdio",
            Self::Streamed { .. } => "streamed",
        }
    }
}

/// One entry of the `mcpServers` map.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct McpServerEntry {
    #[serde(flatten)]
    pub transport: Transport,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Optional connect timeout. Unset means wait indefinitely.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct McpConfig {
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: BTreeMap<String, McpServerEntry>,
}

/// A validated server descriptor, immutable for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDescriptor {
    pub id: String,
    pub transport: Transport,
    pub enabled: bool,
    pub timeout: Option<Duration>,
}

impl ServerDescriptor {
    pub fn new(id: impl Into<String>, transport: Transport) -> Self {
        Self {
            id: id.into(),
            transport,
            enabled: true,
            timeout: None,
        }
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl McpConfig {
    /// Validate every entry and produce descriptors, ordered by id.
    ///
    /// Fails fast on malformed transports and on escaped-id collisions.
    pub fn into_descriptors(self) -> Result<Vec<ServerDescriptor>, ConfigError> {
        NameMapping::build(self.mcp_servers.keys())?;

        self.mcp_servers
            .into_iter()
            .map(|(id, entry)| {
                let transport = validate_transport(&id, entry.transport)?;
                Ok(ServerDescriptor {
                    id,
                    transport,
                    enabled: entry.enabled,
                    timeout: entry.timeout_secs.map(Duration::from_secs),
                })
            })
            .collect()
    }
}

fn validate_transport(id: &str, transport: Transport) -> Result<Transport, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidDescriptor {
        server: id.to_string(),
        reason,
    };

    match transport {
        Transport::Stdio {
            command,
            args,
            env,
            cwd,
        } => {
            if command.trim().is_empty() {
                return Err(invalid("stdio transport requires a command".to_string()));
            }
            Ok(Transport::Stdio {
                command,
                args,
                env: expand_env_map(&env),
                cwd,
            })
        }
        Transport::Streamed { url, headers } => {
            let url = expand_env_placeholders(&url);
            let parsed = Url::parse(&url).map_err(|e| invalid(format!("invalid url '{url}': {e}")))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(invalid(format!(
                    "streamed transport requires http(s), got '{}'",
                    parsed.scheme()
                )));
            }
            Ok(Transport::Streamed {
                url,
                headers: expand_env_map(&headers),
            })
        }
    }
}

pub fn load_mcp_config(path: impl AsRef<Path>) -> Result<McpConfig, ConfigError> {
    let txt = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&txt)?)
}

/// Load, validate and convert the descriptor file in one go.
pub fn load_descriptors(path: impl AsRef<Path>) -> Result<Vec<ServerDescriptor>, ConfigError> {
    load_mcp_config(path)?.into_descriptors()
}

/// Expand "${VAR}" placeholders from the process environment.
/// Missing variables leave the placeholder unchanged.
pub fn expand_env_placeholders(input: &str) -> String {
    let mut out = input.to_string();
    for (k, v) in std::env::vars() {
        let needle = format!("${{{k}}}");
        if out.contains(&needle) {
            out = out.replace(&needle, &v);
        }
    }
    out
}

pub fn expand_env_map(map: &HashMap<String, String>) -> HashMap<String, String> {
    map.iter()
        .map(|(k, v)| (k.clone(), expand_env_placeholders(v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> McpConfig {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_parse_both_transports() {
        let cfg = parse(
            r#"{
              "mcpServers": {
                "time": { "transport": "stdio", "command": "npx", "args": ["-y", "mcp-time"], "cwd": "/tmp" },
                "search": { "transport": "streamed", "url": "https://mcp.example.com/mcp", "enabled": false, "timeout_secs": 5 }
              }
            }"#,
        );
        let descriptors = cfg.into_descriptors().unwrap();
        assert_eq!(descriptors.len(), 2);

        let search = &descriptors[0];
        assert_eq!(search.id, "search");
        assert!(!search.enabled);
        assert_eq!(search.timeout, Some(Duration::from_secs(5)));
        assert_eq!(search.transport.kind(), "streamed");

        let time = &descriptors[1];
        assert!(time.enabled);
        assert_eq!(time.timeout, None);
        match &time.transport {
            Transport::Stdio { command, args, cwd, .. } => {
                assert_eq!(command, "npx");
                assert_eq!(args.len(), 2);
                assert_eq!(cwd.as_deref(), Some(Path::new("/tmp")));
            }
            Transport::Streamed { .. } => panic!("expected stdio"),
        }
    }

    #[test]
    fn test_missing_transport_tag_is_rejected() {
        let res: Result<McpConfig, _> =
            serde_json::from_str(r#"{ "mcpServers": { "x": { "command": "npx" } } }"#);
        assert!(res.is_err());
    }

    #[test]
    fn test_invalid_url_fails_at_load() {
        let cfg = parse(r#"{ "mcpServers": { "x": { "transport": "streamed", "url": "not a url" } } }"#);
        let err = cfg.into_descriptors().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDescriptor { .. }));
    }

    #[test]
    fn test_empty_command_fails_at_load() {
        let cfg = parse(r#"{ "mcpServers": { "x": { "transport": "stdio", "command": " " } } }"#);
        assert!(cfg.into_descriptors().is_err());
    }

    #[test]
    fn test_collision_fails_at_load() {
        let cfg = parse(
            r#"{ "mcpServers": {
                "a.b": { "transport": "stdio", "command": "x" },
                "a_x2eb": { "transport": "stdio", "command": "y" }
            } }"#,
        );
        let err = cfg.into_descriptors().unwrap_err();
        assert!(matches!(err, ConfigError::EscapedIdCollision { .. }));
    }

    #[test]
    fn test_expand_placeholder_leaves_unknown() {
        assert_eq!(
            expand_env_placeholders("${FEDCHAT_SURELY_UNSET_VAR}"),
            "${FEDCHAT_SURELY_UNSET_VAR}"
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp.json");
        fs::write(
            &path,
            r#"{ "mcpServers": { "time": { "transport": "stdio", "command": "mcp-time" } } }"#,
        )
        .unwrap();
        let descriptors = load_descriptors(&path).unwrap();
        assert_eq!(descriptors[0].id, "time");
    }
}
