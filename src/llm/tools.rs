//! Tools offered to the model during a stream.
//!
//! A [`ToolSet`] merges built-in [`NativeTool`]s with the federated catalog.
//! Federated entries are inserted last, so on a name clash the federated tool
//! wins. Arguments are validated against the tool's schema before invocation.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Value, json};
use thiserror::Error;

use crate::mcp::namespace;
use crate::mcp::schema::SchemaViolation;
use crate::mcp::{DispatchError, FederationManager, ParamValidator, ToolDescriptor};

/// A tool implemented in-process.
#[async_trait::async_trait]
pub trait NativeTool: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn schema(&self) -> Value;
    async fn call(&self, args: Value) -> anyhow::Result<Value>;
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool '{0}'")]
    Unknown(String),

    #[error("invalid arguments for '{tool}': {violation}")]
    InvalidArguments {
        tool: String,
        violation: SchemaViolation,
    },

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("tool '{tool}' failed: {message}")]
    Builtin { tool: String, message: String },
}

#[derive(Debug, Clone)]
enum ToolSource {
    Builtin(Arc<dyn NativeTool>),
    Federated,
}

#[derive(Debug, Clone)]
struct ToolEntry {
    description: String,
    validator: ParamValidator,
    source: ToolSource,
}

/// The merged, name-ordered tool set for one stream.
#[derive(Debug, Clone, Default)]
pub struct ToolSet {
    entries: BTreeMap<String, ToolEntry>,
}

impl ToolSet {
    #[must_use]
    pub fn merge(builtins: &[Arc<dyn NativeTool>], federated: &[ToolDescriptor]) -> Self {
        let mut entries = BTreeMap::new();
        for tool in builtins {
            entries.insert(
                tool.name().to_string(),
                ToolEntry {
                    description: tool.description().to_string(),
                    validator: ParamValidator::from_schema(&tool.schema()),
                    source: ToolSource::Builtin(Arc::clone(tool)),
                },
            );
        }
        for desc in federated {
            if entries.contains_key(&desc.prefixed_name) {
                tracing::debug!(tool = %desc.prefixed_name, "Federated tool overrides built-in");
            }
            entries.insert(
                desc.prefixed_name.clone(),
                ToolEntry {
                    description: desc.description.clone(),
                    validator: desc.validator(),
                    source: ToolSource::Federated,
                },
            );
        }
        Self { entries }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn is_federated(&self, name: &str) -> bool {
        matches!(
            self.entries.get(name).map(|e| &e.source),
            Some(ToolSource::Federated)
        )
    }

    /// Definitions in `OpenAI` function format, ordered by name.
    #[must_use]
    pub fn definitions(&self) -> Vec<Value> {
        self.entries
            .iter()
            .map(|(name, entry)| {
                json!({
                    "type": "function",
                    "function": {
                        "name": name,
                        "description": entry.description,
                        "parameters": entry.validator.to_json_schema(),
                    }
                })
            })
            .collect()
    }

    /// Validate and run one tool call.
    ///
    /// # Errors
    ///
    /// Unknown names, schema violations, dispatch failures and built-in tool
    /// failures. Tool-level error payloads from federated servers are
    /// successes here and pass through unchanged.
    pub async fn invoke(
        &self,
        name: &str,
        args: Value,
        federation: &FederationManager,
    ) -> Result<Value, ToolError> {
        let Some(entry) = self.entries.get(name) else {
            // Prefixed names go to the dispatcher, which knows why they fail.
            if namespace::dispatch(name).is_some() {
                return Ok(federation.call_tool(name, args).await?);
            }
            return Err(ToolError::Unknown(name.to_string()));
        };

        entry
            .validator
            .validate(&args)
            .map_err(|violation| ToolError::InvalidArguments {
                tool: name.to_string(),
                violation,
            })?;

        match &entry.source {
            ToolSource::Builtin(tool) => tool.call(args).await.map_err(|e| ToolError::Builtin {
                tool: name.to_string(),
                message: format!("{e:#}"),
            }),
            ToolSource::Federated => Ok(federation.call_tool(name, args).await?),
        }
    }
}

/// Reports the current time.
#[derive(Debug, Default)]
pub struct CurrentTimeTool;

#[async_trait::async_trait]
impl NativeTool for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time in UTC, optionally shifted to a fixed offset."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "utc_offset_minutes": {
                    "type": "integer",
                    "description": "Optional offset from UTC in minutes, e.g. 120 or -300."
                }
            }
        })
    }

    async fn call(&self, args: Value) -> anyhow::Result<Value> {
        let now = chrono::Utc::now();
        let offset_minutes = match &args["utc_offset_minutes"] {
            Value::Null => 0,
            v => v
                .as_i64()
                .or_else(|| v.as_f64().filter(|f| f.fract() == 0.0 && f.abs() < 1e15).map(|f| f as i64))
                .ok_or_else(|| anyhow::anyhow!("utc_offset_minutes must be an integer, got {v}"))?,
        };
        let offset = offset_minutes
            .checked_mul(60)
            .and_then(|secs| i32::try_from(secs).ok())
            .and_then(chrono::FixedOffset::east_opt)
            .ok_or_else(|| anyhow::anyhow!("utc_offset_minutes out of range: {offset_minutes}"))?;
        let local = now.with_timezone(&offset);

        Ok(json!({
            "utc": now.to_rfc3339(),
            "local": local.to_rfc3339(),
            "unix": now.timestamp(),
            "weekday": local.format("%A").to_string(),
        }))
    }
}

/// Reports the host platform.
#[derive(Debug, Default)]
pub struct PlatformInfoTool;

#[async_trait::async_trait]
impl NativeTool for PlatformInfoTool {
    fn name(&self) -> &str {
        "platform_info"
    }

    fn description(&self) -> &str {
        "Describe the operating system and CPU architecture this assistant runs on."
    }

    fn schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn call(&self, _args: Value) -> anyhow::Result<Value> {
        let platform = super::prompt::Platform::current();
        Ok(serde_json::to_value(platform)?)
    }
}

/// Built-in tools registered by default.
#[must_use]
pub fn default_builtins() -> Vec<Arc<dyn NativeTool>> {
    vec![Arc::new(CurrentTimeTool), Arc::new(PlatformInfoTool)]
}
