//! Application configuration.
//!
//! Layers, lowest to highest priority:
//!
//! 1. Built-in defaults
//! 2. Config file: `--config`/`CONFIG_FILE` if given, else an optional
//!    `config.{yaml,toml,json}` in the working directory
//! 3. `FEDCHAT_`-prefixed environment variables (`FEDCHAT_SERVER__PORT=8000`)
//! 4. CLI flags and their plain env fallbacks (`PORT`, `LLM_MODEL`, ...)

use crate::llm::orchestrator::{DEFAULT_MAX_OUTPUT_TOKENS, DEFAULT_MAX_STEPS};
use crate::llm::{LlmProtocol, LlmSettings, Provider, StreamLimits};
use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// LLM API base URL
    #[arg(long, env = "LLM_BASE_URL")]
    pub llm_base_url: Option<String>,

    /// LLM model identifier
    #[arg(long, env = "LLM_MODEL")]
    pub llm_model: Option<String>,

    /// LLM API key
    #[arg(long, env = "LLM_API_KEY", hide_env_values = true)]
    pub llm_api_key: Option<String>,

    /// Capability server descriptor file
    #[arg(long, env = "MCP_CONFIG")]
    pub mcp_config: Option<String>,

    /// Emit JSON logs
    #[arg(long, env = "LOG_JSON")]
    pub log_json: Option<bool>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub mcp: McpSection,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Deserialize, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
    pub protocol: String,
    pub max_steps: usize,
    pub max_output_tokens: u32,
    #[serde(default)]
    pub parallel_tool_calls: Option<bool>,
    #[serde(default)]
    pub azure_deployment: Option<String>,
    #[serde(default)]
    pub azure_api_version: Option<String>,
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("protocol", &self.protocol)
            .field("max_steps", &self.max_steps)
            .field("max_output_tokens", &self.max_output_tokens)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct McpSection {
    pub config_path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub json: bool,
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub filter: String,
}

impl LlmConfig {
    /// Driver settings with provider auto-detected from the base URL.
    #[must_use]
    pub fn to_settings(&self) -> LlmSettings {
        let provider = Provider::detect_from_url(&self.base_url)
            .with_azure_deployment(self.azure_deployment.clone(), self.azure_api_version.clone());

        LlmSettings {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone().filter(|k| !k.trim().is_empty()),
            model: self.model.clone(),
            protocol: LlmProtocol::parse(&self.protocol),
            provider,
            parallel_tool_calls: self.parallel_tool_calls,
        }
    }

    #[must_use]
    pub fn limits(&self) -> StreamLimits {
        StreamLimits {
            max_steps: self.max_steps.max(1),
            max_output_tokens: self.max_output_tokens,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder();

        // 1. Defaults
        builder = builder
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("llm.base_url", "https://api.openai.com")?
            .set_default("llm.model", "gpt-4o-mini")?
            .set_default("llm.protocol", "auto")?
            .set_default("llm.max_steps", DEFAULT_MAX_STEPS as u64)?
            .set_default("llm.max_output_tokens", u64::from(DEFAULT_MAX_OUTPUT_TOKENS))?
            .set_default("mcp.config_path", "mcp.json")?
            .set_default("logging.json", false)?
            .set_default("logging.filter", "info")?;

        // 2. Config file
        builder = match &cli.config {
            Some(path) => builder.add_source(File::with_name(path).required(true)),
            None => builder.add_source(File::with_name("config").required(false)),
        };

        // 3. Environment variables, e.g. FEDCHAT_SERVER__PORT=8000
        builder = builder.add_source(
            Environment::with_prefix("FEDCHAT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        // 4. CLI flags (clap also fills these from their plain env names)
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(url) = cli.llm_base_url {
            builder = builder.set_override("llm.base_url", url)?;
        }
        if let Some(model) = cli.llm_model {
            builder = builder.set_override("llm.model", model)?;
        }
        if let Some(key) = cli.llm_api_key {
            builder = builder.set_override("llm.api_key", key)?;
        }
        if let Some(path) = cli.mcp_config {
            builder = builder.set_override("mcp.config_path", path)?;
        }
        if let Some(json) = cli.log_json {
            builder = builder.set_override("logging.json", json)?;
        }

        let cfg = builder.build()?;
        cfg.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LlmConfig {
        LlmConfig {
            base_url: "https://my-resource.openai.azure.com".to_string(),
            api_key: Some("  ".to_string()),
            model: "gpt-4o".to_string(),
            protocol: "responses".to_string(),
            max_steps: 0,
            max_output_tokens: 512,
            parallel_tool_calls: None,
            azure_deployment: Some("prod".to_string()),
            azure_api_version: None,
        }
    }

    #[test]
    fn test_to_settings() {
        let settings = sample().to_settings();
        assert_eq!(settings.protocol, LlmProtocol::Responses);
        assert!(settings.api_key.is_none());
        assert!(matches!(
            settings.provider,
            Provider::AzureOpenAI { ref deployment_name, .. } if deployment_name == "prod"
        ));
    }

    #[test]
    fn test_limits_never_zero_steps() {
        let limits = sample().limits();
        assert_eq!(limits.max_steps, 1);
        assert_eq!(limits.max_output_tokens, 512);
    }

    #[test]
    fn test_debug_redacts_key() {
        let mut cfg = sample();
        cfg.api_key = Some("sk-live".to_string());
        assert!(!format!("{cfg:?}").contains("sk-live"));
    }
}
