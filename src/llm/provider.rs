//! Provider-specific configuration and detection.
//!
//! This module handles differences between LLM API providers, including
//! URL patterns, authentication, headers and request field names.

/// Default Azure `OpenAI` API version.
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-08-01-preview";

/// Supported LLM providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provider {
    /// `OpenAI` (api.openai.com)
    OpenAI,
    /// Azure `OpenAI` Service
    AzureOpenAI {
        /// Deployment name (required for Azure)
        deployment_name: String,
        /// API version (e.g., "2024-08-01-preview")
        api_version: String,
    },
    /// `OpenRouter` (openrouter.ai)
    OpenRouter,
    /// Together AI (together.ai, together.xyz)
    TogetherAI,
    /// Groq (groq.com)
    Groq,
    /// Generic OpenAI-compatible provider
    Generic,
}

impl Provider {
    /// Detect provider from base URL.
    ///
    /// # Example
    ///
    /// ```rust
    /// use federated_chat::llm::Provider;
    ///
    /// let provider = Provider::detect_from_url("https://api.openai.com");
    /// assert_eq!(provider, Provider::OpenAI);
    /// ```
    #[must_use]
    pub fn detect_from_url(base_url: &str) -> Self {
        let lower = base_url.to_lowercase();

        if lower.contains("azure.com") {
            Self::AzureOpenAI {
                deployment_name: String::new(),
                api_version: DEFAULT_AZURE_API_VERSION.to_string(),
            }
        } else if lower.contains("openrouter.ai") {
            Self::OpenRouter
        } else if lower.contains("together.ai") || lower.contains("together.xyz") {
            Self::TogetherAI
        } else if lower.contains("groq.com") {
            Self::Groq
        } else if lower.contains("openai.com") {
            Self::OpenAI
        } else {
            Self::Generic
        }
    }

    /// Fill in Azure deployment details; other providers are returned as-is.
    #[must_use]
    pub fn with_azure_deployment(self, deployment: Option<String>, api_version: Option<String>) -> Self {
        match self {
            Self::AzureOpenAI {
                deployment_name,
                api_version: current,
            } => Self::AzureOpenAI {
                deployment_name: deployment.unwrap_or(deployment_name),
                api_version: api_version.unwrap_or(current),
            },
            other => other,
        }
    }

    /// Check if this provider supports parallel tool calls.
    #[must_use]
    pub fn supports_parallel_tools(&self) -> bool {
        !matches!(self, Self::Generic)
    }

    /// Header carrying the API key, or `None` for bearer auth.
    #[must_use]
    pub fn auth_header(&self) -> Option<&'static str> {
        match self {
            Self::AzureOpenAI { .. } => Some("api-key"),
            _ => None,
        }
    }

    /// Static headers this provider expects on every request.
    #[must_use]
    pub fn extra_headers(&self) -> Vec<(&'static str, &'static str)> {
        match self {
            Self::OpenRouter => vec![
                ("HTTP-Referer", "https://github.com/federated-chat"),
                ("X-Title", "federated-chat"),
            ],
            _ => Vec::new(),
        }
    }

    /// Name of the output token cap field in Chat Completions requests.
    #[must_use]
    pub fn max_tokens_field(&self) -> &'static str {
        match self {
            Self::OpenAI | Self::AzureOpenAI { .. } => "max_completion_tokens",
            _ => "max_tokens",
        }
    }

    /// Build the chat completions URL for this provider.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The base URL (without trailing slash)
    /// * `model` - The model name (unused for Azure, which uses deployment name)
    #[must_use]
    pub fn build_chat_url(&self, base_url: &str, _model: &str) -> String {
        let base = base_url.trim_end_matches('/');

        match self {
            Self::AzureOpenAI {
                deployment_name,
                api_version,
            } => {
                format!(
                    "{base}/openai/deployments/{deployment_name}/chat/completions?api-version={api_version}"
                )
            }
            _ => format!("{base}/v1/chat/completions"),
        }
    }

    /// Build the Responses API URL for this provider.
    #[must_use]
    pub fn build_responses_url(&self, base_url: &str) -> String {
        let base = base_url.trim_end_matches('/');

        match self {
            Self::AzureOpenAI { api_version, .. } => {
                format!("{base}/openai/responses?api-version={api_version}")
            }
            _ => format!("{base}/v1/responses"),
        }
    }
}
