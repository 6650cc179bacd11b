// OpenAI LLM Driver
//
// Production implementation for OpenAI's chat completions API and the Azure
// OpenAI variant of the same protocol.

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use tracing::debug;

use slackline_core::config::LlmSettings;
use slackline_core::error::{BotError, Result};
use slackline_core::llm::{
    LlmCallConfig, LlmCompletionMetadata, LlmDriver, LlmMessage, LlmProviderKind, LlmResponse,
    SharedLlmDriver,
};

use crate::types::{ApiErrorResponse, ChatMessage, ChatRequest, ChatResponse};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_AZURE_API_VERSION: &str = "2024-06-01";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Auth {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// `api-key: <key>`
    ApiKeyHeader,
}

/// OpenAI chat completions driver
///
/// # Example
///
/// ```ignore
/// use slackline_openai::OpenAIChatDriver;
///
/// let driver = OpenAIChatDriver::new("your-api-key");
/// // or an OpenAI-compatible server
/// let driver = OpenAIChatDriver::with_base_url("your-api-key", "http://localhost:8000/v1");
/// // or Azure OpenAI
/// let driver = OpenAIChatDriver::azure("key", "https://res.openai.azure.com", "gpt4o", None);
/// ```
#[derive(Clone)]
pub struct OpenAIChatDriver {
    client: Client,
    api_key: String,
    api_url: String,
    auth: Auth,
    provider: LlmProviderKind,
}

impl OpenAIChatDriver {
    /// Create a driver for api.openai.com
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Create a driver for an OpenAI-compatible API rooted at `base_url`
    /// (e.g. `https://api.openai.com/v1`)
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl AsRef<str>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            api_url: format!("{}/chat/completions", base_url.as_ref().trim_end_matches('/')),
            auth: Auth::Bearer,
            provider: LlmProviderKind::OpenAI,
        }
    }

    /// Create a driver for an Azure OpenAI deployment
    pub fn azure(
        api_key: impl Into<String>,
        endpoint: impl AsRef<str>,
        deployment: impl AsRef<str>,
        api_version: Option<&str>,
    ) -> Self {
        let api_url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            endpoint.as_ref().trim_end_matches('/'),
            deployment.as_ref(),
            api_version.unwrap_or(DEFAULT_AZURE_API_VERSION)
        );
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            api_url,
            auth: Auth::ApiKeyHeader,
            provider: LlmProviderKind::Azure,
        }
    }

    /// Get the API URL
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn provider(&self) -> LlmProviderKind {
        self.provider
    }

    fn request_body(&self, messages: Vec<LlmMessage>, config: &LlmCallConfig) -> ChatRequest {
        ChatRequest {
            model: match self.provider {
                LlmProviderKind::OpenAI => Some(config.model.clone()),
                LlmProviderKind::Azure => None,
            },
            messages: messages
                .into_iter()
                .map(|m| ChatMessage {
                    role: m.role.as_str().to_string(),
                    content: m.content,
                })
                .collect(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            stream: false,
        }
    }
}

#[async_trait]
impl LlmDriver for OpenAIChatDriver {
    async fn chat_completion(
        &self,
        messages: Vec<LlmMessage>,
        config: &LlmCallConfig,
    ) -> Result<LlmResponse> {
        let request = self.request_body(messages, config);

        let builder = self.client.post(&self.api_url).json(&request);
        let builder = match self.auth {
            Auth::Bearer => builder.bearer_auth(&self.api_key),
            Auth::ApiKeyHeader => builder.header("api-key", &self.api_key),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| BotError::provider(format!("Failed to send request: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ApiErrorResponse>(&error_text)
                .map(|e| e.error.message)
                .unwrap_or(error_text);
            return Err(BotError::provider(format!(
                "{} API error ({}): {}",
                self.provider, status, detail
            )));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| BotError::provider(format!("Malformed completion response: {}", e)))?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| BotError::provider("Completion response had no choices"))?;
        let text = choice
            .message
            .content
            .ok_or_else(|| BotError::provider("Completion had no content"))?;

        let usage = body.usage;
        let metadata = LlmCompletionMetadata {
            total_tokens: usage.as_ref().and_then(|u| u.total_tokens),
            prompt_tokens: usage.as_ref().and_then(|u| u.prompt_tokens),
            completion_tokens: usage.as_ref().and_then(|u| u.completion_tokens),
            model: body.model.or_else(|| Some(config.model.clone())),
            finish_reason: choice.finish_reason,
        };

        debug!(
            provider = %self.provider,
            model = metadata.model.as_deref().unwrap_or(""),
            total_tokens = metadata.total_tokens,
            "chat completion finished"
        );

        Ok(LlmResponse { text, metadata })
    }
}

impl std::fmt::Debug for OpenAIChatDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIChatDriver")
            .field("provider", &self.provider)
            .field("api_url", &self.api_url())
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

// ============================================================================
// Driver Selection
// ============================================================================

/// Build the driver described by `settings`
///
/// Fails with `BotError::Configuration` when the chosen provider is missing
/// its API key, or for Azure its endpoint.
pub fn create_driver(settings: &LlmSettings) -> Result<SharedLlmDriver> {
    let api_key = settings
        .api_key
        .clone()
        .ok_or_else(|| BotError::config("LLM_API_KEY is required"))?;

    let driver = match settings.provider {
        LlmProviderKind::OpenAI => match settings.endpoint.as_deref() {
            Some(base_url) => OpenAIChatDriver::with_base_url(api_key, base_url),
            None => OpenAIChatDriver::new(api_key),
        },
        LlmProviderKind::Azure => {
            let endpoint = settings
                .endpoint
                .as_deref()
                .ok_or_else(|| BotError::config("LLM_ENDPOINT is required for azure"))?;
            let deployment = settings.deploy_name.as_deref().unwrap_or(&settings.name);
            OpenAIChatDriver::azure(api_key, endpoint, deployment, settings.api_version.as_deref())
        }
    };

    debug!(provider = %settings.provider, api_url = driver.api_url(), "LLM driver created");
    Ok(Arc::new(driver))
}
