use super::{GenerationService, LlmError};
use crate::http::{HttpSettings, build_client};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_MODEL: &str = "tngtech/deepseek-r1t2-chimera:free";

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("OPENROUTER_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.into()),
            api_key: std::env::var("OPENROUTER_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
            model: std::env::var("OPENROUTER_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LlmMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct LlmUsage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

/// OpenAI-compatible chat completions client pointed at OpenRouter.
pub struct OpenRouterClient {
    http: Client,
    config: LlmConfig,
}

impl OpenRouterClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            http: build_client(&HttpSettings::from_env()),
            config,
        }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub async fn chat(&self, messages: &[LlmMessage]) -> Result<String, LlmError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(LlmError::MissingApiKey)?;
        let base = self.config.base_url.trim().trim_end_matches('/');

        let body = ChatRequest {
            model: self.config.model.clone(),
            messages: messages.to_vec(),
        };

        let response = self
            .http
            .post(format!("{base}/chat/completions"))
            .bearer_auth(api_key)
            .header("X-Title", "listing-gate")
            .json(&body)
            .send()
            .await
            .map_err(|err| LlmError::Http(err.to_string()))?;

        if !response.status().is_success() {
            return Err(LlmError::Http(format!("HTTP {}", response.status())));
        }

        let payload: ChatResponse = response
            .json()
            .await
            .map_err(|err| LlmError::InvalidResponse(err.to_string()))?;
        if let Some(usage) = &payload.usage {
            debug!(
                target = "listing_gate.llm",
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "llm_usage",
            );
        }
        extract_text(payload)
    }
}

#[async_trait]
impl GenerationService for OpenRouterClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        self.chat(&[LlmMessage {
            role: "user".into(),
            content: prompt.to_string(),
        }])
        .await
    }
}

fn extract_text(payload: ChatResponse) -> Result<String, LlmError> {
    if let Some(err) = payload.error {
        return Err(LlmError::InvalidResponse(err.message));
    }
    payload
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| LlmError::InvalidResponse("missing text".into()))
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<LlmMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<LlmUsage>,
    #[serde(default)]
    error: Option<ProviderError>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderError {
    message: String,
}
