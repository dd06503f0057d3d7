//! OpenAI-compatible Chat Completions Provider
//!
//! Used for the OpenRouter fallback once every Gemini model has failed.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{LlmProvider, LlmResponse, ProviderConfig, ResponseMetadata, TokenUsage};
use crate::ai::validation::extract_json_with_repair_status;
use crate::constants::{generation, network};
use crate::types::{ErrorCategory, ErrorClassifier, LensError, LlmError, Result};

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const OPENAI_MODEL: &str = "gpt-4o-mini";

const SYSTEM_PROMPT: &str = "You are a career assessment analyst. Respond ONLY with one valid JSON object, no explanation.";

pub struct OpenAiProvider {
    api_key: SecretString,
    api_base: String,
    model: String,
    /// Name reported to the chain: "openai" or "openrouter"
    label: &'static str,
    temperature: f32,
    max_tokens: u32,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("api_key", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("label", &self.label)
            .finish()
    }
}

impl OpenAiProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        Self::build(config, "openai", "OPENAI_API_KEY", OPENAI_API_BASE, OPENAI_MODEL)
    }

    /// OpenRouter speaks the same protocol under a different base URL.
    pub fn openrouter(config: ProviderConfig) -> Result<Self> {
        Self::build(
            config,
            "openrouter",
            "OPENROUTER_API_KEY",
            generation::OPENROUTER_API_BASE,
            generation::OPENROUTER_MODEL,
        )
    }

    fn build(
        config: ProviderConfig,
        label: &'static str,
        key_env: &str,
        default_base: &str,
        default_model: &str,
    ) -> Result<Self> {
        let api_key = config
            .api_key
            .or_else(|| std::env::var(key_env).ok())
            .ok_or_else(|| {
                LensError::Config(format!("{} API key not found. Set {}", label, key_env))
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(network::CONNECTION_TIMEOUT_SECS))
            .build()
            .map_err(|e| LensError::LlmApi(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_key: SecretString::from(api_key),
            api_base: config.api_base.unwrap_or_else(|| default_base.to_string()),
            model: config.model.unwrap_or_else(|| default_model.to_string()),
            label,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client,
        })
    }

    fn build_request(&self, prompt: &str) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            temperature: self.temperature,
            max_tokens: Some(self.max_tokens),
            response_format: Some(ResponseFormat {
                format_type: "json_object".to_string(),
            }),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn generate(&self, prompt: &str) -> Result<LlmResponse> {
        info!(provider = self.label, model = %self.model, "Generating with chat completions");

        let start = Instant::now();
        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base.trim_end_matches('/')))
            .bearer_auth(self.api_key.expose_secret())
            .json(&self.build_request(prompt))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = ErrorClassifier::retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            let message = format!("{} API error ({}): {}", self.label, status, body);
            return Err(ErrorClassifier::classify_http_status(status.as_u16(), &message, self.label, retry_after).into());
        }

        let body: ChatCompletionResponse = response.json().await.map_err(|e| {
            LensError::LlmApi(format!("Failed to parse {} response: {}", self.label, e))
        })?;

        let text = body
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                LlmError::new(
                    ErrorCategory::ParseError,
                    format!("{} returned an empty response", self.label),
                )
                .provider(self.label)
            })?;

        debug!(chars = text.len(), "Received chat completion");
        let (content, repaired) = extract_json_with_repair_status(text)?;

        let usage = body
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(LlmResponse {
            content,
            repaired,
            usage,
            elapsed_ms: start.elapsed().as_millis() as u64,
            metadata: ResponseMetadata {
                model: self.model.clone(),
                provider: self.label.to_string(),
            },
        })
    }

    fn name(&self) -> &str {
        self.label
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn health_check(&self) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/models", self.api_base.trim_end_matches('/')))
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => Ok(true),
            Ok(resp) => {
                warn!("{} health check failed: {}", self.label, resp.status());
                Ok(false)
            }
            Err(e) => {
                warn!("{} health check failed: {}", self.label, e);
                Ok(false)
            }
        }
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageInfo {
    prompt_tokens: u32,
    completion_tokens: u32,
}
