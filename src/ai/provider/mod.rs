//! LLM Provider Abstraction
//!
//! `LlmProvider` generates one analysis blob from one prompt. Concrete
//! providers:
//!
//! - `gemini`: Google Generative Language API, one provider per model
//! - `openai`: OpenAI-compatible chat completions (used for OpenRouter)
//! - `chain`: ordered fallback across providers

mod chain;
mod gemini;
mod openai;

pub use chain::{ChainConfig, ChainStats, ChainedProvider, ProviderChain, ProviderChainBuilder};
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::config::LlmConfig;
use crate::constants::generation;
use crate::types::{LensError, Result};

// =============================================================================
// LLM Response
// =============================================================================

#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// Parsed JSON content
    pub content: Value,
    /// Whether the JSON needed repair before parsing
    pub repaired: bool,
    pub usage: TokenUsage,
    pub elapsed_ms: u64,
    pub metadata: ResponseMetadata,
}

impl LlmResponse {
    pub fn content_only(content: Value) -> Self {
        Self {
            content,
            repaired: false,
            usage: TokenUsage::default(),
            elapsed_ms: 0,
            metadata: ResponseMetadata::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResponseMetadata {
    pub model: String,
    pub provider: String,
}

pub type SharedProvider = Arc<dyn LlmProvider + Send + Sync>;

// =============================================================================
// Provider Configuration
// =============================================================================

/// Settings for one provider instance.
///
/// API keys are never serialized and are redacted from debug output.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// "gemini", "openrouter", or "openai"
    pub provider: String,
    pub model: Option<String>,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub top_k: Option<u32>,
    pub top_p: Option<f32>,
    pub max_tokens: u32,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .field("temperature", &self.temperature)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_base", &self.api_base)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            model: None,
            timeout_secs: crate::constants::network::DEFAULT_TIMEOUT_SECS,
            temperature: generation::TEMPERATURE,
            top_k: Some(generation::TOP_K),
            top_p: Some(generation::TOP_P),
            max_tokens: generation::MAX_OUTPUT_TOKENS,
            api_key: None,
            api_base: None,
        }
    }
}

impl ProviderConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

// =============================================================================
// LLM Provider Trait
// =============================================================================

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a JSON object for `prompt`.
    async fn generate(&self, prompt: &str) -> Result<LlmResponse>;

    /// Provider name for logging
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    async fn health_check(&self) -> Result<bool>;
}

/// Create a shared provider from configuration
pub fn create_provider(config: &ProviderConfig) -> Result<SharedProvider> {
    match config.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiProvider::new(config.clone())?)),
        "openrouter" => Ok(Arc::new(OpenAiProvider::openrouter(config.clone())?)),
        "openai" => Ok(Arc::new(OpenAiProvider::new(config.clone())?)),
        other => Err(LensError::Config(format!(
            "Unknown provider: {}. Supported: gemini, openrouter, openai",
            other
        ))),
    }
}

/// Build the fallback chain described by the `[llm]` config section:
/// every configured Gemini model in order, then the OpenRouter fallback if a
/// key is available.
pub fn build_chain(llm: &LlmConfig) -> Result<ProviderChain> {
    let base = llm.provider_config();
    let mut builder = ProviderChainBuilder::new().with_config(ChainConfig {
        model_switch_delay: llm.model_switch_delay(),
        ..ChainConfig::default()
    });

    match llm.provider.as_str() {
        "gemini" => {
            for model in &llm.models {
                builder = builder.add_shared(create_provider(&base.clone().with_model(model))?);
            }
        }
        _ => builder = builder.add_shared(create_provider(&base)?),
    }

    if let Some(fallback) = llm.fallback_config() {
        match create_provider(&fallback) {
            Ok(provider) => builder = builder.add_shared(provider),
            Err(e) => tracing::debug!("Fallback provider disabled: {}", e),
        }
    }

    let chain = builder.build();
    if chain.is_empty() {
        return Err(LensError::Config(
            "No LLM providers configured (llm.models is empty)".to_string(),
        ));
    }
    Ok(chain)
}
