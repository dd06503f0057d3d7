//! Configuration Types
//!
//! All configuration structures with defaults that reproduce the platform's
//! production behavior (three regeneration attempts, Gemini first).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::ai::ProviderConfig;
use crate::constants::{chain, generation, network, retry};
use crate::types::{LensError, Result};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub version: String,
    pub store: StoreConfig,
    pub llm: LlmConfig,
    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            store: StoreConfig::default(),
            llm: LlmConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Validate configuration values are within acceptable ranges.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(LensError::Config(format!(
                "LLM temperature must be between 0.0 and 2.0, got {}",
                self.llm.temperature
            )));
        }

        if let Some(top_p) = self.llm.top_p
            && !(0.0..=1.0).contains(&top_p)
        {
            return Err(LensError::Config(format!(
                "LLM top_p must be between 0.0 and 1.0, got {}",
                top_p
            )));
        }

        if self.llm.timeout_secs == 0 {
            return Err(LensError::Config(
                "LLM timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.llm.provider == "gemini" && self.llm.models.is_empty() {
            return Err(LensError::Config(
                "llm.models must list at least one Gemini model".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 || self.retry.max_attempts > 10 {
            return Err(LensError::Config(format!(
                "retry.max_attempts must be between 1 and 10, got {}",
                self.retry.max_attempts
            )));
        }

        if self.retry.regeneration_timeout_secs == 0 {
            return Err(LensError::Config(
                "retry.regeneration_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.store.backend == StoreBackend::Supabase && self.store.supabase_url.is_none() {
            return Err(LensError::Config(
                "store.supabase_url is required for the supabase backend".to_string(),
            ));
        }

        Ok(())
    }
}

// =============================================================================
// Store Configuration
// =============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Supabase,
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreBackend::Sqlite => write!(f, "sqlite"),
            StoreBackend::Supabase => write!(f, "supabase"),
        }
    }
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(StoreBackend::Sqlite),
            "supabase" => Ok(StoreBackend::Supabase),
            _ => Err(format!(
                "Unknown store backend: {}. Valid values: sqlite, supabase",
                s
            )),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// SQLite database file, relative to the working directory
    pub sqlite_path: PathBuf,

    /// Supabase project URL (`https://<ref>.supabase.co`)
    pub supabase_url: Option<String>,

    /// Service key; falls back to `SUPABASE_SERVICE_KEY`. Never written back out.
    #[serde(skip_serializing)]
    pub supabase_key: Option<String>,
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("backend", &self.backend)
            .field("sqlite_path", &self.sqlite_path)
            .field("supabase_url", &self.supabase_url)
            .field("supabase_key", &self.supabase_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            sqlite_path: PathBuf::from(".careerlens/careerlens.db"),
            supabase_url: None,
            supabase_key: None,
        }
    }
}

// =============================================================================
// LLM Configuration
// =============================================================================

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// "gemini", "openrouter", or "openai"
    pub provider: String,

    /// Gemini models tried in order
    pub models: Vec<String>,

    /// Model for non-Gemini primary providers
    pub model: Option<String>,

    pub timeout_secs: u64,
    pub temperature: f32,
    pub top_k: Option<u32>,
    pub top_p: Option<f32>,
    pub max_tokens: u32,

    /// Pause before moving to the next model
    pub model_switch_delay_ms: u64,

    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub api_base: Option<String>,

    /// Provider tried after every primary model failed
    pub fallback_provider: Option<String>,
    pub fallback_model: Option<String>,
    #[serde(skip_serializing)]
    pub fallback_api_key: Option<String>,
    pub fallback_api_base: Option<String>,
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("provider", &self.provider)
            .field("models", &self.models)
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .field("temperature", &self.temperature)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("fallback_provider", &self.fallback_provider)
            .field("fallback_model", &self.fallback_model)
            .field(
                "fallback_api_key",
                &self.fallback_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            models: generation::GEMINI_MODELS.iter().map(|m| m.to_string()).collect(),
            model: None,
            timeout_secs: network::DEFAULT_TIMEOUT_SECS,
            temperature: generation::TEMPERATURE,
            top_k: Some(generation::TOP_K),
            top_p: Some(generation::TOP_P),
            max_tokens: generation::MAX_OUTPUT_TOKENS,
            model_switch_delay_ms: chain::MODEL_SWITCH_DELAY_MS,
            api_key: None,
            api_base: None,
            fallback_provider: Some("openrouter".to_string()),
            fallback_model: Some(generation::OPENROUTER_MODEL.to_string()),
            fallback_api_key: None,
            fallback_api_base: None,
        }
    }
}

impl LlmConfig {
    /// Settings shared by every primary provider instance
    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig {
            provider: self.provider.clone(),
            model: self.model.clone(),
            timeout_secs: self.timeout_secs,
            temperature: self.temperature,
            top_k: self.top_k,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
            api_key: self.api_key.clone(),
            api_base: self.api_base.clone(),
        }
    }

    /// Fallback provider settings, when one is configured
    pub fn fallback_config(&self) -> Option<ProviderConfig> {
        let provider = self.fallback_provider.clone()?;
        Some(ProviderConfig {
            provider,
            model: self.fallback_model.clone(),
            api_key: self.fallback_api_key.clone(),
            api_base: self.fallback_api_base.clone(),
            ..self.provider_config()
        })
    }

    pub fn model_switch_delay(&self) -> Duration {
        Duration::from_millis(self.model_switch_delay_ms)
    }
}

// =============================================================================
// Retry Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Automatic regeneration attempts per record
    pub max_attempts: u32,

    /// Deadline for one regeneration call
    pub regeneration_timeout_secs: u64,

    /// Pause between automatic attempts
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: retry::MAX_ATTEMPTS,
            regeneration_timeout_secs: retry::REGENERATION_TIMEOUT_SECS,
            backoff_ms: retry::BACKOFF_MS,
        }
    }
}

impl RetryConfig {
    pub fn regeneration_timeout(&self) -> Duration {
        Duration::from_secs(self.regeneration_timeout_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

// =============================================================================
// Tests
// =============================================================================
