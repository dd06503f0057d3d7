//! Ordered Provider Fallback
//!
//! Tries each provider in order until one returns a JSON object. Gemini
//! models come first, the OpenRouter fallback last.
//!
//! ## Strategy
//!
//! 1. Skip providers that recently reported the model as unavailable
//! 2. Pause `model_switch_delay` before moving to the next provider
//! 3. Classify each failure: retry the same provider, move on, or stop
//! 4. Remember unavailable models (retired, 404) in a shared cool-down map

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::constants::chain as chain_constants;

use super::{LlmProvider, LlmResponse, SharedProvider};
use crate::types::{ErrorCategory, ErrorClassifier, LensError, LlmError, Result};

/// Provider with its per-provider attempt limit
#[derive(Clone)]
pub struct ChainedProvider {
    pub provider: SharedProvider,
    /// Attempts on this provider before moving on
    pub max_attempts: u8,
}

impl ChainedProvider {
    pub fn new(provider: SharedProvider) -> Self {
        Self {
            provider,
            max_attempts: chain_constants::DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u8) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    fn key(&self) -> String {
        format!("{}:{}", self.provider.name(), self.provider.model())
    }
}

#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Maximum total attempts across all providers
    pub max_total_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f32,
    /// Pause before switching to the next provider
    pub model_switch_delay: Duration,
    /// How long an unavailable model is skipped
    pub unavailable_cooldown: Duration,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            max_total_attempts: chain_constants::MAX_TOTAL_ATTEMPTS,
            base_delay: Duration::from_millis(chain_constants::BASE_DELAY_MS),
            max_delay: Duration::from_secs(chain_constants::MAX_DELAY_SECS),
            backoff_factor: chain_constants::BACKOFF_FACTOR,
            model_switch_delay: Duration::from_millis(chain_constants::MODEL_SWITCH_DELAY_MS),
            unavailable_cooldown: Duration::from_secs(chain_constants::UNAVAILABLE_COOLDOWN_SECS),
        }
    }
}

#[derive(Debug)]
pub struct ChainAttemptResult {
    pub provider: String,
    pub model: String,
    pub success: bool,
    pub error: Option<LlmError>,
    pub duration_ms: u64,
}

#[derive(Debug, Default)]
pub struct ChainStats {
    pub total_attempts: usize,
    pub successful_provider: Option<String>,
    pub attempts: Vec<ChainAttemptResult>,
    pub total_duration_ms: u64,
    pub skipped_unavailable: usize,
}

/// Fallback chain; clones share the unavailable-model map.
#[derive(Clone)]
pub struct ProviderChain {
    providers: Vec<ChainedProvider>,
    config: ChainConfig,
    unavailable: Arc<DashMap<String, Instant>>,
}

impl ProviderChain {
    pub fn new(config: ChainConfig) -> Self {
        Self {
            providers: Vec::new(),
            config,
            unavailable: Arc::new(DashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// `provider:model` labels in try order
    pub fn describe(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.key()).collect()
    }

    fn is_cooling_down(&self, key: &str) -> bool {
        let expired = match self.unavailable.get(key) {
            Some(since) => since.elapsed() >= self.config.unavailable_cooldown,
            None => return false,
        };
        if expired {
            self.unavailable.remove(key);
        }
        !expired
    }

    /// Forget every remembered unavailable model
    pub fn reset_unavailable(&self) {
        self.unavailable.clear();
    }

    #[instrument(skip(self, prompt), fields(providers = self.providers.len()))]
    pub async fn execute(&self, prompt: &str) -> Result<(LlmResponse, ChainStats)> {
        let mut stats = ChainStats::default();
        let start = Instant::now();

        if self.providers.is_empty() {
            return Err(LensError::Config("No providers configured in chain".to_string()));
        }

        let mut last_error: Option<LensError> = None;

        for entry in &self.providers {
            let key = entry.key();
            let provider_name = entry.provider.name().to_string();

            if self.is_cooling_down(&key) {
                debug!(provider = %key, "Skipping unavailable model");
                stats.skipped_unavailable += 1;
                continue;
            }

            if stats.total_attempts > 0 && !self.config.model_switch_delay.is_zero() {
                sleep(self.config.model_switch_delay).await;
            }

            let mut delay = self.config.base_delay;

            for attempt in 1..=entry.max_attempts {
                if stats.total_attempts >= self.config.max_total_attempts {
                    break;
                }
                stats.total_attempts += 1;
                let attempt_start = Instant::now();

                debug!(provider = %key, attempt, total = stats.total_attempts, "Chain attempt");

                match entry.provider.generate(prompt).await {
                    Ok(response) => {
                        stats.attempts.push(ChainAttemptResult {
                            provider: provider_name.clone(),
                            model: entry.provider.model().to_string(),
                            success: true,
                            error: None,
                            duration_ms: attempt_start.elapsed().as_millis() as u64,
                        });
                        stats.successful_provider = Some(key.clone());
                        stats.total_duration_ms = start.elapsed().as_millis() as u64;
                        info!(provider = %key, attempts = stats.total_attempts, "Chain succeeded");
                        return Ok((response, stats));
                    }
                    Err(err) => {
                        let classified = ErrorClassifier::classify_lens_error(&err, &provider_name);
                        stats.attempts.push(ChainAttemptResult {
                            provider: provider_name.clone(),
                            model: entry.provider.model().to_string(),
                            success: false,
                            error: Some(classified.clone()),
                            duration_ms: attempt_start.elapsed().as_millis() as u64,
                        });
                        warn!(
                            provider = %key,
                            attempt,
                            category = %classified.category,
                            error = %err,
                            "Provider failed"
                        );
                        last_error = Some(err);

                        let last_attempt = attempt >= entry.max_attempts;
                        match classified.category {
                            ErrorCategory::Unavailable => {
                                self.unavailable.insert(key.clone(), Instant::now());
                                break;
                            }
                            ErrorCategory::Auth | ErrorCategory::TokenLimit => break,
                            ErrorCategory::BadRequest => {
                                stats.total_duration_ms = start.elapsed().as_millis() as u64;
                                warn!("Bad request, stopping chain");
                                return Err(last_error.unwrap_or_else(|| {
                                    LensError::LlmApi("Bad request".to_string())
                                }));
                            }
                            _ if last_attempt => break,
                            ErrorCategory::RateLimit | ErrorCategory::ParseError => {
                                let wait = classified.recommended_delay().min(self.config.max_delay);
                                debug!(wait_ms = wait.as_millis() as u64, "Retrying same provider");
                                sleep(wait).await;
                            }
                            ErrorCategory::Network
                            | ErrorCategory::Transient
                            | ErrorCategory::Unknown => {
                                let wait = delay + random_jitter(delay);
                                debug!(wait_ms = wait.as_millis() as u64, "Retrying after backoff");
                                sleep(wait).await;
                                delay = calculate_backoff(
                                    delay,
                                    self.config.backoff_factor,
                                    self.config.max_delay,
                                );
                            }
                        }
                    }
                }
            }
        }

        stats.total_duration_ms = start.elapsed().as_millis() as u64;
        Err(last_error.unwrap_or_else(|| {
            LensError::LlmApi("All providers in chain failed or were skipped".to_string())
        }))
    }
}

#[async_trait]
impl LlmProvider for ProviderChain {
    async fn generate(&self, prompt: &str) -> Result<LlmResponse> {
        let (response, _stats) = self.execute(prompt).await?;
        Ok(response)
    }

    fn name(&self) -> &str {
        "provider-chain"
    }

    fn model(&self) -> &str {
        self.providers
            .first()
            .map(|p| p.provider.model())
            .unwrap_or("unknown")
    }

    async fn health_check(&self) -> Result<bool> {
        for entry in &self.providers {
            if entry.provider.health_check().await.unwrap_or(false) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn random_jitter(base_delay: Duration) -> Duration {
    let max_jitter_ms = (base_delay.as_millis() as u64) / 4;
    if max_jitter_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..max_jitter_ms))
}

fn calculate_backoff(current: Duration, factor: f32, max: Duration) -> Duration {
    let next = Duration::from_secs_f32(current.as_secs_f32() * factor);
    std::cmp::min(next, max)
}

pub struct ProviderChainBuilder {
    providers: Vec<ChainedProvider>,
    config: ChainConfig,
}

impl ProviderChainBuilder {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            config: ChainConfig::default(),
        }
    }

    pub fn add_provider(self, provider: impl LlmProvider + 'static) -> Self {
        self.add_shared(Arc::new(provider))
    }

    pub fn add_shared(mut self, provider: SharedProvider) -> Self {
        self.providers.push(ChainedProvider::new(provider));
        self
    }

    pub fn add_with_config(mut self, provider: ChainedProvider) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn with_config(mut self, config: ChainConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> ProviderChain {
        ProviderChain {
            providers: self.providers,
            config: self.config,
            unavailable: Arc::new(DashMap::new()),
        }
    }
}

impl Default for ProviderChainBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    enum Behavior {
        Succeed,
        FailWith(&'static str),
    }

    struct MockProvider {
        model: String,
        behavior: Behavior,
        calls: AtomicU32,
    }

    impl MockProvider {
        fn new(model: &str, behavior: Behavior) -> Self {
            Self {
                model: model.to_string(),
                behavior,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for MockProvider {
        async fn generate(&self, _prompt: &str) -> Result<LlmResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Succeed => Ok(LlmResponse::content_only(
                    serde_json::json!({"model": self.model}),
                )),
                Behavior::FailWith(msg) => Err(LensError::LlmApi(msg.to_string())),
            }
        }

        fn name(&self) -> &str {
            "mock"
        }

        fn model(&self) -> &str {
            &self.model
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(matches!(self.behavior, Behavior::Succeed))
        }
    }

    fn fast_config() -> ChainConfig {
        ChainConfig {
            base_delay: Duration::from_millis(1),
            model_switch_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_first_model_wins() {
        let chain = ProviderChainBuilder::new()
            .with_config(fast_config())
            .add_provider(MockProvider::new("flash", Behavior::Succeed))
            .add_provider(MockProvider::new("pro", Behavior::Succeed))
            .build();

        let (response, stats) = chain.execute("p").await.unwrap();
        assert_eq!(response.content["model"], "flash");
        assert_eq!(stats.total_attempts, 1);
        assert_eq!(stats.successful_provider.as_deref(), Some("mock:flash"));
    }

    #[tokio::test]
    async fn test_falls_through_to_next_model() {
        let chain = ProviderChainBuilder::new()
            .with_config(fast_config())
            .add_provider(MockProvider::new("flash", Behavior::FailWith("503 overloaded")))
            .add_provider(MockProvider::new("pro", Behavior::Succeed))
            .build();

        let response = chain.generate("p").await.unwrap();
        assert_eq!(response.content["model"], "pro");
    }

    #[tokio::test]
    async fn test_unavailable_model_is_skipped_next_time() {
        let retired = Arc::new(MockProvider::new(
            "gemini-old",
            Behavior::FailWith("models/gemini-old is not found"),
        ));
        let chain = ProviderChainBuilder::new()
            .with_config(fast_config())
            .add_shared(retired.clone())
            .add_provider(MockProvider::new("flash", Behavior::Succeed))
            .build();

        chain.generate("p").await.unwrap();
        let (_, stats) = chain.execute("p").await.unwrap();
        assert_eq!(retired.calls.load(Ordering::SeqCst), 1);
        assert_eq!(stats.skipped_unavailable, 1);

        chain.reset_unavailable();
        chain.generate("p").await.unwrap();
        assert_eq!(retired.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_bad_request_stops_chain() {
        let fallback = Arc::new(MockProvider::new("pro", Behavior::Succeed));
        let chain = ProviderChainBuilder::new()
            .with_config(fast_config())
            .add_provider(MockProvider::new("flash", Behavior::FailWith("400 bad request")))
            .add_shared(fallback.clone())
            .build();

        assert!(chain.generate("p").await.is_err());
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_retries_transient_on_same_provider() {
        let flaky = Arc::new(MockProvider::new("flash", Behavior::FailWith("500 internal")));
        let chain = ProviderChainBuilder::new()
            .with_config(fast_config())
            .add_with_config(ChainedProvider::new(flaky.clone()).with_max_attempts(3))
            .build();

        assert!(chain.generate("p").await.is_err());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_empty_chain_is_config_error() {
        let chain = ProviderChain::new(ChainConfig::default());
        assert!(matches!(chain.execute("p").await, Err(LensError::Config(_))));
    }

    #[test]
    fn test_backoff_is_capped() {
        let next = calculate_backoff(Duration::from_secs(20), 2.0, Duration::from_secs(30));
        assert_eq!(next, Duration::from_secs(30));
    }
}
