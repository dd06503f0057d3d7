//! Error types.
//!
//! `LensError` is the crate-wide error. `LlmError` carries a provider
//! failure classified into an `ErrorCategory`, which the fallback chain uses
//! to choose between waiting and retrying, moving to the next model, or
//! giving up.

use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Error Categories
// =============================================================================

/// How a provider failure should be handled by the fallback chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Wait, then retry the same provider
    RateLimit,
    /// Prompt does not fit this model; try the next one
    TokenLimit,
    /// Bad or missing key; stop
    Auth,
    Network,
    /// Model retired, overloaded, or not offered; try the next one
    Unavailable,
    BadRequest,
    /// Model output could not be parsed as analysis JSON
    ParseError,
    /// Server-side hiccup
    Transient,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimit => "RATE_LIMIT",
            Self::TokenLimit => "TOKEN_LIMIT",
            Self::Auth => "AUTH",
            Self::Network => "NETWORK",
            Self::Unavailable => "UNAVAILABLE",
            Self::BadRequest => "BAD_REQUEST",
            Self::ParseError => "PARSE_ERROR",
            Self::Transient => "TRANSIENT",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Retry on the same provider
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::Network | Self::Transient | Self::ParseError
        )
    }

    /// Move on to the next provider
    pub fn should_fallback(&self) -> bool {
        matches!(self, Self::TokenLimit | Self::Unavailable)
    }

    /// Wait before the next try when the provider gave no hint
    pub fn recommended_delay(&self) -> Duration {
        match self {
            Self::RateLimit => Duration::from_secs(30),
            Self::Network => Duration::from_secs(5),
            Self::Transient => Duration::from_secs(2),
            Self::ParseError => Duration::from_secs(1),
            _ => Duration::from_millis(500),
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// LLM Error
// =============================================================================

/// A classified provider failure
#[derive(Debug, Clone)]
pub struct LlmError {
    pub category: ErrorCategory,
    pub message: String,
    pub provider: Option<String>,
    /// Wait requested by the provider (`Retry-After`)
    pub retry_after: Option<Duration>,
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.provider {
            Some(provider) => write!(f, "[{}:{}] {}", provider, self.category, self.message),
            None => write!(f, "[{}] {}", self.category, self.message),
        }
    }
}

impl std::error::Error for LlmError {}

impl LlmError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            provider: None,
            retry_after: None,
        }
    }

    pub fn provider(mut self, name: impl Into<String>) -> Self {
        self.provider = Some(name.into());
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.category.is_retryable()
    }

    pub fn should_fallback(&self) -> bool {
        self.category.should_fallback()
    }

    /// The provider's own hint wins over the category default.
    pub fn recommended_delay(&self) -> Duration {
        self.retry_after
            .unwrap_or_else(|| self.category.recommended_delay())
    }
}

// =============================================================================
// Error Classifier
// =============================================================================

/// Message fragments per category, checked in order against the lowercased
/// error text. Gemini reports retired models as 404 "is not found".
const MESSAGE_RULES: &[(ErrorCategory, &[&str])] = &[
    (
        ErrorCategory::RateLimit,
        &["rate limit", "429", "too many requests", "quota exceeded", "resource_exhausted"],
    ),
    (
        ErrorCategory::TokenLimit,
        &["context length", "too large", "token limit", "tokens exceed", "maximum number of tokens"],
    ),
    (
        ErrorCategory::Auth,
        &["401", "403", "api key", "unauthorized", "permission denied"],
    ),
    (
        ErrorCategory::Network,
        &["network", "connection", "dns", "timed out", "timeout"],
    ),
    (
        ErrorCategory::Unavailable,
        &["503", "502", "service unavailable", "not found", "not supported", "overloaded"],
    ),
    (ErrorCategory::BadRequest, &["400", "bad request", "malformed"]),
    (
        ErrorCategory::ParseError,
        &["parse", "json", "unexpected token", "empty response"],
    ),
    (ErrorCategory::Transient, &["500", "internal", "temporar"]),
];

/// Maps raw provider failures onto `ErrorCategory`
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify free-form error text
    pub fn classify(message: &str, provider: &str) -> LlmError {
        let lower = message.to_lowercase();
        let category = MESSAGE_RULES
            .iter()
            .find(|(_, needles)| needles.iter().any(|n| lower.contains(n)))
            .map_or(ErrorCategory::Unknown, |(category, _)| *category);
        LlmError::new(category, message).provider(provider)
    }

    /// Classify a non-success HTTP response
    pub fn classify_http_status(
        status: u16,
        message: &str,
        provider: &str,
        retry_after: Option<Duration>,
    ) -> LlmError {
        let category = match status {
            429 => ErrorCategory::RateLimit,
            401 | 403 => ErrorCategory::Auth,
            400 => ErrorCategory::BadRequest,
            404 => ErrorCategory::Unavailable,
            413 => ErrorCategory::TokenLimit,
            500 | 502 | 503 | 504 => ErrorCategory::Transient,
            _ => ErrorCategory::Unknown,
        };
        let mut err = LlmError::new(category, message).provider(provider);
        err.retry_after = retry_after;
        err
    }

    /// `Retry-After` in seconds, when present
    pub fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
        headers
            .get(reqwest::header::RETRY_AFTER)?
            .to_str()
            .ok()?
            .trim()
            .parse::<u64>()
            .ok()
            .map(Duration::from_secs)
    }

    /// Classify a `LensError` raised while talking to a provider
    pub fn classify_lens_error(err: &LensError, provider: &str) -> LlmError {
        let category = match err {
            LensError::Llm(llm) => {
                let mut classified = llm.clone();
                if classified.provider.is_none() {
                    classified.provider = Some(provider.to_string());
                }
                return classified;
            }
            LensError::LlmApi(msg) => return Self::classify(msg, provider),
            LensError::Http(e) if e.is_timeout() || e.is_connect() => ErrorCategory::Network,
            LensError::Timeout { .. } => ErrorCategory::Network,
            LensError::Json(_) => ErrorCategory::ParseError,
            LensError::Config(_) => ErrorCategory::BadRequest,
            _ => return Self::classify(&err.to_string(), provider),
        };
        LlmError::new(category, err.to_string()).provider(provider)
    }
}

// =============================================================================
// Application Error
// =============================================================================

#[derive(Debug, Error)]
pub enum LensError {
    // -------------------------------------------------------------------------
    // System Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // -------------------------------------------------------------------------
    // LLM Errors
    // -------------------------------------------------------------------------
    #[error("LLM error: {0}")]
    Llm(LlmError),

    #[error("LLM API error: {0}")]
    LlmApi(String),

    #[error("Timeout after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    // -------------------------------------------------------------------------
    // Reconciliation Errors
    // -------------------------------------------------------------------------
    /// Regeneration produced nothing usable
    #[error("AI analysis returned no results")]
    EmptyAnalysis,

    /// Regenerated analysis still fails the core score check
    #[error("Invalid analysis: {0}")]
    InvalidAnalysis(String),

    /// The attempt has no recorded answers, so nothing can be regenerated
    #[error("No assessment data found. Please retake the assessment.")]
    MissingAnswers { attempt_id: String },

    #[error("Report regeneration already running for attempt {attempt_id}")]
    RetryInProgress { attempt_id: String },

    #[error("Failed to regenerate report after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },

    #[error("Result {result_id} was modified concurrently (expected version {expected})")]
    VersionConflict { result_id: String, expected: i64 },

    // -------------------------------------------------------------------------
    // Domain Errors
    // -------------------------------------------------------------------------
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Not initialized: run 'careerlens init' first")]
    NotInitialized,

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<LlmError> for LensError {
    fn from(err: LlmError) -> Self {
        LensError::Llm(err)
    }
}

pub type Result<T> = std::result::Result<T, LensError>;

impl LensError {
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn llm(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self::Llm(LlmError::new(category, message))
    }

    /// Whether another regeneration attempt could plausibly succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Llm(e) => e.is_retryable() || e.should_fallback(),
            Self::LlmApi(_)
            | Self::Timeout { .. }
            | Self::EmptyAnalysis
            | Self::InvalidAnalysis(_)
            | Self::Http(_)
            | Self::VersionConflict { .. } => true,
            _ => false,
        }
    }

    /// Message shown to the student when a load cycle ends in this error
    pub fn user_message(&self) -> String {
        match self {
            Self::MissingAnswers { .. } => self.to_string(),
            Self::EmptyAnalysis => self.to_string(),
            Self::RetryInProgress { .. } => {
                "Your report is being regenerated. Please wait.".to_string()
            }
            _ => "Failed to regenerate report. Please try again.".to_string(),
        }
    }
}

/// Context extension trait for adding context to errors
pub trait ResultExt<T> {
    fn with_context<C: Into<String>>(self, context: C) -> Result<T>;

    fn with_context_fn<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    fn with_context<C: Into<String>>(self, context: C) -> Result<T> {
        self.map_err(|e| LensError::Storage(format!("{}: {}", context.into(), e)))
    }

    fn with_context_fn<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|e| LensError::Storage(format!("{}: {}", f().into(), e)))
    }
}

// =============================================================================
// Tests
// =============================================================================
