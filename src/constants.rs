//! Global Constants
//!
//! Tuning values shared across the crate. Scoring constants live next to the
//! code that scores; this module holds the operational ones.

/// Report regeneration limits
pub mod retry {
    /// Automatic regeneration attempts per record before giving up
    pub const MAX_ATTEMPTS: u32 = 3;

    /// Deadline for a single regeneration call (seconds)
    pub const REGENERATION_TIMEOUT_SECS: u64 = 180;

    /// Pause between automatic attempts (milliseconds)
    pub const BACKOFF_MS: u64 = 2_000;
}

/// Provider chain constants
pub mod chain {
    /// Maximum total attempts across all providers in one generation
    pub const MAX_TOTAL_ATTEMPTS: usize = 8;

    /// Retries on the same provider for retryable failures
    pub const DEFAULT_MAX_RETRIES: u8 = 1;

    /// Delay before moving to the next model (milliseconds)
    pub const MODEL_SWITCH_DELAY_MS: u64 = 2_000;

    /// Base delay for same-provider retries (milliseconds)
    pub const BASE_DELAY_MS: u64 = 1_000;

    /// Backoff multiplier for same-provider retries
    pub const BACKOFF_FACTOR: f32 = 2.0;

    /// Maximum delay between retries (seconds)
    pub const MAX_DELAY_SECS: u64 = 30;

    /// How long a model that reported itself unavailable is skipped (seconds)
    pub const UNAVAILABLE_COOLDOWN_SECS: u64 = 600;
}

/// Model generation settings tuned for deterministic scoring
pub mod generation {
    pub const TEMPERATURE: f32 = 0.1;
    pub const TOP_K: u32 = 10;
    pub const TOP_P: f32 = 0.7;
    pub const MAX_OUTPUT_TOKENS: u32 = 16_384;

    /// Gemini models tried in order
    pub const GEMINI_MODELS: [&str; 4] = [
        "gemini-1.5-flash",
        "gemini-1.5-pro",
        "gemini-2.0-flash-exp",
        "gemini-1.5-flash-8b",
    ];

    pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
    pub const OPENROUTER_API_BASE: &str = "https://openrouter.ai/api/v1";
    pub const OPENROUTER_MODEL: &str = "google/gemini-2.0-flash-001";
}

/// Network timeouts
pub mod network {
    /// Default HTTP request timeout (seconds)
    pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

    /// Connection establishment timeout (seconds)
    pub const CONNECTION_TIMEOUT_SECS: u64 = 15;
}

/// Assessment timing limits used in the analysis prompt
pub mod timing {
    /// Aptitude battery time limit (seconds)
    pub const APTITUDE_LIMIT_SECS: u64 = 10 * 60;

    /// Stream knowledge test time limit (seconds)
    pub const KNOWLEDGE_LIMIT_SECS: u64 = 30 * 60;
}
