//! AI Integration Layer
//!
//! Provider clients, the regeneration prompt, deadlines, and response repair.

pub mod prompt;
pub mod provider;
pub mod timeout;
pub mod validation;

pub use prompt::{AssessmentData, PromptBuilder, analysis_prompt};
pub use provider::{
    ChainConfig, ChainedProvider, GeminiProvider, LlmProvider, LlmResponse, OpenAiProvider,
    ProviderChain, ProviderChainBuilder, ProviderConfig, SharedProvider, TokenUsage, build_chain,
    create_provider,
};
pub use timeout::with_timeout;
pub use validation::{AnalysisValidator, JsonRepairer};
