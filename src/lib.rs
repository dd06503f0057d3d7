//! careerlens - Career Assessment Report Reconciliation
//!
//! Turns stored assessment results, written by several generations of the
//! platform in different shapes, into one canonical report. Scores that
//! disagree with the student's answers are recomputed, derived fields are
//! filled in, and a missing AI analysis is regenerated under a bounded retry
//! policy.
//!
//! ## Quick Start
//!
//! ```ignore
//! use careerlens::{ConfigLoader, RetryOrchestrator, LlmAnalysisService};
//! use careerlens::ai::build_chain;
//! use careerlens::storage::open_store;
//!
//! let config = ConfigLoader::load()?;
//! let store = open_store(&config.store)?;
//! let analysis = Arc::new(LlmAnalysisService::new(Arc::new(build_chain(&config.llm)?)));
//! let orchestrator = RetryOrchestrator::new(store, analysis, config.retry);
//!
//! let outcome = orchestrator.load(&AttemptId::new("attempt-id")).await?;
//! println!("{:?}", outcome.trace);
//! ```
//!
//! ## Modules
//!
//! - [`reconcile`]: transformer, score validators, normalizer, retry orchestrator
//! - [`storage`]: assessment store trait with SQLite and Supabase backends
//! - [`analysis`]: regeneration service built on the scoring prompt
//! - [`ai`]: LLM providers, fallback chain, response repair
//! - [`config`]: layered configuration

pub mod ai;
pub mod analysis;
pub mod cli;
pub mod config;
pub mod constants;
pub mod reconcile;
pub mod storage;
pub mod types;

// =============================================================================
// Core Re-exports
// =============================================================================

pub use config::{Config, ConfigLoader, RetryConfig, StoreBackend, StoreConfig};

pub use types::error::{ErrorCategory, LensError, Result, ResultExt};
pub use types::{
    Answers, Attempt, AttemptId, CanonicalResult, QuestionBank, ResultId, ResultRow, StudentId,
    ValidationReport, ValidationWarning,
};

// =============================================================================
// Pipeline Re-exports
// =============================================================================

pub use reconcile::{
    LoadOutcome, LoadState, Reconciled, RetryOrchestrator, normalize, reconcile, transform,
    validate_scores, validate_transformed,
};

pub use analysis::{AnalysisService, LlmAnalysisService, RegenerationRequest};
pub use storage::{AssessmentStore, SharedStore, SqliteStore, SupabaseStore};

// =============================================================================
// AI Re-exports
// =============================================================================

pub use ai::{
    LlmProvider, LlmResponse, ProviderChain, ProviderChainBuilder, with_timeout,
};
