//! CLI Common Utilities
//!
//! Shared initialization and context management for CLI commands.

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::ai::build_chain;
use crate::analysis::{
    AnalysisService, LlmAnalysisService, RegenerationRequest, SharedAnalysisService,
};
use crate::config::{Config, ConfigLoader, StoreBackend};
use crate::reconcile::RetryOrchestrator;
use crate::storage::{SharedStore, SqliteStore, open_store};
use crate::types::{LensError, Result};

/// Project directory name
pub const CAREERLENS_DIR: &str = ".careerlens";

/// Command execution context
///
/// Holds the merged configuration and the opened store. Created via
/// `CommandContext::load()`.
#[derive(Clone)]
pub struct CommandContext {
    pub config: Config,
    pub store: SharedStore,
}

impl CommandContext {
    /// Load config and open the configured store.
    ///
    /// The local backend requires `careerlens init` to have run.
    pub fn load() -> Result<Self> {
        let config = ConfigLoader::load()?;
        if config.store.backend == StoreBackend::Sqlite {
            require_initialized()?;
        }
        let store = open_store(&config.store)?;
        Ok(Self { config, store })
    }

    /// Orchestrator wired to the configured provider chain.
    ///
    /// Without a usable provider the orchestrator still loads valid results;
    /// only a regeneration reports the configuration error.
    pub fn orchestrator(&self) -> RetryOrchestrator {
        let analysis: SharedAnalysisService = match build_chain(&self.config.llm) {
            Ok(chain) => Arc::new(LlmAnalysisService::new(Arc::new(chain))),
            Err(e) => {
                debug!("Analysis regeneration unavailable: {}", e);
                Arc::new(Unconfigured(e.to_string()))
            }
        };
        RetryOrchestrator::new(
            Arc::clone(&self.store),
            analysis,
            self.config.retry.clone(),
        )
    }
}

struct Unconfigured(String);

#[async_trait]
impl AnalysisService for Unconfigured {
    async fn regenerate(&self, _request: &RegenerationRequest) -> Result<Value> {
        Err(LensError::Config(self.0.clone()))
    }
}

/// Require careerlens to be initialized
///
/// Returns the project directory, or `LensError::NotInitialized`.
pub fn require_initialized() -> Result<PathBuf> {
    let dir = Path::new(CAREERLENS_DIR);
    if !dir.exists() {
        return Err(LensError::NotInitialized);
    }
    Ok(dir.to_path_buf())
}

pub fn is_initialized() -> bool {
    Path::new(CAREERLENS_DIR).exists()
}

/// Open the local SQLite store named by the config, for commands that only
/// make sense against it.
pub fn open_local_store(config: &Config) -> Result<SqliteStore> {
    if config.store.backend != StoreBackend::Sqlite {
        return Err(LensError::Config(format!(
            "This command needs the sqlite backend (configured: {})",
            config.store.backend
        )));
    }
    require_initialized()?;
    SqliteStore::open(&config.store.sqlite_path)
}

// Tests for the cwd-dependent helpers are left out: changing the current
// directory races with other tests running in parallel.
