//! Init Command
//!
//! Initialize careerlens in the current directory.

use crate::cli::util::CAREERLENS_DIR;
use crate::config::{ConfigLoader, StoreBackend};
use crate::storage::SqliteStore;
use crate::types::{LensError, Result};

pub fn run(force: bool) -> Result<()> {
    let root = std::env::current_dir()?;
    let project_dir = root.join(CAREERLENS_DIR);

    if project_dir.exists() && !force {
        return Err(LensError::Config(
            "Already initialized. Use --force to overwrite.".to_string(),
        ));
    }

    ConfigLoader::init_project(&root)?;

    // Global config is optional; never overwrite one here
    if let Err(e) = ConfigLoader::init_global(false) {
        tracing::debug!("Global config init skipped: {}", e);
    }

    let config = ConfigLoader::load()?;
    if config.store.backend == StoreBackend::Sqlite {
        let store = SqliteStore::open(&config.store.sqlite_path)?;
        let stats = store.stats()?;
        tracing::debug!(schema_version = stats.schema_version, "Local store ready");
    }

    println!("✓ Initialized careerlens in {}/", CAREERLENS_DIR);
    println!("  Store: {}", config.store.backend);
    println!();
    println!("Next steps:");
    println!("  1. Run 'careerlens import <fixture.json>' to load attempts and results");
    println!("  2. Run 'careerlens show <attempt-id>' to reconcile a report");

    Ok(())
}
