//! Import Command
//!
//! Load attempts, result rows, and question metadata into the local store.

use std::path::Path;

use crate::cli::ui::Output;
use crate::cli::util::open_local_store;
use crate::config::ConfigLoader;
use crate::storage::Fixture;
use crate::types::{Result, ResultExt};

pub fn run(file: &Path) -> Result<()> {
    let out = Output::new();
    let config = ConfigLoader::load()?;
    let store = open_local_store(&config)?;

    let content = std::fs::read_to_string(file)
        .with_context_fn(|| format!("Failed to read {}", file.display()))?;
    let fixture: Fixture = serde_json::from_str(&content)?;

    let summary = store.import(&fixture)?;
    out.success(&format!("Imported {}", file.display()));
    out.field("Attempts", summary.attempts);
    out.field("Results", summary.results);
    out.field("Questions", summary.questions);
    if summary.skipped > 0 {
        out.warning(&format!(
            "{} result rows skipped (no attempt_id)",
            summary.skipped
        ));
    }
    Ok(())
}
