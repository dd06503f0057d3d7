//! Status Command
//!
//! Display store and provider configuration, plus local store counts.

use serde_json::json;

use crate::ai::build_chain;
use crate::cli::ui::Output;
use crate::cli::util::{CAREERLENS_DIR, is_initialized};
use crate::config::{ConfigLoader, StoreBackend};
use crate::storage::{SqliteStore, StoreStats};
use crate::types::Result;

pub fn run(format: &str) -> Result<()> {
    let json_output = format == "json";

    if !is_initialized() {
        if json_output {
            println!("{{\"status\": \"not_initialized\"}}");
        } else {
            println!("careerlens status");
            println!("══════════════════════════════════════");
            println!("Not initialized. Run 'careerlens init' first.");
        }
        // informational, not a failure
        return Ok(());
    }

    let config = ConfigLoader::load()?;
    let stats = match config.store.backend {
        StoreBackend::Sqlite => Some(local_stats(&config.store.sqlite_path)?),
        StoreBackend::Supabase => None,
    };
    let providers = build_chain(&config.llm)
        .map(|chain| chain.describe())
        .unwrap_or_default();

    if json_output {
        let status = json!({
            "status": "initialized",
            "store": {
                "backend": config.store.backend,
                "stats": stats,
            },
            "providers": providers,
            "retry": config.retry,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let out = Output::new();
    println!("careerlens status");
    println!("══════════════════════════════════════");
    out.field("Store", config.store.backend);
    match config.store.backend {
        StoreBackend::Sqlite => out.field("Database", config.store.sqlite_path.display()),
        StoreBackend::Supabase => out.field(
            "Supabase",
            config.store.supabase_url.as_deref().unwrap_or("(not set)"),
        ),
    }

    if let Some(stats) = &stats {
        out.section("Records");
        out.field("Attempts", stats.attempts);
        out.field("Results", stats.results);
        out.field("No analysis", stats.results_without_analysis);
        out.field("Questions", stats.questions);
        out.field("Schema", format!("v{}", stats.schema_version));
    }

    out.section("Analysis");
    if providers.is_empty() {
        out.warning("No provider available; set GEMINI_API_KEY to enable regeneration");
    } else {
        for (i, provider) in providers.iter().enumerate() {
            println!("  {}. {}", i + 1, provider);
        }
    }
    out.field(
        "Retries",
        format!(
            "{} attempts, {}s deadline",
            config.retry.max_attempts, config.retry.regeneration_timeout_secs
        ),
    );
    out.field("Config", format!("{}/config.toml", CAREERLENS_DIR));

    Ok(())
}

fn local_stats(path: &std::path::Path) -> Result<StoreStats> {
    if !path.exists() {
        return Ok(StoreStats::default());
    }
    SqliteStore::open(path)?.stats()
}
