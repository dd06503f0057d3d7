//! Config Command
//!
//! Usage:
//!   careerlens config show [-g] [-f json]
//!   careerlens config path
//!   careerlens config init [-g] [--force]

use crate::config::ConfigLoader;
use crate::types::Result;

/// Show configuration
pub fn show(global: bool, format: &str) -> Result<()> {
    if global {
        match ConfigLoader::global_config_path() {
            Some(path) if path.exists() => {
                println!("# Global Config: {}\n", path.display());
                println!("{}", std::fs::read_to_string(&path)?);
            }
            Some(_) => {
                println!("No global config found.");
                println!("Run 'careerlens config init --global' to create one.");
            }
            None => println!("Cannot determine global config directory."),
        }
        return Ok(());
    }

    // Effective config after every layer is merged
    let config = ConfigLoader::load()?;
    println!("{}", ConfigLoader::render(&config, format == "json")?);
    Ok(())
}

/// Show configuration paths
pub fn path() -> Result<()> {
    let global = ConfigLoader::global_config_path();
    let project = ConfigLoader::project_config_path();

    println!("Configuration paths (in priority order, lowest first):");
    match global {
        Some(path) => println!(
            "  global:  {} {}",
            path.display(),
            if path.exists() { "" } else { "(missing)" }
        ),
        None => println!("  global:  (unavailable)"),
    }
    println!(
        "  project: {} {}",
        project.display(),
        if project.exists() { "" } else { "(missing)" }
    );
    println!("  env:     CAREERLENS_* (e.g. CAREERLENS_LLM_PROVIDER)");
    Ok(())
}

/// Initialize global configuration
pub fn init_global(force: bool) -> Result<()> {
    let dir = ConfigLoader::init_global(force)?;
    println!("✓ Initialized global configuration");
    println!("  Directory: {}", dir.display());
    if let Some(config_path) = ConfigLoader::global_config_path() {
        println!("  Config:    {}", config_path.display());
    }
    Ok(())
}

/// Initialize project configuration
pub fn init_project() -> Result<()> {
    let root = std::env::current_dir()?;
    let dir = ConfigLoader::init_project(&root)?;
    println!("✓ Initialized project configuration");
    println!("  Directory: {}", dir.display());
    println!(
        "  Config:    {}",
        ConfigLoader::project_config_path().display()
    );
    Ok(())
}
