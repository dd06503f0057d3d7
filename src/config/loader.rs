//! Configuration Loader (Figment-based)
//!
//! Loads and merges configuration from multiple sources using Figment:
//! 1. Built-in defaults (Serialized)
//! 2. Global config (~/.config/careerlens/config.toml)
//! 3. Project config (.careerlens/config.toml)
//! 4. Environment variables (CAREERLENS_* prefix)

use directories::BaseDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::types::Config;
use crate::types::{LensError, Result};

const ENV_PREFIX: &str = "CAREERLENS_";

pub struct ConfigLoader;

impl ConfigLoader {
    /// defaults → global → project → env vars
    pub fn load() -> Result<Config> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if let Some(global_path) = Self::global_config_path()
            && global_path.exists()
        {
            debug!("Loading global config from: {}", global_path.display());
            figment = figment.merge(Toml::file(&global_path));
        }

        let project_path = Self::project_config_path();
        if project_path.exists() {
            debug!("Loading project config from: {}", project_path.display());
            figment = figment.merge(Toml::file(&project_path));
        }

        // CAREERLENS_LLM_PROVIDER -> llm.provider
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split('_').lowercase(true));

        let config: Config = figment
            .extract()
            .map_err(|e| LensError::Config(format!("Configuration error: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file only
    pub fn load_from_file(path: &Path) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| LensError::Config(format!("Configuration error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    // =========================================================================
    // Path Management
    // =========================================================================

    /// ~/.config/careerlens/ (platform config dir)
    pub fn global_dir() -> Option<PathBuf> {
        BaseDirs::new().map(|dirs| dirs.config_dir().join("careerlens"))
    }

    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_dir().map(|dir| dir.join("config.toml"))
    }

    pub fn project_dir() -> PathBuf {
        PathBuf::from(".careerlens")
    }

    pub fn project_config_path() -> PathBuf {
        Self::project_dir().join("config.toml")
    }

    // =========================================================================
    // Config Commands
    // =========================================================================

    /// Effective configuration rendered as TOML or JSON
    pub fn render(config: &Config, as_json: bool) -> Result<String> {
        if as_json {
            Ok(serde_json::to_string_pretty(config)?)
        } else {
            toml::to_string_pretty(config).map_err(|e| LensError::Config(e.to_string()))
        }
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    pub fn init_global(force: bool) -> Result<PathBuf> {
        let global_dir = Self::global_dir().ok_or_else(|| {
            LensError::Config("Cannot determine global config directory".to_string())
        })?;
        fs::create_dir_all(&global_dir)?;

        let config_path = global_dir.join("config.toml");
        if !config_path.exists() || force {
            fs::write(&config_path, Self::default_global_config())?;
            info!("Created global config: {}", config_path.display());
        } else {
            info!("Global config exists: {}", config_path.display());
        }

        Ok(global_dir)
    }

    /// Create `<root>/.careerlens/` with a default project config.
    pub fn init_project(root: &Path) -> Result<PathBuf> {
        let project_dir = root.join(Self::project_dir());
        fs::create_dir_all(&project_dir)?;

        let config_path = project_dir.join("config.toml");
        if !config_path.exists() {
            fs::write(&config_path, Self::default_project_config())?;
            info!("Created project config: {}", config_path.display());
        }

        Ok(project_dir)
    }

    pub fn is_project_initialized() -> bool {
        Self::project_dir().exists()
    }

    // =========================================================================
    // Internal
    // =========================================================================

    fn default_global_config() -> String {
        r#"# careerlens global configuration
# Project settings in .careerlens/config.toml override these.

version = "1.0"

[llm]
provider = "gemini"
models = ["gemini-1.5-flash", "gemini-1.5-pro", "gemini-2.0-flash-exp", "gemini-1.5-flash-8b"]
timeout_secs = 120
fallback_provider = "openrouter"
# API keys: set GEMINI_API_KEY and OPENROUTER_API_KEY in the environment
"#
        .to_string()
    }

    fn default_project_config() -> String {
        r#"# careerlens project configuration

version = "1.0"

[store]
backend = "sqlite"
sqlite_path = ".careerlens/careerlens.db"

[retry]
max_attempts = 3
regeneration_timeout_secs = 180
backoff_ms = 2000
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreBackend;
    use tempfile::TempDir;

    #[test]
    fn test_load_default_config() {
        let config = ConfigLoader::load().unwrap();
        assert_eq!(config.version, "1.0");
    }

    #[test]
    fn test_init_project_writes_loadable_config() {
        let temp_dir = TempDir::new().unwrap();
        let dir = ConfigLoader::init_project(temp_dir.path()).unwrap();

        let config = ConfigLoader::load_from_file(&dir.join("config.toml")).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(
            &path,
            "[retry]\nmax_attempts = 5\n[llm]\nmodels = [\"gemini-2.0-flash\"]\n",
        )
        .unwrap();

        let config = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.llm.models, vec!["gemini-2.0-flash"]);
        assert_eq!(config.retry.regeneration_timeout_secs, 180);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[retry]\nmax_attempts = 0\n").unwrap();
        assert!(ConfigLoader::load_from_file(&path).is_err());
    }

    #[test]
    fn test_env_override() {
        // SAFETY: no other test reads llm.temperature
        unsafe {
            std::env::set_var("CAREERLENS_LLM_TEMPERATURE", "0.5");
        }
        let config = ConfigLoader::load().unwrap();
        assert!((config.llm.temperature - 0.5).abs() < f32::EPSILON);
        unsafe {
            std::env::remove_var("CAREERLENS_LLM_TEMPERATURE");
        }
    }

    #[test]
    fn test_render_toml_hides_keys() {
        let mut config = Config::default();
        config.llm.api_key = Some("secret".to_string());
        let rendered = ConfigLoader::render(&config, false).unwrap();
        assert!(rendered.contains("[retry]"));
        assert!(!rendered.contains("secret"));
    }
}
