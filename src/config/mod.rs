//! Configuration Management
//!
//! Hierarchical resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/careerlens/config.toml)
//! 3. Project config (.careerlens/config.toml)
//! 4. Environment variables (CAREERLENS_*)
//! 5. CLI arguments (highest priority)

mod loader;
mod types;

pub use loader::ConfigLoader;
pub use types::*;
