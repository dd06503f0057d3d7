use console::style;

use crate::types::{Severity, ValidationWarning};

/// Styled terminal output for commands
pub struct Output;

impl Output {
    pub fn new() -> Self {
        Self
    }

    pub fn success(&self, message: &str) {
        println!("{} {}", style("✓").green(), message);
    }

    pub fn error(&self, message: &str) {
        eprintln!("{} {}", style("✗").red(), message);
    }

    pub fn warning(&self, message: &str) {
        println!("{} {}", style("⚠").yellow(), message);
    }

    pub fn info(&self, message: &str) {
        println!("{} {}", style("ℹ").blue(), message);
    }

    pub fn header(&self, message: &str) {
        println!("\n{}", style(message).bold().underlined());
    }

    pub fn section(&self, message: &str) {
        println!("\n{}", style(message).bold());
        println!("{}", "─".repeat(40));
    }

    /// Aligned `label: value` line
    pub fn field(&self, label: &str, value: impl std::fmt::Display) {
        println!("  {:<16} {}", style(format!("{}:", label)).dim(), value);
    }

    pub fn finding(&self, warning: &ValidationWarning) {
        let location = warning
            .location
            .as_deref()
            .map(|l| format!(" {}", style(format!("({})", l)).dim()))
            .unwrap_or_default();
        match warning.severity {
            Severity::Error => eprintln!("{} {}{}", style("✗").red(), warning.message, location),
            Severity::Warning => println!("{} {}{}", style("⚠").yellow(), warning.message, location),
            Severity::Info => println!("{} {}{}", style("ℹ").blue(), warning.message, location),
        }
    }
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}
