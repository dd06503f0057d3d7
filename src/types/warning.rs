//! Non-blocking findings attached to one load or retry cycle.
//!
//! Warnings are never persisted; they travel with the load outcome so the
//! caller can surface them next to the report.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Report cannot be shown as-is
    Error,
    /// Report usable, some section degraded or corrected
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Warning => write!(f, "WARN"),
            Severity::Info => write!(f, "INFO"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationWarning {
    pub severity: Severity,
    pub message: String,
    /// Dotted path of the affected field, e.g. `riasec.scores`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl ValidationWarning {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            location: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            location: None,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            message: message.into(),
            location: None,
        }
    }

    pub fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "[{}] {}: {}", self.severity, loc, self.message),
            None => write!(f, "[{}] {}", self.severity, self.message),
        }
    }
}

/// Collected warnings plus the report completeness they were measured against
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub warnings: Vec<ValidationWarning>,
    /// Percentage of report sections present
    pub completeness: u8,
}

impl ValidationReport {
    pub fn push(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    pub fn extend(&mut self, warnings: impl IntoIterator<Item = ValidationWarning>) {
        self.warnings.extend(warnings);
    }

    /// No error-severity findings
    pub fn is_valid(&self) -> bool {
        !self.warnings.iter().any(|w| w.severity == Severity::Error)
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.warnings
            .iter()
            .filter(|w| w.severity == severity)
            .count()
    }
}
