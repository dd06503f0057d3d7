pub mod canonical;
pub mod error;
pub mod record;
pub mod utils;
pub mod warning;

pub use canonical::{
    AptitudeBlock, BigFiveBlock, CanonicalResult, DomainScore, EmployabilityBlock,
    KnowledgeBlock, ResultSource, RiasecBlock, RiasecScores, RiasecType,
};
pub use error::{ErrorCategory, ErrorClassifier, LensError, LlmError, Result, ResultExt};
pub use record::{AnswerSection, Answers, Attempt, Question, QuestionBank, ResultRow};
pub use utils::{
    ParseWithDefault, capitalize_first, enum_to_str, json_f64, json_string,
    log_filter_warn, round1, round_pct,
};
pub use warning::{Severity, ValidationReport, ValidationWarning};

// =============================================================================
// Domain Newtypes
// =============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identifier of one assessment attempt (the answer set)
    AttemptId
);
string_id!(
    /// Identifier of a persisted result row
    ResultId
);
string_id!(StudentId);

/// Education stage the assessment was taken at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GradeLevel {
    Middle,
    Highschool,
    HigherSecondary,
    After10,
    #[default]
    After12,
    College,
}

impl GradeLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Middle => "middle",
            Self::Highschool => "highschool",
            Self::HigherSecondary => "higher_secondary",
            Self::After10 => "after10",
            Self::After12 => "after12",
            Self::College => "college",
        }
    }

    /// Stages whose report includes the personality and stream knowledge sections
    pub fn expects_full_battery(&self) -> bool {
        matches!(self, Self::After12 | Self::College)
    }
}

impl fmt::Display for GradeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ParseWithDefault for GradeLevel {
    fn type_name() -> &'static str {
        "GradeLevel"
    }

    fn default_value() -> Self {
        GradeLevel::After12
    }

    fn try_parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "middle" => Some(Self::Middle),
            "highschool" | "high_school" => Some(Self::Highschool),
            "higher_secondary" => Some(Self::HigherSecondary),
            "after10" => Some(Self::After10),
            "after12" => Some(Self::After12),
            "college" => Some(Self::College),
            _ => None,
        }
    }
}
