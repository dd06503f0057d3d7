//! Model output validation
//!
//! Turns raw model text into an analysis blob:
//! - JSON extraction and repair for fenced, chatty, or truncated output
//! - Required-section checks reported as warnings

mod json_repair;
mod response;

pub use json_repair::{JsonRepairer, extract_json_from_response, extract_json_with_repair_status};
pub use response::AnalysisValidator;
