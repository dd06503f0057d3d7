//! JSON extraction and repair for model output.
//!
//! Analysis responses are long (up to the output token cap) and arrive with
//! the usual damage:
//! - Markdown code fences around the object
//! - Commentary before or after the JSON
//! - Trailing commas
//! - Truncation mid-string or mid-object when the token cap is hit

use serde_json::Value;
use tracing::{debug, warn};

use crate::types::{ErrorCategory, LensError, Result};

/// Extract and parse the analysis object from a model response.
pub fn extract_json_from_response(content: &str) -> Result<Value> {
    JsonRepairer::new().parse_or_repair(content).map(|(v, _)| v)
}

/// Extract and parse, also reporting whether repair was needed.
pub fn extract_json_with_repair_status(content: &str) -> Result<(Value, bool)> {
    JsonRepairer::new().parse_or_repair(content)
}

// =============================================================================
// Lexical Scan
// =============================================================================

/// String/escape tracking shared by every repair pass
#[derive(Default)]
struct Scan {
    in_string: bool,
    escape: bool,
    depth: Vec<char>,
}

impl Scan {
    /// Feed one character. Returns true when it is structural (outside a string).
    fn feed(&mut self, ch: char) -> bool {
        if self.escape {
            self.escape = false;
            return false;
        }
        match ch {
            '\\' if self.in_string => {
                self.escape = true;
                false
            }
            '"' => {
                self.in_string = !self.in_string;
                false
            }
            _ if self.in_string => false,
            '{' => {
                self.depth.push('}');
                true
            }
            '[' => {
                self.depth.push(']');
                true
            }
            '}' | ']' => {
                self.depth.pop();
                true
            }
            _ => true,
        }
    }
}

// =============================================================================
// JsonRepairer
// =============================================================================

pub struct JsonRepairer {
    max_repair_attempts: usize,
}

impl Default for JsonRepairer {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonRepairer {
    pub fn new() -> Self {
        Self {
            max_repair_attempts: 2,
        }
    }

    /// Parse JSON, repairing if the direct parse fails. Returns `(value, was_repaired)`.
    pub fn parse_or_repair(&self, raw: &str) -> Result<(Value, bool)> {
        let cleaned = strip_code_fences(raw.trim().trim_start_matches('\u{feff}'));
        if cleaned.is_empty() {
            return Err(LensError::llm(ErrorCategory::ParseError, "empty response"));
        }

        if let Ok(value) = serde_json::from_str::<Value>(cleaned) {
            return Ok((value, false));
        }

        debug!("Direct JSON parse failed, attempting repair");
        let candidate = extract_outer_object(cleaned).unwrap_or(cleaned);
        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            warn!("JSON extracted from surrounding text");
            return Ok((value, true));
        }

        for level in 1..=self.max_repair_attempts {
            let repaired = repair(candidate, level);
            if let Ok(value) = serde_json::from_str::<Value>(&repaired) {
                warn!(level, "JSON repaired");
                return Ok((value, true));
            }
        }

        Err(LensError::llm(
            ErrorCategory::ParseError,
            format!(
                "Failed to parse analysis JSON. Preview: {}...",
                candidate.chars().take(200).collect::<String>()
            ),
        ))
    }
}

fn strip_code_fences(s: &str) -> &str {
    let mut body = s;
    if body.starts_with("```") {
        body = match body.find('\n') {
            Some(nl) => &body[nl + 1..],
            None => body.trim_start_matches('`'),
        };
    }
    body.trim_end().trim_end_matches("```").trim()
}

/// Slice from the first `{` to its matching `}`, or to the end if unbalanced.
fn extract_outer_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let mut scan = Scan::default();
    for (i, ch) in s[start..].char_indices() {
        if scan.feed(ch) && ch == '}' && scan.depth.is_empty() {
            return Some(&s[start..start + i + 1]);
        }
    }
    Some(&s[start..])
}

/// Level 1 drops trailing commas and closes open structures.
/// Level 2 also cuts back to the last complete member before closing.
fn repair(s: &str, level: usize) -> String {
    let body = if level >= 2 {
        cut_to_last_member(s)
    } else {
        s.to_string()
    };
    close_open(&drop_trailing_commas(&body))
}

fn drop_trailing_commas(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut scan = Scan::default();
    let chars: Vec<char> = s.chars().collect();
    for (i, &ch) in chars.iter().enumerate() {
        let structural = scan.feed(ch);
        if structural && ch == ',' {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some('}') | Some(']') | None) {
                continue;
            }
        }
        out.push(ch);
    }
    out
}

fn close_open(s: &str) -> String {
    let mut scan = Scan::default();
    for ch in s.chars() {
        scan.feed(ch);
    }
    let mut out = s.trim_end().to_string();
    if scan.in_string {
        if scan.escape {
            out.pop();
        }
        out.push('"');
    }
    if out.ends_with(':') {
        out.push_str("null");
    }
    while let Some(closer) = scan.depth.pop() {
        out.push(closer);
    }
    out
}

/// Truncate after the last comma or opener that sits outside a string.
fn cut_to_last_member(s: &str) -> String {
    let mut scan = Scan::default();
    let mut cut = None;
    for (i, ch) in s.char_indices() {
        if scan.feed(ch) {
            match ch {
                ',' => cut = Some(i),
                '{' | '[' => cut = Some(i + 1),
                _ => {}
            }
        }
    }
    match cut {
        Some(i) => s[..i].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_json() {
        let (_, repaired) = extract_json_with_repair_status(r#"{"riasec": {}}"#).unwrap();
        assert!(!repaired);
    }

    #[test]
    fn test_strip_code_fences() {
        let input = "```json\n{\"overallSummary\": \"ok\"}\n```";
        let value = extract_json_from_response(input).unwrap();
        assert_eq!(value["overallSummary"], "ok");
    }

    #[test]
    fn test_commentary_around_object() {
        let input = "Here is the analysis:\n{\"riasec\": {\"code\": \"IAS\"}}\nLet me know!";
        let (value, repaired) = extract_json_with_repair_status(input).unwrap();
        assert!(repaired);
        assert_eq!(value["riasec"]["code"], "IAS");
    }

    #[test]
    fn test_trailing_comma() {
        let (value, repaired) =
            extract_json_with_repair_status(r#"{"topThree": ["I", "A", "S",],}"#).unwrap();
        assert!(repaired);
        assert_eq!(value["topThree"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_truncated_at_token_cap() {
        let input = r#"{"riasec": {"scores": {"R": 4, "I": 12}}, "overallSummary": "A curious stud"#;
        let (value, repaired) = extract_json_with_repair_status(input).unwrap();
        assert!(repaired);
        assert_eq!(value["riasec"]["scores"]["I"], 12);
    }

    #[test]
    fn test_truncated_after_key() {
        let input = r#"{"riasec": {"scores": {"R": 4}}, "roadmap": {"projects": [{"title": "Robot", "dur"#;
        let value = extract_json_from_response(input).unwrap();
        assert_eq!(value["riasec"]["scores"]["R"], 4);
    }

    #[test]
    fn test_brace_inside_string_ignored() {
        let input = r#"{"note": "use {braces}", "x": [1, 2"#;
        let value = extract_json_from_response(input).unwrap();
        assert_eq!(value["note"], "use {braces}");
    }

    #[test]
    fn test_empty_response_is_parse_error() {
        match extract_json_from_response("  ```json\n```") {
            Err(LensError::Llm(e)) => assert_eq!(e.category, ErrorCategory::ParseError),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
