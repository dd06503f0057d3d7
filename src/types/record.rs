//! Persisted shapes read from the assessment store.
//!
//! `ResultRow` mirrors the result table: a handful of identity columns plus a
//! loose bag of score and narrative columns whose presence varies by the
//! generation of the platform that wrote the row. `Attempt` carries the raw
//! answers keyed `<section>_<questionId>`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use super::utils::{is_blank, value_as_f64};
use super::{AttemptId, GradeLevel, ParseWithDefault, ResultId, StudentId};

/// Columns that may hold the AI analysis blob, in lookup order
pub const ANALYSIS_COLUMNS: [&str; 2] = ["gemini_results", "gemini_analysis"];

// =============================================================================
// Result Row
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    #[serde(default)]
    pub id: Option<ResultId>,
    #[serde(default)]
    pub attempt_id: Option<AttemptId>,
    #[serde(default)]
    pub student_id: Option<StudentId>,
    #[serde(default)]
    pub grade_level: Option<String>,
    #[serde(default)]
    pub stream_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    /// Optimistic concurrency counter, bumped on every analysis write
    #[serde(default)]
    pub version: i64,
    #[serde(flatten)]
    pub columns: BTreeMap<String, Value>,
}

impl ResultRow {
    /// A column value, treating `null`, empty objects, and empty arrays as absent.
    pub fn column(&self, name: &str) -> Option<&Value> {
        self.columns.get(name).filter(|v| !is_blank(v))
    }

    /// Numeric column. `0` is a present value here.
    pub fn number(&self, name: &str) -> Option<f64> {
        self.columns.get(name).and_then(value_as_f64)
    }

    pub fn set_column(&mut self, name: impl Into<String>, value: Value) {
        self.columns.insert(name.into(), value);
    }

    /// The AI analysis blob, if any column carries a non-empty one.
    ///
    /// Older writers stored the blob as a JSON string; those are parsed here.
    /// A string that is not JSON is reported as `Err` with the raw text.
    pub fn analysis_blob(&self) -> Option<std::result::Result<Value, String>> {
        ANALYSIS_COLUMNS.iter().find_map(|name| {
            let value = self.column(name)?;
            match value {
                Value::String(raw) => Some(
                    serde_json::from_str::<Value>(raw)
                        .ok()
                        .filter(|v| !is_blank(v))
                        .ok_or_else(|| raw.clone()),
                ),
                other => Some(Ok(other.clone())),
            }
        })
    }

    pub fn grade(&self) -> Option<GradeLevel> {
        self.grade_level.as_deref().map(GradeLevel::parse_or_default)
    }
}

// =============================================================================
// Answers
// =============================================================================

/// Assessment sections, each identified by its answer-key prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerSection {
    Riasec,
    Aptitude,
    #[serde(alias = "big_five")]
    Bigfive,
    #[serde(alias = "work_values")]
    Values,
    Employability,
    Knowledge,
}

impl AnswerSection {
    pub const ALL: [AnswerSection; 6] = [
        Self::Riasec,
        Self::Aptitude,
        Self::Bigfive,
        Self::Values,
        Self::Employability,
        Self::Knowledge,
    ];

    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Riasec => "riasec_",
            Self::Aptitude => "aptitude_",
            Self::Bigfive => "bigfive_",
            Self::Values => "values_",
            Self::Employability => "employability_",
            Self::Knowledge => "knowledge_",
        }
    }

    pub fn name(&self) -> &'static str {
        self.prefix().trim_end_matches('_')
    }
}

impl fmt::Display for AnswerSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Raw answers keyed `<section>_<questionId>`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Answers(BTreeMap<String, Value>);

impl Answers {
    pub fn new(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }

    pub fn insert(&mut self, section: AnswerSection, question_id: &str, value: Value) {
        self.0
            .insert(format!("{}{}", section.prefix(), question_id), value);
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(Value::is_null)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `(questionId, answer)` pairs of one section, skipping unanswered questions.
    pub fn section(&self, section: AnswerSection) -> impl Iterator<Item = (&str, &Value)> {
        let prefix = section.prefix();
        self.0.iter().filter_map(move |(key, value)| {
            let id = key.strip_prefix(prefix)?;
            (!value.is_null()).then_some((id, value))
        })
    }

    pub fn count(&self, section: AnswerSection) -> usize {
        self.section(section).count()
    }

    pub fn as_map(&self) -> &BTreeMap<String, Value> {
        &self.0
    }
}

/// Likert response (1-5). Accepts numbers, numeric strings, and `{ "value": n }`.
pub fn likert_value(answer: &Value) -> Option<f64> {
    match answer {
        Value::Object(map) => map.get("value").and_then(value_as_f64),
        other => value_as_f64(other),
    }
    .filter(|v| (1.0..=5.0).contains(v))
}

/// Compare a student answer with a key, ignoring case and surrounding space.
pub fn answers_match(answer: &Value, key: &Value) -> bool {
    match (answer, key) {
        (Value::String(a), Value::String(b)) => a.trim().eq_ignore_ascii_case(b.trim()),
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => {
            s.trim().parse::<f64>().ok() == n.as_f64()
        }
        (a, b) => a == b,
    }
}

// =============================================================================
// Attempt
// =============================================================================

/// One completed assessment attempt
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub id: AttemptId,
    #[serde(default)]
    pub student_id: Option<StudentId>,
    #[serde(default, alias = "stream")]
    pub stream_id: Option<String>,
    #[serde(default)]
    pub grade_level: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, alias = "all_responses")]
    pub answers: Answers,
    /// Seconds spent per section name
    #[serde(default)]
    pub section_timings: BTreeMap<String, f64>,
}

impl Attempt {
    pub fn grade(&self) -> GradeLevel {
        self.grade_level
            .as_deref()
            .map(GradeLevel::parse_or_default)
            .unwrap_or_default()
    }
}

// =============================================================================
// Question Bank
// =============================================================================

/// Question metadata used to re-score answers.
///
/// `subtype` is the RIASEC letter, aptitude domain, Big Five trait, or
/// employability domain depending on the section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub section: AnswerSection,
    #[serde(default, alias = "type", skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default, alias = "question_text")]
    pub text: String,
    #[serde(default, alias = "correct", skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<Value>,
    /// Employability questions: `selfRating` or `sjt`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_answer: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worst_answer: Option<Value>,
    /// Knowledge questions belong to one stream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuestionBank {
    questions: Vec<Question>,
}

impl QuestionBank {
    pub fn new(questions: Vec<Question>) -> Self {
        Self { questions }
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Question> {
        self.questions.iter()
    }

    pub fn find(&self, section: AnswerSection, id: &str) -> Option<&Question> {
        self.questions
            .iter()
            .find(|q| q.section == section && q.id == id)
    }

    pub fn section(&self, section: AnswerSection) -> impl Iterator<Item = &Question> {
        self.questions.iter().filter(move |q| q.section == section)
    }

    pub fn has_section(&self, section: AnswerSection) -> bool {
        self.section(section).next().is_some()
    }

    /// Drop knowledge questions that belong to other streams.
    pub fn for_stream(&self, stream: Option<&str>) -> QuestionBank {
        let questions = self
            .questions
            .iter()
            .filter(|q| match (q.section, q.stream.as_deref(), stream) {
                (AnswerSection::Knowledge, Some(own), Some(wanted)) => {
                    own.eq_ignore_ascii_case(wanted)
                }
                _ => true,
            })
            .cloned()
            .collect();
        QuestionBank { questions }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_row_flattens_unknown_columns() {
        let row: ResultRow = serde_json::from_value(json!({
            "id": "r1",
            "attempt_id": "a1",
            "riasec_scores": {"R": 4},
            "gemini_results": null,
            "version": 2
        }))
        .unwrap();
        assert_eq!(row.version, 2);
        assert!(row.column("riasec_scores").is_some());
        assert!(row.column("gemini_results").is_none());
        assert!(row.analysis_blob().is_none());
    }

    #[test]
    fn test_analysis_blob_parses_string_column() {
        let row: ResultRow = serde_json::from_value(json!({
            "gemini_results": "{\"riasec\": {\"scores\": {\"R\": 3}}}"
        }))
        .unwrap();
        let blob = row.analysis_blob().unwrap().unwrap();
        assert_eq!(blob["riasec"]["scores"]["R"], 3);

        let broken: ResultRow =
            serde_json::from_value(json!({"gemini_results": "{not json"})).unwrap();
        assert!(broken.analysis_blob().unwrap().is_err());
    }

    #[test]
    fn test_answers_section_iteration() {
        let answers: Answers = serde_json::from_value(json!({
            "riasec_q1": 5,
            "riasec_q2": null,
            "aptitude_v1": "B",
            "knowledge_k1": "A"
        }))
        .unwrap();
        let riasec: Vec<_> = answers.section(AnswerSection::Riasec).collect();
        assert_eq!(riasec, vec![("q1", &json!(5))]);
        assert_eq!(answers.count(AnswerSection::Aptitude), 1);
        assert!(!answers.is_empty());
        assert!(Answers::default().is_empty());
    }

    #[test]
    fn test_likert_value() {
        assert_eq!(likert_value(&json!(4)), Some(4.0));
        assert_eq!(likert_value(&json!("5")), Some(5.0));
        assert_eq!(likert_value(&json!({"value": 2})), Some(2.0));
        assert_eq!(likert_value(&json!(9)), None);
        assert_eq!(likert_value(&json!("often")), None);
    }

    #[test]
    fn test_answers_match() {
        assert!(answers_match(&json!(" b "), &json!("B")));
        assert!(answers_match(&json!("3"), &json!(3)));
        assert!(!answers_match(&json!("A"), &json!("C")));
    }

    #[test]
    fn test_question_bank_for_stream() {
        let bank: QuestionBank = serde_json::from_value(json!([
            {"id": "k1", "section": "knowledge", "stream": "science", "correct": "A"},
            {"id": "k2", "section": "knowledge", "stream": "commerce", "correct": "B"},
            {"id": "q1", "section": "riasec", "type": "R"}
        ]))
        .unwrap();
        let science = bank.for_stream(Some("Science"));
        assert_eq!(science.len(), 2);
        assert!(science.find(AnswerSection::Knowledge, "k1").is_some());
        assert!(science.find(AnswerSection::Knowledge, "k2").is_none());
        assert_eq!(
            bank.find(AnswerSection::Riasec, "q1").unwrap().subtype.as_deref(),
            Some("R")
        );
    }
}
