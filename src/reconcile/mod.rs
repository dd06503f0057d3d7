//! Result reconciliation.
//!
//! A stored result goes through four stages before it is shown:
//!
//! 1. [`transform`] converts whatever shape the row was written in into a
//!    [`CanonicalResult`].
//! 2. [`validators`] recompute score blocks that disagree with the answers.
//! 3. [`normalize`] fills derived fields so every block sits at one path.
//! 4. [`validate_transformed`] reports what is still missing.
//!
//! When the core interest scores are absent or all zero, the
//! [`RetryOrchestrator`] regenerates the analysis and runs the same stages on
//! the fresh row.

mod career;
mod normalizer;
mod orchestrator;
mod transformer;
pub mod validators;

pub use career::enrich_recommendations;
pub use normalizer::normalize;
pub use orchestrator::{LoadOutcome, LoadState, RetryOrchestrator};
pub use transformer::{StoredShape, aptitude_from_column, classify, transform, transform_row};
pub use validators::validate_scores;

use tracing::debug;

use crate::types::{
    Answers, CanonicalResult, GradeLevel, ParseWithDefault, QuestionBank, ResultRow,
    ValidationReport, ValidationWarning,
};

/// Canonical result plus everything found while producing it
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub result: CanonicalResult,
    pub report: ValidationReport,
}

impl Reconciled {
    /// Core interest scores are present and not all zero.
    pub fn is_valid(&self) -> bool {
        self.result.has_core_scores()
    }
}

/// Structural check of a canonical result.
///
/// Missing interest scores are an error; other missing sections are warnings.
/// Personality and knowledge are only expected from after-12 and college
/// students.
pub fn validate_transformed(result: &CanonicalResult) -> ValidationReport {
    let mut report = ValidationReport::default();

    if !result.has_core_scores() {
        report.push(ValidationWarning::error("Missing RIASEC scores").at("riasec.scores"));
    }

    let sections = result.sections();
    let present = |name: &str| sections.iter().any(|(n, p)| *n == name && *p);

    if !present("strengths") {
        report.push(ValidationWarning::warning("Missing strengths scores").at("strengths"));
    }
    if !present("overallSummary") {
        report.push(
            ValidationWarning::warning("Missing overall summary from AI analysis")
                .at("overallSummary"),
        );
    }
    if !present("careerFit") {
        report.push(ValidationWarning::warning("Missing career recommendations").at("careerFit"));
    }

    let grade = result
        .grade_level
        .as_deref()
        .map(GradeLevel::parse_or_default)
        .unwrap_or_default();
    if grade.expects_full_battery() {
        if !present("bigFive") {
            report.push(
                ValidationWarning::warning(format!(
                    "Missing Big Five personality scores for {} student",
                    grade
                ))
                .at("bigFive"),
            );
        }
        if !present("knowledge") {
            report.push(
                ValidationWarning::warning(format!(
                    "Missing knowledge test scores for {} student",
                    grade
                ))
                .at("knowledge"),
            );
        }
    }

    report.completeness = result.completeness();
    report
}

/// Run transform, validators, normalizer, and the structural check on one
/// stored row. Never fails.
pub fn reconcile(row: &ResultRow, answers: &Answers, bank: Option<&QuestionBank>) -> Reconciled {
    let mut result = transform_row(row);
    let corrections = validate_scores(&mut result, answers, bank);
    let result = normalize(result);

    let mut report = validate_transformed(&result);
    report.extend(corrections);

    debug!(
        source = %result.source,
        completeness = report.completeness,
        warnings = report.warnings.len(),
        "Reconciled result"
    );
    Reconciled { result, report }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RiasecBlock, RiasecScores, Severity};
    use serde_json::json;

    fn row(value: serde_json::Value) -> ResultRow {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_validate_transformed_missing_everything() {
        let report = validate_transformed(&CanonicalResult {
            grade_level: Some("college".into()),
            ..Default::default()
        });
        assert!(!report.is_valid());
        assert_eq!(report.count(Severity::Error), 1);
        let messages: Vec<_> = report.warnings.iter().map(|w| w.message.as_str()).collect();
        assert!(messages.contains(&"Missing career recommendations"));
        assert!(messages.contains(&"Missing Big Five personality scores for college student"));
        assert!(messages.contains(&"Missing knowledge test scores for college student"));
        assert_eq!(report.completeness, 0);
    }

    #[test]
    fn test_younger_students_skip_full_battery() {
        let report = validate_transformed(&CanonicalResult {
            grade_level: Some("middle".into()),
            riasec: Some(RiasecBlock::with_scores(RiasecScores {
                a: 3.0,
                ..Default::default()
            })),
            ..Default::default()
        });
        assert!(report.is_valid());
        assert!(!report.warnings.iter().any(|w| w.message.contains("Big Five")));
    }

    #[test]
    fn test_reconcile_column_row_without_regeneration() {
        let stored = row(json!({
            "id": "r1",
            "attempt_id": "a1",
            "grade_level": "after10",
            "riasec_scores": {"R": 6, "I": 11, "A": 2, "S": 9, "E": 4, "C": 1},
            "overall_summary": "Analytical helper",
            "strengths_scores": {"Curiosity": 4}
        }));
        let reconciled = reconcile(&stored, &Answers::default(), None);
        assert!(reconciled.is_valid());
        let riasec = reconciled.result.riasec.as_ref().unwrap();
        assert_eq!(riasec.scores.i, 11.0);
        assert_eq!(riasec.code.as_deref(), Some("ISR"));
        assert!(reconciled.report.is_valid());
    }

    #[test]
    fn test_reconcile_empty_row_is_invalid() {
        let reconciled = reconcile(&row(json!({"id": "r1"})), &Answers::default(), None);
        assert!(!reconciled.is_valid());
        assert!(!reconciled.report.is_valid());
    }

    #[test]
    fn test_reconcile_reports_corrections() {
        let bank: QuestionBank = serde_json::from_value(json!([
            {"id": "q1", "section": "riasec", "type": "E"}
        ]))
        .unwrap();
        let answers: Answers = serde_json::from_value(json!({"riasec_q1": 5})).unwrap();
        let stored = row(json!({"id": "r1", "riasec_scores": {"R": 0}}));

        let reconciled = reconcile(&stored, &answers, Some(&bank));
        assert!(reconciled.is_valid());
        assert_eq!(reconciled.result.riasec.as_ref().unwrap().scores.e, 2.0);
        assert!(
            reconciled
                .report
                .warnings
                .iter()
                .any(|w| w.location.as_deref() == Some("riasec.scores") && w.severity == Severity::Warning)
        );
    }
}
