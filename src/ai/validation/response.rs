//! Structural checks on a freshly generated analysis blob.
//!
//! Missing narrative sections never reject a response; they are reported as
//! warnings so the report renders with whatever the model produced. Only a
//! blob with no interest scores at all is an error.

use serde_json::Value;

use crate::types::utils::is_blank;
use crate::types::{RiasecScores, ValidationReport, ValidationWarning};

/// `(path, description)` of every section a complete analysis carries.
/// A path is present when it resolves to a non-blank value.
const REQUIRED_PATHS: &[(&str, &str)] = &[
    ("riasec.topThree", "interest top three"),
    ("aptitude.scores", "aptitude scores"),
    ("aptitude.topStrengths", "aptitude strengths"),
    ("bigFive.O", "personality scores"),
    ("workValues.topThree", "work values"),
    ("employability.strengthAreas", "employability strengths"),
    ("knowledge.score", "knowledge score"),
    ("careerFit.clusters", "career clusters"),
    ("skillGap.priorityA", "priority skill gaps"),
    ("roadmap.projects", "roadmap projects"),
    ("finalNote.advantage", "final note"),
    ("profileSnapshot.aptitudeStrengths", "profile snapshot"),
    ("overallSummary", "overall summary"),
];

fn resolve<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |node, key| node.get(key))
        .filter(|v| !is_blank(v))
}

#[derive(Debug, Default)]
pub struct AnalysisValidator;

impl AnalysisValidator {
    pub fn new() -> Self {
        Self
    }

    /// Paths of required sections the blob lacks.
    pub fn missing_fields(&self, blob: &Value) -> Vec<&'static str> {
        REQUIRED_PATHS
            .iter()
            .filter(|(path, _)| resolve(blob, path).is_none())
            .map(|(path, _)| *path)
            .collect()
    }

    pub fn validate(&self, blob: &Value) -> ValidationReport {
        let mut report = ValidationReport::default();

        let scores = resolve(blob, "riasec.scores").and_then(RiasecScores::from_value);
        match scores {
            None => report.push(
                ValidationWarning::error("Analysis has no interest scores").at("riasec.scores"),
            ),
            Some(s) if s.is_degenerate() => report.push(
                ValidationWarning::error("Analysis interest scores are all zero")
                    .at("riasec.scores"),
            ),
            Some(_) => {}
        }

        for (path, what) in REQUIRED_PATHS {
            if resolve(blob, path).is_none() {
                report.push(ValidationWarning::warning(format!("Missing {}", what)).at(*path));
            }
        }

        if resolve(blob, "timingAnalysis.overallPace").is_none() {
            report.push(ValidationWarning::info("Timing analysis not included").at("timingAnalysis"));
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Severity;
    use serde_json::json;

    fn complete_blob() -> Value {
        json!({
            "riasec": {"scores": {"R": 4, "I": 14, "A": 9, "S": 7, "E": 3, "C": 2}, "topThree": ["I", "A", "S"]},
            "aptitude": {"scores": {"verbal": {"correct": 6, "total": 8, "percentage": 75}}, "topStrengths": ["Verbal"]},
            "bigFive": {"O": 4.2, "C": 3.1, "E": 2.8, "A": 3.9, "N": 2.0},
            "workValues": {"topThree": [{"value": "Creativity", "score": 5}]},
            "employability": {"strengthAreas": ["Teamwork"]},
            "knowledge": {"score": 70},
            "careerFit": {"clusters": [{"title": "Research"}]},
            "skillGap": {"priorityA": [{"skill": "Statistics"}]},
            "roadmap": {"projects": [{"title": "Science fair"}]},
            "finalNote": {"advantage": "Curiosity"},
            "profileSnapshot": {"aptitudeStrengths": [{"name": "Verbal"}]},
            "overallSummary": "Investigative profile",
            "timingAnalysis": {"overallPace": "Moderate"}
        })
    }

    #[test]
    fn test_complete_blob_has_no_findings() {
        let validator = AnalysisValidator::new();
        let blob = complete_blob();
        assert!(validator.missing_fields(&blob).is_empty());
        assert!(validator.validate(&blob).warnings.is_empty());
    }

    #[test]
    fn test_missing_sections_are_warnings() {
        let mut blob = complete_blob();
        blob["roadmap"] = json!({"projects": []});
        blob.as_object_mut().unwrap().remove("overallSummary");

        let validator = AnalysisValidator::new();
        assert_eq!(
            validator.missing_fields(&blob),
            vec!["roadmap.projects", "overallSummary"]
        );
        let report = validator.validate(&blob);
        assert!(report.is_valid());
        assert_eq!(report.count(Severity::Warning), 2);
    }

    #[test]
    fn test_zero_scores_are_an_error() {
        let mut blob = complete_blob();
        blob["riasec"]["scores"] = json!({"R": 0, "I": 0, "A": 0, "S": 0, "E": 0, "C": 0});
        assert!(!AnalysisValidator::new().validate(&blob).is_valid());
    }

    #[test]
    fn test_knowledge_score_zero_counts_as_present() {
        let mut blob = complete_blob();
        blob["knowledge"]["score"] = json!(0);
        assert!(
            !AnalysisValidator::new()
                .missing_fields(&blob)
                .contains(&"knowledge.score")
        );
    }
}
