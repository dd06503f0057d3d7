//! AI analysis regeneration.
//!
//! [`AnalysisService`] is the seam between the retry orchestrator and the
//! model: it takes one attempt's answers and returns a fresh analysis blob.
//! [`LlmAnalysisService`] implements it with the scoring prompt and an
//! [`LlmProvider`](crate::ai::LlmProvider), usually a provider chain.

mod service;

pub use service::LlmAnalysisService;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::types::{Answers, Attempt, AttemptId, GradeLevel, QuestionBank, Result};

/// Everything the model needs to score one attempt
#[derive(Debug, Clone, Default)]
pub struct RegenerationRequest {
    pub attempt_id: AttemptId,
    pub answers: Answers,
    pub stream: Option<String>,
    pub questions: QuestionBank,
    pub grade: GradeLevel,
    /// Scores already on the row, passed so the model keeps them consistent
    pub prior_scores: Option<Value>,
    pub student_context: Option<Value>,
    /// Seconds per section
    pub section_timings: BTreeMap<String, f64>,
}

impl RegenerationRequest {
    pub fn for_attempt(attempt: &Attempt, questions: QuestionBank) -> Self {
        Self {
            attempt_id: attempt.id.clone(),
            answers: attempt.answers.clone(),
            stream: attempt.stream_id.clone(),
            questions,
            grade: attempt.grade(),
            prior_scores: None,
            student_context: None,
            section_timings: attempt.section_timings.clone(),
        }
    }

    pub fn with_prior_scores(mut self, scores: Option<Value>) -> Self {
        self.prior_scores = scores;
        self
    }

    pub fn with_student_context(mut self, context: Option<Value>) -> Self {
        self.student_context = context;
        self
    }
}

#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// Produce a new analysis blob. Empty output is an error
    /// (`LensError::EmptyAnalysis`), never `Ok(null)`.
    async fn regenerate(&self, request: &RegenerationRequest) -> Result<Value>;
}

pub type SharedAnalysisService = Arc<dyn AnalysisService>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_from_attempt() {
        let attempt: Attempt = serde_json::from_value(json!({
            "id": "a1",
            "stream_id": "commerce",
            "grade_level": "college",
            "answers": {"riasec_q1": 4},
            "section_timings": {"riasec": 60}
        }))
        .unwrap();
        let request = RegenerationRequest::for_attempt(&attempt, QuestionBank::default())
            .with_prior_scores(Some(json!({"riasec": {"R": 2}})));

        assert_eq!(request.attempt_id.as_str(), "a1");
        assert_eq!(request.grade, GradeLevel::College);
        assert_eq!(request.stream.as_deref(), Some("commerce"));
        assert_eq!(request.answers.len(), 1);
        assert!(request.prior_scores.is_some());
        assert!(request.student_context.is_none());
    }
}
