use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::{AnalysisService, RegenerationRequest};
use crate::ai::prompt::{AssessmentData, analysis_prompt};
use crate::ai::{AnalysisValidator, SharedProvider};
use crate::types::utils::is_blank;
use crate::types::{LensError, Result};

/// Regenerates analysis with the deterministic scoring prompt.
pub struct LlmAnalysisService {
    provider: SharedProvider,
    validator: AnalysisValidator,
}

impl LlmAnalysisService {
    pub fn new(provider: SharedProvider) -> Self {
        Self {
            provider,
            validator: AnalysisValidator::new(),
        }
    }

    /// The prompt sent for `request`, without calling the model.
    pub fn prompt(&self, request: &RegenerationRequest) -> String {
        let data = AssessmentData::prepare(
            &request.answers,
            request.stream.as_deref(),
            &request.questions,
            &request.section_timings,
        );
        analysis_prompt(
            &data,
            request.grade,
            request.prior_scores.as_ref(),
            request.student_context.as_ref(),
        )
    }
}

#[async_trait]
impl AnalysisService for LlmAnalysisService {
    async fn regenerate(&self, request: &RegenerationRequest) -> Result<Value> {
        if request.answers.is_empty() {
            return Err(LensError::MissingAnswers {
                attempt_id: request.attempt_id.to_string(),
            });
        }

        let data = AssessmentData::prepare(
            &request.answers,
            request.stream.as_deref(),
            &request.questions,
            &request.section_timings,
        );
        let session = data.session_hash();
        let prompt = analysis_prompt(
            &data,
            request.grade,
            request.prior_scores.as_ref(),
            request.student_context.as_ref(),
        );

        info!(
            attempt = %request.attempt_id,
            session = %session,
            provider = self.provider.name(),
            prompt_chars = prompt.len(),
            "Requesting analysis"
        );

        let response = self.provider.generate(&prompt).await?;
        let mut blob = response.content;

        if is_blank(&blob) || !blob.is_object() {
            warn!(attempt = %request.attempt_id, "Model returned no analysis");
            return Err(LensError::EmptyAnalysis);
        }

        let missing = self.validator.missing_fields(&blob);
        if !missing.is_empty() {
            warn!(
                attempt = %request.attempt_id,
                missing = ?missing,
                "Analysis is missing sections"
            );
        }

        if let Some(map) = blob.as_object_mut() {
            map.insert(
                "_metadata".to_string(),
                json!({
                    "model": response.metadata.model,
                    "provider": response.metadata.provider,
                    "repaired": response.repaired,
                    "sessionHash": session,
                    "elapsedMs": response.elapsed_ms,
                    "generatedAt": chrono::Utc::now().to_rfc3339(),
                }),
            );
        }

        debug!(
            attempt = %request.attempt_id,
            tokens = response.usage.total(),
            elapsed_ms = response.elapsed_ms,
            "Analysis generated"
        );
        Ok(blob)
    }
}
