//! Google Gemini Provider
//!
//! Calls `models/{model}:generateContent` on the Generative Language API.
//! One provider instance serves one model; the chain walks the model list.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{LlmProvider, LlmResponse, ProviderConfig, ResponseMetadata, TokenUsage};
use crate::ai::validation::extract_json_with_repair_status;
use crate::constants::{generation, network};
use crate::types::{ErrorCategory, ErrorClassifier, LensError, LlmError, Result};

pub struct GeminiProvider {
    api_key: SecretString,
    api_base: String,
    model: String,
    generation: GenerationConfig,
    client: reqwest::Client,
}

impl std::fmt::Debug for GeminiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiProvider")
            .field("api_key", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("generation", &self.generation)
            .finish()
    }
}

impl GeminiProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .or_else(|| std::env::var("GEMINI_API_KEY").ok())
            .ok_or_else(|| {
                LensError::Config(
                    "Gemini API key not found. Set GEMINI_API_KEY or llm.api_key".to_string(),
                )
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(network::CONNECTION_TIMEOUT_SECS))
            .build()
            .map_err(|e| LensError::LlmApi(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_key: SecretString::from(api_key),
            api_base: config
                .api_base
                .unwrap_or_else(|| generation::GEMINI_API_BASE.to_string()),
            model: config
                .model
                .unwrap_or_else(|| generation::GEMINI_MODELS[0].to_string()),
            generation: GenerationConfig {
                temperature: config.temperature,
                top_k: config.top_k,
                top_p: config.top_p,
                max_output_tokens: config.max_tokens,
            },
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.api_base.trim_end_matches('/'),
            self.model
        )
    }

    fn build_request(&self, prompt: &str) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: self.generation.clone(),
        }
    }
}

/// Pull the error message out of a Gemini error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|e| e.error.message)
        .unwrap_or_else(|| body.to_string())
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    async fn generate(&self, prompt: &str) -> Result<LlmResponse> {
        info!(model = %self.model, "Generating with Gemini");

        let start = Instant::now();
        let response = self
            .client
            .post(self.endpoint())
            .query(&[("key", self.api_key.expose_secret())])
            .json(&self.build_request(prompt))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = ErrorClassifier::retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            let message = format!("Gemini {} error ({}): {}", self.model, status, error_message(&body));
            return Err(ErrorClassifier::classify_http_status(status.as_u16(), &message, "gemini", retry_after).into());
        }

        let body: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| LensError::LlmApi(format!("Failed to parse Gemini response: {}", e)))?;

        let text = body
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .and_then(|c| c.parts.first())
            .map(|p| p.text.as_str())
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                LlmError::new(
                    ErrorCategory::ParseError,
                    format!("Gemini {} returned an empty response", self.model),
                )
                .provider("gemini")
            })?;

        debug!(chars = text.len(), "Received Gemini response");
        let (content, repaired) = extract_json_with_repair_status(text)?;
        if repaired {
            warn!(model = %self.model, "Gemini response needed JSON repair");
        }

        let usage = body
            .usage_metadata
            .map(|u| TokenUsage {
                input_tokens: u.prompt_token_count,
                output_tokens: u.candidates_token_count,
            })
            .unwrap_or_default();

        Ok(LlmResponse {
            content,
            repaired,
            usage,
            elapsed_ms: start.elapsed().as_millis() as u64,
            metadata: ResponseMetadata {
                model: self.model.clone(),
                provider: "gemini".to_string(),
            },
        })
    }

    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/models/{}", self.api_base.trim_end_matches('/'), self.model);
        let response = self
            .client
            .get(&url)
            .query(&[("key", self.api_key.expose_secret())])
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => Ok(true),
            Ok(resp) => {
                warn!(model = %self.model, "Gemini health check failed: {}", resp.status());
                Ok(false)
            }
            Err(e) => {
                warn!(model = %self.model, "Gemini health check failed: {}", e);
                Ok(false)
            }
        }
    }
}

// Request/Response types

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> GeminiProvider {
        GeminiProvider::new(ProviderConfig {
            api_key: Some("test-key".to_string()),
            model: Some("gemini-1.5-flash".to_string()),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_request_body_shape() {
        let body = serde_json::to_value(provider().build_request("analyze")).unwrap();
        assert_eq!(body["contents"][0]["parts"][0]["text"], "analyze");
        assert_eq!(body["generationConfig"]["topK"], 10);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 16384);
        assert!((body["generationConfig"]["temperature"].as_f64().unwrap() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_endpoint_per_model() {
        assert_eq!(
            provider().endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent"
        );
    }

    #[test]
    fn test_debug_hides_key() {
        assert!(!format!("{:?}", provider()).contains("test-key"));
    }

    #[test]
    fn test_error_message_extraction() {
        let body = r#"{"error": {"code": 404, "message": "models/gemini-x is not found"}}"#;
        assert_eq!(error_message(body), "models/gemini-x is not found");
        assert_eq!(error_message("plain failure"), "plain failure");
    }

    #[test]
    fn test_response_text_path() {
        let raw = r#"{"candidates": [{"content": {"parts": [{"text": "{\"a\": 1}"}]}}],
                      "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 4}}"#;
        let parsed: GenerateContentResponse = serde_json::from_str(raw).unwrap();
        let text = &parsed.candidates[0].content.as_ref().unwrap().parts[0].text;
        assert_eq!(text, "{\"a\": 1}");
        assert_eq!(parsed.usage_metadata.unwrap().candidates_token_count, 4);
    }
}
