//! Supabase (PostgREST) assessment store.
//!
//! Reads and writes the production tables directly over the REST API. The
//! analysis write filters on both `id` and `version`, so a concurrent writer
//! that already bumped the version makes the PATCH match no rows.

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::AssessmentStore;
use crate::config::StoreConfig;
use crate::constants::network;
use crate::types::{
    Attempt, AttemptId, LensError, Question, QuestionBank, Result, ResultId, ResultRow, StudentId,
    log_filter_warn,
};

const ATTEMPTS_TABLE: &str = "personal_assessment_attempts";
const RESULTS_TABLE: &str = "personal_assessment_results";
const QUESTIONS_TABLE: &str = "personal_assessment_questions";

pub struct SupabaseStore {
    rest_base: Url,
    api_key: SecretString,
    client: reqwest::Client,
}

impl std::fmt::Debug for SupabaseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseStore")
            .field("rest_base", &self.rest_base.as_str())
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl SupabaseStore {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let url = config.supabase_url.as_deref().ok_or_else(|| {
            LensError::Config("store.supabase_url is required for the supabase backend".to_string())
        })?;
        let api_key = config
            .supabase_key
            .clone()
            .or_else(|| std::env::var("SUPABASE_SERVICE_KEY").ok())
            .ok_or_else(|| {
                LensError::Config(
                    "Supabase key not found. Set SUPABASE_SERVICE_KEY or store.supabase_key"
                        .to_string(),
                )
            })?;

        // `join` replaces the last segment unless the base ends in a slash
        let base = Url::parse(&format!("{}/", url.trim_end_matches('/')))
            .map_err(|e| LensError::Config(format!("Invalid store.supabase_url '{}': {}", url, e)))?;
        let rest_base = base
            .join("rest/v1/")
            .map_err(|e| LensError::Config(format!("Invalid store.supabase_url '{}': {}", url, e)))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(network::DEFAULT_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(network::CONNECTION_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            rest_base,
            api_key: SecretString::from(api_key),
            client,
        })
    }

    fn table_url(&self, table: &str) -> Result<Url> {
        self.rest_base
            .join(table)
            .map_err(|e| LensError::Storage(format!("Invalid table path {}: {}", table, e)))
    }

    fn request(&self, method: reqwest::Method, table: &str) -> Result<reqwest::RequestBuilder> {
        let key = self.api_key.expose_secret();
        Ok(self
            .client
            .request(method, self.table_url(table)?)
            .header("apikey", key)
            .bearer_auth(key))
    }

    async fn check(table: &str, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(LensError::Storage(format!(
            "Supabase {} request failed ({}): {}",
            table, status, body
        )))
    }

    async fn select<T: DeserializeOwned>(&self, table: &str, query: &[(&str, String)]) -> Result<Vec<T>> {
        debug!(table, ?query, "Supabase select");
        let response = self
            .request(reqwest::Method::GET, table)?
            .query(&[("select", "*")])
            .query(query)
            .send()
            .await?;
        let response = Self::check(table, response).await?;
        Ok(response.json::<Vec<T>>().await?)
    }

    async fn select_one<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>> {
        let mut rows = self.select(table, query).await?;
        Ok(if rows.is_empty() { None } else { Some(rows.swap_remove(0)) })
    }
}

fn eq(value: &str) -> String {
    format!("eq.{}", value)
}

#[async_trait]
impl AssessmentStore for SupabaseStore {
    fn name(&self) -> &str {
        "supabase"
    }

    async fn get_attempt(&self, id: &AttemptId) -> Result<Option<Attempt>> {
        self.select_one(ATTEMPTS_TABLE, &[("id", eq(id.as_str()))]).await
    }

    async fn get_result_by_attempt(&self, id: &AttemptId) -> Result<Option<ResultRow>> {
        self.select_one(
            RESULTS_TABLE,
            &[
                ("attempt_id", eq(id.as_str())),
                ("order", "created_at.desc".to_string()),
                ("limit", "1".to_string()),
            ],
        )
        .await
    }

    async fn latest_result(&self, student: &StudentId) -> Result<Option<ResultRow>> {
        self.select_one(
            RESULTS_TABLE,
            &[
                ("student_id", eq(student.as_str())),
                ("order", "created_at.desc".to_string()),
                ("limit", "1".to_string()),
            ],
        )
        .await
    }

    async fn questions(&self, stream: Option<&str>) -> Result<QuestionBank> {
        let rows: Vec<Value> = self
            .select(QUESTIONS_TABLE, &[("is_active", "eq.true".to_string())])
            .await?;
        let questions: Vec<Question> = rows
            .into_iter()
            .filter_map(|row| log_filter_warn(serde_json::from_value(row), "Skipping question row"))
            .collect();
        Ok(QuestionBank::new(questions).for_stream(stream))
    }

    async fn update_analysis(
        &self,
        result_id: &ResultId,
        blob: &Value,
        expected_version: i64,
    ) -> Result<i64> {
        let next = expected_version + 1;
        let response = self
            .request(reqwest::Method::PATCH, RESULTS_TABLE)?
            .query(&[
                ("id", eq(result_id.as_str())),
                ("version", eq(&expected_version.to_string())),
            ])
            .header("Prefer", "return=representation")
            .json(&json!({
                "gemini_results": blob,
                "version": next,
                "updated_at": chrono::Utc::now().to_rfc3339(),
            }))
            .send()
            .await?;

        let response = Self::check(RESULTS_TABLE, response).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(next);
        }
        let updated: Vec<Value> = response.json().await?;
        if !updated.is_empty() {
            debug!(result_id = %result_id, version = next, "Analysis stored");
            return Ok(next);
        }

        let exists: Option<Value> = self
            .select_one(RESULTS_TABLE, &[("id", eq(result_id.as_str()))])
            .await?;
        match exists {
            Some(_) => {
                warn!(result_id = %result_id, expected_version, "Analysis write lost a version race");
                Err(LensError::VersionConflict {
                    result_id: result_id.to_string(),
                    expected: expected_version,
                })
            }
            None => Err(LensError::not_found("result", result_id.as_str())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreBackend;

    fn config(url: &str) -> StoreConfig {
        StoreConfig {
            backend: StoreBackend::Supabase,
            supabase_url: Some(url.to_string()),
            supabase_key: Some("service-key".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_table_urls() {
        let store = SupabaseStore::new(&config("https://abc.supabase.co")).unwrap();
        assert_eq!(
            store.table_url(RESULTS_TABLE).unwrap().as_str(),
            "https://abc.supabase.co/rest/v1/personal_assessment_results"
        );
    }

    #[test]
    fn test_table_urls_keep_base_path() {
        for url in ["https://gateway.example.com/supabase", "https://gateway.example.com/supabase/"] {
            let store = SupabaseStore::new(&config(url)).unwrap();
            assert_eq!(
                store.table_url(RESULTS_TABLE).unwrap().as_str(),
                "https://gateway.example.com/supabase/rest/v1/personal_assessment_results"
            );
        }
    }

    #[test]
    fn test_debug_redacts_key() {
        let store = SupabaseStore::new(&config("https://abc.supabase.co/")).unwrap();
        let debug = format!("{:?}", store);
        assert!(!debug.contains("service-key"));
        assert!(debug.contains("rest/v1"));
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(matches!(
            SupabaseStore::new(&config("not a url")),
            Err(LensError::Config(_))
        ));
    }

    #[test]
    fn test_missing_url_rejected() {
        let config = StoreConfig {
            supabase_key: Some("k".to_string()),
            ..Default::default()
        };
        assert!(SupabaseStore::new(&config).is_err());
    }

    #[test]
    fn test_eq_filter() {
        assert_eq!(eq("a1"), "eq.a1");
    }
}
