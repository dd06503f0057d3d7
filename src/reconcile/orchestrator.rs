//! Retry orchestrator.
//!
//! Loads a result, and when its core interest scores are missing or all zero
//! regenerates the analysis, bounded to `retry.max_attempts` failed attempts
//! per record for the lifetime of the orchestrator.
//!
//! ```text
//! load ─┬─ valid ─────────────────────────────────────────▶ Loaded-Valid
//!       └─ Loaded-Missing-Analysis ─▶ Retrying ─┬─ ok ─▶ Retry-Succeeded ─▶ Loaded-Valid
//!                                               └─ n failures ─▶ Retry-Exhausted
//! ```
//!
//! Per-record state lives in a concurrent map: an in-progress flag taken by
//! compare-and-set, a counter of failed automatic regenerations (capped at
//! the bound, reset by a success), and an exhaustion marker that stops
//! automatic retries until a manual retry clears it.

use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tracing::{debug, info, instrument, warn};

use super::{Reconciled, reconcile};
use crate::ai::with_timeout;
use crate::analysis::{RegenerationRequest, SharedAnalysisService};
use crate::config::RetryConfig;
use crate::storage::SharedStore;
use crate::types::{
    Answers, Attempt, AttemptId, CanonicalResult, LensError, QuestionBank, Result, ResultRow,
    ValidationWarning,
};

// =============================================================================
// States and Outcome
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadState {
    LoadedValid,
    LoadedMissingAnalysis,
    Retrying,
    RetrySucceeded,
    RetryExhausted,
}

impl LoadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::LoadedValid | Self::RetryExhausted)
    }
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::LoadedValid => "Loaded-Valid",
            Self::LoadedMissingAnalysis => "Loaded-Missing-Analysis",
            Self::Retrying => "Retrying",
            Self::RetrySucceeded => "Retry-Succeeded",
            Self::RetryExhausted => "Retry-Exhausted",
        })
    }
}

/// Result of one load or retry cycle
#[derive(Debug, Clone, Serialize)]
pub struct LoadOutcome {
    pub attempt_id: AttemptId,
    /// States visited, in order; the last one is terminal
    pub trace: Vec<LoadState>,
    /// Best result available. After exhaustion this is the degraded original.
    pub result: CanonicalResult,
    pub warnings: Vec<ValidationWarning>,
    pub completeness: u8,
    /// Regeneration calls made during this cycle
    pub regenerations: u32,
    /// Message for the student when the cycle ended exhausted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl LoadOutcome {
    fn new(attempt_id: AttemptId, reconciled: Reconciled) -> Self {
        Self {
            attempt_id,
            trace: Vec::new(),
            completeness: reconciled.report.completeness,
            warnings: reconciled.report.warnings,
            result: reconciled.result,
            regenerations: 0,
            error: None,
            last_error: None,
        }
    }

    fn replace(&mut self, reconciled: Reconciled) {
        self.completeness = reconciled.report.completeness;
        self.warnings = reconciled.report.warnings;
        self.result = reconciled.result;
    }

    pub fn state(&self) -> Option<LoadState> {
        self.trace.last().copied()
    }

    pub fn is_valid(&self) -> bool {
        self.state() == Some(LoadState::LoadedValid)
    }

    /// The canonical result, or `RetryExhausted` when the cycle failed.
    pub fn into_result(self) -> Result<CanonicalResult> {
        if self.is_valid() {
            Ok(self.result)
        } else {
            Err(LensError::RetryExhausted {
                attempts: self.regenerations,
                last_error: self.last_error.unwrap_or_else(|| "automatic retries exhausted".to_string()),
            })
        }
    }
}

// =============================================================================
// Per-record Guard
// =============================================================================

#[derive(Debug, Default)]
struct RetryGuard {
    in_progress: AtomicBool,
    attempts: AtomicU32,
    exhausted: AtomicBool,
}

/// Holds the in-progress flag; released on drop.
struct InProgress(Arc<RetryGuard>);

impl InProgress {
    fn acquire(guard: &Arc<RetryGuard>) -> Option<Self> {
        guard
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(guard)))
    }
}

impl Drop for InProgress {
    fn drop(&mut self) {
        self.0.in_progress.store(false, Ordering::Release);
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Data one cycle works on
struct Loaded {
    attempt: Attempt,
    row: ResultRow,
    bank: Option<QuestionBank>,
}

pub struct RetryOrchestrator {
    store: SharedStore,
    analysis: SharedAnalysisService,
    config: RetryConfig,
    guards: DashMap<AttemptId, Arc<RetryGuard>>,
}

impl RetryOrchestrator {
    pub fn new(store: SharedStore, analysis: SharedAnalysisService, config: RetryConfig) -> Self {
        Self {
            store,
            analysis,
            config,
            guards: DashMap::new(),
        }
    }

    fn guard(&self, attempt_id: &AttemptId) -> Arc<RetryGuard> {
        Arc::clone(&self.guards.entry(attempt_id.clone()).or_default())
    }

    /// Failed automatic regenerations counted against the bound
    pub fn attempts_used(&self, attempt_id: &AttemptId) -> u32 {
        self.guards
            .get(attempt_id)
            .map(|g| g.attempts.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    pub fn is_exhausted(&self, attempt_id: &AttemptId) -> bool {
        self.guards
            .get(attempt_id)
            .is_some_and(|g| g.exhausted.load(Ordering::Acquire))
    }

    pub fn is_in_progress(&self, attempt_id: &AttemptId) -> bool {
        self.guards
            .get(attempt_id)
            .is_some_and(|g| g.in_progress.load(Ordering::Acquire))
    }

    async fn fetch(&self, attempt_id: &AttemptId) -> Result<Loaded> {
        let (attempt, row) = futures::try_join!(
            self.store.get_attempt(attempt_id),
            self.store.get_result_by_attempt(attempt_id),
        )?;
        let attempt = attempt.ok_or_else(|| LensError::not_found("attempt", attempt_id.as_str()))?;
        let row = row.ok_or_else(|| LensError::not_found("result", attempt_id.as_str()))?;

        // Validators degrade to pass-through without metadata
        let bank = match self.store.questions(attempt.stream_id.as_deref()).await {
            Ok(bank) if !bank.is_empty() => Some(bank),
            Ok(_) => None,
            Err(e) => {
                warn!(attempt = %attempt_id, "Question metadata unavailable: {}", e);
                None
            }
        };

        Ok(Loaded { attempt, row, bank })
    }

    /// Load a result, regenerating its analysis when the interest scores are
    /// missing or degenerate.
    #[instrument(skip(self), fields(attempt = %attempt_id))]
    pub async fn load(&self, attempt_id: &AttemptId) -> Result<LoadOutcome> {
        let mut loaded = self.fetch(attempt_id).await?;
        let reconciled = reconcile(&loaded.row, &loaded.attempt.answers, loaded.bank.as_ref());
        let mut outcome = LoadOutcome::new(attempt_id.clone(), reconciled);

        if outcome.result.has_core_scores() {
            info!("Result loaded with valid analysis");
            outcome.trace.push(LoadState::LoadedValid);
            return Ok(outcome);
        }

        outcome.trace.push(LoadState::LoadedMissingAnalysis);
        info!(source = %outcome.result.source, "Analysis missing or degenerate");

        if loaded.attempt.answers.is_empty() {
            return Err(LensError::MissingAnswers {
                attempt_id: attempt_id.to_string(),
            });
        }

        let guard = self.guard(attempt_id);
        if self.budget_spent(&guard) {
            info!("Automatic retries already exhausted this session");
            return Ok(self.exhausted(outcome, None));
        }

        let Some(_running) = InProgress::acquire(&guard) else {
            return Err(LensError::RetryInProgress {
                attempt_id: attempt_id.to_string(),
            });
        };
        // The holder of the flag is the only writer of the counter
        if self.budget_spent(&guard) {
            return Ok(self.exhausted(outcome, None));
        }

        outcome.trace.push(LoadState::Retrying);
        let max = self.config.max_attempts;
        let mut last_error: Option<LensError> = None;

        while guard.attempts.load(Ordering::Acquire) < max {
            outcome.regenerations += 1;
            info!(regeneration = outcome.regenerations, max, "Regenerating analysis");

            match self.regenerate_once(&loaded).await {
                Ok(reconciled) => {
                    guard.attempts.store(0, Ordering::Release);
                    outcome.replace(reconciled);
                    outcome.trace.push(LoadState::RetrySucceeded);
                    outcome.trace.push(LoadState::LoadedValid);
                    info!(regeneration = outcome.regenerations, "Regeneration succeeded");
                    return Ok(outcome);
                }
                Err(e) => {
                    let failed = guard.attempts.fetch_add(1, Ordering::AcqRel) + 1;
                    warn!(failed, max, "Regeneration failed: {}", e);
                    let recoverable = e.is_recoverable();
                    if matches!(e, LensError::VersionConflict { .. }) {
                        self.refresh_row(&mut loaded).await?;
                    }
                    last_error = Some(e);
                    if !recoverable {
                        break;
                    }
                    if failed < max && !self.config.backoff().is_zero() {
                        tokio::time::sleep(self.config.backoff()).await;
                    }
                }
            }
        }

        guard.exhausted.store(true, Ordering::Release);
        Ok(self.exhausted(outcome, last_error))
    }

    /// One fresh regeneration on request. Clears the exhaustion marker and
    /// is not counted against the automatic bound; a success resets it.
    #[instrument(skip(self), fields(attempt = %attempt_id))]
    pub async fn manual_retry(&self, attempt_id: &AttemptId) -> Result<LoadOutcome> {
        let loaded = self.fetch(attempt_id).await?;
        if loaded.attempt.answers.is_empty() {
            return Err(LensError::MissingAnswers {
                attempt_id: attempt_id.to_string(),
            });
        }

        let guard = self.guard(attempt_id);
        let Some(_running) = InProgress::acquire(&guard) else {
            return Err(LensError::RetryInProgress {
                attempt_id: attempt_id.to_string(),
            });
        };
        guard.exhausted.store(false, Ordering::Release);

        let reconciled = reconcile(&loaded.row, &loaded.attempt.answers, loaded.bank.as_ref());
        let mut outcome = LoadOutcome::new(attempt_id.clone(), reconciled);
        outcome.trace.push(LoadState::Retrying);
        outcome.regenerations = 1;
        info!("Manual regeneration requested");

        match self.regenerate_once(&loaded).await {
            Ok(reconciled) => {
                guard.attempts.store(0, Ordering::Release);
                outcome.replace(reconciled);
                outcome.trace.push(LoadState::RetrySucceeded);
                outcome.trace.push(LoadState::LoadedValid);
                Ok(outcome)
            }
            Err(e) => {
                warn!("Manual regeneration failed: {}", e);
                if matches!(e, LensError::MissingAnswers { .. }) {
                    return Err(e);
                }
                guard.exhausted.store(true, Ordering::Release);
                Ok(self.exhausted(outcome, Some(e)))
            }
        }
    }

    fn budget_spent(&self, guard: &RetryGuard) -> bool {
        guard.exhausted.load(Ordering::Acquire)
            || guard.attempts.load(Ordering::Acquire) >= self.config.max_attempts
    }

    /// Pick up the row a concurrent writer left, so the next attempt writes
    /// against its version.
    async fn refresh_row(&self, loaded: &mut Loaded) -> Result<()> {
        if let Some(row) = self.store.get_result_by_attempt(&loaded.attempt.id).await? {
            debug!(version = row.version, "Result row refreshed after version race");
            loaded.row = row;
        }
        Ok(())
    }

    fn exhausted(&self, mut outcome: LoadOutcome, last_error: Option<LensError>) -> LoadOutcome {
        warn!(
            regenerations = outcome.regenerations,
            "Retries exhausted, showing degraded result"
        );
        outcome.trace.push(LoadState::RetryExhausted);
        outcome.error = Some(
            last_error
                .as_ref()
                .map(LensError::user_message)
                .unwrap_or_else(|| "Failed to regenerate report. Please try again.".to_string()),
        );
        outcome.last_error = last_error.map(|e| e.to_string());
        outcome
            .warnings
            .push(ValidationWarning::error("Automatic report regeneration failed").at("riasec.scores"));
        outcome
    }

    /// Score blocks already derived from answers, offered to the model as
    /// ground truth.
    fn prior_scores(result: &CanonicalResult) -> Option<Value> {
        let mut prior = Map::new();
        if let Some(aptitude) = &result.aptitude {
            prior.insert("aptitude".to_string(), serde_json::to_value(aptitude).ok()?);
        }
        if let Some(knowledge) = &result.knowledge {
            prior.insert("knowledge".to_string(), serde_json::to_value(knowledge).ok()?);
        }
        if let Some(big_five) = &result.big_five {
            prior.insert("bigFive".to_string(), serde_json::to_value(big_five).ok()?);
        }
        (!prior.is_empty()).then_some(Value::Object(prior))
    }

    fn student_context(attempt: &Attempt) -> Option<Value> {
        let mut context = Map::new();
        context.insert("gradeLevel".to_string(), Value::from(attempt.grade().as_str()));
        if let Some(stream) = &attempt.stream_id {
            context.insert("stream".to_string(), Value::from(stream.as_str()));
        }
        Some(Value::Object(context))
    }

    /// Regenerate, check, persist, and re-read. Output that is still
    /// degenerate after validation is not persisted.
    async fn regenerate_once(&self, loaded: &Loaded) -> Result<Reconciled> {
        let Loaded { attempt, row, bank } = loaded;
        let answers = &attempt.answers;

        let current = reconcile(row, answers, bank.as_ref());
        let request = RegenerationRequest::for_attempt(attempt, bank.clone().unwrap_or_default())
            .with_prior_scores(Self::prior_scores(&current.result))
            .with_student_context(Self::student_context(attempt));

        let blob = with_timeout(
            self.config.regeneration_timeout(),
            self.analysis.regenerate(&request),
            "analysis regeneration",
        )
        .await?;

        let mut candidate = row.clone();
        candidate.set_column("gemini_results", blob.clone());
        if !reconcile(&candidate, answers, bank.as_ref()).is_valid() {
            return Err(LensError::InvalidAnalysis(
                "regenerated interest scores are missing or all zero".to_string(),
            ));
        }

        let result_id = row
            .id
            .as_ref()
            .ok_or_else(|| LensError::Storage("result row has no id".to_string()))?;

        match self.store.update_analysis(result_id, &blob, row.version).await {
            Ok(version) => debug!(version, "Regenerated analysis persisted"),
            Err(LensError::VersionConflict { result_id, expected }) => {
                // Another writer finished first; its analysis is as good as ours
                // if it passes the same check.
                let winner = self.reread(&attempt.id, answers, bank.as_ref()).await?;
                if winner.is_valid() {
                    info!("Concurrent writer stored valid analysis");
                    return Ok(winner);
                }
                return Err(LensError::VersionConflict { result_id, expected });
            }
            Err(e) => return Err(e),
        }

        let fresh = self.reread(&attempt.id, answers, bank.as_ref()).await?;
        if fresh.is_valid() {
            Ok(fresh)
        } else {
            Err(LensError::InvalidAnalysis(
                "stored analysis failed validation on re-read".to_string(),
            ))
        }
    }

    async fn reread(
        &self,
        attempt_id: &AttemptId,
        answers: &Answers,
        bank: Option<&QuestionBank>,
    ) -> Result<Reconciled> {
        let row = self
            .store
            .get_result_by_attempt(attempt_id)
            .await?
            .ok_or_else(|| LensError::not_found("result", attempt_id.as_str()))?;
        Ok(reconcile(&row, answers, bank))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AnalysisService;
    use crate::storage::{AssessmentStore, Fixture, SqliteStore};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays scripted replies, then keeps failing.
    struct ScriptedAnalysis {
        replies: Mutex<VecDeque<Result<Value>>>,
        calls: AtomicU32,
        delay: Duration,
    }

    impl ScriptedAnalysis {
        fn new(replies: Vec<Result<Value>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicU32::new(0),
                delay: Duration::ZERO,
            })
        }

        fn slow(reply: Value, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(vec![Ok(reply)].into()),
                calls: AtomicU32::new(0),
                delay,
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AnalysisService for ScriptedAnalysis {
        async fn regenerate(&self, _request: &RegenerationRequest) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let reply = self.replies.lock().unwrap().pop_front();
            reply.unwrap_or(Err(LensError::EmptyAnalysis))
        }
    }

    fn good_blob() -> Value {
        json!({
            "riasec": {"scores": {"R": 4, "I": 14, "A": 10, "S": 6, "E": 3, "C": 2}},
            "overallSummary": "Investigative and creative",
            "careerFit": {"clusters": [{"title": "Research Scientist"}]}
        })
    }

    fn store_with(result: Value, answers: Value) -> Arc<SqliteStore> {
        let store = SqliteStore::open_in_memory().unwrap();
        let fixture: Fixture = serde_json::from_value(json!({
            "attempts": [{"id": "a1", "student_id": "s1", "grade_level": "after10", "answers": answers}],
            "results": [result]
        }))
        .unwrap();
        store.import(&fixture).unwrap();
        Arc::new(store)
    }

    fn orchestrator(store: Arc<SqliteStore>, analysis: Arc<ScriptedAnalysis>) -> RetryOrchestrator {
        orchestrator_on(store, analysis)
    }

    fn orchestrator_on(store: SharedStore, analysis: Arc<ScriptedAnalysis>) -> RetryOrchestrator {
        let config = RetryConfig {
            backoff_ms: 0,
            ..RetryConfig::default()
        };
        RetryOrchestrator::new(store, analysis, config)
    }

    /// Lets another writer store `winner` just before the first analysis
    /// write, so that write loses the version race.
    struct RacingStore {
        inner: Arc<SqliteStore>,
        winner: Mutex<Option<Value>>,
    }

    impl RacingStore {
        fn new(inner: Arc<SqliteStore>, winner: Value) -> Arc<Self> {
            Arc::new(Self {
                inner,
                winner: Mutex::new(Some(winner)),
            })
        }
    }

    #[async_trait]
    impl AssessmentStore for RacingStore {
        fn name(&self) -> &str {
            "racing"
        }

        async fn get_attempt(&self, id: &AttemptId) -> Result<Option<Attempt>> {
            self.inner.get_attempt(id).await
        }

        async fn get_result_by_attempt(&self, id: &AttemptId) -> Result<Option<ResultRow>> {
            self.inner.get_result_by_attempt(id).await
        }

        async fn latest_result(&self, student: &crate::types::StudentId) -> Result<Option<ResultRow>> {
            self.inner.latest_result(student).await
        }

        async fn questions(&self, stream: Option<&str>) -> Result<QuestionBank> {
            self.inner.questions(stream).await
        }

        async fn update_analysis(
            &self,
            result_id: &crate::types::ResultId,
            blob: &Value,
            expected_version: i64,
        ) -> Result<i64> {
            let winner = self.winner.lock().unwrap().take();
            if let Some(winner) = winner {
                self.inner
                    .update_analysis(result_id, &winner, expected_version)
                    .await?;
            }
            self.inner.update_analysis(result_id, blob, expected_version).await
        }
    }

    fn stored_blob(row: &ResultRow) -> Value {
        row.analysis_blob().unwrap().unwrap()
    }

    fn id() -> AttemptId {
        AttemptId::new("a1")
    }

    #[tokio::test]
    async fn test_empty_record_regenerates_once_and_succeeds() {
        let store = store_with(
            json!({"id": "r1", "attempt_id": "a1", "gemini_results": null}),
            json!({"riasec_q1": 5}),
        );
        let analysis = ScriptedAnalysis::new(vec![Ok(good_blob())]);
        let orchestrator = orchestrator(store.clone(), analysis.clone());

        let outcome = orchestrator.load(&id()).await.unwrap();
        assert_eq!(
            outcome.trace,
            vec![
                LoadState::LoadedMissingAnalysis,
                LoadState::Retrying,
                LoadState::RetrySucceeded,
                LoadState::LoadedValid
            ]
        );
        assert_eq!(analysis.calls(), 1);
        assert!(outcome.result.has_core_scores());
        assert_eq!(outcome.result.riasec.as_ref().unwrap().scores.i, 14.0);

        let row = store.get_result_by_attempt(&id()).await.unwrap().unwrap();
        assert_eq!(row.version, 1);
        assert!(row.analysis_blob().is_some());
    }

    #[tokio::test]
    async fn test_column_scores_need_no_regeneration() {
        let store = store_with(
            json!({"id": "r1", "attempt_id": "a1", "riasec_scores": {"R": 3, "S": 9}, "gemini_results": null}),
            json!({"riasec_q1": 5}),
        );
        let analysis = ScriptedAnalysis::new(vec![]);
        let orchestrator = orchestrator(store, analysis.clone());

        let outcome = orchestrator.load(&id()).await.unwrap();
        assert_eq!(outcome.trace, vec![LoadState::LoadedValid]);
        assert_eq!(outcome.result.riasec.as_ref().unwrap().scores.s, 9.0);
        assert_eq!(analysis.calls(), 0);
    }

    #[tokio::test]
    async fn test_three_failures_exhaust_without_fourth_call() {
        let store = store_with(
            json!({"id": "r1", "attempt_id": "a1", "riasec_scores": {"R": 0}}),
            json!({"riasec_q1": 5}),
        );
        let analysis = ScriptedAnalysis::new(vec![
            Err(LensError::EmptyAnalysis),
            Err(LensError::timeout("analysis regeneration", Duration::from_secs(1))),
            Ok(json!({"riasec": {"scores": {"R": 0}}})),
        ]);
        let orchestrator = orchestrator(store, analysis.clone());

        let outcome = orchestrator.load(&id()).await.unwrap();
        assert_eq!(outcome.state(), Some(LoadState::RetryExhausted));
        assert_eq!(outcome.regenerations, 3);
        assert_eq!(analysis.calls(), 3);
        assert_eq!(
            outcome.error.as_deref(),
            Some("Failed to regenerate report. Please try again.")
        );
        assert!(orchestrator.is_exhausted(&id()));

        // session marker: a second load makes no call
        let again = orchestrator.load(&id()).await.unwrap();
        assert_eq!(
            again.trace,
            vec![LoadState::LoadedMissingAnalysis, LoadState::RetryExhausted]
        );
        assert_eq!(analysis.calls(), 3);
        assert_eq!(orchestrator.attempts_used(&id()), 3);
        assert!(again.into_result().is_err());
    }

    #[tokio::test]
    async fn test_exactly_one_retrying_transition_per_cycle() {
        let store = store_with(
            json!({"id": "r1", "attempt_id": "a1"}),
            json!({"riasec_q1": 5}),
        );
        let analysis = ScriptedAnalysis::new(vec![Err(LensError::EmptyAnalysis), Ok(good_blob())]);
        let orchestrator = orchestrator(store, analysis.clone());

        let outcome = orchestrator.load(&id()).await.unwrap();
        let retrying = outcome.trace.iter().filter(|s| **s == LoadState::Retrying).count();
        assert_eq!(retrying, 1);
        assert_eq!(outcome.regenerations, 2);
        assert!(outcome.is_valid());
    }

    #[tokio::test]
    async fn test_manual_retry_clears_exhaustion() {
        let store = store_with(
            json!({"id": "r1", "attempt_id": "a1"}),
            json!({"riasec_q1": 5}),
        );
        let analysis = ScriptedAnalysis::new(vec![
            Err(LensError::EmptyAnalysis),
            Err(LensError::EmptyAnalysis),
            Err(LensError::EmptyAnalysis),
            Ok(good_blob()),
        ]);
        let orchestrator = orchestrator(store, analysis.clone());

        let first = orchestrator.load(&id()).await.unwrap();
        assert_eq!(first.state(), Some(LoadState::RetryExhausted));
        assert_eq!(first.error.as_deref(), Some("AI analysis returned no results"));

        let manual = orchestrator.manual_retry(&id()).await.unwrap();
        assert!(manual.is_valid());
        assert_eq!(analysis.calls(), 4);
        assert!(!orchestrator.is_exhausted(&id()));

        let reloaded = orchestrator.load(&id()).await.unwrap();
        assert_eq!(reloaded.trace, vec![LoadState::LoadedValid]);
    }

    #[tokio::test]
    async fn test_success_resets_budget_for_later_loads() {
        let store = store_with(
            json!({"id": "r1", "attempt_id": "a1"}),
            json!({"riasec_q1": 5}),
        );
        let analysis = ScriptedAnalysis::new(vec![
            Err(LensError::EmptyAnalysis),
            Err(LensError::EmptyAnalysis),
            Ok(good_blob()),
            Ok(good_blob()),
        ]);
        let orchestrator = orchestrator(store.clone(), analysis.clone());

        let first = orchestrator.load(&id()).await.unwrap();
        assert!(first.is_valid());
        assert_eq!(first.regenerations, 3);
        assert_eq!(orchestrator.attempts_used(&id()), 0);

        // the stored analysis degrades again later
        let row = store.get_result_by_attempt(&id()).await.unwrap().unwrap();
        store
            .update_analysis(row.id.as_ref().unwrap(), &json!({"riasec": {"scores": {"R": 0}}}), row.version)
            .await
            .unwrap();

        let second = orchestrator.load(&id()).await.unwrap();
        assert_eq!(
            second.trace,
            vec![
                LoadState::LoadedMissingAnalysis,
                LoadState::Retrying,
                LoadState::RetrySucceeded,
                LoadState::LoadedValid
            ]
        );
        assert_eq!(second.regenerations, 1);
        assert_eq!(analysis.calls(), 4);
    }

    #[tokio::test]
    async fn test_spent_budget_skips_retrying_state() {
        let store = store_with(
            json!({"id": "r1", "attempt_id": "a1"}),
            json!({"riasec_q1": 5}),
        );
        let analysis = ScriptedAnalysis::new(vec![]);
        let orchestrator = orchestrator(store, analysis.clone());

        let first = orchestrator.load(&id()).await.unwrap();
        assert_eq!(first.state(), Some(LoadState::RetryExhausted));
        assert_eq!(orchestrator.attempts_used(&id()), 3);

        let again = orchestrator.load(&id()).await.unwrap();
        assert!(!again.trace.contains(&LoadState::Retrying));
        assert_eq!(again.regenerations, 0);
        assert_eq!(analysis.calls(), 3);
    }

    #[tokio::test]
    async fn test_manual_retry_stays_outside_the_bound() {
        let store = store_with(
            json!({"id": "r1", "attempt_id": "a1"}),
            json!({"riasec_q1": 5}),
        );
        let analysis = ScriptedAnalysis::new(vec![]);
        let orchestrator = orchestrator(store, analysis.clone());

        orchestrator.load(&id()).await.unwrap();
        let manual = orchestrator.manual_retry(&id()).await.unwrap();
        assert_eq!(manual.state(), Some(LoadState::RetryExhausted));
        assert_eq!(analysis.calls(), 4);
        assert_eq!(orchestrator.attempts_used(&id()), 3);
        assert!(orchestrator.is_exhausted(&id()));
    }

    #[tokio::test]
    async fn test_lost_race_accepts_valid_winner() {
        let sqlite = store_with(
            json!({"id": "r1", "attempt_id": "a1"}),
            json!({"riasec_q1": 5}),
        );
        let winner = json!({"riasec": {"scores": {"R": 2, "I": 20, "A": 5, "S": 4, "E": 1, "C": 1}}});
        let store = RacingStore::new(Arc::clone(&sqlite), winner.clone());
        let analysis = ScriptedAnalysis::new(vec![Ok(good_blob())]);
        let orchestrator = orchestrator_on(store, analysis.clone());

        let outcome = orchestrator.load(&id()).await.unwrap();
        assert!(outcome.is_valid());
        assert_eq!(outcome.regenerations, 1);
        assert_eq!(outcome.result.riasec.as_ref().unwrap().scores.i, 20.0);
        assert_eq!(analysis.calls(), 1);

        let row = sqlite.get_result_by_attempt(&id()).await.unwrap().unwrap();
        assert_eq!(row.version, 1);
        assert_eq!(stored_blob(&row), winner);
    }

    #[tokio::test]
    async fn test_lost_race_to_degenerate_winner_counts_as_failure() {
        let sqlite = store_with(
            json!({"id": "r1", "attempt_id": "a1"}),
            json!({"riasec_q1": 5}),
        );
        let store = RacingStore::new(Arc::clone(&sqlite), json!({"riasec": {"scores": {"R": 0}}}));
        let analysis = ScriptedAnalysis::new(vec![Ok(good_blob()), Ok(good_blob())]);
        let orchestrator = orchestrator_on(store, analysis.clone());

        let outcome = orchestrator.load(&id()).await.unwrap();
        assert!(outcome.is_valid());
        assert_eq!(outcome.regenerations, 2);
        assert_eq!(analysis.calls(), 2);

        // second attempt wrote against the winner's version
        let row = sqlite.get_result_by_attempt(&id()).await.unwrap().unwrap();
        assert_eq!(row.version, 2);
        assert_eq!(stored_blob(&row)["riasec"]["scores"]["I"], 14);
    }

    #[tokio::test]
    async fn test_missing_answers_is_terminal() {
        let store = store_with(json!({"id": "r1", "attempt_id": "a1"}), json!({}));
        let analysis = ScriptedAnalysis::new(vec![Ok(good_blob())]);
        let orchestrator = orchestrator(store, analysis.clone());

        let err = orchestrator.load(&id()).await.unwrap_err();
        assert!(matches!(err, LensError::MissingAnswers { .. }));
        assert_eq!(
            err.user_message(),
            "No assessment data found. Please retake the assessment."
        );
        assert_eq!(analysis.calls(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_trigger_starts_no_second_regeneration() {
        let store = store_with(
            json!({"id": "r1", "attempt_id": "a1"}),
            json!({"riasec_q1": 5}),
        );
        let analysis = ScriptedAnalysis::slow(good_blob(), Duration::from_millis(200));
        let orchestrator = Arc::new(orchestrator(store, analysis.clone()));

        let first = {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move { orchestrator.load(&id()).await })
        };
        // wait until the first cycle holds the flag
        while !orchestrator.is_in_progress(&id()) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let second = orchestrator.load(&id()).await;
        assert!(matches!(second, Err(LensError::RetryInProgress { .. })));

        let first = first.await.unwrap().unwrap();
        assert!(first.is_valid());
        assert_eq!(analysis.calls(), 1);
        assert!(!orchestrator.is_in_progress(&id()));
    }

    #[tokio::test]
    async fn test_regeneration_deadline_counts_as_failure() {
        let store = store_with(
            json!({"id": "r1", "attempt_id": "a1"}),
            json!({"riasec_q1": 5}),
        );
        let analysis = ScriptedAnalysis::slow(good_blob(), Duration::from_secs(5));
        let config = RetryConfig {
            max_attempts: 1,
            regeneration_timeout_secs: 1,
            backoff_ms: 0,
        };
        let orchestrator = RetryOrchestrator::new(store, analysis, config);

        let outcome = orchestrator.load(&id()).await.unwrap();
        assert_eq!(outcome.state(), Some(LoadState::RetryExhausted));
        assert!(outcome.last_error.unwrap().contains("Timeout"));
    }

    #[tokio::test]
    async fn test_missing_result_row_is_not_found() {
        let store = store_with(json!({"id": "r1", "attempt_id": "other"}), json!({"riasec_q1": 5}));
        let orchestrator = orchestrator(store, ScriptedAnalysis::new(vec![]));
        assert!(matches!(
            orchestrator.load(&id()).await,
            Err(LensError::NotFound { kind: "result", .. })
        ));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(LoadState::RetryExhausted.to_string(), "Retry-Exhausted");
        assert!(LoadState::LoadedValid.is_terminal());
        assert!(!LoadState::Retrying.is_terminal());
    }
}
