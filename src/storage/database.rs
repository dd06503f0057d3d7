//! SQLite assessment store with connection pooling.
//!
//! - Connection pooling via r2d2 for concurrent access
//! - WAL mode, busy timeout
//! - Version-tracked migrations (`PRAGMA user_version`)
//! - Compare-and-set analysis writes on the row `version`
//!
//! rusqlite is blocking; every trait method runs on the blocking pool.

use std::path::Path;

use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::{AssessmentStore, Fixture, ImportSummary};
use crate::types::{
    Attempt, AttemptId, LensError, Question, QuestionBank, Result, ResultExt, ResultId, ResultRow,
    StudentId, log_filter_warn,
};

const SCHEMA: &str = include_str!("schema.sql");

/// Current schema version for migration tracking
const SCHEMA_VERSION: u32 = 2;

/// Column holding the AI blob; everything else goes into `columns`
const BLOB_COLUMN: &str = "gemini_results";

struct Migration {
    version: u32,
    description: &'static str,
    up: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Add version column for optimistic concurrency",
        up: "ALTER TABLE results ADD COLUMN version INTEGER NOT NULL DEFAULT 0",
    },
    Migration {
        version: 2,
        description: "Index results by student",
        up: "CREATE INDEX IF NOT EXISTS idx_results_student ON results(student_id, created_at)",
    },
];

/// Connection pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_size: u32,
    pub min_idle: u32,
    /// Timeout for acquiring a connection (seconds)
    pub connection_timeout_secs: u64,
}

impl PoolConfig {
    const MIN_POOL_SIZE: u32 = 2;
    const MAX_POOL_SIZE: u32 = 16;

    /// `clamp(cores * 2, MIN, MAX)`
    pub fn optimal_pool_size() -> u32 {
        let cores = std::thread::available_parallelism()
            .map(|p| p.get() as u32)
            .unwrap_or(2);
        (cores * 2).clamp(Self::MIN_POOL_SIZE, Self::MAX_POOL_SIZE)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        let max_size = Self::optimal_pool_size();
        Self {
            max_size,
            min_idle: (max_size / 4).max(1),
            connection_timeout_secs: 30,
        }
    }
}

/// Row counts shown by `careerlens status`
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub attempts: u64,
    pub results: u64,
    pub results_without_analysis: u64,
    pub questions: u64,
    pub schema_version: u32,
}

/// Thread-safe SQLite store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, PoolConfig::default())
    }

    pub fn open_with_config<P: AsRef<Path>>(path: P, config: PoolConfig) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let manager =
            SqliteConnectionManager::file(path.as_ref()).with_init(Self::configure_connection);

        let pool = Pool::builder()
            .max_size(config.max_size)
            .min_idle(Some(config.min_idle))
            .connection_timeout(std::time::Duration::from_secs(
                config.connection_timeout_secs,
            ))
            .build(manager)
            .map_err(|e| LensError::Storage(format!("Failed to create connection pool: {}", e)))?;

        let store = Self { pool };
        store.initialize()?;
        Ok(store)
    }

    /// In-memory store for tests and dry runs. One connection, so every
    /// caller sees the same database.
    pub fn open_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| LensError::Storage(format!("Failed to create in-memory pool: {}", e)))?;

        let store = Self { pool };
        store.initialize()?;
        Ok(store)
    }

    fn configure_connection(conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA wal_autocheckpoint = 1000;
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| {
            LensError::Storage(format!("Failed to acquire database connection: {}", e))
        })
    }

    /// Create the schema on a fresh database, migrate an existing one.
    fn initialize(&self) -> Result<()> {
        let conn = self.conn()?;
        let current: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        let existing: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'results')",
                [],
                |row| row.get(0),
            )
            .with_context("Failed to inspect schema")?;
        if existing && current < SCHEMA_VERSION {
            Self::migrate(&conn, current)?;
        }

        conn.execute_batch(SCHEMA)
            .with_context("Failed to initialize database schema")?;

        if current < SCHEMA_VERSION {
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                .with_context("Failed to set schema version")?;
        }
        Ok(())
    }

    fn migrate(conn: &Connection, current: u32) -> Result<()> {
        for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
            conn.execute_batch(migration.up).with_context_fn(|| {
                format!(
                    "Failed to apply migration {}: {}",
                    migration.version, migration.description
                )
            })?;
            info!(
                "Applied migration {}: {}",
                migration.version, migration.description
            );
        }
        Ok(())
    }

    /// Run a blocking closure against a pooled connection off the async runtime.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            let conn = store.conn()?;
            f(&conn)
        })
        .await
        .map_err(|e| LensError::Storage(format!("Database task failed: {}", e)))?
    }

    // =========================================================================
    // Reads
    // =========================================================================

    fn read_attempt(conn: &Connection, id: &str) -> Result<Option<Attempt>> {
        let row = conn
            .query_row(
                "SELECT id, student_id, stream_id, grade_level, status, answers, section_timings
                 FROM attempts WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()
            .with_context("Failed to load attempt")?;

        let Some((id, student_id, stream_id, grade_level, status, answers, timings)) = row else {
            return Ok(None);
        };

        Ok(Some(Attempt {
            answers: serde_json::from_str(&answers)
                .with_context_fn(|| format!("Corrupted answers for attempt {}", id))?,
            section_timings: serde_json::from_str(&timings).unwrap_or_default(),
            id: AttemptId::new(id),
            student_id: student_id.map(StudentId::new),
            stream_id,
            grade_level,
            status,
        }))
    }

    fn read_result(conn: &Connection, filter: &str, key: &str) -> Result<Option<ResultRow>> {
        let sql = format!(
            "SELECT id, attempt_id, student_id, grade_level, stream_id, status, columns,
                    gemini_results, version
             FROM results WHERE {} ORDER BY created_at DESC LIMIT 1",
            filter
        );
        let row = conn
            .query_row(&sql, params![key], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, i64>(8)?,
                ))
            })
            .optional()
            .with_context("Failed to load result")?;

        let Some((id, attempt_id, student_id, grade_level, stream_id, status, columns, blob, version)) =
            row
        else {
            return Ok(None);
        };

        let mut columns: BTreeMap<String, Value> = serde_json::from_str(&columns)
            .with_context_fn(|| format!("Corrupted columns for result {}", id))?;
        if let Some(blob) = blob {
            let value = serde_json::from_str(&blob).unwrap_or(Value::String(blob));
            columns.insert(BLOB_COLUMN.to_string(), value);
        }

        Ok(Some(ResultRow {
            id: Some(ResultId::new(id)),
            attempt_id: Some(AttemptId::new(attempt_id)),
            student_id: student_id.map(StudentId::new),
            grade_level,
            stream_id,
            status,
            version,
            columns,
        }))
    }

    fn read_questions(conn: &Connection) -> Result<QuestionBank> {
        let mut stmt = conn
            .prepare("SELECT data FROM questions ORDER BY section, id")
            .with_context("Failed to prepare question query")?;
        let questions = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .filter_map(|r| log_filter_warn(r, "Skipping unreadable question row"))
            .filter_map(|data| {
                log_filter_warn(
                    serde_json::from_str::<Question>(&data),
                    "Skipping malformed question",
                )
            })
            .collect();
        Ok(QuestionBank::new(questions))
    }

    // =========================================================================
    // Writes
    // =========================================================================

    fn write_analysis(
        conn: &Connection,
        result_id: &str,
        blob: &Value,
        expected_version: i64,
    ) -> Result<i64> {
        let now = chrono::Utc::now().to_rfc3339();
        let changed = conn
            .execute(
                "UPDATE results
                 SET gemini_results = ?1, version = version + 1, updated_at = ?2,
                     status = COALESCE(status, 'completed')
                 WHERE id = ?3 AND version = ?4",
                params![blob.to_string(), now, result_id, expected_version],
            )
            .with_context("Failed to update analysis")?;

        if changed == 1 {
            debug!(result_id, version = expected_version + 1, "Analysis stored");
            return Ok(expected_version + 1);
        }

        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM results WHERE id = ?1)",
                params![result_id],
                |row| row.get(0),
            )
            .with_context("Failed to check result")?;
        if exists {
            warn!(result_id, expected_version, "Analysis write lost a version race");
            Err(LensError::VersionConflict {
                result_id: result_id.to_string(),
                expected: expected_version,
            })
        } else {
            Err(LensError::not_found("result", result_id))
        }
    }

    /// Load a fixture file's attempts, results, and questions. Existing rows
    /// with the same ids are replaced.
    pub fn import(&self, fixture: &Fixture) -> Result<ImportSummary> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .with_context("Failed to start transaction")?;
        let now = chrono::Utc::now().to_rfc3339();
        let mut summary = ImportSummary::default();

        for attempt in &fixture.attempts {
            tx.execute(
                "INSERT OR REPLACE INTO attempts
                 (id, student_id, stream_id, grade_level, status, answers, section_timings, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    attempt.id.as_str(),
                    attempt.student_id.as_ref().map(|s| s.as_str()),
                    attempt.stream_id,
                    attempt.grade_level,
                    attempt.status,
                    serde_json::to_string(&attempt.answers)?,
                    serde_json::to_string(&attempt.section_timings)?,
                    now,
                ],
            )
            .with_context_fn(|| format!("Failed to import attempt {}", attempt.id))?;
            summary.attempts += 1;
        }

        for row in &fixture.results {
            let Some(attempt_id) = &row.attempt_id else {
                warn!(id = ?row.id, "Skipping result without attempt_id");
                summary.skipped += 1;
                continue;
            };
            let id = row
                .id
                .clone()
                .unwrap_or_else(|| ResultId::new(uuid::Uuid::new_v4().to_string()));

            let mut columns = row.columns.clone();
            let blob = columns
                .remove(BLOB_COLUMN)
                .filter(|v| !v.is_null())
                .map(|v| v.to_string());
            let created_at = columns
                .get("created_at")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| now.clone());

            tx.execute(
                "INSERT OR REPLACE INTO results
                 (id, attempt_id, student_id, grade_level, stream_id, status, columns,
                  gemini_results, version, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    id.as_str(),
                    attempt_id.as_str(),
                    row.student_id.as_ref().map(|s| s.as_str()),
                    row.grade_level,
                    row.stream_id,
                    row.status,
                    serde_json::to_string(&columns)?,
                    blob,
                    row.version,
                    created_at,
                    now,
                ],
            )
            .with_context_fn(|| format!("Failed to import result {}", id))?;
            summary.results += 1;
        }

        for question in &fixture.questions {
            tx.execute(
                "INSERT OR REPLACE INTO questions (id, section, stream, data)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    question.id,
                    question.section.name(),
                    question.stream,
                    serde_json::to_string(question)?,
                ],
            )
            .with_context_fn(|| format!("Failed to import question {}", question.id))?;
            summary.questions += 1;
        }

        tx.commit().with_context("Failed to commit import")?;
        info!(
            attempts = summary.attempts,
            results = summary.results,
            questions = summary.questions,
            "Fixture imported"
        );
        Ok(summary)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn()?;
        let count = |sql: &str| -> Result<u64> {
            conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                .map(|n| n.max(0) as u64)
                .with_context("Failed to count rows")
        };
        Ok(StoreStats {
            attempts: count("SELECT COUNT(*) FROM attempts")?,
            results: count("SELECT COUNT(*) FROM results")?,
            results_without_analysis: count(
                "SELECT COUNT(*) FROM results WHERE gemini_results IS NULL",
            )?,
            questions: count("SELECT COUNT(*) FROM questions")?,
            schema_version: conn
                .pragma_query_value(None, "user_version", |row| row.get(0))
                .unwrap_or(0),
        })
    }
}

#[async_trait]
impl AssessmentStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get_attempt(&self, id: &AttemptId) -> Result<Option<Attempt>> {
        let id = id.as_str().to_string();
        self.blocking(move |conn| Self::read_attempt(conn, &id)).await
    }

    async fn get_result_by_attempt(&self, id: &AttemptId) -> Result<Option<ResultRow>> {
        let id = id.as_str().to_string();
        self.blocking(move |conn| Self::read_result(conn, "attempt_id = ?1", &id))
            .await
    }

    async fn latest_result(&self, student: &StudentId) -> Result<Option<ResultRow>> {
        let student = student.as_str().to_string();
        self.blocking(move |conn| Self::read_result(conn, "student_id = ?1", &student))
            .await
    }

    async fn questions(&self, stream: Option<&str>) -> Result<QuestionBank> {
        let stream = stream.map(String::from);
        let bank = self.blocking(Self::read_questions).await?;
        Ok(bank.for_stream(stream.as_deref()))
    }

    async fn update_analysis(
        &self,
        result_id: &ResultId,
        blob: &Value,
        expected_version: i64,
    ) -> Result<i64> {
        let id = result_id.as_str().to_string();
        let blob = blob.clone();
        self.blocking(move |conn| Self::write_analysis(conn, &id, &blob, expected_version))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn fixture() -> Fixture {
        serde_json::from_value(json!({
            "attempts": [{
                "id": "a1",
                "student_id": "s1",
                "stream": "science",
                "grade_level": "after12",
                "answers": {"riasec_q1": 5, "knowledge_k1": "A"},
                "section_timings": {"riasec": 120.5}
            }],
            "results": [
                {"id": "r1", "attempt_id": "a1", "student_id": "s1", "riasec_scores": {"R": 3}, "gemini_results": "{broken"},
                {"id": "r2"}
            ],
            "questions": [
                {"id": "q1", "section": "riasec", "type": "R"},
                {"id": "k1", "section": "knowledge", "stream": "science", "correct": "A"},
                {"id": "k2", "section": "knowledge", "stream": "commerce", "correct": "B"}
            ]
        }))
        .unwrap()
    }

    fn store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.import(&fixture()).unwrap();
        store
    }

    #[test]
    fn test_schema_and_version() {
        let store = SqliteStore::open_in_memory().unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.schema_version, SCHEMA_VERSION);
        assert_eq!(stats.results, 0);
    }

    #[test]
    fn test_import_summary() {
        let store = SqliteStore::open_in_memory().unwrap();
        let summary = store.import(&fixture()).unwrap();
        assert_eq!(summary.attempts, 1);
        assert_eq!(summary.results, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.questions, 3);
    }

    #[tokio::test]
    async fn test_attempt_round_trip() {
        let store = store();
        let attempt = store.get_attempt(&AttemptId::new("a1")).await.unwrap().unwrap();
        assert_eq!(attempt.stream_id.as_deref(), Some("science"));
        assert_eq!(attempt.answers.len(), 2);
        assert_eq!(attempt.section_timings["riasec"], 120.5);
        assert!(store.get_attempt(&AttemptId::new("zz")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_blob_survives_storage() {
        let store = store();
        let row = store
            .get_result_by_attempt(&AttemptId::new("a1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.columns["gemini_results"], json!("{broken"));
        assert!(row.analysis_blob().unwrap().is_err());
        assert_eq!(row.column("riasec_scores"), Some(&json!({"R": 3})));
    }

    #[tokio::test]
    async fn test_questions_filtered_by_stream() {
        let store = store();
        let bank = store.questions(Some("science")).await.unwrap();
        assert_eq!(bank.len(), 2);
    }

    #[tokio::test]
    async fn test_update_analysis_compare_and_set() {
        let store = store();
        let id = ResultId::new("r1");
        let blob = json!({"riasec": {"scores": {"I": 8}}});

        let version = store.update_analysis(&id, &blob, 0).await.unwrap();
        assert_eq!(version, 1);

        let stale = store.update_analysis(&id, &blob, 0).await;
        assert!(matches!(stale, Err(LensError::VersionConflict { expected: 0, .. })));

        let missing = store.update_analysis(&ResultId::new("nope"), &blob, 0).await;
        assert!(matches!(missing, Err(LensError::NotFound { .. })));

        let row = store.latest_result(&StudentId::new("s1")).await.unwrap().unwrap();
        assert_eq!(row.version, 1);
        assert_eq!(row.columns["gemini_results"]["riasec"]["scores"]["I"], 8);
        assert_eq!(store.stats().unwrap().results_without_analysis, 0);
    }

    #[test]
    fn test_on_disk_store_reopens() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("lens.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.import(&fixture()).unwrap();
        }
        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.stats().unwrap().attempts, 1);
    }

    #[test]
    fn test_old_database_is_migrated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("old.db");
        Connection::open(&path)
            .unwrap()
            .execute_batch(
                "CREATE TABLE results (id TEXT PRIMARY KEY, attempt_id TEXT NOT NULL UNIQUE,
                    student_id TEXT, grade_level TEXT, stream_id TEXT, status TEXT,
                    columns TEXT NOT NULL DEFAULT '{}', gemini_results TEXT,
                    created_at TEXT NOT NULL, updated_at TEXT NOT NULL);",
            )
            .unwrap();

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.stats().unwrap().schema_version, SCHEMA_VERSION);

        let conn = store.conn().unwrap();
        let has_version: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM pragma_table_info('results') WHERE name = 'version'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(has_version);
    }
}
