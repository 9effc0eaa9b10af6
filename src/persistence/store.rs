//! SQLite-based run store

use crate::core::{ErrorKind, EventKind, StepOutcome, StepResult, Verdict};
use crate::persistence::{PersistenceBackend, RunSummary};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS runs (
        id TEXT PRIMARY KEY,
        pipeline_name TEXT NOT NULL,
        branch TEXT NOT NULL,
        commit_id TEXT NOT NULL,
        event TEXT NOT NULL,
        verdict TEXT NOT NULL,
        failure_kind TEXT,
        failure_step TEXT,
        failure_message TEXT,
        exit_code INTEGER,
        started_at TEXT NOT NULL,
        completed_at TEXT,
        attempted_steps INTEGER NOT NULL DEFAULT 0,
        total_steps INTEGER NOT NULL DEFAULT 0
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_runs_pipeline ON runs(pipeline_name)",
    "CREATE INDEX IF NOT EXISTS idx_runs_started_at ON runs(started_at)",
    r#"
    CREATE TABLE IF NOT EXISTS step_results (
        run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
        step_index INTEGER NOT NULL,
        name TEXT NOT NULL,
        always_run INTEGER NOT NULL,
        error_kind TEXT,
        error_message TEXT,
        exit_code INTEGER,
        output TEXT NOT NULL,
        output_truncated INTEGER NOT NULL,
        started_at TEXT NOT NULL,
        duration_ms INTEGER NOT NULL,
        PRIMARY KEY (run_id, step_index)
    )
    "#,
];

const SUMMARY_COLUMNS: &str = "id, pipeline_name, branch, commit_id, event, verdict, failure_kind, \
     failure_step, failure_message, exit_code, started_at, completed_at, attempted_steps, total_steps";

/// SQLite run store
pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    /// Open (or create) a store at `db_path`
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database {}", db_path.display()))?;

        Self::with_pool(pool).await
    }

    /// A private in-memory store
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        // Every connection would otherwise get its own empty database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to open in-memory database")?;

        Self::with_pool(pool).await
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        Self::new(Self::default_path()).await
    }

    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cirun")
            .join("runs.db")
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to initialize schema")?;
        }
        Ok(())
    }

    /// Convert DateTime<Utc> to NaiveDateTime for SQLite
    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    /// Convert NaiveDateTime to DateTime<Utc>
    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn summary_from_row(row: &SqliteRow) -> Result<RunSummary> {
        let event: String = row.get("event");
        Ok(RunSummary {
            run_id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            pipeline_name: row.get("pipeline_name"),
            branch: row.get("branch"),
            commit: row.get("commit_id"),
            event: EventKind::from_str(&event).map_err(|e| anyhow!(e))?,
            verdict: parse_verdict(&row.get::<String, _>("verdict"))?,
            failure_kind: row
                .get::<Option<String>, _>("failure_kind")
                .as_deref()
                .map(parse_error_kind)
                .transpose()?,
            failure_step: row.get("failure_step"),
            failure_message: row.get("failure_message"),
            exit_code: row.get::<Option<i64>, _>("exit_code").map(|c| c as i32),
            started_at: Self::from_naive(row.get("started_at")),
            completed_at: row
                .get::<Option<NaiveDateTime>, _>("completed_at")
                .map(Self::from_naive),
            attempted_steps: row.get::<i64, _>("attempted_steps") as usize,
            total_steps: row.get::<i64, _>("total_steps") as usize,
        })
    }

    fn step_from_row(row: &SqliteRow) -> Result<StepResult> {
        let outcome = match row.get::<Option<String>, _>("error_kind") {
            None => StepOutcome::Success,
            Some(kind) => StepOutcome::Failed {
                kind: parse_error_kind(&kind)?,
                message: row
                    .get::<Option<String>, _>("error_message")
                    .unwrap_or_default(),
            },
        };

        Ok(StepResult {
            index: row.get::<i64, _>("step_index") as usize,
            name: row.get("name"),
            always_run: row.get("always_run"),
            outcome,
            exit_code: row.get::<Option<i64>, _>("exit_code").map(|c| c as i32),
            output: row.get("output"),
            output_truncated: row.get("output_truncated"),
            started_at: Self::from_naive(row.get("started_at")),
            duration_ms: row.get::<i64, _>("duration_ms") as u64,
        })
    }
}

fn parse_verdict(s: &str) -> Result<Verdict> {
    match s {
        "pending" => Ok(Verdict::Pending),
        "running" => Ok(Verdict::Running),
        "success" => Ok(Verdict::Success),
        "failure" => Ok(Verdict::Failure),
        other => Err(anyhow!("Unknown verdict in database: {}", other)),
    }
}

fn parse_error_kind(s: &str) -> Result<ErrorKind> {
    match s {
        "ProvisionError" => Ok(ErrorKind::ProvisionError),
        "DependencyUnmet" => Ok(ErrorKind::DependencyUnmet),
        "StepFailure" => Ok(ErrorKind::StepFailure),
        "Timeout" => Ok(ErrorKind::Timeout),
        "Cancelled" => Ok(ErrorKind::Cancelled),
        other => Err(anyhow!("Unknown error kind in database: {}", other)),
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for SqliteRunStore {
    async fn save_run(&self, summary: &RunSummary, steps: &[StepResult]) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;
        let run_id = summary.run_id.to_string();

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO runs
            (id, pipeline_name, branch, commit_id, event, verdict, failure_kind, failure_step,
             failure_message, exit_code, started_at, completed_at, attempted_steps, total_steps)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(&run_id)
        .bind(&summary.pipeline_name)
        .bind(&summary.branch)
        .bind(&summary.commit)
        .bind(summary.event.to_string())
        .bind(summary.verdict.to_string())
        .bind(summary.failure_kind.map(|k| k.to_string()))
        .bind(&summary.failure_step)
        .bind(&summary.failure_message)
        .bind(summary.exit_code.map(i64::from))
        .bind(Self::to_naive(summary.started_at))
        .bind(summary.completed_at.map(Self::to_naive))
        .bind(summary.attempted_steps as i64)
        .bind(summary.total_steps as i64)
        .execute(&mut *tx)
        .await
        .context("Failed to save run")?;

        sqlx::query("DELETE FROM step_results WHERE run_id = ?1")
            .bind(&run_id)
            .execute(&mut *tx)
            .await
            .context("Failed to clear step results")?;

        for step in steps {
            sqlx::query(
                r#"
                INSERT INTO step_results
                (run_id, step_index, name, always_run, error_kind, error_message, exit_code,
                 output, output_truncated, started_at, duration_ms)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
            )
            .bind(&run_id)
            .bind(step.index as i64)
            .bind(&step.name)
            .bind(step.always_run)
            .bind(step.error_kind().map(|k| k.to_string()))
            .bind(step.error_message())
            .bind(step.exit_code.map(i64::from))
            .bind(&step.output)
            .bind(step.output_truncated)
            .bind(Self::to_naive(step.started_at))
            .bind(step.duration_ms as i64)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to save result of step {}", step.name))?;
        }

        tx.commit().await.context("Failed to commit run")?;
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        let row = sqlx::query(&format!("SELECT {} FROM runs WHERE id = ?1", SUMMARY_COLUMNS))
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load run")?;

        row.as_ref().map(Self::summary_from_row).transpose()
    }

    async fn list_runs(&self, pipeline_name: &str) -> Result<Vec<RunSummary>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM runs WHERE pipeline_name = ?1 ORDER BY started_at DESC",
            SUMMARY_COLUMNS
        ))
        .bind(pipeline_name)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list runs")?;

        rows.iter().map(Self::summary_from_row).collect()
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT pipeline_name
            FROM runs
            ORDER BY pipeline_name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list pipelines")?;

        Ok(rows.iter().map(|row| row.get("pipeline_name")).collect())
    }

    async fn load_step_results(&self, run_id: Uuid) -> Result<Vec<StepResult>> {
        let rows = sqlx::query(
            r#"
            SELECT step_index, name, always_run, error_kind, error_message, exit_code,
                   output, output_truncated, started_at, duration_ms
            FROM step_results
            WHERE run_id = ?1
            ORDER BY step_index ASC
            "#,
        )
        .bind(run_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to load step results")?;

        rows.iter().map(Self::step_from_row).collect()
    }
}
