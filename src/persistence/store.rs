//! SQLite-based persistence store

use crate::core::{ExecutionStatus, FlowExecution, FlowId, PipelineExecution};
use crate::persistence::ExecutionRepository;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

const FLOW_COLUMNS: &str = "id, flow_id, status, start_time, end_time, runtime_variables, \
     is_replay, original_execution_id, created_at";

const PIPELINE_COLUMNS: &str = "id, flow_id, flow_execution_id, flow_step_id, pipeline_id, \
     pipeline_url, start_time, end_time, configured_test_data, runtime_test_data, status, \
     is_replay, carried, original_execution_id, resume_time, created_at";

/// SQLite execution store
pub struct SqliteExecutionStore {
    pool: SqlitePool,
}

impl SqliteExecutionStore {
    /// Open (or create) a store at `db_path`; `:memory:` gives a private
    /// in-memory database
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        let in_memory = db_path == Path::new(":memory:");

        let options = if in_memory {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new()
                .filename(db_path)
                .create_if_missing(true)
        };

        // An in-memory database lives and dies with its single connection
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 4 })
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let db_dir = data_dir.join("orchestrator");
        std::fs::create_dir_all(&db_dir)
            .with_context(|| format!("Failed to create {}", db_dir.display()))?;

        Self::new(db_dir.join("executions.db")).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS flow_executions (
                id TEXT PRIMARY KEY,
                flow_id INTEGER NOT NULL,
                status TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT,
                runtime_variables TEXT NOT NULL DEFAULT '{}',
                is_replay INTEGER NOT NULL DEFAULT 0,
                original_execution_id TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS pipeline_executions (
                id TEXT PRIMARY KEY,
                flow_id INTEGER NOT NULL,
                flow_execution_id TEXT NOT NULL,
                flow_step_id INTEGER NOT NULL,
                pipeline_id INTEGER,
                pipeline_url TEXT,
                start_time TEXT NOT NULL,
                end_time TEXT,
                configured_test_data TEXT NOT NULL DEFAULT '{}',
                runtime_test_data TEXT NOT NULL DEFAULT '{}',
                status TEXT NOT NULL,
                is_replay INTEGER NOT NULL DEFAULT 0,
                carried INTEGER NOT NULL DEFAULT 0,
                original_execution_id TEXT,
                resume_time TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_flow_exec_flow ON flow_executions(flow_id);
            CREATE INDEX IF NOT EXISTS idx_flow_exec_status ON flow_executions(status);
            CREATE INDEX IF NOT EXISTS idx_flow_exec_created ON flow_executions(created_at);
            CREATE INDEX IF NOT EXISTS idx_pipeline_exec_parent ON pipeline_executions(flow_execution_id);
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to initialize schema")?;

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

    fn to_json(map: &HashMap<String, String>) -> Result<String> {
        serde_json::to_string(map).context("Failed to encode variables")
    }

    fn from_json(text: &str) -> Result<HashMap<String, String>> {
        serde_json::from_str(text).context("Failed to decode stored variables")
    }

    fn parse_status(text: &str) -> Result<ExecutionStatus> {
        text.parse().map_err(|e: String| anyhow!(e))
    }

    fn parse_uuid(text: Option<String>) -> Result<Option<Uuid>> {
        text.map(|s| Uuid::parse_str(&s))
            .transpose()
            .context("Invalid stored UUID")
    }

    fn flow_from_row(row: &SqliteRow) -> Result<FlowExecution> {
        Ok(FlowExecution {
            id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            flow_id: row.get::<i64, _>("flow_id") as FlowId,
            status: Self::parse_status(&row.get::<String, _>("status"))?,
            start_time: Self::from_naive(row.get("start_time")),
            end_time: row
                .get::<Option<NaiveDateTime>, _>("end_time")
                .map(Self::from_naive),
            runtime_variables: Self::from_json(&row.get::<String, _>("runtime_variables"))?,
            is_replay: row.get("is_replay"),
            original_execution_id: Self::parse_uuid(row.get("original_execution_id"))?,
            created_at: Self::from_naive(row.get("created_at")),
        })
    }

    fn pipeline_from_row(row: &SqliteRow) -> Result<PipelineExecution> {
        Ok(PipelineExecution {
            id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            flow_id: row.get::<i64, _>("flow_id") as FlowId,
            flow_execution_id: Uuid::parse_str(&row.get::<String, _>("flow_execution_id"))?,
            flow_step_id: row.get::<i64, _>("flow_step_id") as u64,
            pipeline_id: row.get::<Option<i64>, _>("pipeline_id").map(|id| id as u64),
            pipeline_url: row.get("pipeline_url"),
            start_time: Self::from_naive(row.get("start_time")),
            end_time: row
                .get::<Option<NaiveDateTime>, _>("end_time")
                .map(Self::from_naive),
            configured_test_data: Self::from_json(&row.get::<String, _>("configured_test_data"))?,
            runtime_test_data: Self::from_json(&row.get::<String, _>("runtime_test_data"))?,
            status: Self::parse_status(&row.get::<String, _>("status"))?,
            is_replay: row.get("is_replay"),
            carried: row.get("carried"),
            original_execution_id: Self::parse_uuid(row.get("original_execution_id"))?,
            resume_time: row
                .get::<Option<NaiveDateTime>, _>("resume_time")
                .map(Self::from_naive),
            created_at: Self::from_naive(row.get("created_at")),
        })
    }
}

#[async_trait::async_trait]
impl ExecutionRepository for SqliteExecutionStore {
    async fn save_flow_execution(&self, execution: &FlowExecution) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO flow_executions
            (id, flow_id, status, start_time, end_time, runtime_variables, is_replay, original_execution_id, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                end_time = excluded.end_time,
                runtime_variables = excluded.runtime_variables
            "#,
        )
        .bind(execution.id.to_string())
        .bind(execution.flow_id as i64)
        .bind(execution.status.as_str())
        .bind(Self::to_naive(execution.start_time))
        .bind(execution.end_time.map(Self::to_naive))
        .bind(Self::to_json(&execution.runtime_variables)?)
        .bind(execution.is_replay)
        .bind(execution.original_execution_id.map(|id| id.to_string()))
        .bind(Self::to_naive(execution.created_at))
        .execute(&self.pool)
        .await
        .context("Failed to save flow execution")?;

        Ok(())
    }

    async fn find_flow_execution(&self, id: Uuid) -> Result<Option<FlowExecution>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM flow_executions WHERE id = ?1",
            FLOW_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load flow execution")?;

        row.as_ref().map(Self::flow_from_row).transpose()
    }

    async fn flow_executions_for_flow(&self, flow_id: FlowId) -> Result<Vec<FlowExecution>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM flow_executions WHERE flow_id = ?1 ORDER BY created_at ASC, rowid ASC",
            FLOW_COLUMNS
        ))
        .bind(flow_id as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list flow executions")?;

        rows.iter().map(Self::flow_from_row).collect()
    }

    async fn flow_executions_with_status(&self, status: ExecutionStatus) -> Result<Vec<FlowExecution>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM flow_executions WHERE status = ?1 ORDER BY created_at ASC, rowid ASC",
            FLOW_COLUMNS
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list flow executions by status")?;

        rows.iter().map(Self::flow_from_row).collect()
    }

    async fn recent_flow_executions(&self, limit: usize) -> Result<Vec<FlowExecution>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM flow_executions ORDER BY created_at DESC, rowid DESC LIMIT ?1",
            FLOW_COLUMNS
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list recent flow executions")?;

        rows.iter().map(Self::flow_from_row).collect()
    }

    async fn save_pipeline_execution(&self, record: &PipelineExecution) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pipeline_executions
            (id, flow_id, flow_execution_id, flow_step_id, pipeline_id, pipeline_url, start_time, end_time,
             configured_test_data, runtime_test_data, status, is_replay, carried, original_execution_id,
             resume_time, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            ON CONFLICT(id) DO UPDATE SET
                pipeline_id = excluded.pipeline_id,
                pipeline_url = excluded.pipeline_url,
                start_time = excluded.start_time,
                end_time = excluded.end_time,
                configured_test_data = excluded.configured_test_data,
                runtime_test_data = excluded.runtime_test_data,
                status = excluded.status,
                resume_time = excluded.resume_time
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.flow_id as i64)
        .bind(record.flow_execution_id.to_string())
        .bind(record.flow_step_id as i64)
        .bind(record.pipeline_id.map(|id| id as i64))
        .bind(record.pipeline_url.as_deref())
        .bind(Self::to_naive(record.start_time))
        .bind(record.end_time.map(Self::to_naive))
        .bind(Self::to_json(&record.configured_test_data)?)
        .bind(Self::to_json(&record.runtime_test_data)?)
        .bind(record.status.as_str())
        .bind(record.is_replay)
        .bind(record.carried)
        .bind(record.original_execution_id.map(|id| id.to_string()))
        .bind(record.resume_time.map(Self::to_naive))
        .bind(Self::to_naive(record.created_at))
        .execute(&self.pool)
        .await
        .context("Failed to save pipeline execution")?;

        Ok(())
    }

    async fn find_pipeline_execution(&self, id: Uuid) -> Result<Option<PipelineExecution>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM pipeline_executions WHERE id = ?1",
            PIPELINE_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load pipeline execution")?;

        row.as_ref().map(Self::pipeline_from_row).transpose()
    }

    async fn pipeline_executions_for(&self, flow_execution_id: Uuid) -> Result<Vec<PipelineExecution>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM pipeline_executions WHERE flow_execution_id = ?1 ORDER BY created_at ASC, rowid ASC",
            PIPELINE_COLUMNS
        ))
        .bind(flow_execution_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list pipeline executions")?;

        rows.iter().map(Self::pipeline_from_row).collect()
    }
}
