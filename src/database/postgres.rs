//! # PostgreSQL Store
//!
//! [`PipelineStore`] over a SQLx pool. Item compare-and-swap is a single
//! `UPDATE ... WHERE item_id = $1 AND lock_version = $2`; zero affected rows
//! means a concurrent writer won.
//!
//! Schema lives in `migrations/` and is embedded through [`MIGRATOR`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use super::PipelineStore;
use crate::config::DatabaseConfig;
use crate::error::{PipelineError, Result};
use crate::models::{
    AuditLogEntry, Item, MediaKind, NewAuditLogEntry, NewItem, NewTask, Task, TaskFlow,
};
use crate::state_machine::{
    ItemState, ItemStep, StageProgress, StateMachineError, TaskStatus, TranscriptQuality,
};

/// Embedded schema migrations
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const TASK_COLUMNS: &str = "task_id, owner_id, name, status, flow, created_at, updated_at";

const ITEM_COLUMNS: &str = "item_id, task_id, filename, size_bytes, media_kind, source_url, \
     voice_url, clear_url, transcript, language, total_voice_seconds, effective_voice_seconds, \
     step, is_extracted, is_denoised, is_fast_recognized, transcript_quality, \
     transcribe_undenoised, error_message, retry_count, lock_version, created_at, updated_at";

const AUDIT_COLUMNS: &str = "audit_id, item_id, stage, outcome, message, payload, created_at";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool sized by `config`
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&config.url)
            .await?;
        info!(
            max_connections = config.max_connections,
            "💾 Connected to PostgreSQL"
        );
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| PipelineError::Database(e.into()))?;
        info!("✅ Database migrations applied");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<bool> {
        let row = sqlx::query("SELECT 1 AS health")
            .fetch_one(&self.pool)
            .await?;
        let health: i32 = row.try_get("health")?;
        Ok(health == 1)
    }
}

fn code_to_u8(kind: &'static str, code: i16) -> Result<u8> {
    u8::try_from(code).map_err(|_| {
        PipelineError::StateMachine(StateMachineError::InvalidCode {
            kind,
            code: i64::from(code),
        })
    })
}

fn quality_from_db(value: Option<String>) -> Result<Option<TranscriptQuality>> {
    match value.as_deref() {
        None => Ok(None),
        Some("undenoised") => Ok(Some(TranscriptQuality::Undenoised)),
        Some("denoised") => Ok(Some(TranscriptQuality::Denoised)),
        Some(other) => Err(PipelineError::StateMachine(StateMachineError::InvalidName {
            kind: "transcript quality",
            value: other.to_string(),
        })),
    }
}

fn quality_to_db(value: Option<TranscriptQuality>) -> Option<&'static str> {
    value.map(|q| match q {
        TranscriptQuality::Undenoised => "undenoised",
        TranscriptQuality::Denoised => "denoised",
    })
}

fn task_from_row(row: &PgRow) -> Result<Task> {
    let flow: Option<i16> = row.try_get("flow")?;
    Ok(Task {
        task_id: row.try_get("task_id")?,
        owner_id: row.try_get("owner_id")?,
        name: row.try_get("name")?,
        status: TaskStatus::try_from(row.try_get::<i16, _>("status")?)?,
        flow: flow
            .map(|code| code_to_u8("task flow", code).and_then(|c| Ok(TaskFlow::from_code(c)?)))
            .transpose()?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn item_from_row(row: &PgRow) -> Result<Item> {
    let progress = StageProgress {
        extracted: row.try_get("is_extracted")?,
        denoised: row.try_get("is_denoised")?,
        fast_recognized: row.try_get("is_fast_recognized")?,
        transcript: quality_from_db(row.try_get("transcript_quality")?)?,
    };
    let step = ItemStep::try_from(row.try_get::<i16, _>("step")?)?;
    let state = ItemState::from_parts(step, progress, row.try_get("transcribe_undenoised")?)?;
    let media_kind = MediaKind::from_code(code_to_u8(
        "media kind",
        row.try_get::<i16, _>("media_kind")?,
    )?)?;

    Ok(Item {
        item_id: row.try_get("item_id")?,
        task_id: row.try_get("task_id")?,
        filename: row.try_get("filename")?,
        size_bytes: row.try_get("size_bytes")?,
        media_kind,
        source_url: row.try_get("source_url")?,
        voice_url: row.try_get("voice_url")?,
        clear_url: row.try_get("clear_url")?,
        transcript: row.try_get("transcript")?,
        language: row.try_get("language")?,
        total_voice_seconds: row.try_get("total_voice_seconds")?,
        effective_voice_seconds: row.try_get("effective_voice_seconds")?,
        state,
        error_message: row.try_get("error_message")?,
        retry_count: row.try_get("retry_count")?,
        lock_version: row.try_get("lock_version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn audit_from_row(row: &PgRow) -> Result<AuditLogEntry> {
    Ok(AuditLogEntry {
        audit_id: row.try_get("audit_id")?,
        item_id: row.try_get("item_id")?,
        stage: row.try_get("stage")?,
        outcome: row.try_get("outcome")?,
        message: row.try_get("message")?,
        payload: row.try_get("payload")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl PipelineStore for PgStore {
    async fn insert_task(&self, task: NewTask) -> Result<Task> {
        let sql = format!(
            "INSERT INTO pipeline_tasks (owner_id, name, status, flow) \
             VALUES ($1, $2, $3, $4) RETURNING {TASK_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(task.owner_id)
            .bind(&task.name)
            .bind(i16::from(TaskStatus::Empty.code()))
            .bind(task.flow.map(|f| i16::from(f.code())))
            .fetch_one(&self.pool)
            .await?;
        task_from_row(&row)
    }

    async fn find_task(&self, task_id: i64) -> Result<Option<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM pipeline_tasks WHERE task_id = $1");
        sqlx::query(&sql)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(task_from_row)
            .transpose()
    }

    async fn insert_item(&self, item: NewItem) -> Result<Item> {
        if self.find_task(item.task_id).await?.is_none() {
            return Err(PipelineError::task_not_found(item.task_id));
        }
        let sql = format!(
            "INSERT INTO pipeline_items (task_id, filename, size_bytes, media_kind, source_url) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {ITEM_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(item.task_id)
            .bind(&item.filename)
            .bind(item.size_bytes)
            .bind(i16::from(item.media_kind.code()))
            .bind(&item.source_url)
            .fetch_one(&self.pool)
            .await?;
        item_from_row(&row)
    }

    async fn find_item(&self, item_id: i64) -> Result<Option<Item>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM pipeline_items WHERE item_id = $1");
        sqlx::query(&sql)
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(item_from_row)
            .transpose()
    }

    async fn items_for_task(&self, task_id: i64) -> Result<Vec<Item>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM pipeline_items WHERE task_id = $1 ORDER BY item_id"
        );
        sqlx::query(&sql)
            .bind(task_id)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(item_from_row)
            .collect()
    }

    async fn compare_and_swap_item(&self, item: &Item) -> Result<Option<Item>> {
        let progress = item.progress();
        let sql = format!(
            "UPDATE pipeline_items SET \
                voice_url = $3, clear_url = $4, transcript = $5, language = $6, \
                total_voice_seconds = $7, effective_voice_seconds = $8, step = $9, \
                is_extracted = $10, is_denoised = $11, is_fast_recognized = $12, \
                transcript_quality = $13, transcribe_undenoised = $14, \
                error_message = $15, retry_count = $16, \
                lock_version = lock_version + 1, updated_at = NOW() \
             WHERE item_id = $1 AND lock_version = $2 \
             RETURNING {ITEM_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(item.item_id)
            .bind(item.lock_version)
            .bind(&item.voice_url)
            .bind(&item.clear_url)
            .bind(&item.transcript)
            .bind(&item.language)
            .bind(item.total_voice_seconds)
            .bind(item.effective_voice_seconds)
            .bind(i16::from(item.step().code()))
            .bind(progress.extracted)
            .bind(progress.denoised)
            .bind(progress.fast_recognized)
            .bind(quality_to_db(progress.transcript))
            .bind(item.state.transcribe_undenoised())
            .bind(&item.error_message)
            .bind(item.retry_count)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => item_from_row(&row).map(Some),
            None => {
                if self.find_item(item.item_id).await?.is_none() {
                    return Err(PipelineError::item_not_found(item.item_id));
                }
                debug!(
                    item_id = item.item_id,
                    lock_version = item.lock_version,
                    "Item compare-and-swap lost"
                );
                Ok(None)
            }
        }
    }

    async fn compare_and_swap_task_status(
        &self,
        task_id: i64,
        expected: TaskStatus,
        new_status: TaskStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE pipeline_tasks SET status = $3, updated_at = NOW() \
             WHERE task_id = $1 AND status = $2",
        )
        .bind(task_id)
        .bind(i16::from(expected.code()))
        .bind(i16::from(new_status.code()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        if self.find_task(task_id).await?.is_none() {
            return Err(PipelineError::task_not_found(task_id));
        }
        Ok(false)
    }

    async fn append_audit(&self, entry: NewAuditLogEntry) -> Result<AuditLogEntry> {
        let sql = format!(
            "INSERT INTO pipeline_audit_log (item_id, stage, outcome, message, payload) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {AUDIT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(entry.item_id)
            .bind(&entry.stage)
            .bind(&entry.outcome)
            .bind(&entry.message)
            .bind(&entry.payload)
            .fetch_one(&self.pool)
            .await?;
        audit_from_row(&row)
    }

    async fn audit_entries_for_item(&self, item_id: i64) -> Result<Vec<AuditLogEntry>> {
        let sql = format!(
            "SELECT {AUDIT_COLUMNS} FROM pipeline_audit_log WHERE item_id = $1 ORDER BY audit_id"
        );
        sqlx::query(&sql)
            .bind(item_id)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(audit_from_row)
            .collect()
    }

    async fn find_items_in_steps(
        &self,
        steps: &[ItemStep],
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Item>> {
        let codes: Vec<i16> = steps.iter().map(|s| i16::from(s.code())).collect();
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM pipeline_items \
             WHERE step = ANY($1) AND updated_at < $2 \
             ORDER BY updated_at, item_id LIMIT $3"
        );
        sqlx::query(&sql)
            .bind(&codes)
            .bind(updated_before)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(item_from_row)
            .collect()
    }
}
