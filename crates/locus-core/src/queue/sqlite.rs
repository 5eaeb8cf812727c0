use super::{FailedJob, JobPayload, JobQueue, QueueError, QueuedJob};
use crate::store::{now_millis, sqlite::connect_pool};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::time::Duration;
use uuid::Uuid;

const SCHEMA: &str = r"
    CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY NOT NULL,
        queue TEXT NOT NULL,
        payload TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        attempts INTEGER NOT NULL DEFAULT 0,
        error TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_jobs_queue_status ON jobs(queue, status, created_at);
";

/// Durable [`JobQueue`] in a `SQLite` database shared by all workers.
///
/// Jobs move `pending` -> `running` -> `completed` | `failed`. Claiming is a single
/// `UPDATE ... RETURNING`, so two workers never receive the same job. Completed rows are
/// kept for `result_ttl` and purged on later completions; failed rows stay until an operator
/// removes them.
pub struct SqliteJobQueue {
    pool: SqlitePool,
    result_ttl: Duration,
}

impl SqliteJobQueue {
    /// Connects and creates the schema if missing.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Backend`] if the connection or schema creation fails.
    pub async fn new(database_url: &str, result_ttl: Duration) -> Result<Self, QueueError> {
        let pool = connect_pool(database_url).await?;
        Self::from_pool(pool, result_ttl).await
    }

    /// # Errors
    ///
    /// Returns [`QueueError::Backend`] if schema creation fails.
    pub async fn from_pool(pool: SqlitePool, result_ttl: Duration) -> Result<Self, QueueError> {
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool, result_ttl })
    }

    /// Deletes completed jobs older than the result TTL. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Backend`] if the delete fails.
    pub async fn purge_completed(&self) -> Result<u64, QueueError> {
        let ttl_ms = i64::try_from(self.result_ttl.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now_millis().saturating_sub(ttl_ms);

        let result = sqlx::query("DELETE FROM jobs WHERE status = 'completed' AND updated_at <= ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn finish(&self, id: &str, status: &str, error: Option<&str>) -> Result<(), QueueError> {
        let result = sqlx::query(
            r"
            UPDATE jobs SET status = ?, error = ?, updated_at = ?
            WHERE id = ? AND status = 'running'
            ",
        )
        .bind(status)
        .bind(error)
        .bind(now_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

fn decode_payload(row: &SqliteRow) -> Result<JobPayload, QueueError> {
    let raw: String = row.try_get("payload")?;
    Ok(serde_json::from_str(&raw)?)
}

fn decode_attempts(row: &SqliteRow) -> Result<u32, QueueError> {
    let attempts: i64 = row.try_get("attempts")?;
    Ok(u32::try_from(attempts).unwrap_or(u32::MAX))
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn enqueue(&self, queue: &str, payload: JobPayload) -> Result<String, QueueError> {
        let id = Uuid::new_v4().to_string();
        let raw = serde_json::to_string(&payload)?;
        let now = now_millis();

        sqlx::query(
            r"
            INSERT INTO jobs (id, queue, payload, status, attempts, created_at, updated_at)
            VALUES (?, ?, ?, 'pending', 0, ?, ?)
            ",
        )
        .bind(&id)
        .bind(queue)
        .bind(raw)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn dequeue(&self, queue: &str) -> Result<Option<QueuedJob>, QueueError> {
        let row = sqlx::query(
            r"
            UPDATE jobs SET status = 'running', attempts = attempts + 1, updated_at = ?
            WHERE id = (
                SELECT id FROM jobs
                WHERE queue = ? AND status = 'pending'
                ORDER BY created_at, rowid
                LIMIT 1
            )
            RETURNING id, queue, payload, attempts
            ",
        )
        .bind(now_millis())
        .bind(queue)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(QueuedJob {
            id: row.try_get("id")?,
            queue: row.try_get("queue")?,
            payload: decode_payload(&row)?,
            attempts: decode_attempts(&row)?,
        }))
    }

    async fn complete(&self, id: &str) -> Result<(), QueueError> {
        self.finish(id, "completed", None).await?;

        match self.purge_completed().await {
            Ok(0) => {}
            Ok(purged) => tracing::debug!(purged, "purged expired job results"),
            Err(e) => tracing::warn!(error = %e, "failed to purge expired job results"),
        }
        Ok(())
    }

    async fn fail(&self, id: &str, error: &str) -> Result<(), QueueError> {
        self.finish(id, "failed", Some(error)).await
    }

    async fn len(&self, queue: &str) -> Result<usize, QueueError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM jobs WHERE queue = ? AND status = 'pending'")
            .bind(queue)
            .fetch_one(&self.pool)
            .await?;

        let count: i64 = row.try_get("n")?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    async fn failed(&self, queue: &str) -> Result<Vec<FailedJob>, QueueError> {
        let rows = sqlx::query(
            r"
            SELECT id, queue, payload, attempts, error, updated_at FROM jobs
            WHERE queue = ? AND status = 'failed'
            ORDER BY updated_at
            ",
        )
        .bind(queue)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<FailedJob, QueueError> {
                let failed_at: i64 = row.try_get("updated_at")?;
                Ok(FailedJob {
                    id: row.try_get("id")?,
                    queue: row.try_get("queue")?,
                    payload: decode_payload(row)?,
                    error: row.try_get::<Option<String>, _>("error")?.unwrap_or_default(),
                    attempts: decode_attempts(row)?,
                    failed_at: Utc.timestamp_millis_opt(failed_at).single().unwrap_or_else(Utc::now),
                })
            })
            .collect()
    }
}
