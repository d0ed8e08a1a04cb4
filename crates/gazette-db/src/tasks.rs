//! Step queue repository implementation.
//!
//! Each row is one pending page of a paginated job. Workers claim and
//! remove a row with FOR UPDATE SKIP LOCKED, do one page of work, and
//! enqueue the successor row. The queue itself is the only durable
//! "call stack" a long-running job has.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use gazette_core::{Error, Result, Task, TaskQueue};

/// PostgreSQL implementation of the step queue.
pub struct PgTaskQueue {
    pool: Pool<Postgres>,
}

impl PgTaskQueue {
    /// Create a new PgTaskQueue with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_task_row(row: sqlx::postgres::PgRow) -> Task {
        Task {
            id: row.get("id"),
            job_id: row.get("job_id"),
            cursor: row.get("cursor"),
            payload: row.get("payload"),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl TaskQueue for PgTaskQueue {
    async fn enqueue(&self, job_id: Uuid, cursor: i64, payload: JsonValue) -> Result<Uuid> {
        let task_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO task_queue (id, job_id, cursor, payload, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(task_id)
        .bind(job_id)
        .bind(cursor)
        .bind(&payload)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(task_id)
    }

    async fn claim_next(&self) -> Result<Option<Task>> {
        // Claim-by-delete: the row is gone the moment it is claimed, so a
        // crashed worker loses at most one page. Pages are idempotent, so
        // the job can be re-driven from its last durable cursor.
        let row = sqlx::query(
            "DELETE FROM task_queue
             WHERE id = (
                 SELECT id FROM task_queue
                 ORDER BY created_at ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING id, job_id, cursor, payload, created_at",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_task_row))
    }

    async fn purge_for_job(&self, job_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM task_queue WHERE job_id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }
}
