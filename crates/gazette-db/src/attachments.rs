//! Job attachment repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use gazette_core::{Attachment, AttachmentRepository, Error, Result};

/// PostgreSQL implementation of AttachmentRepository.
pub struct PgAttachmentRepository {
    pool: Pool<Postgres>,
}

impl PgAttachmentRepository {
    /// Create a new PgAttachmentRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_attachment_row(row: sqlx::postgres::PgRow) -> Attachment {
        Attachment {
            id: row.get("id"),
            job_id: row.get("job_id"),
            path: row.get("path"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl AttachmentRepository for PgAttachmentRepository {
    async fn create(&self, job_id: Uuid, path: &str) -> Result<Attachment> {
        let now = Utc::now();
        let row = sqlx::query(
            "INSERT INTO attachment (id, job_id, path, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $4)
             RETURNING id, job_id, path, created_at, updated_at",
        )
        .bind(Uuid::new_v4())
        .bind(job_id)
        .bind(path)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(Self::parse_attachment_row(row))
    }

    async fn fetch_for_job(&self, job_id: Uuid) -> Result<Option<Attachment>> {
        let row = sqlx::query(
            "SELECT id, job_id, path, created_at, updated_at
             FROM attachment WHERE job_id = $1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_attachment_row))
    }

    async fn update_path(&self, id: Uuid, path: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE attachment SET path = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(path)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::EntityMissing(format!("attachment {id}")));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM attachment WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }
}
