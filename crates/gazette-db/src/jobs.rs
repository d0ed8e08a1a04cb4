//! Job registry repository implementation.
//!
//! All writes are guarded in SQL: terminal jobs are never mutated, a STOP
//! request survives concurrent progress updates, and admission control is a
//! single conditional insert so two simultaneous submissions cannot both
//! slip under the per-user limit.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use gazette_core::{
    CreateJobRequest, Error, Job, JobRepository, JobStatus, JobType, Result,
};

/// PostgreSQL implementation of JobRepository.
pub struct PgJobRepository {
    pool: Pool<Postgres>,
}

impl PgJobRepository {
    /// Create a new PgJobRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Convert JobType to string for database.
    fn job_type_to_str(job_type: JobType) -> &'static str {
        match job_type {
            JobType::SyncCollection => "sync_collection",
            JobType::AddFromQuery => "add_from_query",
            JobType::AddFromPassagesQuery => "add_from_passages_query",
            JobType::PropagateToPassages => "propagate_to_passages",
            JobType::RemoveCollection => "remove_collection",
            JobType::RemoveFromPassages => "remove_from_passages",
            JobType::ExportQueryCsv => "export_query_csv",
            JobType::UpdateUserBitmap => "update_user_bitmap",
        }
    }

    /// Convert string from database to JobType.
    fn str_to_job_type(s: &str) -> JobType {
        match s {
            "sync_collection" => JobType::SyncCollection,
            "add_from_query" => JobType::AddFromQuery,
            "add_from_passages_query" => JobType::AddFromPassagesQuery,
            "propagate_to_passages" => JobType::PropagateToPassages,
            "remove_collection" => JobType::RemoveCollection,
            "remove_from_passages" => JobType::RemoveFromPassages,
            "export_query_csv" => JobType::ExportQueryCsv,
            "update_user_bitmap" => JobType::UpdateUserBitmap,
            _ => JobType::SyncCollection, // fallback
        }
    }

    /// Convert JobStatus to string for database.
    fn job_status_to_str(status: JobStatus) -> &'static str {
        match status {
            JobStatus::Ready => "READY",
            JobStatus::Run => "RUN",
            JobStatus::Done => "DONE",
            JobStatus::Archived => "ARCHIVED",
            JobStatus::Stop => "STOP",
            JobStatus::Rip => "RIP",
            JobStatus::Err => "ERR",
        }
    }

    /// Convert string from database to JobStatus.
    fn str_to_job_status(s: &str) -> JobStatus {
        match s {
            "READY" => JobStatus::Ready,
            "RUN" => JobStatus::Run,
            "DONE" => JobStatus::Done,
            "ARCHIVED" => JobStatus::Archived,
            "STOP" => JobStatus::Stop,
            "RIP" => JobStatus::Rip,
            "ERR" => JobStatus::Err,
            _ => JobStatus::Ready, // fallback
        }
    }

    /// Parse a job row into a Job struct.
    fn parse_job_row(row: sqlx::postgres::PgRow) -> Job {
        Job {
            id: row.get("id"),
            job_type: Self::str_to_job_type(row.get("job_type")),
            status: Self::str_to_job_status(row.get("status")),
            progress: row.get("progress"),
            extra: row.get("extra"),
            creator_id: row.get("creator_id"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            completed_at: row.get("completed_at"),
        }
    }

    const JOB_COLUMNS: &'static str =
        "id, job_type, status, progress, extra, creator_id, created_at, updated_at, completed_at";
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn create(&self, req: CreateJobRequest) -> Result<Job> {
        let job_id = Uuid::new_v4();
        let now = Utc::now();
        let job_type_str = Self::job_type_to_str(req.job_type);

        // Conditional insert: only admit when the creator is below their
        // parallel-jobs limit. Checked and inserted in one statement so
        // concurrent submissions cannot both pass the count.
        let row = sqlx::query(&format!(
            "INSERT INTO job (id, job_type, status, progress, extra, creator_id, created_at, updated_at)
             SELECT $1, $2, 'READY', 0, $3, $4, $5, $5
             WHERE (
                 SELECT COUNT(*) FROM job
                 WHERE creator_id = $4 AND status IN ('READY', 'RUN', 'STOP')
             ) < (
                 SELECT max_parallel_jobs FROM app_user WHERE id = $4
             )
             RETURNING {}",
            Self::JOB_COLUMNS
        ))
        .bind(job_id)
        .bind(job_type_str)
        .bind(&req.extra)
        .bind(req.creator_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        match row {
            Some(row) => Ok(Self::parse_job_row(row)),
            None => Err(Error::TooManyJobs(format!(
                "user {} is at their parallel job limit",
                req.creator_id
            ))),
        }
    }

    async fn create_chained(&self, req: CreateJobRequest) -> Result<Job> {
        let row = sqlx::query(&format!(
            "INSERT INTO job (id, job_type, status, progress, extra, creator_id, created_at, updated_at)
             VALUES ($1, $2, 'READY', 0, $3, $4, $5, $5)
             RETURNING {}",
            Self::JOB_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(Self::job_type_to_str(req.job_type))
        .bind(&req.extra)
        .bind(req.creator_id)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(Self::parse_job_row(row))
    }

    async fn fetch(&self, id: Uuid) -> Result<Job> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM job WHERE id = $1",
            Self::JOB_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_job_row)
            .ok_or_else(|| Error::EntityMissing(format!("job {id}")))
    }

    async fn list_for_user(&self, creator_id: Uuid, limit: i64, offset: i64) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM job WHERE creator_id = $1
             ORDER BY created_at DESC
             LIMIT $2 OFFSET $3",
            Self::JOB_COLUMNS
        ))
        .bind(creator_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_job_row).collect())
    }

    async fn start(&self, id: Uuid) -> Result<Job> {
        let row = sqlx::query(&format!(
            "UPDATE job
             SET status = 'RUN', updated_at = $2
             WHERE id = $1 AND status IN ('READY', 'RUN')
             RETURNING {}",
            Self::JOB_COLUMNS
        ))
        .bind(id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        match row {
            Some(row) => Ok(Self::parse_job_row(row)),
            // The job exists but is STOP or terminal, or it is gone.
            None => {
                let current = self.fetch(id).await?;
                Err(Error::InvalidInput(format!(
                    "job {id} cannot start from status {}",
                    current.status
                )))
            }
        }
    }

    async fn update_progress(&self, id: Uuid, progress: f64, extra: JsonValue) -> Result<()> {
        // `extra ||` merges top-level keys; the status guard keeps STOP and
        // terminal states from being overwritten by a racing worker.
        sqlx::query(
            "UPDATE job
             SET progress = $2, extra = extra || $3, updated_at = $4
             WHERE id = $1 AND status = 'RUN'",
        )
        .bind(id)
        .bind(progress.clamp(0.0, 1.0))
        .bind(&extra)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn complete(&self, id: Uuid, extra: JsonValue) -> Result<()> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE job
             SET status = 'DONE', progress = 1.0, extra = extra || $2,
                 updated_at = $3, completed_at = $3
             WHERE id = $1 AND status = 'RUN'",
        )
        .bind(id)
        .bind(&extra)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            let current = self.fetch(id).await?;
            return Err(Error::InvalidInput(format!(
                "job {id} cannot complete from status {}",
                current.status
            )));
        }
        Ok(())
    }

    async fn fail(&self, id: Uuid, message: &str) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE job
             SET status = 'ERR', extra = extra || jsonb_build_object('message', $2::text),
                 updated_at = $3, completed_at = $3
             WHERE id = $1 AND status IN ('READY', 'RUN', 'STOP')",
        )
        .bind(id)
        .bind(message)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn request_stop(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE job
             SET status = 'STOP', updated_at = $2
             WHERE id = $1 AND status IN ('READY', 'RUN')",
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            // Stopping an already-stopped or terminal job is a no-op,
            // but a missing job is still an error.
            self.fetch(id).await?;
        }
        Ok(())
    }

    async fn acknowledge_stop(&self, id: Uuid, extra: JsonValue) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE job
             SET status = 'RIP', extra = extra || $2, updated_at = $3, completed_at = $3
             WHERE id = $1 AND status = 'STOP'",
        )
        .bind(id)
        .bind(&extra)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn archive(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE job
             SET status = 'ARCHIVED', updated_at = $2
             WHERE id = $1 AND status = 'DONE'",
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            let current = self.fetch(id).await?;
            return Err(Error::InvalidInput(format!(
                "job {id} cannot archive from status {}",
                current.status
            )));
        }
        Ok(())
    }

    async fn active_count_for_user(&self, creator_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM job
             WHERE creator_id = $1 AND status IN ('READY', 'RUN', 'STOP')",
        )
        .bind(creator_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(count)
    }
}
