//! Step handler abstraction.
//!
//! A handler processes exactly one claimed step of a job and says what
//! happens next: another step or completion. STOP requests are
//! acknowledged by the worker before dispatch, so handlers never see
//! them. Long jobs never hold a worker slot between steps.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use gazette_core::{Job, JobType, Result, Task};

/// Context provided to step handlers.
pub struct StepContext {
    /// The job the claimed step belongs to.
    pub job: Job,
    /// The claimed step.
    pub task: Task,
}

impl StepContext {
    /// Create a new step context.
    pub fn new(job: Job, task: Task) -> Self {
        Self { job, task }
    }

    /// The resume cursor of this step (page number for paginated jobs).
    pub fn cursor(&self) -> i64 {
        self.task.cursor
    }

    /// The step payload.
    pub fn payload(&self) -> &JsonValue {
        &self.task.payload
    }
}

/// What the worker does after a step returns.
#[derive(Debug)]
pub enum StepOutcome {
    /// More work remains: persist progress, enqueue the successor step.
    ///
    /// The payload travels to the next step; handlers usually pass the
    /// incoming payload through, enriched with whatever the first page
    /// froze (the result-set size, for instance).
    Continue {
        cursor: i64,
        payload: JsonValue,
        progress: f64,
        extra: JsonValue,
    },
    /// The job is finished.
    Done { extra: JsonValue },
}

/// Trait for step handlers.
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// The job type this handler processes.
    fn job_type(&self) -> JobType;

    /// Execute one step.
    async fn execute(&self, ctx: StepContext) -> Result<StepOutcome>;

    /// Check if this handler can process the given job type.
    fn can_handle(&self, job_type: JobType) -> bool {
        self.job_type() == job_type
    }
}

/// No-op handler for testing.
pub struct NoOpHandler {
    job_type: JobType,
}

impl NoOpHandler {
    /// Create a new no-op handler for the given job type.
    pub fn new(job_type: JobType) -> Self {
        Self { job_type }
    }
}

#[async_trait]
impl StepHandler for NoOpHandler {
    fn job_type(&self) -> JobType {
        self.job_type
    }

    async fn execute(&self, _ctx: StepContext) -> Result<StepOutcome> {
        Ok(StepOutcome::Done {
            extra: serde_json::json!({ "message": "no-op" }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn test_job(job_type: JobType) -> Job {
        Job {
            id: Uuid::new_v4(),
            job_type,
            status: gazette_core::JobStatus::Run,
            progress: 0.0,
            extra: serde_json::json!({}),
            creator_id: Uuid::new_v4(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
        }
    }

    fn test_task(job_id: Uuid, cursor: i64) -> Task {
        Task {
            id: Uuid::new_v4(),
            job_id,
            cursor,
            payload: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_step_context_cursor() {
        let job = test_job(JobType::SyncCollection);
        let task = test_task(job.id, 3);
        let ctx = StepContext::new(job, task);
        assert_eq!(ctx.cursor(), 3);
    }

    #[tokio::test]
    async fn test_noop_handler() {
        let handler = NoOpHandler::new(JobType::SyncCollection);
        assert_eq!(handler.job_type(), JobType::SyncCollection);
        assert!(handler.can_handle(JobType::SyncCollection));
        assert!(!handler.can_handle(JobType::ExportQueryCsv));

        let job = test_job(JobType::SyncCollection);
        let task = test_task(job.id, 0);
        let outcome = handler.execute(StepContext::new(job, task)).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Done { .. }));
    }
}
