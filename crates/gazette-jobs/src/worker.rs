//! Background step worker.
//!
//! The worker polls the step queue, claims one step at a time per slot,
//! and dispatches it to the handler registered for the parent job's type.
//! Because each claimed step covers one bounded page of work, a single
//! worker makes progress on every running job instead of serializing
//! behind the longest one, and a stop request takes effect at the next
//! page boundary.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinSet;
use uuid::Uuid;

use gazette_core::defaults::{JOB_MAX_CONCURRENT, JOB_POLL_INTERVAL_MS};
use gazette_core::{Error, Job, JobRepository, JobStatus, JobType, Result, Task, TaskQueue};
use gazette_db::Database;

use crate::handler::{StepContext, StepHandler, StepOutcome};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to poll for queued steps when idle (milliseconds).
    pub poll_interval_ms: u64,
    /// Maximum number of steps processed concurrently.
    pub max_concurrent_steps: usize,
    /// Whether the worker is enabled.
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: JOB_POLL_INTERVAL_MS,
            max_concurrent_steps: JOB_MAX_CONCURRENT,
            enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    ///
    /// - `JOB_WORKER_ENABLED`: enable the worker (default: true)
    /// - `JOB_MAX_CONCURRENT`: maximum concurrent steps (default: 4)
    /// - `JOB_POLL_INTERVAL_MS`: idle poll interval (default: 1000)
    pub fn from_env() -> Self {
        let enabled = std::env::var("JOB_WORKER_ENABLED")
            .map(|v| v.to_lowercase() != "false" && v != "0")
            .unwrap_or(true);

        let max_concurrent_steps = std::env::var("JOB_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(JOB_MAX_CONCURRENT);

        let poll_interval_ms = std::env::var("JOB_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(JOB_POLL_INTERVAL_MS);

        Self {
            poll_interval_ms,
            max_concurrent_steps,
            enabled,
        }
    }

    /// Set the poll interval.
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set the maximum number of concurrent steps.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_steps = max;
        self
    }

    /// Enable or disable the worker.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Events emitted by the worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// The worker started polling.
    WorkerStarted,
    /// The worker shut down.
    WorkerStopped,
    /// A step was claimed and dispatched.
    StepStarted {
        job_id: Uuid,
        job_type: JobType,
        cursor: i64,
    },
    /// A step finished and the job advanced.
    JobProgress { job_id: Uuid, progress: f64 },
    /// A job ran its final step.
    JobCompleted { job_id: Uuid },
    /// A stop request was acknowledged.
    JobStopped { job_id: Uuid },
    /// A job failed.
    JobFailed { job_id: Uuid, message: String },
}

/// Handle to a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Request a graceful shutdown. In-flight steps run to completion.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }

    /// Subscribe to worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Shared state handed to spawned step tasks.
#[derive(Clone)]
struct WorkerRef {
    db: Arc<Database>,
    handlers: Arc<RwLock<HashMap<JobType, Arc<dyn StepHandler>>>>,
    event_tx: broadcast::Sender<WorkerEvent>,
}

/// The step worker.
pub struct StepWorker {
    db: Arc<Database>,
    config: WorkerConfig,
    handlers: Arc<RwLock<HashMap<JobType, Arc<dyn StepHandler>>>>,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl StepWorker {
    /// Create a new worker.
    pub fn new(db: Arc<Database>, config: WorkerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            db,
            config,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
        }
    }

    /// Register a handler for its job type.
    pub async fn register(&self, handler: Arc<dyn StepHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.insert(handler.job_type(), handler);
    }

    /// Number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }

    /// Start the worker. Returns a handle for shutdown and events.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        if self.config.enabled {
            tokio::spawn(async move {
                self.run(shutdown_rx).await;
            });
        } else {
            tracing::info!(subsystem = "jobs", "Step worker disabled by config");
        }

        WorkerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) {
        tracing::info!(
            subsystem = "jobs",
            max_concurrent = self.config.max_concurrent_steps,
            poll_interval_ms = self.config.poll_interval_ms,
            "Step worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let worker_ref = WorkerRef {
            db: Arc::clone(&self.db),
            handlers: Arc::clone(&self.handlers),
            event_tx: self.event_tx.clone(),
        };

        let mut in_flight: JoinSet<()> = JoinSet::new();
        let poll = std::time::Duration::from_millis(self.config.poll_interval_ms);

        loop {
            // Drain finished steps without blocking.
            while in_flight.try_join_next().is_some() {}

            let mut claimed = false;
            while in_flight.len() < self.config.max_concurrent_steps {
                match self.db.tasks.claim_next().await {
                    Ok(Some(task)) => {
                        claimed = true;
                        let r = worker_ref.clone();
                        in_flight.spawn(async move {
                            process_step(r, task).await;
                        });
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!(
                            subsystem = "jobs",
                            error = %e,
                            "Failed to claim step from queue"
                        );
                        break;
                    }
                }
            }

            if claimed {
                // Queue may hold more work; come straight back around
                // once a slot frees.
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = in_flight.join_next(), if !in_flight.is_empty() => {}
                }
            } else {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(poll) => {}
                }
            }
        }

        // Let in-flight steps finish before reporting stopped.
        while in_flight.join_next().await.is_some() {}

        tracing::info!(subsystem = "jobs", "Step worker stopped");
        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
    }
}

/// Process one claimed step end to end.
async fn process_step(r: WorkerRef, task: Task) {
    let job = match r.db.jobs.fetch(task.job_id).await {
        Ok(job) => job,
        Err(Error::EntityMissing(_)) => {
            tracing::warn!(
                subsystem = "jobs",
                task_id = %task.id,
                job_id = %task.job_id,
                "Claimed step for a job that no longer exists, dropping"
            );
            return;
        }
        Err(e) => {
            tracing::error!(
                subsystem = "jobs",
                task_id = %task.id,
                job_id = %task.job_id,
                error = %e,
                "Failed to load job for claimed step"
            );
            return;
        }
    };

    // Stop requests win over queued work: acknowledge before running
    // the page, so a stopped job never touches the indices again.
    if job.status == JobStatus::Stop {
        stop_job(&r, &job, json!({ "stopped": true })).await;
        return;
    }

    if job.status.is_terminal() {
        tracing::warn!(
            subsystem = "jobs",
            job_id = %job.id,
            status = %job.status,
            "Dropping orphan step of a terminal job"
        );
        let _ = r.db.tasks.purge_for_job(job.id).await;
        return;
    }

    let job = if job.status == JobStatus::Ready {
        match r.db.jobs.start(job.id).await {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(
                    subsystem = "jobs",
                    job_id = %job.id,
                    error = %e,
                    "Failed to mark job running"
                );
                return;
            }
        }
    } else {
        job
    };

    let handler = {
        let handlers = r.handlers.read().await;
        handlers.get(&job.job_type).cloned()
    };
    let Some(handler) = handler else {
        fail_job(&r, &job, "no handler registered for job type").await;
        return;
    };

    let _ = r.event_tx.send(WorkerEvent::StepStarted {
        job_id: job.id,
        job_type: job.job_type,
        cursor: task.cursor,
    });

    let started = std::time::Instant::now();
    let job_id = job.id;
    let outcome = handler.execute(StepContext::new(job.clone(), task)).await;
    tracing::debug!(
        subsystem = "jobs",
        job_id = %job_id,
        job_type = %job.job_type,
        duration_ms = started.elapsed().as_millis() as u64,
        success = outcome.is_ok(),
        "Step finished"
    );

    match outcome {
        Ok(StepOutcome::Continue {
            cursor,
            payload,
            progress,
            extra,
        }) => {
            let advanced = async {
                r.db.jobs.update_progress(job_id, progress, extra).await?;
                r.db.tasks.enqueue(job_id, cursor, payload).await?;
                Ok::<_, Error>(())
            }
            .await;
            match advanced {
                Ok(()) => {
                    let _ = r.event_tx.send(WorkerEvent::JobProgress {
                        job_id,
                        progress,
                    });
                }
                Err(e) => fail_job(&r, &job, &e.to_string()).await,
            }
        }
        Ok(StepOutcome::Done { extra }) => match r.db.jobs.complete(job_id, extra).await {
            Ok(()) => {
                tracing::info!(
                    subsystem = "jobs",
                    job_id = %job_id,
                    job_type = %job.job_type,
                    "Job completed"
                );
                let _ = r.event_tx.send(WorkerEvent::JobCompleted { job_id });
            }
            Err(e) => fail_job(&r, &job, &e.to_string()).await,
        },
        Err(e) => fail_job(&r, &job, &e.to_string()).await,
    }
}

async fn stop_job(r: &WorkerRef, job: &Job, extra: serde_json::Value) {
    if let Err(e) = r.db.tasks.purge_for_job(job.id).await {
        tracing::error!(subsystem = "jobs", job_id = %job.id, error = %e, "Failed to purge steps");
    }
    match r.db.jobs.acknowledge_stop(job.id, extra).await {
        Ok(_) => {
            tracing::info!(
                subsystem = "jobs",
                job_id = %job.id,
                job_type = %job.job_type,
                "Job stopped"
            );
            let _ = r.event_tx.send(WorkerEvent::JobStopped { job_id: job.id });
        }
        Err(e) => {
            tracing::error!(subsystem = "jobs", job_id = %job.id, error = %e, "Failed to acknowledge stop");
        }
    }
}

async fn fail_job(r: &WorkerRef, job: &Job, message: &str) {
    tracing::error!(
        subsystem = "jobs",
        job_id = %job.id,
        job_type = %job.job_type,
        error = message,
        "Job failed"
    );
    if let Err(e) = r.db.tasks.purge_for_job(job.id).await {
        tracing::error!(subsystem = "jobs", job_id = %job.id, error = %e, "Failed to purge steps");
    }
    if let Err(e) = r.db.jobs.fail(job.id, message).await {
        tracing::error!(subsystem = "jobs", job_id = %job.id, error = %e, "Failed to record job failure");
    }
    let _ = r.event_tx.send(WorkerEvent::JobFailed {
        job_id: job.id,
        message: message.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WorkerConfig::default();
        assert_eq!(config.poll_interval_ms, JOB_POLL_INTERVAL_MS);
        assert_eq!(config.max_concurrent_steps, JOB_MAX_CONCURRENT);
        assert!(config.enabled);
    }

    #[test]
    fn test_config_builders() {
        let config = WorkerConfig::default()
            .with_poll_interval(250)
            .with_max_concurrent(8)
            .with_enabled(false);
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.max_concurrent_steps, 8);
        assert!(!config.enabled);
    }

    #[test]
    fn test_config_from_env_defaults() {
        // No variables set in the test environment for these names.
        std::env::remove_var("JOB_WORKER_ENABLED");
        std::env::remove_var("JOB_MAX_CONCURRENT");
        std::env::remove_var("JOB_POLL_INTERVAL_MS");
        let config = WorkerConfig::from_env();
        assert!(config.enabled);
        assert_eq!(config.max_concurrent_steps, JOB_MAX_CONCURRENT);
        assert_eq!(config.poll_interval_ms, JOB_POLL_INTERVAL_MS);
    }

    #[test]
    fn test_worker_event_clone() {
        let event = WorkerEvent::JobProgress {
            job_id: Uuid::new_v4(),
            progress: 0.5,
        };
        let cloned = event.clone();
        assert!(matches!(cloned, WorkerEvent::JobProgress { progress, .. } if progress == 0.5));
    }
}
