//! # gazette-jobs
//!
//! Background job orchestration for gazette: the step worker, one handler
//! per job kind, job submission, the CSV export pipeline, the plan-change
//! lifecycle, and the identity-event listener that keeps materialized
//! user bitmaps fresh.
//!
//! A job is a durable row plus a chain of queued steps. Each step covers
//! one page of work and ends by enqueueing its successor, so a single
//! worker pool makes progress on every running job and cancellation takes
//! effect at the next page boundary.

pub mod bitmap_listener;
pub mod export;
pub mod handler;
pub mod launch;
pub mod mailer;
pub mod plans;
pub mod template;
pub mod worker;
pub mod workers;

pub use bitmap_listener::BitmapListener;
pub use handler::{StepContext, StepHandler, StepOutcome};
pub use launch::{
    submit_add_from_passages_query, submit_add_from_query, submit_export_query_csv,
    submit_remove_collection, submit_sync_collection, submit_update_user_bitmap,
};
pub use mailer::{RecordingMailer, TracingMailer};
pub use plans::PlanService;
pub use worker::{StepWorker, WorkerConfig, WorkerEvent, WorkerHandle};

use std::sync::Arc;

use gazette_db::Database;
use gazette_index::IndexGateway;

/// Build a worker with every job-kind handler registered.
pub async fn build_worker(
    db: Arc<Database>,
    gateway: IndexGateway,
    config: WorkerConfig,
) -> StepWorker {
    let worker = StepWorker::new(Arc::clone(&db), config);
    worker
        .register(Arc::new(workers::SyncCollectionHandler::new(
            Arc::clone(&db),
            gateway.clone(),
        )))
        .await;
    worker
        .register(Arc::new(workers::AddFromQueryHandler::new(
            Arc::clone(&db),
            gateway.clone(),
        )))
        .await;
    worker
        .register(Arc::new(workers::AddFromPassagesQueryHandler::new(
            Arc::clone(&db),
            gateway.clone(),
        )))
        .await;
    worker
        .register(Arc::new(workers::PropagateToPassagesHandler::new(
            Arc::clone(&db),
            gateway.clone(),
        )))
        .await;
    worker
        .register(Arc::new(workers::RemoveCollectionHandler::new(
            Arc::clone(&db),
            gateway.clone(),
        )))
        .await;
    worker
        .register(Arc::new(workers::RemoveFromPassagesHandler::new(
            Arc::clone(&db),
            gateway.clone(),
        )))
        .await;
    worker
        .register(Arc::new(workers::ExportQueryCsvHandler::new(
            Arc::clone(&db),
            gateway,
        )))
        .await;
    worker
        .register(Arc::new(workers::UpdateUserBitmapHandler::new(db)))
        .await;
    worker
}
