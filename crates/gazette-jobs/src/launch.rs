//! Job submission: create the durable job row and enqueue its first step.
//!
//! User-facing submissions go through admission control and may fail with
//! `TooManyJobs`; jobs chained from a completing job bypass it, since the
//! parent was already admitted.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use gazette_core::{CreateJobRequest, Job, JobExtra, JobRepository, JobType, Result, SyncMethod, TaskQueue, UserRepository};
use gazette_db::Database;

/// Step payload of a sync-collection job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPayload {
    pub collection: String,
    pub method: SyncMethod,
    pub items: Vec<String>,
}

/// Step payload of the two add-from-query jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryPayload {
    pub collection: String,
    pub query: String,
    /// Result-set size frozen on the first page so progress and paging
    /// stay stable while the index churns.
    #[serde(default)]
    pub total: Option<i64>,
}

/// Step payload of the propagate and remove jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionPayload {
    pub collection: String,
    #[serde(default)]
    pub total: Option<i64>,
}

/// Step payload of an export job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportPayload {
    pub query: String,
    /// Column list frozen on the first page.
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    #[serde(default)]
    pub total: Option<i64>,
    /// Caller's bitmask resolved on the first page, so every page redacts
    /// against the same capabilities.
    #[serde(default)]
    pub user_mask: Option<u64>,
}

async fn base_extra(db: &Database, creator_id: Uuid, job_type: JobType) -> Result<JobExtra> {
    let user = db.users.fetch(creator_id).await?;
    Ok(JobExtra {
        task: Some(job_type.to_string()),
        taskname: Some(job_type.to_string()),
        job_type: Some(job_type.to_string()),
        job_status: Some("READY".to_string()),
        user_id: Some(creator_id),
        user_uid: Some(user.uid),
        ..JobExtra::default()
    })
}

async fn submit(
    db: &Database,
    creator_id: Uuid,
    job_type: JobType,
    extra: JobExtra,
    payload: JsonValue,
) -> Result<Job> {
    let job = db
        .jobs
        .create(CreateJobRequest {
            job_type,
            creator_id,
            extra: extra.to_value(),
        })
        .await?;
    db.tasks.enqueue(job.id, 0, payload).await?;
    tracing::info!(
        subsystem = "jobs",
        job_id = %job.id,
        job_type = %job_type,
        user_id = %creator_id,
        "Job submitted"
    );
    Ok(job)
}

/// Submit a sync-collection job (explicit item ids, add or remove).
pub async fn submit_sync_collection(
    db: &Database,
    creator_id: Uuid,
    collection: &str,
    method: SyncMethod,
    items: Vec<String>,
) -> Result<Job> {
    let mut extra = base_extra(db, creator_id, JobType::SyncCollection).await?;
    extra.collection = Some(collection.to_string());
    extra.method = Some(method.to_string());
    extra.items = Some(items.clone());
    let payload = serde_json::to_value(SyncPayload {
        collection: collection.to_string(),
        method,
        items,
    })?;
    submit(db, creator_id, JobType::SyncCollection, extra, payload).await
}

/// Submit an add-from-query job against the primary index.
pub async fn submit_add_from_query(
    db: &Database,
    creator_id: Uuid,
    collection: &str,
    query: &str,
) -> Result<Job> {
    let mut extra = base_extra(db, creator_id, JobType::AddFromQuery).await?;
    extra.collection = Some(collection.to_string());
    extra.query = Some(query.to_string());
    let payload = serde_json::to_value(QueryPayload {
        collection: collection.to_string(),
        query: query.to_string(),
        total: None,
    })?;
    submit(db, creator_id, JobType::AddFromQuery, extra, payload).await
}

/// Submit an add-from-passages-query job, optionally restricted to a
/// window of the result set: `skip` rounds down to a starting page,
/// `limit` caps how far past it the job walks.
pub async fn submit_add_from_passages_query(
    db: &Database,
    creator_id: Uuid,
    collection: &str,
    query: &str,
    skip: i64,
    limit: Option<i64>,
) -> Result<Job> {
    use gazette_core::defaults::PAGE_LIMIT;

    let mut extra = base_extra(db, creator_id, JobType::AddFromPassagesQuery).await?;
    extra.collection = Some(collection.to_string());
    extra.query = Some(query.to_string());
    let start_cursor = skip.max(0) / PAGE_LIMIT;
    let payload = serde_json::to_value(QueryPayload {
        collection: collection.to_string(),
        query: query.to_string(),
        total: limit.map(|l| skip.max(0) + l),
    })?;
    let job = db
        .jobs
        .create(CreateJobRequest {
            job_type: JobType::AddFromPassagesQuery,
            creator_id,
            extra: extra.to_value(),
        })
        .await?;
    db.tasks.enqueue(job.id, start_cursor, payload).await?;
    tracing::info!(
        subsystem = "jobs",
        job_id = %job.id,
        job_type = %JobType::AddFromPassagesQuery,
        user_id = %creator_id,
        "Job submitted"
    );
    Ok(job)
}

/// Submit a remove-collection job. The collection must already be marked
/// deleted; the handler enforces that.
pub async fn submit_remove_collection(
    db: &Database,
    creator_id: Uuid,
    collection: &str,
) -> Result<Job> {
    let mut extra = base_extra(db, creator_id, JobType::RemoveCollection).await?;
    extra.collection = Some(collection.to_string());
    let payload = serde_json::to_value(CollectionPayload {
        collection: collection.to_string(),
        total: None,
    })?;
    submit(db, creator_id, JobType::RemoveCollection, extra, payload).await
}

/// Submit an export-query-as-CSV job.
pub async fn submit_export_query_csv(
    db: &Database,
    creator_id: Uuid,
    query: &str,
) -> Result<Job> {
    let mut extra = base_extra(db, creator_id, JobType::ExportQueryCsv).await?;
    extra.query = Some(query.to_string());
    let payload = serde_json::to_value(ExportPayload {
        query: query.to_string(),
        columns: None,
        total: None,
        user_mask: None,
    })?;
    submit(db, creator_id, JobType::ExportQueryCsv, extra, payload).await
}

/// Submit an update-user-bitmap job for the given user.
pub async fn submit_update_user_bitmap(db: &Database, user_id: Uuid) -> Result<Job> {
    let extra = base_extra(db, user_id, JobType::UpdateUserBitmap).await?;
    submit(
        db,
        user_id,
        JobType::UpdateUserBitmap,
        extra,
        serde_json::json!({}),
    )
    .await
}

/// Chain a job from a completing one, bypassing admission control.
pub(crate) async fn chain(
    db: &Database,
    creator_id: Uuid,
    job_type: JobType,
    collection: &str,
) -> Result<Job> {
    let mut extra = base_extra(db, creator_id, job_type).await?;
    extra.collection = Some(collection.to_string());
    let payload = serde_json::to_value(CollectionPayload {
        collection: collection.to_string(),
        total: None,
    })?;
    let job = db
        .jobs
        .create_chained(CreateJobRequest {
            job_type,
            creator_id,
            extra: extra.to_value(),
        })
        .await?;
    db.tasks.enqueue(job.id, 0, payload).await?;
    tracing::debug!(
        subsystem = "jobs",
        job_id = %job.id,
        job_type = %job_type,
        collection_id = collection,
        "Chained follow-up job"
    );
    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_payload_round_trip() {
        let payload = SyncPayload {
            collection: "alice-birds".to_string(),
            method: SyncMethod::Add,
            items: vec!["item-1".to_string(), "item-2".to_string()],
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["method"], "add");
        let back: SyncPayload = serde_json::from_value(value).unwrap();
        assert_eq!(back.items.len(), 2);
    }

    #[test]
    fn test_query_payload_total_defaults_to_none() {
        let value = serde_json::json!({
            "collection": "alice-birds",
            "query": "content_txt:tramway"
        });
        let payload: QueryPayload = serde_json::from_value(value).unwrap();
        assert!(payload.total.is_none());
    }

    #[test]
    fn test_export_payload_round_trip() {
        let payload = ExportPayload {
            query: "year:1900".to_string(),
            columns: Some(vec!["id".to_string()]),
            total: Some(42),
            user_mask: Some(0b11000),
        };
        let back: ExportPayload =
            serde_json::from_value(serde_json::to_value(&payload).unwrap()).unwrap();
        assert_eq!(back.total, Some(42));
        assert_eq!(back.user_mask, Some(0b11000));
    }
}
