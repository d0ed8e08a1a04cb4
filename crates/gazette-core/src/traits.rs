//! Core traits for gazette abstractions.
//!
//! These traits define the interfaces that concrete implementations
//! must satisfy, enabling pluggable backends and testability.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::access::{AccessProfile, UserPlan};
use crate::bitmask::BitMask64;
use crate::error::Result;
use crate::models::*;

// =============================================================================
// COLLECTION REPOSITORY TRAITS
// =============================================================================

/// Request for creating a new collection.
#[derive(Debug, Clone)]
pub struct CreateCollectionRequest {
    /// Caller-supplied id; must carry the creator's uid prefix.
    pub id: String,
    pub name: String,
    pub description: String,
    pub status: CollectionStatus,
    pub creator_id: Uuid,
}

/// Repository for collection CRUD operations.
#[async_trait]
pub trait CollectionRepository: Send + Sync {
    /// Insert a new collection.
    async fn insert(&self, req: CreateCollectionRequest) -> Result<Collection>;

    /// Fetch a collection by id.
    async fn fetch(&self, id: &str) -> Result<Collection>;

    /// List collections owned by a user.
    async fn list_for_user(&self, creator_id: Uuid) -> Result<Vec<Collection>>;

    /// Update a collection's status.
    async fn set_status(&self, id: &str, status: CollectionStatus) -> Result<()>;

    /// Recount items and persist `count_items`. Returns the new count.
    async fn refresh_count_items(&self, id: &str) -> Result<i64>;

    /// Permanently delete the collection row. Only valid once the
    /// collection is DELETED and all index tags have been stripped.
    async fn hard_delete(&self, id: &str) -> Result<()>;
}

/// One membership row to insert.
#[derive(Debug, Clone)]
pub struct NewCollectableItem {
    pub item_id: String,
    pub content_type: ContentType,
    /// Relevance score of the query the item came from, if any.
    pub score: Option<f64>,
}

/// Repository for collection membership rows.
#[async_trait]
pub trait ItemRepository: Send + Sync {
    /// Add items to a collection; already-present pairs are ignored.
    /// Returns the number of rows actually inserted.
    async fn add_items(
        &self,
        collection_id: &str,
        items: &[NewCollectableItem],
        search_query_id: Option<Uuid>,
    ) -> Result<u64>;

    /// Remove items from a collection. Returns the number of rows removed.
    async fn remove_items(&self, collection_id: &str, item_ids: &[String]) -> Result<u64>;

    /// Remove every membership row of a collection.
    async fn delete_for_collection(&self, collection_id: &str) -> Result<u64>;

    /// Count membership rows of a collection.
    async fn count_for_collection(&self, collection_id: &str) -> Result<i64>;

    /// List item ids of a collection, paged for batch processing.
    async fn list_item_ids(
        &self,
        collection_id: &str,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<String>>;

    /// List full membership rows of a collection, paged.
    async fn list_for_collection(
        &self,
        collection_id: &str,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<CollectableItem>>;
}

// =============================================================================
// JOB REPOSITORY TRAITS
// =============================================================================

/// Request for creating a new job.
#[derive(Debug, Clone)]
pub struct CreateJobRequest {
    pub job_type: JobType,
    pub creator_id: Uuid,
    pub extra: JsonValue,
}

/// Repository for the durable job registry.
///
/// All mutations are guarded: once a job is terminal it is never written
/// again, and a STOP status survives concurrent progress updates.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Create a job in READY state. Fails with `TooManyJobs` when the
    /// creator already has `max_parallel_jobs` active jobs.
    async fn create(&self, req: CreateJobRequest) -> Result<Job>;

    /// Create a job without the admission check. Used for jobs chained
    /// from a completing job (propagation, cleanup); user-submitted jobs
    /// always go through `create`.
    async fn create_chained(&self, req: CreateJobRequest) -> Result<Job>;

    /// Fetch a job by id.
    async fn fetch(&self, id: Uuid) -> Result<Job>;

    /// List a user's jobs, newest first.
    async fn list_for_user(&self, creator_id: Uuid, limit: i64, offset: i64) -> Result<Vec<Job>>;

    /// Move READY -> RUN. A no-op returning the current row when the job
    /// is already RUN; an error when it is terminal or STOP.
    async fn start(&self, id: Uuid) -> Result<Job>;

    /// Persist progress and merge extra keys. Never resurrects a terminal
    /// job and never overwrites a STOP status.
    async fn update_progress(&self, id: Uuid, progress: f64, extra: JsonValue) -> Result<()>;

    /// Move RUN -> DONE with progress forced to 1.0.
    async fn complete(&self, id: Uuid, extra: JsonValue) -> Result<()>;

    /// Move to ERR, recording the failure message in extra.
    async fn fail(&self, id: Uuid, message: &str) -> Result<()>;

    /// Request cooperative cancellation: READY/RUN -> STOP.
    /// Terminal jobs are left untouched.
    async fn request_stop(&self, id: Uuid) -> Result<()>;

    /// Worker acknowledgment of a STOP: STOP -> RIP.
    async fn acknowledge_stop(&self, id: Uuid, extra: JsonValue) -> Result<()>;

    /// Move DONE -> ARCHIVED (user dismissed the finished job).
    async fn archive(&self, id: Uuid) -> Result<()>;

    /// Count a user's jobs in READY/RUN/STOP, for admission control.
    async fn active_count_for_user(&self, creator_id: Uuid) -> Result<i64>;
}

/// The step queue backing paginated workers.
///
/// A long job never blocks a worker slot between pages: each page finishes
/// by enqueueing the next `(job_id, cursor)` row and releasing the slot.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueue a step for a job.
    async fn enqueue(&self, job_id: Uuid, cursor: i64, payload: JsonValue) -> Result<Uuid>;

    /// Claim and remove the next available step, skipping rows locked by
    /// other workers. Returns `None` when the queue is empty. Pages are
    /// idempotent, so a step lost to a crash after claiming is harmless.
    async fn claim_next(&self) -> Result<Option<Task>>;

    /// Delete all pending steps of a job (used on failure and stop).
    async fn purge_for_job(&self, job_id: Uuid) -> Result<u64>;
}

/// Repository for job file attachments.
#[async_trait]
pub trait AttachmentRepository: Send + Sync {
    /// Create an attachment for a job.
    async fn create(&self, job_id: Uuid, path: &str) -> Result<Attachment>;

    /// Fetch the attachment of a job, if any.
    async fn fetch_for_job(&self, job_id: Uuid) -> Result<Option<Attachment>>;

    /// Re-point an attachment's path (e.g. after zipping the payload).
    async fn update_path(&self, id: Uuid, path: &str) -> Result<()>;

    /// Delete an attachment (used when a failed export discards its
    /// partial file). Deleting a missing row is not an error.
    async fn delete(&self, id: Uuid) -> Result<()>;
}

// =============================================================================
// IDENTITY REPOSITORY TRAITS
// =============================================================================

/// Repository for user records and their access inputs.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Fetch a user by id.
    async fn fetch(&self, id: Uuid) -> Result<UserRecord>;

    /// Fetch a user by opaque uid.
    async fn fetch_by_uid(&self, uid: &str) -> Result<UserRecord>;

    /// Fetch a user by username.
    async fn fetch_by_username(&self, username: &str) -> Result<UserRecord>;

    /// Assemble the access-resolver inputs for a user: group names,
    /// subscription positions, and terms-acceptance state.
    async fn access_profile(&self, id: Uuid) -> Result<AccessProfile>;

    /// Record terms acceptance. Idempotent.
    async fn accept_terms(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Add the user to a named group. Add-if-absent.
    async fn add_to_group(&self, id: Uuid, group: &str) -> Result<()>;

    /// Remove the user from a named group. Remove-if-present.
    async fn remove_from_group(&self, id: Uuid, group: &str) -> Result<()>;
}

/// Repository for subscriptions and their bitmap positions.
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Create a subscription at position max+1. Positions are never reused.
    async fn create(&self, name: &str) -> Result<Subscription>;

    /// List all subscriptions ordered by position.
    async fn list(&self) -> Result<Vec<Subscription>>;

    /// Grant a subscription to a user.
    async fn grant(&self, user_id: Uuid, subscription_id: Uuid) -> Result<()>;

    /// Revoke a subscription from a user.
    async fn revoke(&self, user_id: Uuid, subscription_id: Uuid) -> Result<()>;
}

/// Repository for materialized user bitmaps.
#[async_trait]
pub trait BitmapRepository: Send + Sync {
    /// Fetch a user's stored bitmap, if one has been materialized.
    async fn fetch(&self, user_id: Uuid) -> Result<Option<UserBitmapRecord>>;

    /// Store a user's bitmap in canonical 8-byte form. Upserts.
    async fn store(&self, user_id: Uuid, bitmap: &BitMask64) -> Result<()>;
}

/// Repository for plan-change requests.
#[async_trait]
pub trait PlanRequestRepository: Send + Sync {
    /// Create or reset the user's single request to pending.
    async fn submit(&self, user_id: Uuid, plan: UserPlan) -> Result<ChangePlanRequest>;

    /// Fetch a user's request, if any.
    async fn fetch_for_user(&self, user_id: Uuid) -> Result<Option<ChangePlanRequest>>;

    /// Record an admin decision, appending a changelog entry. Deciding
    /// again corrects the previous decision.
    async fn decide(
        &self,
        user_id: Uuid,
        status: PlanRequestStatus,
        notes: Option<&str>,
    ) -> Result<ChangePlanRequest>;
}

// =============================================================================
// MAILER PORT
// =============================================================================

/// Outbound notification channel for plan-change decisions.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send one message. Failures are reported, never retried here.
    async fn send(&self, mail: &Mail) -> Result<()>;
}
