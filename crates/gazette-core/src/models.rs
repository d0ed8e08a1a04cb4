//! Core data models for gazette.
//!
//! These types are shared across all gazette crates and represent the
//! domain entities: collections and their items, jobs and their tasks,
//! user bitmaps, subscriptions, and plan-change requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use crate::access::UserPlan;

// =============================================================================
// COLLECTION TYPES
// =============================================================================

/// Visibility / lifecycle status of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CollectionStatus {
    Private,
    Shared,
    Public,
    /// Marked for removal; never accepts new items. The row is destroyed
    /// only after the remove-collection job completes.
    Deleted,
}

impl std::fmt::Display for CollectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Private => write!(f, "PRI"),
            Self::Shared => write!(f, "SHA"),
            Self::Public => write!(f, "PUB"),
            Self::Deleted => write!(f, "DEL"),
        }
    }
}

/// A user-owned set of content items.
///
/// The string id is prefixed by the owner's opaque uid, which is how
/// ownership is checked when filtering foreign collections out of exports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    pub id: String,
    pub name: String,
    pub description: String,
    pub status: CollectionStatus,
    pub creator_id: Uuid,
    /// Cached item count, refreshed by sync workers.
    pub count_items: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Collection {
    /// Whether this collection id belongs to the given owner uid.
    pub fn is_owned_by(&self, uid: &str) -> bool {
        collection_owned_by(&self.id, uid)
    }
}

/// Whether a collection id carries the given owner uid prefix.
pub fn collection_owned_by(collection_id: &str, uid: &str) -> bool {
    collection_id
        .strip_prefix(uid)
        .is_some_and(|rest| rest.starts_with('-'))
}

/// Content type of a collectable item in the primary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContentType {
    Article,
    Page,
    Issue,
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Article => write!(f, "A"),
            Self::Page => write!(f, "P"),
            Self::Issue => write!(f, "I"),
        }
    }
}

/// Membership of one content item in one collection.
///
/// Unique on `(item_id, collection_id)`; insertion is conflict-ignore so
/// retried pages are idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectableItem {
    pub item_id: String,
    pub collection_id: String,
    pub content_type: ContentType,
    pub added_at: DateTime<Utc>,
    /// Relevance score of the query the item came from, if any.
    pub score: Option<f64>,
    /// Weak reference to the search query the item originated from.
    pub search_query_id: Option<Uuid>,
}

// =============================================================================
// JOB TYPES
// =============================================================================

/// The eight queue-driven worker kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Add/remove explicit item ids to a collection and mirror the index.
    SyncCollection,
    /// Add every item matched by a primary-index query to a collection.
    AddFromQuery,
    /// Add parent items matched by a passages-index query (field-collapsed).
    AddFromPassagesQuery,
    /// Copy each parent item's collection tags onto its passages.
    PropagateToPassages,
    /// Tear down a DELETED collection: strip tags, delete rows, drop the row.
    RemoveCollection,
    /// Strip a removed collection's id from the passages index.
    RemoveFromPassages,
    /// Stream a query result to a redacted CSV and zip it.
    ExportQueryCsv,
    /// Re-resolve and persist a user's materialized bitmap.
    UpdateUserBitmap,
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SyncCollection => write!(f, "sync_collection"),
            Self::AddFromQuery => write!(f, "add_from_query"),
            Self::AddFromPassagesQuery => write!(f, "add_from_passages_query"),
            Self::PropagateToPassages => write!(f, "propagate_to_passages"),
            Self::RemoveCollection => write!(f, "remove_collection"),
            Self::RemoveFromPassages => write!(f, "remove_from_passages"),
            Self::ExportQueryCsv => write!(f, "export_query_csv"),
            Self::UpdateUserBitmap => write!(f, "update_user_bitmap"),
        }
    }
}

/// Job lifecycle states.
///
/// ```text
/// READY ──► RUN ──► DONE ──► ARCHIVED
///   │        ├────► ERR
///   │        └────► STOP ──► RIP
///   └──────────────► STOP
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Ready,
    Run,
    Done,
    Archived,
    Stop,
    Rip,
    Err,
}

impl JobStatus {
    /// Terminal jobs are never mutated again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Archived | Self::Rip | Self::Err)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready => write!(f, "READY"),
            Self::Run => write!(f, "RUN"),
            Self::Done => write!(f, "DONE"),
            Self::Archived => write!(f, "ARCHIVED"),
            Self::Stop => write!(f, "STOP"),
            Self::Rip => write!(f, "RIP"),
            Self::Err => write!(f, "ERR"),
        }
    }
}

/// Durable record of one unit of background work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    /// Progress in [0, 1]; 1.0 exactly once at completion. Exposed here as a
    /// first-class field, not only inside `extra`.
    pub progress: f64,
    pub extra: JsonValue,
    pub creator_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Well-known keys of the job `extra` JSON object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobExtra {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taskname: Option<String>,
    #[serde(default)]
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_uid: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleared: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncated: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "userBitmap")]
    pub user_bitmap: Option<u64>,
    /// Task-specific keys not modeled above survive round trips.
    #[serde(flatten)]
    pub rest: Map<String, JsonValue>,
}

impl JobExtra {
    /// Parse the extra object of a job, tolerating missing keys.
    pub fn from_value(value: &JsonValue) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }

    /// Serialize back to a JSON object.
    pub fn to_value(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or_else(|_| JsonValue::Object(Map::new()))
    }
}

/// One enqueued progress step of a job: `(job_id, cursor)` plus the
/// task-specific payload. The queue is the only "stack" a long job has.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub job_id: Uuid,
    pub cursor: i64,
    pub payload: JsonValue,
    pub created_at: DateTime<Utc>,
}

/// File product of a job; the path is stable for the job's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Uuid,
    pub job_id: Uuid,
    pub path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Direction of a sync-collection job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMethod {
    Add,
    Remove,
}

impl std::fmt::Display for SyncMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Add => write!(f, "add"),
            Self::Remove => write!(f, "remove"),
        }
    }
}

// =============================================================================
// IDENTITY TYPES
// =============================================================================

/// Read-only view of a user from the identity store, including the per-user
/// resource limits consulted by the worker protocol and the admission layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: Uuid,
    pub username: String,
    /// Opaque uid; prefixes the ids of every collection the user owns.
    pub uid: String,
    pub email: String,
    pub is_staff: bool,
    pub max_loops_allowed: i64,
    pub max_parallel_jobs: i64,
    pub created_at: DateTime<Utc>,
}

/// A purchasable content subscription with a stable bitmap position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub name: String,
    /// Assigned max+1 at creation; never reordered.
    pub bitmap_position: i32,
}

/// Materialized per-user bitmap, stored in canonical 8-byte big-endian form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserBitmapRecord {
    pub user_id: Uuid,
    pub bitmap: Vec<u8>,
    pub date_accepted_terms: Option<DateTime<Utc>>,
}

// =============================================================================
// PLAN CHANGE TYPES
// =============================================================================

/// Status of a user's request to change plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanRequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl std::fmt::Display for PlanRequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// A user's request to move to a different plan; one per user, with an
/// append-only changelog of admin transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangePlanRequest {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan: UserPlan,
    pub status: PlanRequestStatus,
    /// Append-only array of `{status, plan, date, notes}` entries.
    pub changelog: JsonValue,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An outbound e-mail handed to the [`crate::traits::Mailer`] port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_ownership_prefix() {
        assert!(collection_owned_by("abc123-my-items", "abc123"));
        assert!(!collection_owned_by("abc123-my-items", "abc12"));
        assert!(!collection_owned_by("other-collection", "abc123"));
        assert!(!collection_owned_by("abc123", "abc123"));
    }

    #[test]
    fn test_job_status_terminal() {
        assert!(JobStatus::Done.is_terminal());
        assert!(JobStatus::Archived.is_terminal());
        assert!(JobStatus::Rip.is_terminal());
        assert!(JobStatus::Err.is_terminal());
        assert!(!JobStatus::Ready.is_terminal());
        assert!(!JobStatus::Run.is_terminal());
        assert!(!JobStatus::Stop.is_terminal());
    }

    #[test]
    fn test_job_type_display_is_snake_case() {
        assert_eq!(JobType::SyncCollection.to_string(), "sync_collection");
        assert_eq!(JobType::ExportQueryCsv.to_string(), "export_query_csv");
        assert_eq!(JobType::UpdateUserBitmap.to_string(), "update_user_bitmap");
    }

    #[test]
    fn test_job_extra_round_trip() {
        let extra = JobExtra {
            task: Some("sync_collection".to_string()),
            taskname: Some("sync_collection".to_string()),
            progress: 0.5,
            collection: Some("abc-def".to_string()),
            method: Some("add".to_string()),
            items: Some(vec!["item-1".to_string(), "item-2".to_string()]),
            ..Default::default()
        };

        let value = extra.to_value();
        let parsed = JobExtra::from_value(&value);
        assert_eq!(parsed.task.as_deref(), Some("sync_collection"));
        assert_eq!(parsed.progress, 0.5);
        assert_eq!(parsed.items.as_ref().map(Vec::len), Some(2));
    }

    #[test]
    fn test_job_extra_preserves_unknown_keys() {
        let value = serde_json::json!({
            "task": "export_query_csv",
            "progress": 1.0,
            "message": "done",
            "sort": "score DESC,id ASC"
        });
        let extra = JobExtra::from_value(&value);
        assert_eq!(
            extra.rest.get("sort").and_then(|v| v.as_str()),
            Some("score DESC,id ASC")
        );
        let back = extra.to_value();
        assert_eq!(back["sort"], "score DESC,id ASC");
    }

    #[test]
    fn test_job_extra_tolerates_empty_object() {
        let extra = JobExtra::from_value(&serde_json::json!({}));
        assert_eq!(extra.progress, 0.0);
        assert!(extra.message.is_empty());
    }

    #[test]
    fn test_collection_status_display() {
        assert_eq!(CollectionStatus::Private.to_string(), "PRI");
        assert_eq!(CollectionStatus::Deleted.to_string(), "DEL");
    }

    #[test]
    fn test_sync_method_display() {
        assert_eq!(SyncMethod::Add.to_string(), "add");
        assert_eq!(SyncMethod::Remove.to_string(), "remove");
    }
}
