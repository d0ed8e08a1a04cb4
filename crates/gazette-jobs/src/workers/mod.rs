//! One handler per job kind, plus the index plumbing they share.
//!
//! Every paginated handler follows the same shape: check the collection
//! is still live, fetch one page from an index, apply the page effect to
//! the relational store and the index, and hand the worker a
//! [`StepOutcome`](crate::handler::StepOutcome) that either chains the
//! next page or finishes the job.

pub mod bitmap;
pub mod export_job;
pub mod propagate;
pub mod queries;
pub mod remove;
pub mod sync;

pub use bitmap::UpdateUserBitmapHandler;
pub use export_job::ExportQueryCsvHandler;
pub use propagate::PropagateToPassagesHandler;
pub use queries::{AddFromPassagesQueryHandler, AddFromQueryHandler};
pub use remove::{RemoveCollectionHandler, RemoveFromPassagesHandler};
pub use sync::SyncCollectionHandler;

use std::collections::HashMap;

use serde_json::Value as JsonValue;

use gazette_core::defaults::{MAX_LOOPS, PAGE_LIMIT};
use gazette_core::{CollectionRepository, CollectionStatus, Error, Result, SyncMethod, UserRepository};
use gazette_db::Database;
use gazette_index::{atomic_set, fields, with_backoff, Doc, FindAllRequest, IndexClient};

use crate::handler::StepOutcome;

/// Query matching a set of documents by id.
pub(crate) fn ids_query(ids: &[String]) -> String {
    let quoted: Vec<String> = ids.iter().map(|id| format!("\"{id}\"")).collect();
    format!("{}:({})", fields::ID, quoted.join(" OR "))
}

/// Query matching every document tagged with a collection.
pub(crate) fn tagged_query(collection_id: &str) -> String {
    format!("{}:\"{}\"", fields::USER_COLLECTIONS, collection_id)
}

/// Query matching passages by their parent content-item ids.
pub(crate) fn parents_query(ids: &[String]) -> String {
    let quoted: Vec<String> = ids.iter().map(|id| format!("\"{id}\"")).collect();
    format!("{}:({})", fields::CONTENT_ITEM_ID, quoted.join(" OR "))
}

/// The field list every tag-editing page needs.
pub(crate) fn tag_fl() -> Option<String> {
    Some(format!(
        "{},{},{}",
        fields::ID,
        fields::VERSION,
        fields::USER_COLLECTIONS
    ))
}

pub(crate) fn doc_id(doc: &Doc) -> Option<&str> {
    doc.get(fields::ID).and_then(JsonValue::as_str)
}

pub(crate) fn doc_version(doc: &Doc) -> i64 {
    doc.get(fields::VERSION)
        .and_then(JsonValue::as_i64)
        .unwrap_or(0)
}

/// The collection tags currently on a document.
pub(crate) fn doc_collections(doc: &Doc) -> Vec<String> {
    doc.get(fields::USER_COLLECTIONS)
        .and_then(JsonValue::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(JsonValue::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Build the atomic updates that add or remove one collection tag across
/// a page of documents. Documents already in the target state produce no
/// update, which is what makes re-running a page a no-op.
pub(crate) fn tag_updates(docs: &[Doc], collection_id: &str, method: SyncMethod) -> Vec<JsonValue> {
    docs.iter()
        .filter_map(|doc| {
            let id = doc_id(doc)?;
            let mut tags = doc_collections(doc);
            let present = tags.iter().any(|t| t == collection_id);
            match method {
                SyncMethod::Add if !present => tags.push(collection_id.to_string()),
                SyncMethod::Remove if present => tags.retain(|t| t != collection_id),
                _ => return None,
            }
            Some(atomic_set(
                id,
                doc_version(doc),
                fields::USER_COLLECTIONS,
                &tags,
            ))
        })
        .collect()
}

/// The page ceiling for one of this user's jobs.
pub(crate) async fn max_loops_for(db: &Database, creator_id: uuid::Uuid) -> Result<i64> {
    let user = db.users.fetch(creator_id).await?;
    Ok(user.max_loops_allowed.min(MAX_LOOPS))
}

/// If the collection is gone or marked deleted, finish the job with a
/// `cleared` outcome instead of touching anything.
pub(crate) async fn cleared_if_deleted(
    db: &Database,
    collection_id: &str,
) -> Result<Option<StepOutcome>> {
    let reason = match db.collections.fetch(collection_id).await {
        Ok(c) if c.status == CollectionStatus::Deleted => "Collection has status DELETED",
        Ok(_) => return Ok(None),
        Err(Error::EntityMissing(_)) => "Collection no longer exists",
        Err(e) => return Err(e),
    };
    Ok(Some(StepOutcome::Done {
        extra: serde_json::json!({ "cleared": true, "reason": reason }),
    }))
}

/// One retried select page.
pub(crate) async fn fetch_page(
    client: &IndexClient,
    req: &FindAllRequest,
) -> Result<gazette_index::FindAllResponse> {
    with_backoff("find_all", || client.find_all(req)).await
}

/// One retried update batch.
pub(crate) async fn push_updates(client: &IndexClient, batch: &[JsonValue]) -> Result<()> {
    with_backoff("update", || client.update(batch)).await
}

/// Mirror the parents' collection tags onto their passages.
///
/// `parents` maps each content-item id to its current tag list. Passages
/// whose tags already equal their parent's are skipped. The passage
/// lookup pages internally; the loop guard only matters for degenerate
/// parent/passage ratios.
pub(crate) async fn propagate_parent_tags(
    passages: &IndexClient,
    parents: &HashMap<String, Vec<String>>,
) -> Result<u64> {
    if parents.is_empty() {
        return Ok(0);
    }
    let parent_ids: Vec<String> = parents.keys().cloned().collect();
    let fl = Some(format!(
        "{},{},{},{}",
        fields::ID,
        fields::VERSION,
        fields::CONTENT_ITEM_ID,
        fields::USER_COLLECTIONS
    ));

    let mut updated = 0u64;
    let mut offset = 0i64;
    for _ in 0..MAX_LOOPS {
        let page = fetch_page(
            passages,
            &FindAllRequest {
                query: parents_query(&parent_ids),
                fq: None,
                fl: fl.clone(),
                sort: fields::SORT_BY_ID.to_string(),
                start: offset,
                rows: PAGE_LIMIT,
            },
        )
        .await?;

        let batch: Vec<JsonValue> = page
            .docs
            .iter()
            .filter_map(|doc| {
                let parent_id = doc.get(fields::CONTENT_ITEM_ID)?.as_str()?;
                let wanted = parents.get(parent_id)?;
                let current = doc_collections(doc);
                if &current == wanted {
                    return None;
                }
                Some(atomic_set(
                    doc_id(doc)?,
                    doc_version(doc),
                    fields::USER_COLLECTIONS,
                    wanted,
                ))
            })
            .collect();
        updated += batch.len() as u64;
        push_updates(passages, &batch).await?;

        offset += PAGE_LIMIT;
        if offset >= page.total {
            break;
        }
    }
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, version: i64, tags: &[&str]) -> Doc {
        let mut d = Doc::new();
        d.insert(fields::ID.to_string(), json!(id));
        d.insert(fields::VERSION.to_string(), json!(version));
        d.insert(fields::USER_COLLECTIONS.to_string(), json!(tags));
        d
    }

    #[test]
    fn test_ids_query_quotes_each_id() {
        let q = ids_query(&["a-1".to_string(), "b-2".to_string()]);
        assert_eq!(q, "id:(\"a-1\" OR \"b-2\")");
    }

    #[test]
    fn test_tagged_query() {
        assert_eq!(tagged_query("alice-birds"), "ucoll_ss:\"alice-birds\"");
    }

    #[test]
    fn test_tag_updates_add_skips_present() {
        let docs = vec![
            doc("doc-1", 10, &["alice-birds"]),
            doc("doc-2", 11, &["alice-maps"]),
        ];
        let batch = tag_updates(&docs, "alice-birds", SyncMethod::Add);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0]["id"], "doc-2");
        assert_eq!(batch[0]["ucoll_ss"]["set"][1], "alice-birds");
    }

    #[test]
    fn test_tag_updates_remove_skips_absent() {
        let docs = vec![
            doc("doc-1", 10, &["alice-birds", "alice-maps"]),
            doc("doc-2", 11, &["alice-maps"]),
        ];
        let batch = tag_updates(&docs, "alice-birds", SyncMethod::Remove);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0]["id"], "doc-1");
        assert_eq!(batch[0]["ucoll_ss"]["set"], json!(["alice-maps"]));
    }

    #[test]
    fn test_tag_updates_idempotent_page_is_empty() {
        // Re-running an already-applied page produces no updates at all.
        let docs = vec![doc("doc-1", 10, &["alice-birds"])];
        assert!(tag_updates(&docs, "alice-birds", SyncMethod::Add).is_empty());
        let docs = vec![doc("doc-1", 10, &[])];
        assert!(tag_updates(&docs, "alice-birds", SyncMethod::Remove).is_empty());
    }

    #[test]
    fn test_doc_collections_missing_field() {
        let mut d = Doc::new();
        d.insert(fields::ID.to_string(), json!("doc-1"));
        assert!(doc_collections(&d).is_empty());
    }
}
