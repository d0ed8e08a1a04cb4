//! Add-from-query handlers.
//!
//! Both populate a collection from a caller-supplied query: one runs the
//! query against the primary index directly, the other against the
//! passages index with field collapse so each parent content item counts
//! once. The per-page effect is shared: membership rows into the store,
//! the collection tag onto the primary documents, and the updated tags
//! mirrored straight through to the passages.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};

use gazette_core::defaults::PAGE_LIMIT;
use gazette_core::{CollectionRepository, ItemRepository, JobType, NewCollectableItem, Result, SyncMethod};
use gazette_db::Database;
use gazette_index::{fields, Doc, FindAllRequest, IndexGateway};

use crate::handler::{StepContext, StepHandler, StepOutcome};
use crate::launch::QueryPayload;
use crate::template::plan_page;
use crate::workers::sync::content_type_of;
use crate::workers::{
    cleared_if_deleted, doc_collections, doc_id, fetch_page, ids_query, max_loops_for,
    propagate_parent_tags, push_updates, tag_updates,
};

fn add_page_fl() -> Option<String> {
    Some(format!(
        "{},{},{},{},{}",
        fields::ID,
        fields::VERSION,
        fields::USER_COLLECTIONS,
        fields::ITEM_TYPE,
        fields::SCORE
    ))
}

/// Apply one page of primary documents to the collection: membership
/// rows, the primary tag, and the passages mirror.
async fn apply_add_page(
    db: &Database,
    gateway: &IndexGateway,
    collection: &str,
    docs: &[Doc],
) -> Result<()> {
    let rows: Vec<NewCollectableItem> = docs
        .iter()
        .filter_map(|doc| {
            Some(NewCollectableItem {
                item_id: doc_id(doc)?.to_string(),
                content_type: content_type_of(doc),
                score: doc.get(fields::SCORE).and_then(JsonValue::as_f64),
            })
        })
        .collect();
    db.items.add_items(collection, &rows, None).await?;

    let batch = tag_updates(docs, collection, SyncMethod::Add);
    push_updates(&gateway.primary, &batch).await?;

    // Parents now carry the tag; hand the passages their final lists.
    let parents: HashMap<String, Vec<String>> = docs
        .iter()
        .filter_map(|doc| {
            let id = doc_id(doc)?.to_string();
            let mut tags = doc_collections(doc);
            if !tags.iter().any(|t| t == collection) {
                tags.push(collection.to_string());
            }
            Some((id, tags))
        })
        .collect();
    propagate_parent_tags(&gateway.passages, &parents).await?;
    Ok(())
}

fn finish(payload: &QueryPayload, count: i64, truncated: bool) -> StepOutcome {
    StepOutcome::Done {
        extra: json!({
            "collection": payload.collection,
            "query": payload.query,
            "count_items": count,
            "truncated": truncated,
        }),
    }
}

pub struct AddFromQueryHandler {
    db: Arc<Database>,
    gateway: IndexGateway,
}

impl AddFromQueryHandler {
    pub fn new(db: Arc<Database>, gateway: IndexGateway) -> Self {
        Self { db, gateway }
    }
}

#[async_trait]
impl StepHandler for AddFromQueryHandler {
    fn job_type(&self) -> JobType {
        JobType::AddFromQuery
    }

    async fn execute(&self, ctx: StepContext) -> Result<StepOutcome> {
        let mut payload: QueryPayload = serde_json::from_value(ctx.payload().clone())?;
        if let Some(done) = cleared_if_deleted(&self.db, &payload.collection).await? {
            return Ok(done);
        }

        let max_loops = max_loops_for(&self.db, ctx.job.creator_id).await?;
        let page = fetch_page(
            &self.gateway.primary,
            &FindAllRequest {
                query: payload.query.clone(),
                fq: None,
                fl: add_page_fl(),
                sort: fields::SORT_BY_SCORE.to_string(),
                start: ctx.cursor() * PAGE_LIMIT,
                rows: PAGE_LIMIT,
            },
        )
        .await?;
        let total = *payload.total.get_or_insert(page.total);
        let plan = plan_page(ctx.cursor(), total, max_loops);

        apply_add_page(&self.db, &self.gateway, &payload.collection, &page.docs).await?;

        if plan.is_last {
            let count = self
                .db
                .collections
                .refresh_count_items(&payload.collection)
                .await?;
            Ok(finish(&payload, count, plan.truncated))
        } else {
            Ok(StepOutcome::Continue {
                cursor: plan.page + 1,
                payload: serde_json::to_value(&payload)?,
                progress: plan.progress,
                extra: json!({
                    "collection": payload.collection,
                    "query": payload.query,
                }),
            })
        }
    }
}

pub struct AddFromPassagesQueryHandler {
    db: Arc<Database>,
    gateway: IndexGateway,
}

impl AddFromPassagesQueryHandler {
    pub fn new(db: Arc<Database>, gateway: IndexGateway) -> Self {
        Self { db, gateway }
    }
}

#[async_trait]
impl StepHandler for AddFromPassagesQueryHandler {
    fn job_type(&self) -> JobType {
        JobType::AddFromPassagesQuery
    }

    async fn execute(&self, ctx: StepContext) -> Result<StepOutcome> {
        let mut payload: QueryPayload = serde_json::from_value(ctx.payload().clone())?;
        if let Some(done) = cleared_if_deleted(&self.db, &payload.collection).await? {
            return Ok(done);
        }

        let max_loops = max_loops_for(&self.db, ctx.job.creator_id).await?;

        // Collapsed passages page: one row per parent content item.
        let page = fetch_page(
            &self.gateway.passages,
            &FindAllRequest {
                query: payload.query.clone(),
                fq: Some(fields::COLLAPSE_ON_CONTENT_ITEM.to_string()),
                fl: Some(format!("{},{}", fields::ID, fields::CONTENT_ITEM_ID)),
                sort: fields::SORT_BY_SCORE.to_string(),
                start: ctx.cursor() * PAGE_LIMIT,
                rows: PAGE_LIMIT,
            },
        )
        .await?;
        let total = *payload.total.get_or_insert(page.total);
        let plan = plan_page(ctx.cursor(), total, max_loops);

        let parent_ids: Vec<String> = page
            .docs
            .iter()
            .filter_map(|doc| {
                doc.get(fields::CONTENT_ITEM_ID)
                    .and_then(JsonValue::as_str)
                    .map(str::to_string)
            })
            .collect();

        if !parent_ids.is_empty() {
            // The page effect works on the parents, read from primary.
            let parents = fetch_page(
                &self.gateway.primary,
                &FindAllRequest {
                    query: ids_query(&parent_ids),
                    fq: None,
                    fl: add_page_fl(),
                    sort: fields::SORT_BY_ID.to_string(),
                    start: 0,
                    rows: parent_ids.len() as i64,
                },
            )
            .await?;
            apply_add_page(&self.db, &self.gateway, &payload.collection, &parents.docs).await?;
        }

        if plan.is_last {
            let count = self
                .db
                .collections
                .refresh_count_items(&payload.collection)
                .await?;
            Ok(finish(&payload, count, plan.truncated))
        } else {
            Ok(StepOutcome::Continue {
                cursor: plan.page + 1,
                payload: serde_json::to_value(&payload)?,
                progress: plan.progress,
                extra: json!({
                    "collection": payload.collection,
                    "query": payload.query,
                }),
            })
        }
    }
}
