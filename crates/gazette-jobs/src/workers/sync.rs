//! Sync-collection handler: add or remove explicit item ids.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};

use gazette_core::defaults::PAGE_LIMIT;
use gazette_core::{CollectionRepository, ContentType, Error, ItemRepository, JobType, NewCollectableItem, Result, SyncMethod};
use gazette_db::Database;
use gazette_index::{fields, FindAllRequest, IndexGateway};

use crate::handler::{StepContext, StepHandler, StepOutcome};
use crate::launch::{chain, SyncPayload};
use crate::template::plan_page;
use crate::workers::{
    cleared_if_deleted, doc_id, fetch_page, ids_query, max_loops_for, push_updates, tag_updates,
};

/// Map the index's item-type marker onto the membership row kind.
pub(crate) fn content_type_of(doc: &gazette_index::Doc) -> ContentType {
    match doc.get(fields::ITEM_TYPE).and_then(JsonValue::as_str) {
        Some("P") => ContentType::Page,
        Some("I") => ContentType::Issue,
        _ => ContentType::Article,
    }
}

pub struct SyncCollectionHandler {
    db: Arc<Database>,
    gateway: IndexGateway,
}

impl SyncCollectionHandler {
    pub fn new(db: Arc<Database>, gateway: IndexGateway) -> Self {
        Self { db, gateway }
    }
}

#[async_trait]
impl StepHandler for SyncCollectionHandler {
    fn job_type(&self) -> JobType {
        JobType::SyncCollection
    }

    async fn execute(&self, ctx: StepContext) -> Result<StepOutcome> {
        let payload: SyncPayload = serde_json::from_value(ctx.payload().clone())?;
        if payload.items.is_empty() {
            return Err(Error::InvalidInput("no items to sync".to_string()));
        }
        if let Some(done) = cleared_if_deleted(&self.db, &payload.collection).await? {
            return Ok(done);
        }

        let max_loops = max_loops_for(&self.db, ctx.job.creator_id).await?;
        let page = fetch_page(
            &self.gateway.primary,
            &FindAllRequest {
                query: ids_query(&payload.items),
                fq: None,
                fl: Some(format!(
                    "{},{},{},{}",
                    fields::ID,
                    fields::VERSION,
                    fields::USER_COLLECTIONS,
                    fields::ITEM_TYPE
                )),
                sort: fields::SORT_BY_ID.to_string(),
                start: ctx.cursor() * PAGE_LIMIT,
                rows: PAGE_LIMIT,
            },
        )
        .await?;
        let plan = plan_page(ctx.cursor(), page.total, max_loops);

        match payload.method {
            SyncMethod::Add => {
                let rows: Vec<NewCollectableItem> = page
                    .docs
                    .iter()
                    .filter_map(|doc| {
                        Some(NewCollectableItem {
                            item_id: doc_id(doc)?.to_string(),
                            content_type: content_type_of(doc),
                            score: None,
                        })
                    })
                    .collect();
                self.db
                    .items
                    .add_items(&payload.collection, &rows, None)
                    .await?;
            }
            SyncMethod::Remove => {
                let ids: Vec<String> = page
                    .docs
                    .iter()
                    .filter_map(|doc| Some(doc_id(doc)?.to_string()))
                    .collect();
                self.db.items.remove_items(&payload.collection, &ids).await?;
            }
        }

        let batch = tag_updates(&page.docs, &payload.collection, payload.method);
        push_updates(&self.gateway.primary, &batch).await?;

        if plan.is_last {
            let count = self
                .db
                .collections
                .refresh_count_items(&payload.collection)
                .await?;
            // Passages pick the change up through the chained propagation.
            chain(
                &self.db,
                ctx.job.creator_id,
                JobType::PropagateToPassages,
                &payload.collection,
            )
            .await?;
            Ok(StepOutcome::Done {
                extra: json!({
                    "collection": payload.collection,
                    "method": payload.method.to_string(),
                    "items": payload.items,
                    "count_items": count,
                    "truncated": plan.truncated,
                }),
            })
        } else {
            Ok(StepOutcome::Continue {
                cursor: plan.page + 1,
                payload: ctx.payload().clone(),
                progress: plan.progress,
                extra: json!({
                    "collection": payload.collection,
                    "method": payload.method.to_string(),
                }),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_type_of_markers() {
        let mut doc = gazette_index::Doc::new();
        doc.insert(fields::ITEM_TYPE.to_string(), json!("P"));
        assert_eq!(content_type_of(&doc), ContentType::Page);
        doc.insert(fields::ITEM_TYPE.to_string(), json!("I"));
        assert_eq!(content_type_of(&doc), ContentType::Issue);
        doc.insert(fields::ITEM_TYPE.to_string(), json!("A"));
        assert_eq!(content_type_of(&doc), ContentType::Article);
    }

    #[test]
    fn test_content_type_of_defaults_to_article() {
        let doc = gazette_index::Doc::new();
        assert_eq!(content_type_of(&doc), ContentType::Article);
    }
}
