//! Collection removal handlers.
//!
//! Removal pages differently from the other workers: stripping the tag
//! shrinks the result set, so every page reads from offset zero and the
//! cursor only counts completed loops for progress and the loop ceiling.
//! The job is finished when the query comes back empty.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use gazette_core::defaults::PAGE_LIMIT;
use gazette_core::{CollectionRepository, CollectionStatus, Error, ItemRepository, JobType, Result, SyncMethod};
use gazette_db::Database;
use gazette_index::{fields, FindAllRequest, IndexClient, IndexGateway};

use crate::handler::{StepContext, StepHandler, StepOutcome};
use crate::launch::{chain, CollectionPayload};
use crate::template::plan_page;
use crate::workers::{
    doc_id, fetch_page, max_loops_for, push_updates, tag_fl, tag_updates, tagged_query,
};

/// One stripping pass: read a page of tagged documents at offset zero,
/// drop the tag. Returns the remaining match count and the page's ids,
/// or `None` when the index has no tagged documents left.
async fn strip_page(
    client: &IndexClient,
    collection_id: &str,
) -> Result<Option<(i64, Vec<String>)>> {
    let page = fetch_page(
        client,
        &FindAllRequest {
            query: tagged_query(collection_id),
            fq: None,
            fl: tag_fl(),
            sort: fields::SORT_BY_ID.to_string(),
            start: 0,
            rows: PAGE_LIMIT,
        },
    )
    .await?;
    if page.docs.is_empty() {
        return Ok(None);
    }

    let batch = tag_updates(&page.docs, collection_id, SyncMethod::Remove);
    push_updates(client, &batch).await?;

    let ids = page
        .docs
        .iter()
        .filter_map(|doc| Some(doc_id(doc)?.to_string()))
        .collect();
    Ok(Some((page.total, ids)))
}

pub struct RemoveCollectionHandler {
    db: Arc<Database>,
    gateway: IndexGateway,
}

impl RemoveCollectionHandler {
    pub fn new(db: Arc<Database>, gateway: IndexGateway) -> Self {
        Self { db, gateway }
    }
}

#[async_trait]
impl StepHandler for RemoveCollectionHandler {
    fn job_type(&self) -> JobType {
        JobType::RemoveCollection
    }

    async fn execute(&self, ctx: StepContext) -> Result<StepOutcome> {
        let mut payload: CollectionPayload = serde_json::from_value(ctx.payload().clone())?;

        // Only a collection already marked deleted may be torn down; a
        // missing row just means a previous run got past the final page.
        match self.db.collections.fetch(&payload.collection).await {
            Ok(c) if c.status != CollectionStatus::Deleted => {
                return Err(Error::InvalidInput(format!(
                    "collection {} is not marked deleted",
                    payload.collection
                )));
            }
            Ok(_) | Err(Error::EntityMissing(_)) => {}
            Err(e) => return Err(e),
        }

        let max_loops = max_loops_for(&self.db, ctx.job.creator_id).await?;

        match strip_page(&self.gateway.primary, &payload.collection).await? {
            None => {
                self.db
                    .items
                    .delete_for_collection(&payload.collection)
                    .await?;
                if self.db.collections.fetch(&payload.collection).await.is_ok() {
                    self.db.collections.hard_delete(&payload.collection).await?;
                }
                chain(
                    &self.db,
                    ctx.job.creator_id,
                    JobType::RemoveFromPassages,
                    &payload.collection,
                )
                .await?;
                Ok(StepOutcome::Done {
                    extra: json!({ "collection": payload.collection }),
                })
            }
            Some((found, ids)) => {
                self.db.items.remove_items(&payload.collection, &ids).await?;

                if ctx.cursor() + 1 >= max_loops {
                    return Ok(StepOutcome::Done {
                        extra: json!({
                            "collection": payload.collection,
                            "truncated": true,
                        }),
                    });
                }
                let total = *payload.total.get_or_insert(found);
                let plan = plan_page(ctx.cursor(), total, max_loops);
                Ok(StepOutcome::Continue {
                    cursor: ctx.cursor() + 1,
                    payload: serde_json::to_value(&payload)?,
                    progress: plan.progress,
                    extra: json!({ "collection": payload.collection }),
                })
            }
        }
    }
}

pub struct RemoveFromPassagesHandler {
    db: Arc<Database>,
    gateway: IndexGateway,
}

impl RemoveFromPassagesHandler {
    pub fn new(db: Arc<Database>, gateway: IndexGateway) -> Self {
        Self { db, gateway }
    }
}

#[async_trait]
impl StepHandler for RemoveFromPassagesHandler {
    fn job_type(&self) -> JobType {
        JobType::RemoveFromPassages
    }

    async fn execute(&self, ctx: StepContext) -> Result<StepOutcome> {
        let mut payload: CollectionPayload = serde_json::from_value(ctx.payload().clone())?;
        let max_loops = max_loops_for(&self.db, ctx.job.creator_id).await?;

        match strip_page(&self.gateway.passages, &payload.collection).await? {
            None => Ok(StepOutcome::Done {
                extra: json!({ "collection": payload.collection }),
            }),
            Some((found, _ids)) => {
                if ctx.cursor() + 1 >= max_loops {
                    return Ok(StepOutcome::Done {
                        extra: json!({
                            "collection": payload.collection,
                            "truncated": true,
                        }),
                    });
                }
                let total = *payload.total.get_or_insert(found);
                let plan = plan_page(ctx.cursor(), total, max_loops);
                Ok(StepOutcome::Continue {
                    cursor: ctx.cursor() + 1,
                    payload: serde_json::to_value(&payload)?,
                    progress: plan.progress,
                    extra: json!({ "collection": payload.collection }),
                })
            }
        }
    }
}
