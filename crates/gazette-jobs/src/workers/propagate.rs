//! Propagate-to-passages handler.
//!
//! Walks every content item tagged with the collection and mirrors the
//! parent's full tag list onto its passages. Passages already in sync
//! produce no index writes, so re-running the job is a no-op.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use gazette_core::defaults::PAGE_LIMIT;
use gazette_core::{JobType, Result};
use gazette_db::Database;
use gazette_index::{fields, FindAllRequest, IndexGateway};

use crate::handler::{StepContext, StepHandler, StepOutcome};
use crate::launch::CollectionPayload;
use crate::template::plan_page;
use crate::workers::{
    cleared_if_deleted, doc_collections, doc_id, fetch_page, max_loops_for, propagate_parent_tags,
    tag_fl, tagged_query,
};

pub struct PropagateToPassagesHandler {
    db: Arc<Database>,
    gateway: IndexGateway,
}

impl PropagateToPassagesHandler {
    pub fn new(db: Arc<Database>, gateway: IndexGateway) -> Self {
        Self { db, gateway }
    }
}

#[async_trait]
impl StepHandler for PropagateToPassagesHandler {
    fn job_type(&self) -> JobType {
        JobType::PropagateToPassages
    }

    async fn execute(&self, ctx: StepContext) -> Result<StepOutcome> {
        let mut payload: CollectionPayload = serde_json::from_value(ctx.payload().clone())?;
        if let Some(done) = cleared_if_deleted(&self.db, &payload.collection).await? {
            return Ok(done);
        }

        let max_loops = max_loops_for(&self.db, ctx.job.creator_id).await?;
        let page = fetch_page(
            &self.gateway.primary,
            &FindAllRequest {
                query: tagged_query(&payload.collection),
                fq: None,
                fl: tag_fl(),
                sort: fields::SORT_BY_ID.to_string(),
                start: ctx.cursor() * PAGE_LIMIT,
                rows: PAGE_LIMIT,
            },
        )
        .await?;
        let total = *payload.total.get_or_insert(page.total);
        let plan = plan_page(ctx.cursor(), total, max_loops);

        let parents: HashMap<String, Vec<String>> = page
            .docs
            .iter()
            .filter_map(|doc| Some((doc_id(doc)?.to_string(), doc_collections(doc))))
            .collect();
        let updated = propagate_parent_tags(&self.gateway.passages, &parents).await?;

        tracing::debug!(
            subsystem = "jobs",
            job_id = %ctx.job.id,
            collection_id = %payload.collection,
            page = plan.page,
            doc_count = updated,
            "Propagated parent tags to passages"
        );

        if plan.is_last {
            Ok(StepOutcome::Done {
                extra: json!({
                    "collection": payload.collection,
                    "truncated": plan.truncated,
                }),
            })
        } else {
            Ok(StepOutcome::Continue {
                cursor: plan.page + 1,
                payload: serde_json::to_value(&payload)?,
                progress: plan.progress,
                extra: json!({ "collection": payload.collection }),
            })
        }
    }
}
