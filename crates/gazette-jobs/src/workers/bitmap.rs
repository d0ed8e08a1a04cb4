//! Update-user-bitmap handler: single step, no pagination.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use gazette_core::access::resolve;
use gazette_core::{BitmapRepository, JobType, Result, UserRepository};
use gazette_db::Database;

use crate::handler::{StepContext, StepHandler, StepOutcome};

pub struct UpdateUserBitmapHandler {
    db: Arc<Database>,
}

impl UpdateUserBitmapHandler {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl StepHandler for UpdateUserBitmapHandler {
    fn job_type(&self) -> JobType {
        JobType::UpdateUserBitmap
    }

    async fn execute(&self, ctx: StepContext) -> Result<StepOutcome> {
        let user_id = ctx.job.creator_id;
        let profile = self.db.users.access_profile(user_id).await?;
        let (mask, plan) = resolve(&profile);
        self.db.bitmaps.store(user_id, &mask).await?;

        tracing::info!(
            subsystem = "jobs",
            job_id = %ctx.job.id,
            user_id = %user_id,
            "Materialized user bitmap"
        );

        Ok(StepOutcome::Done {
            extra: json!({
                "userBitmap": mask.as_u64(),
                "plan": plan.to_string(),
            }),
        })
    }
}
