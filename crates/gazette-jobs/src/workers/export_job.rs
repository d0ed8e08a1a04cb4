//! Export-query-as-CSV handler.
//!
//! Page one resolves the caller's bitmask, freezes the column list and
//! match count, creates the attachment file and writes the preamble;
//! every page appends redacted rows; the final page wraps the CSV in a
//! ZIP and re-points the attachment. On failure the partial file and
//! its attachment row are both removed, so a failed job leaves no
//! attachment behind.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use gazette_core::access::resolve;
use gazette_core::defaults::{BASE_URL, PAGE_LIMIT};
use gazette_core::{AttachmentRepository, BitMask64, Error, JobType, Result, UserRepository};
use gazette_db::Database;
use gazette_index::{fields, FindAllRequest, IndexGateway};

use crate::export::{
    append_rows, finalize_zip, plan_columns, project_row, start_csv, RedactionPolicy,
};
use crate::handler::{StepContext, StepHandler, StepOutcome};
use crate::launch::ExportPayload;
use crate::template::plan_page;
use crate::workers::{fetch_page, max_loops_for};

pub struct ExportQueryCsvHandler {
    db: Arc<Database>,
    gateway: IndexGateway,
    policy: RedactionPolicy,
    base_url: String,
    export_dir: PathBuf,
}

impl ExportQueryCsvHandler {
    pub fn new(db: Arc<Database>, gateway: IndexGateway) -> Self {
        Self {
            db,
            gateway,
            policy: RedactionPolicy::from_env(),
            base_url: std::env::var("BASE_URL").unwrap_or_else(|_| BASE_URL.to_string()),
            export_dir: std::env::var("EXPORT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("exports")),
        }
    }

    /// Override the export directory (tests).
    pub fn with_export_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.export_dir = dir.into();
        self
    }

    async fn run(&self, ctx: &StepContext) -> Result<StepOutcome> {
        let mut payload: ExportPayload = serde_json::from_value(ctx.payload().clone())?;
        let user = self.db.users.fetch(ctx.job.creator_id).await?;
        let max_loops = max_loops_for(&self.db, ctx.job.creator_id).await?;

        let user_mask = match payload.user_mask {
            Some(bits) => BitMask64::from_int(bits),
            None => {
                let profile = self.db.users.access_profile(ctx.job.creator_id).await?;
                let (mask, _) = resolve(&profile);
                payload.user_mask = Some(mask.as_u64());
                mask
            }
        };

        let page = fetch_page(
            &self.gateway.primary,
            &FindAllRequest {
                query: payload.query.clone(),
                fq: None,
                fl: None,
                sort: fields::SORT_BY_SCORE.to_string(),
                start: ctx.cursor() * PAGE_LIMIT,
                rows: PAGE_LIMIT,
            },
        )
        .await?;
        let total = *payload.total.get_or_insert(page.total);
        let plan = plan_page(ctx.cursor(), total, max_loops);

        let (attachment, columns) = if ctx.cursor() == 0 {
            std::fs::create_dir_all(&self.export_dir)?;
            let path = self.export_dir.join(format!("export-{}.csv", ctx.job.id));
            let attachment = self
                .db
                .attachments
                .create(ctx.job.id, &path.display().to_string())
                .await?;
            let columns = plan_columns(&page.docs);
            start_csv(&path, total, &payload.query, &self.base_url, &columns)?;
            payload.columns = Some(columns.clone());
            (attachment, columns)
        } else {
            let attachment = self
                .db
                .attachments
                .fetch_for_job(ctx.job.id)
                .await?
                .ok_or_else(|| {
                    Error::EntityMissing(format!("attachment of job {}", ctx.job.id))
                })?;
            let columns = payload
                .columns
                .clone()
                .ok_or_else(|| Error::Internal("export step lost its column list".to_string()))?;
            (attachment, columns)
        };

        let csv_path = PathBuf::from(&attachment.path);
        let rows: Vec<Vec<String>> = page
            .docs
            .iter()
            .map(|doc| project_row(doc, &columns, user_mask, &user.uid, &self.policy))
            .collect();
        append_rows(&csv_path, &rows)?;

        if plan.is_last {
            let zip_path = finalize_zip(&csv_path)?;
            self.db
                .attachments
                .update_path(attachment.id, &zip_path.display().to_string())
                .await?;
            Ok(StepOutcome::Done {
                extra: json!({
                    "query": payload.query,
                    "total": total,
                    "truncated": plan.truncated,
                }),
            })
        } else {
            Ok(StepOutcome::Continue {
                cursor: plan.page + 1,
                payload: serde_json::to_value(&payload)?,
                progress: plan.progress,
                extra: json!({ "query": payload.query }),
            })
        }
    }

}

/// Best-effort cleanup after a failed page: remove the partial file and
/// the attachment row, so the failed job has no attachment at all.
async fn discard_partial(attachments: &dyn AttachmentRepository, job_id: Uuid) {
    if let Ok(Some(attachment)) = attachments.fetch_for_job(job_id).await {
        let path = Path::new(&attachment.path);
        if path.exists() {
            let _ = std::fs::remove_file(path);
        }
        let _ = attachments.delete(attachment.id).await;
    }
}

#[async_trait]
impl StepHandler for ExportQueryCsvHandler {
    fn job_type(&self) -> JobType {
        JobType::ExportQueryCsv
    }

    async fn execute(&self, ctx: StepContext) -> Result<StepOutcome> {
        match self.run(&ctx).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                discard_partial(&self.db.attachments, ctx.job.id).await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gazette_core::Attachment;
    use tokio::sync::Mutex;

    struct FakeAttachments {
        row: Mutex<Option<Attachment>>,
    }

    impl FakeAttachments {
        fn new() -> Self {
            Self {
                row: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl AttachmentRepository for FakeAttachments {
        async fn create(&self, job_id: Uuid, path: &str) -> Result<Attachment> {
            let now = Utc::now();
            let attachment = Attachment {
                id: Uuid::new_v4(),
                job_id,
                path: path.to_string(),
                created_at: now,
                updated_at: now,
            };
            *self.row.lock().await = Some(attachment.clone());
            Ok(attachment)
        }

        async fn fetch_for_job(&self, job_id: Uuid) -> Result<Option<Attachment>> {
            let row = self.row.lock().await;
            Ok(row.clone().filter(|a| a.job_id == job_id))
        }

        async fn update_path(&self, id: Uuid, path: &str) -> Result<()> {
            let mut row = self.row.lock().await;
            match row.as_mut() {
                Some(a) if a.id == id => {
                    a.path = path.to_string();
                    Ok(())
                }
                _ => Err(Error::EntityMissing(format!("attachment {id}"))),
            }
        }

        async fn delete(&self, id: Uuid) -> Result<()> {
            let mut row = self.row.lock().await;
            if row.as_ref().is_some_and(|a| a.id == id) {
                *row = None;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_export_leaves_no_attachment() {
        let dir = tempfile::tempdir().unwrap();
        let job_id = Uuid::new_v4();
        let csv_path = dir.path().join(format!("export-{job_id}.csv"));
        std::fs::write(&csv_path, b"half-written page").unwrap();

        let attachments = FakeAttachments::new();
        attachments
            .create(job_id, &csv_path.display().to_string())
            .await
            .unwrap();

        discard_partial(&attachments, job_id).await;

        assert!(!csv_path.exists());
        assert!(attachments.fetch_for_job(job_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_discard_without_attachment_is_noop() {
        let attachments = FakeAttachments::new();
        // Nothing to clean up; must not error or invent rows.
        discard_partial(&attachments, Uuid::new_v4()).await;
        assert!(attachments
            .fetch_for_job(Uuid::new_v4())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_discard_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let job_id = Uuid::new_v4();
        let csv_path = dir.path().join(format!("export-{job_id}.csv"));

        let attachments = FakeAttachments::new();
        attachments
            .create(job_id, &csv_path.display().to_string())
            .await
            .unwrap();

        // The file was never written; the row still has to go.
        discard_partial(&attachments, job_id).await;

        assert!(attachments.fetch_for_job(job_id).await.unwrap().is_none());
    }
}
