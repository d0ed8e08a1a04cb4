//! gazette: operator command-line interface.
//!
//! Submits jobs, runs the step worker, and exposes the access-resolver
//! checks operators need when debugging rights questions. Configuration
//! comes from the environment (`DATABASE_URL`, `PRIMARY_INDEX_URL`,
//! `PASSAGES_INDEX_URL`, credentials); a `.env` file is honored.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use gazette_core::access::resolve;
use gazette_core::defaults::{BASE_URL, MAIL_FROM, PAGE_LIMIT};
use gazette_core::{
    BitMask64, BitmapRepository, CollectionRepository, CollectionStatus, CreateCollectionRequest,
    ItemRepository, JobRepository, JobStatus, Mail, Mailer, SyncMethod, UserRecord,
    UserRepository,
};
use gazette_db::Database;
use gazette_index::{fields, FindAllRequest, IndexGateway};
use gazette_jobs::export::RedactionPolicy;
use gazette_jobs::{
    build_worker, submit_add_from_passages_query, submit_add_from_query, submit_export_query_csv,
    submit_remove_collection, submit_sync_collection, submit_update_user_bitmap, TracingMailer,
    WorkerConfig,
};

#[derive(Parser)]
#[command(name = "gazette")]
#[command(author, version, about = "Collection and job orchestration for gazette")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run pending database migrations
    Migrate,

    /// Run the step worker until interrupted
    Worker,

    /// Create a collection owned by a user
    CreateCollection {
        /// Owner user id
        user: Uuid,

        /// Collection name; the id is derived from the owner's uid
        name: String,

        #[arg(short, long, default_value = "")]
        description: String,
    },

    /// Add explicit items to a collection (async job)
    AddItemsToCollection {
        collection_id: String,

        /// Item ids to add
        #[arg(required = true, num_args = 1..)]
        item_id: Vec<String>,
    },

    /// Populate a collection from a primary-index query (async job)
    AddFromQuery {
        collection_id: String,
        query: String,
    },

    /// Populate a collection from a passages-index query (async job)
    AddFromPassagesQuery {
        collection_id: String,
        query: String,

        /// Process the job in this process instead of leaving it queued
        #[arg(long)]
        immediate: bool,

        /// Skip the first N matches
        #[arg(long, default_value_t = 0)]
        skip: i64,

        /// Process at most N matches
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Re-sync collections: push every stored membership back to the indices
    SyncCollection {
        #[arg(required = true, num_args = 1..)]
        collection_id: Vec<String>,
    },

    /// Mark collections deleted and tear them down (async jobs)
    DeleteCollection {
        /// Requesting user id, or 'admin' to act as each collection's owner
        user: String,

        #[arg(required = true, num_args = 1..)]
        collection_id: Vec<String>,
    },

    /// Export a query's results as a redacted CSV (async job)
    ExportQueryAsCsv {
        user: Uuid,
        query: String,
    },

    /// Show a job's status
    JobStatus { job_id: Uuid },

    /// Request cooperative cancellation of a job
    StopJob { job_id: Uuid },

    /// Send an account-activation mail
    SendActivation {
        username: String,

        /// Send from this process instead of deferring to the notifier
        #[arg(long)]
        immediate: bool,
    },

    /// Send a password-reset mail
    SendPasswordReset {
        username: String,
        token: String,

        #[arg(long)]
        immediate: bool,

        /// Override the reset landing page
        #[arg(long)]
        callback_url: Option<String>,
    },

    /// Re-materialize a user's access bitmap
    UpdateUserBitmap {
        username: String,

        /// Resolve and store in this process instead of submitting a job
        #[arg(long)]
        immediate: bool,
    },

    /// Check whether a user may read a content item's transcript
    CheckUserAccess {
        username: String,
        content_item_id: String,
    },

    /// Check whether two bitmasks overlap
    CheckBitmapsOverlap {
        /// Binary (low-bit-first) or decimal
        bitmap1: String,
        bitmap2: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn connect() -> anyhow::Result<Arc<Database>> {
    let url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
    Ok(Arc::new(Database::connect(&url).await?))
}

fn base_url() -> String {
    std::env::var("BASE_URL").unwrap_or_else(|_| BASE_URL.to_string())
}

/// Parse a bitmask given as a low-bit-first binary string or a decimal.
fn parse_bitmask(s: &str) -> anyhow::Result<BitMask64> {
    if !s.is_empty() && s.chars().all(|c| c == '0' || c == '1') {
        Ok(BitMask64::from_binary_str(s, true)?)
    } else {
        let value: u64 = s.parse().with_context(|| format!("bad bitmask: {s}"))?;
        Ok(BitMask64::from_int(value))
    }
}

/// Resolve the acting user for a collection mutation: an explicit id must
/// own the collection, 'admin' acts as the owner.
async fn acting_user(
    db: &Database,
    user_arg: &str,
    collection_creator: Uuid,
) -> anyhow::Result<UserRecord> {
    if user_arg == "admin" {
        return Ok(db.users.fetch(collection_creator).await?);
    }
    let user_id: Uuid = user_arg.parse().context("bad user id")?;
    if user_id != collection_creator {
        bail!("user {user_id} does not own this collection");
    }
    Ok(db.users.fetch(user_id).await?)
}

/// Run a freshly-submitted job to a terminal state in this process.
async fn run_until_terminal(db: Arc<Database>, job_id: Uuid) -> anyhow::Result<JobStatus> {
    let gateway = IndexGateway::from_env()?;
    let config = WorkerConfig::default().with_poll_interval(100);
    let handle = build_worker(Arc::clone(&db), gateway, config).await.start();

    let status = loop {
        let job = db.jobs.fetch(job_id).await?;
        if job.status.is_terminal() {
            break job.status;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    };
    handle.shutdown().await;
    Ok(status)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Migrate => {
            let db = connect().await?;
            db.migrate().await?;
            println!("migrations applied");
        }

        Commands::Worker => {
            let db = connect().await?;
            let gateway = IndexGateway::from_env()?;
            let config = WorkerConfig::from_env();
            let handle = build_worker(db, gateway, config).await.start();
            tracing::info!("worker running, press ctrl-c to stop");
            tokio::signal::ctrl_c().await?;
            handle.shutdown().await;
        }

        Commands::CreateCollection {
            user,
            name,
            description,
        } => {
            let db = connect().await?;
            let owner = db.users.fetch(user).await?;
            let slug: String = name
                .to_lowercase()
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
                .collect();
            let collection = db
                .collections
                .insert(CreateCollectionRequest {
                    id: format!("{}-{}", owner.uid, slug),
                    name,
                    description,
                    status: CollectionStatus::Private,
                    creator_id: owner.id,
                })
                .await?;
            println!("created collection {}", collection.id);
        }

        Commands::AddItemsToCollection {
            collection_id,
            item_id,
        } => {
            let db = connect().await?;
            let collection = db.collections.fetch(&collection_id).await?;
            let job = submit_sync_collection(
                &db,
                collection.creator_id,
                &collection_id,
                SyncMethod::Add,
                item_id,
            )
            .await?;
            println!("submitted job {}", job.id);
        }

        Commands::AddFromQuery {
            collection_id,
            query,
        } => {
            let db = connect().await?;
            let collection = db.collections.fetch(&collection_id).await?;
            let job = submit_add_from_query(&db, collection.creator_id, &collection_id, &query)
                .await?;
            println!("submitted job {}", job.id);
        }

        Commands::AddFromPassagesQuery {
            collection_id,
            query,
            immediate,
            skip,
            limit,
        } => {
            let db = connect().await?;
            let collection = db.collections.fetch(&collection_id).await?;
            let job = submit_add_from_passages_query(
                &db,
                collection.creator_id,
                &collection_id,
                &query,
                skip,
                limit,
            )
            .await?;
            if immediate {
                let status = run_until_terminal(db, job.id).await?;
                println!("job {} finished: {status}", job.id);
            } else {
                println!("submitted job {}", job.id);
            }
        }

        Commands::SyncCollection { collection_id } => {
            let db = connect().await?;
            for id in collection_id {
                let collection = db.collections.fetch(&id).await?;
                let mut items = Vec::new();
                let mut offset = 0;
                loop {
                    let page = db.items.list_item_ids(&id, offset, PAGE_LIMIT).await?;
                    if page.is_empty() {
                        break;
                    }
                    offset += page.len() as i64;
                    items.extend(page);
                }
                if items.is_empty() {
                    println!("{id}: no items to sync");
                    continue;
                }
                let job =
                    submit_sync_collection(&db, collection.creator_id, &id, SyncMethod::Add, items)
                        .await?;
                println!("{id}: submitted job {}", job.id);
            }
        }

        Commands::DeleteCollection {
            user,
            collection_id,
        } => {
            let db = connect().await?;
            for id in collection_id {
                let collection = db.collections.fetch(&id).await?;
                let actor = acting_user(&db, &user, collection.creator_id).await?;
                db.collections
                    .set_status(&id, CollectionStatus::Deleted)
                    .await?;
                let job = submit_remove_collection(&db, actor.id, &id).await?;
                println!("{id}: submitted job {}", job.id);
            }
        }

        Commands::ExportQueryAsCsv { user, query } => {
            let db = connect().await?;
            let job = submit_export_query_csv(&db, user, &query).await?;
            println!("submitted job {}", job.id);
        }

        Commands::JobStatus { job_id } => {
            let db = connect().await?;
            let job = db.jobs.fetch(job_id).await?;
            println!(
                "{} {} {} progress={:.2}",
                job.id, job.job_type, job.status, job.progress
            );
            println!("{}", serde_json::to_string_pretty(&job.extra)?);
        }

        Commands::StopJob { job_id } => {
            let db = connect().await?;
            db.jobs.request_stop(job_id).await?;
            println!("stop requested for job {job_id}");
        }

        Commands::SendActivation {
            username,
            immediate: _,
        } => {
            let db = connect().await?;
            let user = db.users.fetch_by_username(&username).await?;
            let token = format!("{:x}", md5::compute(format!("{}:{}", user.id, user.email)));
            TracingMailer
                .send(&Mail {
                    to: user.email.clone(),
                    subject: "Activate your gazette account".to_string(),
                    body: format!(
                        "Hello {},\n\nactivate your account at {}/accounts/activate?token={token}\n\n-- {}",
                        user.username,
                        base_url(),
                        MAIL_FROM
                    ),
                })
                .await?;
            println!("activation mail sent to {}", user.email);
        }

        Commands::SendPasswordReset {
            username,
            token,
            immediate: _,
            callback_url,
        } => {
            let db = connect().await?;
            let user = db.users.fetch_by_username(&username).await?;
            let landing =
                callback_url.unwrap_or_else(|| format!("{}/accounts/password-reset", base_url()));
            TracingMailer
                .send(&Mail {
                    to: user.email.clone(),
                    subject: "Reset your gazette password".to_string(),
                    body: format!(
                        "Hello {},\n\nreset your password at {landing}?token={token}\n\n-- {}",
                        user.username, MAIL_FROM
                    ),
                })
                .await?;
            println!("password-reset mail sent to {}", user.email);
        }

        Commands::UpdateUserBitmap {
            username,
            immediate,
        } => {
            let db = connect().await?;
            let user = db.users.fetch_by_username(&username).await?;
            if immediate {
                let profile = db.users.access_profile(user.id).await?;
                let (mask, plan) = resolve(&profile);
                db.bitmaps.store(user.id, &mask).await?;
                println!("{username}: plan={plan} bitmap={mask}");
            } else {
                let job = submit_update_user_bitmap(&db, user.id).await?;
                println!("submitted job {}", job.id);
            }
        }

        Commands::CheckUserAccess {
            username,
            content_item_id,
        } => {
            let db = connect().await?;
            let user = db.users.fetch_by_username(&username).await?;
            let profile = db.users.access_profile(user.id).await?;
            let (mask, plan) = resolve(&profile);

            let gateway = IndexGateway::from_env()?;
            let page = gateway
                .primary
                .find_all(&FindAllRequest {
                    query: format!("{}:\"{}\"", fields::ID, content_item_id),
                    fq: None,
                    fl: Some(format!(
                        "{},{},{}",
                        fields::ID,
                        fields::TRANSCRIPT_BITMASK,
                        fields::YEAR
                    )),
                    sort: fields::SORT_BY_ID.to_string(),
                    start: 0,
                    rows: 1,
                })
                .await?;
            let Some(doc) = page.docs.first() else {
                bail!("content item {content_item_id} not found");
            };
            let allowed = RedactionPolicy::from_env().allows(mask, doc);
            println!(
                "{username} (plan={plan}) -> {content_item_id}: {}",
                if allowed { "Y" } else { "N" }
            );
        }

        Commands::CheckBitmapsOverlap { bitmap1, bitmap2 } => {
            let a = parse_bitmask(&bitmap1)?;
            let b = parse_bitmask(&bitmap2)?;
            println!("{}", a.overlaps(&b));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bitmask_binary_low_bit_first() {
        // First character is bit 0.
        let mask = parse_bitmask("111101").unwrap();
        assert!(mask.is_set(0));
        assert!(!mask.is_set(4));
        assert!(mask.is_set(5));
    }

    #[test]
    fn test_parse_bitmask_decimal() {
        let mask = parse_bitmask("181").unwrap();
        assert_eq!(mask.as_u64(), 181);
        assert!(mask.overlaps(&BitMask64::from_int(0b10000000)));
    }

    #[test]
    fn test_parse_bitmask_garbage_rejected() {
        assert!(parse_bitmask("12b01").is_err());
    }

    #[test]
    fn test_overlap_scenarios() {
        let a = parse_bitmask("111101").unwrap();
        assert!(!a.overlaps(&parse_bitmask("000010").unwrap()));
        assert!(a.overlaps(&parse_bitmask("100000").unwrap()));
    }
}
