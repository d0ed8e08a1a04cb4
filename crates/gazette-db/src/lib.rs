//! # gazette-db
//!
//! PostgreSQL persistence layer for gazette.
//!
//! This crate provides:
//! - Connection pool management
//! - Repository implementations for all core entities
//! - The step queue backing paginated workers
//!
//! ## Example
//!
//! ```rust,ignore
//! use gazette_db::Database;
//! use gazette_core::{CreateJobRequest, JobType};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/gazette").await?;
//!
//!     let job = db.jobs.create(CreateJobRequest {
//!         job_type: JobType::SyncCollection,
//!         creator_id: user_id,
//!         extra: serde_json::json!({}),
//!     }).await?;
//!
//!     println!("Created job: {}", job.id);
//!     Ok(())
//! }
//! ```

pub mod attachments;
pub mod bitmaps;
pub mod collections;
pub mod items;
pub mod jobs;
pub mod plans;
pub mod pool;
pub mod subscriptions;
pub mod tasks;
pub mod users;

// Re-export core types
pub use gazette_core::*;

// Re-export repository implementations
pub use attachments::PgAttachmentRepository;
pub use bitmaps::PgBitmapRepository;
pub use collections::PgCollectionRepository;
pub use items::PgItemRepository;
pub use jobs::PgJobRepository;
pub use plans::PgPlanRequestRepository;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use subscriptions::PgSubscriptionRepository;
pub use tasks::PgTaskQueue;
pub use users::PgUserRepository;

/// Combined database context with all repositories.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Collection repository.
    pub collections: PgCollectionRepository,
    /// Collection membership repository.
    pub items: PgItemRepository,
    /// Job registry.
    pub jobs: PgJobRepository,
    /// Step queue for paginated workers.
    pub tasks: PgTaskQueue,
    /// Job attachment repository.
    pub attachments: PgAttachmentRepository,
    /// User repository.
    pub users: PgUserRepository,
    /// Subscription repository.
    pub subscriptions: PgSubscriptionRepository,
    /// Materialized bitmap repository.
    pub bitmaps: PgBitmapRepository,
    /// Plan-change request repository.
    pub plan_requests: PgPlanRequestRepository,
}

impl Database {
    /// Connect with default pool configuration.
    pub async fn connect(database_url: &str) -> Result<Self> {
        Self::connect_with_config(database_url, PoolConfig::default()).await
    }

    /// Connect with custom pool configuration.
    pub async fn connect_with_config(database_url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(database_url, config).await?;
        Ok(Self::from_pool(pool))
    }

    /// Build the repository set over an existing pool.
    pub fn from_pool(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            collections: PgCollectionRepository::new(pool.clone()),
            items: PgItemRepository::new(pool.clone()),
            jobs: PgJobRepository::new(pool.clone()),
            tasks: PgTaskQueue::new(pool.clone()),
            attachments: PgAttachmentRepository::new(pool.clone()),
            users: PgUserRepository::new(pool.clone()),
            subscriptions: PgSubscriptionRepository::new(pool.clone()),
            bitmaps: PgBitmapRepository::new(pool.clone()),
            plan_requests: PgPlanRequestRepository::new(pool.clone()),
            pool,
        }
    }

    /// Run pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Internal(format!("migration failed: {e}")))?;
        Ok(())
    }
}
