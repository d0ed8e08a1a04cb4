//! Subscription repository implementation.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use gazette_core::{Error, Result, Subscription, SubscriptionRepository};

/// PostgreSQL implementation of SubscriptionRepository.
pub struct PgSubscriptionRepository {
    pool: Pool<Postgres>,
}

impl PgSubscriptionRepository {
    /// Create a new PgSubscriptionRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionRepository for PgSubscriptionRepository {
    async fn create(&self, name: &str) -> Result<Subscription> {
        // Position is max+1 computed inside the insert; the UNIQUE
        // constraint turns a concurrent duplicate into an error rather
        // than two subscriptions sharing a bit.
        let row = sqlx::query(
            "INSERT INTO subscription (id, name, bitmap_position)
             VALUES ($1, $2, (SELECT COALESCE(MAX(bitmap_position), -1) + 1 FROM subscription))
             RETURNING id, name, bitmap_position",
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(Subscription {
            id: row.get("id"),
            name: row.get("name"),
            bitmap_position: row.get("bitmap_position"),
        })
    }

    async fn list(&self) -> Result<Vec<Subscription>> {
        let rows = sqlx::query(
            "SELECT id, name, bitmap_position FROM subscription ORDER BY bitmap_position",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| Subscription {
                id: row.get("id"),
                name: row.get("name"),
                bitmap_position: row.get("bitmap_position"),
            })
            .collect())
    }

    async fn grant(&self, user_id: Uuid, subscription_id: Uuid) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_subscription (user_id, subscription_id)
             VALUES ($1, $2)
             ON CONFLICT DO NOTHING",
        )
        .bind(user_id)
        .bind(subscription_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn revoke(&self, user_id: Uuid, subscription_id: Uuid) -> Result<()> {
        sqlx::query(
            "DELETE FROM user_subscription WHERE user_id = $1 AND subscription_id = $2",
        )
        .bind(user_id)
        .bind(subscription_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}
