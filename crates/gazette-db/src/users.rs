//! User repository implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use gazette_core::{AccessProfile, Error, Result, UserRecord, UserRepository};

/// PostgreSQL implementation of UserRepository.
pub struct PgUserRepository {
    pool: Pool<Postgres>,
}

impl PgUserRepository {
    /// Create a new PgUserRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_user_row(row: sqlx::postgres::PgRow) -> UserRecord {
        UserRecord {
            id: row.get("id"),
            username: row.get("username"),
            uid: row.get("uid"),
            email: row.get("email"),
            is_staff: row.get("is_staff"),
            max_loops_allowed: row.get("max_loops_allowed"),
            max_parallel_jobs: row.get("max_parallel_jobs"),
            created_at: row.get("created_at"),
        }
    }

    const USER_COLUMNS: &'static str =
        "id, username, uid, email, is_staff, max_loops_allowed, max_parallel_jobs, created_at";
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn fetch(&self, id: Uuid) -> Result<UserRecord> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM app_user WHERE id = $1",
            Self::USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_user_row)
            .ok_or_else(|| Error::EntityMissing(format!("user {id}")))
    }

    async fn fetch_by_uid(&self, uid: &str) -> Result<UserRecord> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM app_user WHERE uid = $1",
            Self::USER_COLUMNS
        ))
        .bind(uid)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_user_row)
            .ok_or_else(|| Error::EntityMissing(format!("user uid {uid}")))
    }

    async fn fetch_by_username(&self, username: &str) -> Result<UserRecord> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM app_user WHERE username = $1",
            Self::USER_COLUMNS
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_user_row)
            .ok_or_else(|| Error::EntityMissing(format!("user {username}")))
    }

    async fn access_profile(&self, id: Uuid) -> Result<AccessProfile> {
        // Ensure the user exists before assembling an empty profile.
        self.fetch(id).await?;

        let groups: Vec<String> = sqlx::query_scalar(
            "SELECT g.name FROM user_group g
             JOIN user_group_member m ON m.group_id = g.id
             WHERE m.user_id = $1
             ORDER BY g.name",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let positions: Vec<i32> = sqlx::query_scalar(
            "SELECT s.bitmap_position FROM subscription s
             JOIN user_subscription us ON us.subscription_id = s.id
             WHERE us.user_id = $1
             ORDER BY s.bitmap_position",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let terms_accepted: bool = sqlx::query_scalar(
            "SELECT date_accepted_terms IS NOT NULL FROM user_bitmap WHERE user_id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?
        .unwrap_or(false);

        Ok(AccessProfile {
            groups,
            subscription_positions: positions.into_iter().map(|p| p as u32).collect(),
            terms_accepted,
        })
    }

    async fn accept_terms(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        // Idempotent: a second acceptance keeps the original date.
        sqlx::query(
            "INSERT INTO user_bitmap (user_id, bitmap, date_accepted_terms, updated_at)
             VALUES ($1, '\\x0000000000000000'::bytea, $2, $2)
             ON CONFLICT (user_id) DO UPDATE
             SET date_accepted_terms = COALESCE(user_bitmap.date_accepted_terms, EXCLUDED.date_accepted_terms),
                 updated_at = EXCLUDED.updated_at",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn add_to_group(&self, id: Uuid, group: &str) -> Result<()> {
        // Groups are created on demand; membership is add-if-absent.
        sqlx::query(
            "WITH g AS (
                 INSERT INTO user_group (id, name)
                 VALUES (gen_random_uuid(), $2)
                 ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
                 RETURNING id
             )
             INSERT INTO user_group_member (user_id, group_id)
             SELECT $1, g.id FROM g
             ON CONFLICT DO NOTHING",
        )
        .bind(id)
        .bind(group)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn remove_from_group(&self, id: Uuid, group: &str) -> Result<()> {
        sqlx::query(
            "DELETE FROM user_group_member
             WHERE user_id = $1
               AND group_id = (SELECT id FROM user_group WHERE name = $2)",
        )
        .bind(id)
        .bind(group)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}
