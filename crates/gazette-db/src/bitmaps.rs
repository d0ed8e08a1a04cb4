//! Materialized user bitmap repository implementation.
//!
//! Bitmaps are stored in their canonical 8-byte big-endian form; the
//! integer and binary-string forms are derived in memory by [`BitMask64`].

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use gazette_core::{BitMask64, BitmapRepository, Error, Result, UserBitmapRecord};

/// PostgreSQL implementation of BitmapRepository.
pub struct PgBitmapRepository {
    pool: Pool<Postgres>,
}

impl PgBitmapRepository {
    /// Create a new PgBitmapRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BitmapRepository for PgBitmapRepository {
    async fn fetch(&self, user_id: Uuid) -> Result<Option<UserBitmapRecord>> {
        let row = sqlx::query(
            "SELECT user_id, bitmap, date_accepted_terms FROM user_bitmap WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|row| UserBitmapRecord {
            user_id: row.get("user_id"),
            bitmap: row.get("bitmap"),
            date_accepted_terms: row.get("date_accepted_terms"),
        }))
    }

    async fn store(&self, user_id: Uuid, bitmap: &BitMask64) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_bitmap (user_id, bitmap, updated_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (user_id) DO UPDATE
             SET bitmap = EXCLUDED.bitmap, updated_at = EXCLUDED.updated_at",
        )
        .bind(user_id)
        .bind(bitmap.to_bytes().to_vec())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}
