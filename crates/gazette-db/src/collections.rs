//! Collection repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use gazette_core::{
    collection_owned_by, Collection, CollectionRepository, CollectionStatus,
    CreateCollectionRequest, Error, Result,
};

/// PostgreSQL implementation of CollectionRepository.
pub struct PgCollectionRepository {
    pool: Pool<Postgres>,
}

impl PgCollectionRepository {
    /// Create a new PgCollectionRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn status_to_str(status: CollectionStatus) -> &'static str {
        match status {
            CollectionStatus::Private => "PRI",
            CollectionStatus::Shared => "SHA",
            CollectionStatus::Public => "PUB",
            CollectionStatus::Deleted => "DEL",
        }
    }

    fn str_to_status(s: &str) -> CollectionStatus {
        match s {
            "PRI" => CollectionStatus::Private,
            "SHA" => CollectionStatus::Shared,
            "PUB" => CollectionStatus::Public,
            "DEL" => CollectionStatus::Deleted,
            _ => CollectionStatus::Private, // fallback
        }
    }

    fn parse_collection_row(row: sqlx::postgres::PgRow) -> Collection {
        Collection {
            id: row.get("id"),
            name: row.get("name"),
            description: row.get("description"),
            status: Self::str_to_status(row.get("status")),
            creator_id: row.get("creator_id"),
            count_items: row.get("count_items"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl CollectionRepository for PgCollectionRepository {
    async fn insert(&self, req: CreateCollectionRequest) -> Result<Collection> {
        // The creator's uid must prefix the collection id, otherwise
        // ownership checks downstream (export filtering, teardown) break.
        let uid: String = sqlx::query_scalar("SELECT uid FROM app_user WHERE id = $1")
            .bind(req.creator_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?
            .ok_or_else(|| Error::EntityMissing(format!("user {}", req.creator_id)))?;

        if !collection_owned_by(&req.id, &uid) {
            return Err(Error::InvalidInput(format!(
                "collection id {:?} does not carry owner uid prefix",
                req.id
            )));
        }

        let now = Utc::now();
        let row = sqlx::query(
            "INSERT INTO collection (id, name, description, status, creator_id, count_items, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, 0, $6, $6)
             RETURNING id, name, description, status, creator_id, count_items, created_at, updated_at",
        )
        .bind(&req.id)
        .bind(&req.name)
        .bind(&req.description)
        .bind(Self::status_to_str(req.status))
        .bind(req.creator_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(Self::parse_collection_row(row))
    }

    async fn fetch(&self, id: &str) -> Result<Collection> {
        let row = sqlx::query(
            "SELECT id, name, description, status, creator_id, count_items, created_at, updated_at
             FROM collection WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_collection_row)
            .ok_or_else(|| Error::EntityMissing(format!("collection {id}")))
    }

    async fn list_for_user(&self, creator_id: Uuid) -> Result<Vec<Collection>> {
        let rows = sqlx::query(
            "SELECT id, name, description, status, creator_id, count_items, created_at, updated_at
             FROM collection WHERE creator_id = $1
             ORDER BY created_at DESC",
        )
        .bind(creator_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_collection_row).collect())
    }

    async fn set_status(&self, id: &str, status: CollectionStatus) -> Result<()> {
        let result = sqlx::query(
            "UPDATE collection SET status = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(Self::status_to_str(status))
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::EntityMissing(format!("collection {id}")));
        }
        Ok(())
    }

    async fn refresh_count_items(&self, id: &str) -> Result<i64> {
        let count: Option<i64> = sqlx::query_scalar(
            "UPDATE collection
             SET count_items = (
                 SELECT COUNT(*) FROM collectable_item WHERE collection_id = $1
             ),
             updated_at = $2
             WHERE id = $1
             RETURNING count_items",
        )
        .bind(id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        count.ok_or_else(|| Error::EntityMissing(format!("collection {id}")))
    }

    async fn hard_delete(&self, id: &str) -> Result<()> {
        // Membership rows go with the collection (ON DELETE CASCADE).
        let result = sqlx::query("DELETE FROM collection WHERE id = $1 AND status = 'DEL'")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::InvalidInput(format!(
                "collection {id} is not marked DELETED or does not exist"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        let statuses = [
            CollectionStatus::Private,
            CollectionStatus::Shared,
            CollectionStatus::Public,
            CollectionStatus::Deleted,
        ];

        for status in statuses {
            let s = PgCollectionRepository::status_to_str(status);
            assert_eq!(PgCollectionRepository::str_to_status(s), status);
        }
    }

    #[test]
    fn test_str_to_status_unknown_fallback() {
        assert_eq!(
            PgCollectionRepository::str_to_status("bogus"),
            CollectionStatus::Private
        );
    }
}
