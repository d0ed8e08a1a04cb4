//! Collection membership repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use gazette_core::{
    CollectableItem, ContentType, Error, ItemRepository, NewCollectableItem, Result,
};

/// PostgreSQL implementation of ItemRepository.
pub struct PgItemRepository {
    pool: Pool<Postgres>,
}

impl PgItemRepository {
    /// Create a new PgItemRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn content_type_to_str(content_type: ContentType) -> &'static str {
        match content_type {
            ContentType::Article => "A",
            ContentType::Page => "P",
            ContentType::Issue => "I",
        }
    }

    fn content_type_from_str(s: &str) -> ContentType {
        match s {
            "P" => ContentType::Page,
            "I" => ContentType::Issue,
            _ => ContentType::Article,
        }
    }
}

#[async_trait]
impl ItemRepository for PgItemRepository {
    async fn add_items(
        &self,
        collection_id: &str,
        items: &[NewCollectableItem],
        search_query_id: Option<Uuid>,
    ) -> Result<u64> {
        if items.is_empty() {
            return Ok(0);
        }

        // The DEL guard refuses new rows for a collection being torn down;
        // ON CONFLICT DO NOTHING makes retried pages idempotent.
        let item_ids: Vec<&str> = items.iter().map(|i| i.item_id.as_str()).collect();
        let content_types: Vec<&str> = items
            .iter()
            .map(|i| Self::content_type_to_str(i.content_type))
            .collect();
        let scores: Vec<Option<f64>> = items.iter().map(|i| i.score).collect();

        let result = sqlx::query(
            "INSERT INTO collectable_item (item_id, collection_id, content_type, score, added_at, search_query_id)
             SELECT item_id, $1, content_type, score, $5, $6
             FROM UNNEST($2::text[], $3::text[], $4::float8[]) AS t(item_id, content_type, score)
             WHERE EXISTS (
                 SELECT 1 FROM collection WHERE id = $1 AND status <> 'DEL'
             )
             ON CONFLICT (item_id, collection_id) DO NOTHING",
        )
        .bind(collection_id)
        .bind(&item_ids as &[&str])
        .bind(&content_types as &[&str])
        .bind(&scores as &[Option<f64>])
        .bind(Utc::now())
        .bind(search_query_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected())
    }

    async fn remove_items(&self, collection_id: &str, item_ids: &[String]) -> Result<u64> {
        if item_ids.is_empty() {
            return Ok(0);
        }

        let ids: Vec<&str> = item_ids.iter().map(String::as_str).collect();
        let result = sqlx::query(
            "DELETE FROM collectable_item
             WHERE collection_id = $1 AND item_id = ANY($2::text[])",
        )
        .bind(collection_id)
        .bind(&ids as &[&str])
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected())
    }

    async fn delete_for_collection(&self, collection_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM collectable_item WHERE collection_id = $1")
            .bind(collection_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }

    async fn count_for_collection(&self, collection_id: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM collectable_item WHERE collection_id = $1")
                .bind(collection_id)
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;
        Ok(count)
    }

    async fn list_item_ids(
        &self,
        collection_id: &str,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT item_id FROM collectable_item
             WHERE collection_id = $1
             ORDER BY item_id ASC
             LIMIT $2 OFFSET $3",
        )
        .bind(collection_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(ids)
    }

    async fn list_for_collection(
        &self,
        collection_id: &str,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<CollectableItem>> {
        let rows = sqlx::query(
            "SELECT item_id, collection_id, content_type, score, added_at, search_query_id
             FROM collectable_item
             WHERE collection_id = $1
             ORDER BY item_id ASC
             LIMIT $2 OFFSET $3",
        )
        .bind(collection_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| CollectableItem {
                item_id: row.get("item_id"),
                collection_id: row.get("collection_id"),
                content_type: Self::content_type_from_str(row.get("content_type")),
                score: row.get("score"),
                added_at: row.get("added_at"),
                search_query_id: row.get("search_query_id"),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_strings() {
        assert_eq!(
            PgItemRepository::content_type_to_str(ContentType::Article),
            "A"
        );
        assert_eq!(PgItemRepository::content_type_to_str(ContentType::Page), "P");
        assert_eq!(
            PgItemRepository::content_type_to_str(ContentType::Issue),
            "I"
        );
    }

    #[test]
    fn test_content_type_parse_defaults_to_article() {
        assert_eq!(
            PgItemRepository::content_type_from_str("P"),
            ContentType::Page
        );
        assert_eq!(
            PgItemRepository::content_type_from_str("X"),
            ContentType::Article
        );
    }
}
