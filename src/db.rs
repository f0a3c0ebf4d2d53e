use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;

pub use crate::db_pool::{create_db_pool, create_in_memory_pool, DbPool};

use crate::compositor::{Dimensions, Position, WatermarkConfig};

/// Collection owned by one caller identity
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub next_sequence: i64,
    pub created_at: Option<DateTime<Utc>>,
}

/// One entry of a collection. Export order is ascending `sequence`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Photo {
    pub id: String,
    pub collection_id: String,
    pub url: String,
    pub sequence: i64,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Watermark {
    pub id: String,
    pub owner_id: String,
    pub url: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// Stored watermark placement for a collection
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct WatermarkConfigRecord {
    pub collection_id: String,
    pub watermark_id: String,
    pub position_x: f64,
    pub position_y: f64,
    pub width: f64,
    pub height: f64,
    pub rotation: f64,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Canonical collection representation; listing views project from this.
#[derive(Debug, Clone)]
pub struct CollectionRecord {
    pub collection: Collection,
    pub photo_count: i64,
    pub has_watermark_config: bool,
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl Collection {
    pub async fn create(pool: &DbPool, owner_id: &str, name: &str) -> Result<Self, sqlx::Error> {
        let id = new_id();
        sqlx::query("INSERT INTO collections (id, owner_id, name) VALUES (?, ?, ?)")
            .bind(&id)
            .bind(owner_id)
            .bind(name)
            .execute(pool)
            .await?;

        Self::find_for_owner(pool, &id, owner_id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    /// Ownership is part of the lookup: another owner's collection is simply absent.
    pub async fn find_for_owner(
        pool: &DbPool,
        id: &str,
        owner_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Collection>(
            "SELECT id, owner_id, name, next_sequence, created_at
             FROM collections
             WHERE id = ? AND owner_id = ?",
        )
        .bind(id)
        .bind(owner_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn list_for_owner(
        pool: &DbPool,
        owner_id: &str,
    ) -> Result<Vec<CollectionRecord>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT c.id, c.owner_id, c.name, c.next_sequence, c.created_at,
                    (SELECT COUNT(*) FROM photos p WHERE p.collection_id = c.id) AS photo_count,
                    EXISTS(SELECT 1 FROM watermark_configs w WHERE w.collection_id = c.id) AS has_config
             FROM collections c
             WHERE c.owner_id = ?
             ORDER BY c.created_at DESC, c.name",
        )
        .bind(owner_id)
        .fetch_all(pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(CollectionRecord {
                    collection: Collection {
                        id: row.try_get("id")?,
                        owner_id: row.try_get("owner_id")?,
                        name: row.try_get("name")?,
                        next_sequence: row.try_get("next_sequence")?,
                        created_at: row.try_get("created_at")?,
                    },
                    photo_count: row.try_get("photo_count")?,
                    has_watermark_config: row.try_get::<i64, _>("has_config")? != 0,
                })
            })
            .collect()
    }

    pub async fn load_record(&self, pool: &DbPool) -> Result<CollectionRecord, sqlx::Error> {
        let photo_count = Photo::count_in_collection(pool, &self.id).await?;
        let has_watermark_config = WatermarkConfigRecord::find_for_collection(pool, &self.id)
            .await?
            .is_some();

        Ok(CollectionRecord {
            collection: self.clone(),
            photo_count,
            has_watermark_config,
        })
    }
}

impl Photo {
    pub async fn count_in_collection(pool: &DbPool, collection_id: &str) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM photos WHERE collection_id = ?")
                .bind(collection_id)
                .fetch_one(pool)
                .await?;
        Ok(count)
    }

    /// Photos in export order, capped at `limit`.
    pub async fn list_ordered(
        pool: &DbPool,
        collection_id: &str,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Photo>(
            "SELECT id, collection_id, url, sequence, created_at
             FROM photos
             WHERE collection_id = ?
             ORDER BY sequence ASC
             LIMIT ?",
        )
        .bind(collection_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    pub async fn find_in_collection(
        pool: &DbPool,
        collection_id: &str,
        photo_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Photo>(
            "SELECT id, collection_id, url, sequence, created_at
             FROM photos
             WHERE collection_id = ? AND id = ?",
        )
        .bind(collection_id)
        .bind(photo_id)
        .fetch_optional(pool)
        .await
    }

    /// Appends a photo with the collection's next sequence number. The counter
    /// is bumped by the first statement, so the transaction holds the write
    /// lock from the start.
    pub async fn append(pool: &DbPool, collection_id: &str, url: &str) -> Result<Self, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let (sequence,): (i64,) = sqlx::query_as(
            "UPDATE collections SET next_sequence = next_sequence + 1
             WHERE id = ?
             RETURNING next_sequence - 1",
        )
        .bind(collection_id)
        .fetch_one(&mut *tx)
        .await?;

        let id = new_id();
        sqlx::query("INSERT INTO photos (id, collection_id, url, sequence) VALUES (?, ?, ?, ?)")
            .bind(&id)
            .bind(collection_id)
            .bind(url)
            .bind(sequence)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Self::find_in_collection(pool, collection_id, &id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    /// Removes a photo. Remaining sequence numbers are left untouched.
    pub async fn delete(
        pool: &DbPool,
        collection_id: &str,
        photo_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM photos WHERE collection_id = ? AND id = ?")
            .bind(collection_id)
            .bind(photo_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

impl Watermark {
    pub async fn create(pool: &DbPool, owner_id: &str, url: &str) -> Result<Self, sqlx::Error> {
        let id = new_id();
        sqlx::query("INSERT INTO watermarks (id, owner_id, url) VALUES (?, ?, ?)")
            .bind(&id)
            .bind(owner_id)
            .bind(url)
            .execute(pool)
            .await?;

        Self::find_for_owner(pool, &id, owner_id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn find_for_owner(
        pool: &DbPool,
        id: &str,
        owner_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Watermark>(
            "SELECT id, owner_id, url, created_at FROM watermarks WHERE id = ? AND owner_id = ?",
        )
        .bind(id)
        .bind(owner_id)
        .fetch_optional(pool)
        .await
    }
}

impl WatermarkConfigRecord {
    pub async fn find_for_collection(
        pool: &DbPool,
        collection_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, WatermarkConfigRecord>(
            "SELECT collection_id, watermark_id, position_x, position_y, width, height,
                    rotation, updated_at
             FROM watermark_configs
             WHERE collection_id = ?",
        )
        .bind(collection_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn upsert(&self, pool: &DbPool) -> Result<Self, sqlx::Error> {
        sqlx::query(
            "INSERT INTO watermark_configs
                (collection_id, watermark_id, position_x, position_y, width, height, rotation, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
             ON CONFLICT(collection_id) DO UPDATE SET
                watermark_id = excluded.watermark_id,
                position_x = excluded.position_x,
                position_y = excluded.position_y,
                width = excluded.width,
                height = excluded.height,
                rotation = excluded.rotation,
                updated_at = CURRENT_TIMESTAMP",
        )
        .bind(&self.collection_id)
        .bind(&self.watermark_id)
        .bind(self.position_x)
        .bind(self.position_y)
        .bind(self.width)
        .bind(self.height)
        .bind(self.rotation)
        .execute(pool)
        .await?;

        Self::find_for_collection(pool, &self.collection_id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }
}

impl WatermarkConfig {
    /// Resolves the stored placement together with its watermark source URL.
    /// `None` when no config exists or its watermark row is gone.
    pub async fn load_for_collection(
        pool: &DbPool,
        collection_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT c.position_x, c.position_y, c.width, c.height, c.rotation, w.url
             FROM watermark_configs c
             JOIN watermarks w ON w.id = c.watermark_id
             WHERE c.collection_id = ?",
        )
        .bind(collection_id)
        .fetch_optional(pool)
        .await?;

        row.map(|row| {
            Ok(WatermarkConfig {
                position: Position {
                    x: row.try_get("position_x")?,
                    y: row.try_get("position_y")?,
                },
                dimensions: Dimensions {
                    width: row.try_get("width")?,
                    height: row.try_get("height")?,
                },
                rotation: row.try_get("rotation")?,
                watermark_source_url: row.try_get("url")?,
            })
        })
        .transpose()
    }
}
