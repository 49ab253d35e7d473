use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::Row;

use foodlink_core::records::{merge_patch, Collection, Record, RecordStore, RecordStoreError};

use super::RepositoryError;
use crate::DbPool;

/// Record store over the `records` table; bodies are JSON objects.
pub struct SqlRecordStore {
    pool: DbPool,
}

impl SqlRecordStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Inserts or replaces a whole record. The record must carry a string `id`.
    pub async fn upsert(
        &self,
        collection: Collection,
        record: &Record,
    ) -> Result<String, RepositoryError> {
        let id = match record.get("id") {
            Some(Value::String(id)) => id.clone(),
            _ => return Err(RepositoryError::Decode("record is missing a string `id`".into())),
        };
        let body = encode_body(record)?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO records (collection, id, body, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(collection, id) DO UPDATE SET
                 body = excluded.body,
                 updated_at = excluded.updated_at",
        )
        .bind(collection.as_str())
        .bind(&id)
        .bind(body)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn fetch(&self, collection: Collection, id: &str) -> Result<Option<Record>, RepositoryError> {
        let row = sqlx::query("SELECT body FROM records WHERE collection = ? AND id = ?")
            .bind(collection.as_str())
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn apply_update(
        &self,
        collection: Collection,
        id: &str,
        patch: Record,
    ) -> Result<Option<Record>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT body FROM records WHERE collection = ? AND id = ?")
            .bind(collection.as_str())
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut record = row_to_record(&row)?;
        merge_patch(&mut record, patch);

        sqlx::query("UPDATE records SET body = ?, updated_at = ? WHERE collection = ? AND id = ?")
            .bind(encode_body(&record)?)
            .bind(Utc::now().to_rfc3339())
            .bind(collection.as_str())
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Some(record))
    }

    async fn apply_delete(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<Record>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT body FROM records WHERE collection = ? AND id = ?")
            .bind(collection.as_str())
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let record = row_to_record(&row)?;

        sqlx::query("DELETE FROM records WHERE collection = ? AND id = ?")
            .bind(collection.as_str())
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Some(record))
    }

    async fn fetch_all(&self, collection: Collection) -> Result<Vec<Record>, RepositoryError> {
        let rows = sqlx::query("SELECT body FROM records WHERE collection = ? ORDER BY id")
            .bind(collection.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_record).collect()
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<Record, RepositoryError> {
    let body: String = row.try_get("body").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    match serde_json::from_str::<Value>(&body) {
        Ok(Value::Object(record)) => Ok(record),
        Ok(other) => {
            Err(RepositoryError::Decode(format!("record body is not an object: {other}")))
        }
        Err(error) => Err(RepositoryError::Decode(error.to_string())),
    }
}

fn encode_body(record: &Record) -> Result<String, RepositoryError> {
    serde_json::to_string(record).map_err(|e| RepositoryError::Decode(e.to_string()))
}

#[async_trait]
impl RecordStore for SqlRecordStore {
    async fn get(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<Record>, RecordStoreError> {
        Ok(self.fetch(collection, id).await?)
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: Record,
    ) -> Result<Record, RecordStoreError> {
        self.apply_update(collection, id, patch)
            .await?
            .ok_or_else(|| RecordStoreError::NotFound { collection, id: id.to_string() })
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<Record, RecordStoreError> {
        self.apply_delete(collection, id)
            .await?
            .ok_or_else(|| RecordStoreError::NotFound { collection, id: id.to_string() })
    }

    async fn list(&self, collection: Collection) -> Result<Vec<Record>, RecordStoreError> {
        Ok(self.fetch_all(collection).await?)
    }
}
