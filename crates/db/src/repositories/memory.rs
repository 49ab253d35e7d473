use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use foodlink_core::records::{merge_patch, Collection, Record, RecordStore, RecordStoreError};

/// Process-local record store. Records are kept per collection and listed in id order.
#[derive(Default)]
pub struct InMemoryRecordStore {
    collections: RwLock<HashMap<Collection, BTreeMap<String, Record>>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store pre-populated with `records`; entries without a string `id` are skipped.
    pub fn with_records(records: impl IntoIterator<Item = (Collection, Record)>) -> Self {
        let mut collections: HashMap<Collection, BTreeMap<String, Record>> = HashMap::new();
        for (collection, record) in records {
            if let Some(id) = record_id(&record) {
                collections.entry(collection).or_default().insert(id, record);
            }
        }
        Self { collections: RwLock::new(collections) }
    }

    pub async fn insert(&self, collection: Collection, record: Record) -> Option<String> {
        let id = record_id(&record)?;
        let mut collections = self.collections.write().await;
        collections.entry(collection).or_default().insert(id.clone(), record);
        Some(id)
    }
}

fn record_id(record: &Record) -> Option<String> {
    match record.get("id") {
        Some(Value::String(id)) => Some(id.clone()),
        Some(Value::Number(id)) => Some(id.to_string()),
        _ => None,
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<Record>, RecordStoreError> {
        let collections = self.collections.read().await;
        Ok(collections.get(&collection).and_then(|records| records.get(id)).cloned())
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: Record,
    ) -> Result<Record, RecordStoreError> {
        let mut collections = self.collections.write().await;
        let record = collections
            .get_mut(&collection)
            .and_then(|records| records.get_mut(id))
            .ok_or_else(|| RecordStoreError::NotFound { collection, id: id.to_string() })?;
        merge_patch(record, patch);
        Ok(record.clone())
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<Record, RecordStoreError> {
        let mut collections = self.collections.write().await;
        collections
            .get_mut(&collection)
            .and_then(|records| records.remove(id))
            .ok_or_else(|| RecordStoreError::NotFound { collection, id: id.to_string() })
    }

    async fn list(&self, collection: Collection) -> Result<Vec<Record>, RecordStoreError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&collection)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }
}
