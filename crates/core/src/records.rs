//! Persistence port for the record collections the assistant can read and mutate.
//!
//! Records are schemaless JSON objects keyed by an `id` string. Concrete stores
//! live in `foodlink-db`; the agent only sees this trait.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub type Record = Map<String, Value>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Users,
    Partners,
    Donors,
    Donations,
    Volunteers,
}

impl Collection {
    pub const ALL: [Collection; 5] =
        [Self::Users, Self::Partners, Self::Donors, Self::Donations, Self::Volunteers];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Partners => "partners",
            Self::Donors => "donors",
            Self::Donations => "donations",
            Self::Volunteers => "volunteers",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|collection| collection.as_str() == normalized)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RecordStoreError {
    #[error("no record `{id}` in `{collection}`")]
    NotFound { collection: Collection, id: String },
    #[error("record store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("record store unavailable: {0}")]
    Unavailable(String),
    #[error("record could not be decoded: {0}")]
    Decode(String),
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, collection: Collection, id: &str)
        -> Result<Option<Record>, RecordStoreError>;

    /// Shallow-merges `patch` into the stored record and returns the result.
    async fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: Record,
    ) -> Result<Record, RecordStoreError>;

    /// Removes the record and returns what was removed.
    async fn delete(&self, collection: Collection, id: &str) -> Result<Record, RecordStoreError>;

    async fn list(&self, collection: Collection) -> Result<Vec<Record>, RecordStoreError>;
}

/// Applies a patch the way every store does: top-level keys overwrite, `id` is immutable.
pub fn merge_patch(record: &mut Record, patch: Record) {
    for (key, value) in patch {
        if key == "id" {
            continue;
        }
        record.insert(key, value);
    }
}
