use thiserror::Error;

use foodlink_core::records::RecordStoreError;

pub mod memory;
pub mod record;

pub use memory::InMemoryRecordStore;
pub use record::SqlRecordStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for RecordStoreError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Database(sqlx::Error::PoolTimedOut) => {
                Self::Unavailable("connection pool timed out".to_string())
            }
            RepositoryError::Database(error) => Self::Unavailable(error.to_string()),
            RepositoryError::Decode(message) => Self::Decode(message),
        }
    }
}
