use keeper_core::ValidationError;
use keeper_jobs::JobError;
use keeper_storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("batch object {key} has no line {line}")]
    MissingLine { key: String, line: i32 },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
