use keeper_core::ValidationError;
use keeper_jobs::JobError;
use keeper_storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("no connection ships to datacenter \"{0}\"")]
    UnknownDatacenter(String),

    #[error("continuous backup \"{0}\" is not configured")]
    UnknownBackup(String),

    #[error("{0}")]
    InvalidDigest(String),

    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
