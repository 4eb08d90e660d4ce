use keeper_backup::BackupError;
use keeper_cluster::ClusterError;
use keeper_config::ConfigError;
use keeper_core::ValidationError;
use keeper_jobs::JobError;
use keeper_metadata::MetadataError;
use keeper_storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RestoreError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    NotFound(String),

    #[error("restore job {id} is already {status}")]
    AlreadyFinished { id: i32, status: String },

    #[error("Failed to restore: ambiguous backup path {path}: {count} backups found")]
    AmbiguousPath { path: String, count: usize },

    #[error("Failed to restore: {0}")]
    NoBackup(String),

    #[error("destination cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error("restore timed out after {0}ms")]
    Timeout(i64),

    #[error("restore cancelled")]
    Cancelled,

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Metadata file error: {0}")]
    MetadataFile(#[from] serde_yaml::Error),
}

impl From<RestoreError> for JobError {
    fn from(error: RestoreError) -> Self {
        match error {
            RestoreError::Cancelled => JobError::Cancelled,
            RestoreError::Job(e) => e,
            other => JobError::failed(other.to_string()),
        }
    }
}
