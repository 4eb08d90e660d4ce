use keeper_cluster::ClusterError;
use keeper_config::ConfigError;
use keeper_core::ValidationError;
use keeper_storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("routine \"{0}\" not found")]
    RoutineNotFound(String),

    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("source cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("backup of namespace {namespace} timed out after {millis}ms")]
    Timeout { namespace: String, millis: i64 },

    #[error("routine \"{0}\" has no full backup to build an incremental on")]
    NoBaseBackup(String),

    #[error("backup cancelled")]
    Cancelled,

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Metadata error: {0}")]
    Metadata(#[from] serde_yaml::Error),
}

impl BackupError {
    /// Errors worth another attempt under the retry policy.
    pub fn is_retryable(&self) -> bool {
        match self {
            BackupError::Cluster(e) => e.is_transient(),
            BackupError::Storage(_) | BackupError::Timeout { .. } => true,
            _ => false,
        }
    }
}
