use keeper_cluster::ClusterError;
use keeper_config::ConfigError;
use keeper_core::ValidationError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("connection \"{0}\" not found")]
    NotFound(String),

    #[error("connection for source cluster \"{0}\" already exists")]
    Conflict(String),

    #[error("source cluster error: {0}")]
    Upstream(#[from] ClusterError),

    #[error("ClusterConnection cannot be deleted or updated: shipping topology is static")]
    StaticConfiguration,

    #[error("connection \"{name}\" is used by continuous backups: {backups}")]
    InUse { name: String, backups: String },

    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}
