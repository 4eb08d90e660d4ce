use thiserror::Error;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("job \"{0}\" not found")]
    NotFound(String),

    #[error("unknown job kind \"{0}\"")]
    UnknownKind(String),

    #[error("job \"{id}\" is {status}: {message}")]
    InvalidState {
        id: String,
        status: String,
        message: String,
    },

    #[error("job cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl JobError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}
