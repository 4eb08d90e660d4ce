use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 error: {0}")]
    S3(String),

    #[error("storage configuration error: {0}")]
    Configuration(String),

    #[error("invalid artifact: {0}")]
    Codec(String),

    #[error("{0}")]
    PolicyMismatch(String),

    #[error("encryption key error: {0}")]
    Key(String),
}
