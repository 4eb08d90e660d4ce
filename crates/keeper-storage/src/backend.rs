use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use keeper_config::Storage;

use crate::error::StorageError;
use crate::local::LocalBackend;
use crate::s3::S3Backend;

/// Flat object store addressed by `/`-separated keys.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn put(&self, key: &str, data: Bytes) -> Result<(), StorageError>;

    async fn get(&self, key: &str) -> Result<Bytes, StorageError>;

    /// Every key under `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, StorageError>;

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        match self.get(key).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Open the backend a storage definition points at.
pub async fn open_storage(storage: &Storage) -> Result<Arc<dyn StorageBackend>, StorageError> {
    match (&storage.local_storage, &storage.s3_storage) {
        (Some(local), None) => Ok(Arc::new(LocalBackend::new(&local.path))),
        (None, Some(s3)) => Ok(Arc::new(S3Backend::new(s3).await?)),
        _ => Err(StorageError::Configuration(
            "exactly one of local-storage or s3-storage must be set".to_string(),
        )),
    }
}

/// Join key segments, ignoring empty ones and redundant slashes.
pub fn join_key(parts: &[&str]) -> String {
    parts
        .iter()
        .flat_map(|part| part.split('/'))
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

pub(crate) fn check_key(key: &str) -> Result<(), StorageError> {
    if key.split('/').any(|segment| segment == "..") {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}
