//! Index of committed record versions of continuous backups

pub mod delete;
pub mod error;
pub mod handlers;
pub mod index;
pub mod plugin;

pub use delete::{DeleteBackupDataExecutor, DeleteBackupDataRequest, DELETE_BACKUP_DATA_JOB};
pub use error::MetadataError;
pub use index::{normalize_digests, MetadataIndex, VersionFilter};
pub use plugin::MetadataPlugin;
