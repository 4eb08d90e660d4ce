//! Storage targets for backup artifacts and the artifact codec

pub mod backend;
pub mod codec;
pub mod error;
pub mod keys;
pub mod local;
pub mod s3;

pub use backend::{join_key, open_storage, StorageBackend};
pub use codec::{ArtifactHeader, CodecOptions};
pub use error::StorageError;
pub use local::LocalBackend;
pub use s3::S3Backend;
