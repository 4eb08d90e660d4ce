//! Restores from snapshot backups and from the continuous version index.

pub mod continuous;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod model;
pub mod plugin;
pub mod service;

pub use continuous::{
    ContinuousRestoreExecutor, ContinuousRestorer, RESTORE_NAMESPACE_JOB, RESTORE_SET_JOB,
};
pub use engine::{discover_snapshot, RestoreRun};
pub use error::RestoreError;
pub use model::{
    ContinuousRestoreRequest, ContinuousScope, RestoreJobState, RestoreJobStatus,
    RestoreNamespace, RestorePolicy, RestoreRequest, RestoreStats, RestoreTask,
    RestoreTimestampRequest,
};
pub use plugin::RestorePlugin;
pub use service::RestoreService;
