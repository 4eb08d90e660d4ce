//! Backup routines: cron scheduling, single-flight runs, the snapshot
//! writer and retention.

pub mod error;
pub mod handlers;
pub mod layout;
pub mod model;
pub mod plugin;
pub mod runner;
pub mod scheduler;

pub use error::BackupError;
pub use model::{BackupDetails, BackupMetadata, BackupType, NamespaceObjects, RunState};
pub use plugin::BackupPlugin;
pub use runner::BackupRunner;
pub use scheduler::{BackupScheduler, TriggerOutcome};
