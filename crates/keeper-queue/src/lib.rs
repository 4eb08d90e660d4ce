//! Ingestion of shipped mutations and their commit into continuous backups

pub mod error;
pub mod handlers;
pub mod model;
pub mod plugin;
pub mod recovery;
pub mod service;

pub use error::QueueError;
pub use model::{CommitOutcome, Mutation, QueueEntry, QueueStats, QueueStatus};
pub use plugin::QueuePlugin;
pub use recovery::{QueueRecoveryExecutor, QUEUE_RECOVERY_JOB};
pub use service::QueueService;
