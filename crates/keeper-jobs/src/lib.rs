//! Persisted, resumable background jobs

pub mod error;
pub mod handlers;
pub mod manager;
pub mod model;
pub mod plugin;

pub use error::JobError;
pub use manager::{JobContext, JobExecutor, JobManager};
pub use model::{JobInfo, JobStatus};
pub use plugin::JobsPlugin;
