pub mod background_jobs;
pub mod backup_runs;
pub mod config_revisions;
pub mod queue_records;
pub mod record_versions;
pub mod restore_jobs;
pub mod smd_snapshots;
