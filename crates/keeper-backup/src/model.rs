use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use keeper_cluster::{SecondaryIndex, Udf};
use keeper_core::{format_offset_date_time, now_millis};
use keeper_entities::backup_runs;
use keeper_metrics::{FULL, INCREMENTAL};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    Full,
    Incremental,
}

impl BackupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupType::Full => FULL,
            BackupType::Incremental => INCREMENTAL,
        }
    }

    /// Storage directory holding snapshots of this type.
    pub fn directory(&self) -> &'static str {
        match self {
            BackupType::Full => "backup",
            BackupType::Incremental => "incremental",
        }
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One namespace of a completed backup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub struct BackupDetails {
    pub routine: String,
    pub namespace: String,
    #[serde(rename = "type")]
    pub backup_type: String,
    pub created: Option<String>,
    pub from: Option<String>,
    pub finished: Option<String>,
    /// Milliseconds
    pub duration: i64,
    pub record_count: i64,
    pub byte_count: i64,
    pub file_count: i32,
    pub udf_count: i32,
    pub secondary_index_count: i32,
    /// Storage path of the namespace directory
    pub key: String,
    pub compression: String,
    pub encryption: String,
}

impl From<backup_runs::Model> for BackupDetails {
    fn from(run: backup_runs::Model) -> Self {
        Self {
            routine: run.routine,
            namespace: run.namespace,
            backup_type: run.backup_type,
            created: format_offset_date_time(run.created),
            from: format_offset_date_time(run.from_time),
            finished: format_offset_date_time(run.finished),
            duration: run.duration,
            record_count: run.record_count,
            byte_count: run.byte_count,
            file_count: run.file_count,
            udf_count: run.udf_count,
            secondary_index_count: run.secondary_index_count,
            key: run.storage_key,
            compression: run.compression,
            encryption: run.encryption,
        }
    }
}

/// Written next to the data of every backed up namespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BackupMetadata {
    pub routine: String,
    pub namespace: String,
    #[serde(rename = "type")]
    pub backup_type: String,
    /// Epoch millis
    pub created: i64,
    pub from: i64,
    pub record_count: u64,
    pub byte_count: u64,
    pub file_count: u32,
    pub udf_count: u32,
    pub secondary_index_count: u32,
    pub compression: String,
    pub encryption: String,
}

/// Body of `smd.kpr`: the namespace's UDF modules and secondary indexes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NamespaceObjects {
    #[serde(default)]
    pub udfs: Vec<Udf>,
    #[serde(default)]
    pub indexes: Vec<SecondaryIndex>,
}

/// Progress of an in-flight run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub struct RunProgress {
    pub total_records_count: u64,
    pub done_records: u64,
    pub start_time: Option<String>,
    pub percentage_done: u64,
    pub estimated_end_time: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub struct CurrentBackups {
    pub last_full: Option<String>,
    pub last_incremental: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full: Option<RunProgress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incremental: Option<RunProgress>,
}

/// Shared state of a run, updated by the runner and read by the API.
#[derive(Debug)]
pub struct RunState {
    pub routine: String,
    pub backup_type: BackupType,
    pub start_time: i64,
    pub total: AtomicU64,
    pub done: AtomicU64,
    pub cancel: CancellationToken,
}

impl RunState {
    pub fn new(routine: &str, backup_type: BackupType) -> Self {
        Self {
            routine: routine.to_string(),
            backup_type,
            start_time: now_millis(),
            total: AtomicU64::new(0),
            done: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        }
    }

    pub fn add_done(&self, records: u64) {
        self.done.fetch_add(records, Ordering::Relaxed);
    }

    pub fn percentage(&self) -> u64 {
        let total = self.total.load(Ordering::Relaxed);
        if total == 0 {
            return 0;
        }
        (self.done.load(Ordering::Relaxed) * 100 / total).min(100)
    }

    pub fn progress(&self, now: i64) -> RunProgress {
        let total = self.total.load(Ordering::Relaxed);
        let done = self.done.load(Ordering::Relaxed);
        let estimated_end = (done > 0 && total > 0).then(|| {
            let elapsed = (now - self.start_time).max(0);
            self.start_time + (elapsed as f64 * total as f64 / done as f64) as i64
        });
        RunProgress {
            total_records_count: total,
            done_records: done,
            start_time: format_offset_date_time(self.start_time),
            percentage_done: self.percentage(),
            estimated_end_time: estimated_end.and_then(format_offset_date_time),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_estimates_end_time() {
        let state = RunState::new("r", BackupType::Full);
        assert_eq!(state.progress(state.start_time).percentage_done, 0);
        assert!(state.progress(state.start_time).estimated_end_time.is_none());

        state.total.store(200, Ordering::Relaxed);
        state.add_done(50);
        let progress = state.progress(state.start_time + 1_000);
        assert_eq!(progress.percentage_done, 25);
        assert_eq!(
            progress.estimated_end_time,
            format_offset_date_time(state.start_time + 4_000)
        );
    }

    #[test]
    fn test_details_render_times() {
        let details = BackupDetails::from(backup_runs::Model {
            id: 1,
            routine: "r".into(),
            namespace: "test".into(),
            backup_type: "full".into(),
            created: 1_700_000_000_000,
            from_time: 0,
            finished: 1_700_000_001_000,
            duration: 1_000,
            record_count: 3,
            byte_count: 10,
            file_count: 1,
            udf_count: 0,
            secondary_index_count: 0,
            storage_key: "r/backup/1700000000000/data/test".into(),
            compression: "NONE".into(),
            encryption: "NONE".into(),
        });
        assert_eq!(details.created.as_deref(), Some("2023-11-14T22:13:20.000Z"));
        assert_eq!(details.from, None);
    }
}
