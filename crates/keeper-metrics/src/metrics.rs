//! Prometheus metrics exported by the service.

use prometheus::{
    register_gauge_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_vec_with_registry,
    register_int_gauge_with_registry, Encoder, GaugeVec, IntCounter, IntCounterVec, IntGauge,
    IntGaugeVec, Registry, TextEncoder,
};

pub const FULL: &str = "full";
pub const INCREMENTAL: &str = "incremental";

/// Counters for one kind of backup run.
#[derive(Clone)]
pub struct BackupRunMetrics {
    pub runs: IntCounterVec,
    pub failures: IntCounterVec,
    pub skips: IntCounterVec,
    pub duration_millis: IntGaugeVec,
}

impl BackupRunMetrics {
    fn new(prefix: &str, registry: &Registry) -> prometheus::Result<Self> {
        Ok(Self {
            runs: register_int_counter_vec_with_registry!(
                format!("{}_runs_total", prefix),
                "Successful backup runs",
                &["routine"],
                registry,
            )?,
            failures: register_int_counter_vec_with_registry!(
                format!("{}_failure_total", prefix),
                "Failed backup runs",
                &["routine"],
                registry,
            )?,
            skips: register_int_counter_vec_with_registry!(
                format!("{}_skip_total", prefix),
                "Backup triggers skipped because a run was in flight",
                &["routine"],
                registry,
            )?,
            duration_millis: register_int_gauge_vec_with_registry!(
                format!("{}_duration_millis", prefix),
                "Duration of the last backup run",
                &["routine"],
                registry,
            )?,
        })
    }
}

#[derive(Clone)]
pub struct KeeperMetrics {
    registry: Registry,
    pub full_backup: BackupRunMetrics,
    pub incremental_backup: BackupRunMetrics,
    pub backup_progress_pct: GaugeVec,
    pub queue_new: IntGauge,
    pub queue_in_process: IntGauge,
    pub queue_failed: IntGauge,
    pub queue_all: IntGauge,
    pub queue_committed_total: IntCounter,
    pub queue_stale_total: IntCounter,
    pub queue_read_key_not_found_total: IntCounter,
    pub restore_in_progress: IntGauge,
    pub smd_snapshots_total: IntCounterVec,
}

impl KeeperMetrics {
    pub fn new() -> prometheus::Result<Self> {
        Self::with_registry(Registry::new())
    }

    pub fn with_registry(registry: Registry) -> prometheus::Result<Self> {
        Ok(Self {
            full_backup: BackupRunMetrics::new("backup", &registry)?,
            incremental_backup: BackupRunMetrics::new("incremental_backup", &registry)?,
            backup_progress_pct: register_gauge_vec_with_registry!(
                "aerospike_backup_service_backup_progress_pct",
                "Progress of the running backup in percent",
                &["routine", "type"],
                registry,
            )?,
            queue_new: register_int_gauge_with_registry!(
                "queue_new",
                "Queued mutations waiting to be committed",
                registry,
            )?,
            queue_in_process: register_int_gauge_with_registry!(
                "queue_in_process",
                "Queued mutations claimed by a committer",
                registry,
            )?,
            queue_failed: register_int_gauge_with_registry!(
                "queue_failed",
                "Queued mutations that exhausted their attempts",
                registry,
            )?,
            queue_all: register_int_gauge_with_registry!(
                "queue_all",
                "Queued mutations in any state",
                registry,
            )?,
            queue_committed_total: register_int_counter_with_registry!(
                "queue_committed_total",
                "Mutations committed into backup storage",
                registry,
            )?,
            queue_stale_total: register_int_counter_with_registry!(
                "queue_stale_total",
                "Mutations dropped because a newer version was committed",
                registry,
            )?,
            queue_read_key_not_found_total: register_int_counter_with_registry!(
                "queue_read_key_not_found_total",
                "Claimed mutations whose queue row had disappeared",
                registry,
            )?,
            restore_in_progress: register_int_gauge_with_registry!(
                "restore_in_progress",
                "Restore jobs currently running",
                registry,
            )?,
            smd_snapshots_total: register_int_counter_vec_with_registry!(
                "smd_snapshots_total",
                "System metadata snapshots taken",
                &["connection"],
                registry,
            )?,
            registry,
        })
    }

    pub fn backup_runs(&self, backup_type: &str) -> &BackupRunMetrics {
        if backup_type == INCREMENTAL {
            &self.incremental_backup
        } else {
            &self.full_backup
        }
    }

    pub fn set_progress(&self, routine: &str, backup_type: &str, percent: f64) {
        self.backup_progress_pct
            .with_label_values(&[routine, backup_type])
            .set(percent);
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every metric in the text exposition format.
    pub fn encode(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        let metrics = KeeperMetrics::new().unwrap();
        metrics.backup_runs(FULL).runs.with_label_values(&["r"]).inc();
        metrics.backup_runs(INCREMENTAL).skips.with_label_values(&["r"]).inc();
        metrics.set_progress("r", FULL, 42.0);
        metrics.queue_new.set(3);

        let text = metrics.encode().unwrap();
        assert!(text.contains("backup_runs_total{routine=\"r\"} 1"));
        assert!(text.contains("incremental_backup_skip_total{routine=\"r\"} 1"));
        assert!(text.contains(
            "aerospike_backup_service_backup_progress_pct{routine=\"r\",type=\"full\"} 42"
        ));
        assert!(text.contains("queue_new 3"));
    }

    #[test]
    fn test_registries_are_independent() {
        let a = KeeperMetrics::new().unwrap();
        let b = KeeperMetrics::new().unwrap();
        a.restore_in_progress.inc();
        assert_eq!(b.restore_in_progress.get(), 0);
    }
}
