//! Writes snapshot artifacts back into a cluster.
//!
//! A restore walks one or more chains of namespace directories. The
//! directories of a chain are applied in order (a full snapshot followed by
//! its incrementals); separate chains run concurrently up to the policy's
//! `parallel`. Inside a directory the UDFs and secondary indexes go first,
//! then every records file in name order, written in batches.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::{stream, StreamExt, TryStreamExt};
use keeper_backup::{layout, NamespaceObjects};
use keeper_cluster::{ClusterClient, ClusterError, Record, WriteOutcome, WritePolicy};
use keeper_core::{now_millis, Throttle};
use keeper_storage::{join_key, CodecOptions, StorageBackend, StorageError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::RestoreError;
use crate::model::{RestorePolicy, RestoreStats};

/// Namespace directories under `path`, which must hold exactly one
/// snapshot.
pub async fn discover_snapshot(
    storage: &dyn StorageBackend,
    path: &str,
) -> Result<Vec<String>, RestoreError> {
    let path = join_key(&[path]);
    let keys = storage.list(&format!("{}/", path)).await?;

    let snapshots: BTreeSet<&str> = keys.iter().filter_map(|key| layout::snapshot_of(key)).collect();
    match snapshots.len() {
        0 => return Err(RestoreError::NoBackup(format!("no backup found at {}", path))),
        1 => {}
        count => return Err(RestoreError::AmbiguousPath { path, count }),
    }

    let dirs: BTreeSet<String> = keys
        .iter()
        .filter(|key| layout::snapshot_of(key).is_some())
        .filter_map(|key| key.rsplit_once('/').map(|(dir, _)| dir.to_string()))
        .collect();
    Ok(dirs.into_iter().collect())
}

/// State shared by every chain of one restore.
pub struct RestoreRun {
    client: Arc<dyn ClusterClient>,
    policy: RestorePolicy,
    write_policy: WritePolicy,
    codec: CodecOptions,
    throttle: tokio::sync::Mutex<Throttle>,
    cancel: CancellationToken,
    stats: Arc<Mutex<RestoreStats>>,
}

impl RestoreRun {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        policy: RestorePolicy,
        codec: CodecOptions,
        cancel: CancellationToken,
        stats: Arc<Mutex<RestoreStats>>,
    ) -> Self {
        Self {
            client,
            write_policy: policy.write_policy(),
            throttle: tokio::sync::Mutex::new(Throttle::new(policy.tps, policy.bandwidth)),
            policy,
            codec,
            cancel,
            stats,
        }
    }

    pub fn stats(&self) -> RestoreStats {
        *self.stats_lock()
    }

    fn stats_lock(&self) -> std::sync::MutexGuard<'_, RestoreStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_cancelled(&self) -> Result<(), RestoreError> {
        if self.cancel.is_cancelled() {
            Err(RestoreError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub async fn restore_chains(
        &self,
        storage: &dyn StorageBackend,
        chains: Vec<Vec<String>>,
    ) -> Result<(), RestoreError> {
        stream::iter(chains)
            .map(|chain| async move {
                for dir in &chain {
                    self.restore_dir(storage, dir).await?;
                }
                Ok::<_, RestoreError>(())
            })
            .buffer_unordered(self.policy.parallel())
            .try_collect::<Vec<_>>()
            .await?;
        Ok(())
    }

    async fn restore_dir(&self, storage: &dyn StorageBackend, dir: &str) -> Result<(), RestoreError> {
        self.check_cancelled()?;
        let keys = self.read_timeout(storage.list(&format!("{}/", dir))).await?;

        let smd = join_key(&[dir, layout::SMD_FILE]);
        if keys.contains(&smd) {
            self.restore_objects(storage, &smd).await?;
        }
        if self.policy.no_records == Some(true) {
            return Ok(());
        }
        for key in keys.iter().filter(|key| layout::is_records_file(key)) {
            self.restore_records_file(storage, key).await?;
        }
        debug!("Restored {}", dir);
        Ok(())
    }

    async fn read(&self, storage: &dyn StorageBackend, key: &str) -> Result<Vec<u8>, RestoreError> {
        let data = self.read_timeout(storage.get(key)).await?;
        let (_, body) = self.codec.decode(&data)?;
        self.stats_lock().total_bytes += data.len() as u64;
        Ok(body)
    }

    async fn read_timeout<T>(
        &self,
        read: impl Future<Output = Result<T, StorageError>>,
    ) -> Result<T, RestoreError> {
        match self.policy.timeout.filter(|t| *t > 0) {
            Some(millis) => tokio::time::timeout(Duration::from_millis(millis as u64), read)
                .await
                .map_err(|_| RestoreError::Timeout(millis))?
                .map_err(RestoreError::from),
            None => read.await.map_err(RestoreError::from),
        }
    }

    async fn restore_objects(&self, storage: &dyn StorageBackend, key: &str) -> Result<(), RestoreError> {
        let objects: NamespaceObjects = serde_json::from_slice(&self.read(storage, key).await?)?;

        if self.policy.no_udfs != Some(true) {
            for udf in &objects.udfs {
                self.bounded(self.client.put_udf(udf)).await?;
                self.stats_lock().udf_count += 1;
            }
        }
        if self.policy.no_indexes != Some(true) {
            for index in &objects.indexes {
                let mut index = index.clone();
                index.namespace = self.policy.map_namespace(&index.namespace).to_string();
                self.bounded(self.client.create_index(&index)).await?;
                self.stats_lock().index_count += 1;
            }
        }
        Ok(())
    }

    async fn restore_records_file(
        &self,
        storage: &dyn StorageBackend,
        key: &str,
    ) -> Result<(), RestoreError> {
        self.check_cancelled()?;
        let body = self.read(storage, key).await?;
        let now = now_millis();

        let mut records = Vec::new();
        for line in body.split(|b| *b == b'\n').filter(|line| !line.is_empty()) {
            let record: Record = serde_json::from_slice(line)?;
            if let Some(record) = self.prepare(record, now) {
                records.push(record);
            }
        }

        self.write_records(&records).await
    }

    /// Apply the policy's filters and namespace mapping to one record.
    fn prepare(&self, mut record: Record, now: i64) -> Option<Record> {
        let mut stats = self.stats_lock();
        stats.read_records += 1;

        if let Some(sets) = &self.policy.set_list {
            if !sets.is_empty() && !sets.iter().any(|s| s == &record.set) {
                stats.skipped_records += 1;
                return None;
            }
        }
        if record.is_expired(now) {
            stats.expired_records += 1;
            return None;
        }
        if let Some(bins) = &self.policy.bin_list {
            record.project(bins);
            if record.bins.is_empty() {
                stats.ignored_records += 1;
                return None;
            }
        }
        record.namespace = self.policy.map_namespace(&record.namespace).to_string();
        Some(record)
    }

    pub async fn write_records(&self, records: &[Record]) -> Result<(), RestoreError> {
        let size = self.policy.batch_size();
        stream::iter((0..records.len()).step_by(size))
            .map(|start| self.write_batch(&records[start..records.len().min(start + size)]))
            .buffer_unordered(self.policy.max_async_batches())
            .try_collect::<Vec<_>>()
            .await?;
        Ok(())
    }

    async fn write_batch(&self, batch: &[Record]) -> Result<(), RestoreError> {
        self.check_cancelled()?;
        let bytes: usize = batch.iter().map(Record::size_hint).sum();
        self.throttle
            .lock()
            .await
            .consume(batch.len() as u64, bytes as u64)
            .await;

        for record in batch {
            let outcome = self.bounded(self.client.put(record, &self.write_policy)).await?;
            let mut stats = self.stats_lock();
            match outcome {
                WriteOutcome::Inserted => stats.inserted_records += 1,
                WriteOutcome::Existed => stats.existed_records += 1,
                WriteOutcome::Fresher => stats.fresher_records += 1,
            }
        }
        Ok(())
    }

    /// Bound one cluster call by the policy's socket timeout.
    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, ClusterError>>,
    ) -> Result<T, RestoreError> {
        match self.policy.socket_timeout.filter(|t| *t > 0) {
            Some(millis) => tokio::time::timeout(Duration::from_millis(millis as u64), call)
                .await
                .map_err(|_| ClusterError::Timeout(format!("no response within {}ms", millis)))?
                .map_err(RestoreError::from),
            None => call.await.map_err(RestoreError::from),
        }
    }
}

/// Log a summary line for a finished restore.
pub fn log_summary(job: i32, stats: &RestoreStats) {
    info!(
        "Restore job {} read {} records: {} inserted, {} existed, {} fresher, {} skipped, {} expired",
        job,
        stats.read_records,
        stats.inserted_records,
        stats.existed_records,
        stats.fresher_records,
        stats.skipped_records,
        stats.expired_records
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_cluster::{Digest, MemoryCluster};
    use keeper_config::{CompressionMode, EncryptionMode};
    use keeper_storage::{ArtifactHeader, LocalBackend};
    use serde_json::json;

    fn record(set: &str, key: &str) -> Record {
        let mut bins = keeper_cluster::Bins::new();
        bins.insert("name".into(), json!(key));
        bins.insert("age".into(), json!(30));
        Record {
            namespace: "test".into(),
            set: set.into(),
            digest: Digest::of(set, key),
            bins,
            generation: 2,
            last_update_time: 1_000,
            void_time: 0,
        }
    }

    async fn write_file(storage: &LocalBackend, key: &str, records: &[Record]) {
        let mut body = Vec::new();
        for record in records {
            serde_json::to_writer(&mut body, record).unwrap();
            body.push(b'\n');
        }
        let header = ArtifactHeader {
            compression: CompressionMode::None,
            encryption: EncryptionMode::None,
            namespace: "test".into(),
            record_count: records.len() as u64,
            created: 1,
        };
        let data = CodecOptions::plain().encode(&header, &body).unwrap();
        storage.put(key, data).await.unwrap();
    }

    fn run(cluster: &MemoryCluster, policy: RestorePolicy) -> RestoreRun {
        RestoreRun::new(
            Arc::new(cluster.clone()),
            policy,
            CodecOptions::plain(),
            CancellationToken::new(),
            Arc::new(Mutex::new(RestoreStats::default())),
        )
    }

    #[tokio::test]
    async fn test_discover_rejects_ambiguous_paths() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalBackend::new(dir.path());
        write_file(&storage, "daily/backup/1/data/test/records_00000.kpr", &[record("users", "a")]).await;
        write_file(&storage, "daily/backup/1/data/other/records_00000.kpr", &[record("users", "a")]).await;

        let dirs = discover_snapshot(&storage, "daily/backup/1").await.unwrap();
        assert_eq!(dirs, vec!["daily/backup/1/data/other", "daily/backup/1/data/test"]);
        let dirs = discover_snapshot(&storage, "daily/backup/1/data/test/").await.unwrap();
        assert_eq!(dirs, vec!["daily/backup/1/data/test"]);

        write_file(&storage, "daily/backup/2/data/test/records_00000.kpr", &[record("users", "a")]).await;
        let err = discover_snapshot(&storage, "daily/backup").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to restore: ambiguous backup path daily/backup: 2 backups found"
        );
        assert!(matches!(
            discover_snapshot(&storage, "weekly").await.unwrap_err(),
            RestoreError::NoBackup(_)
        ));
    }

    #[tokio::test]
    async fn test_records_file_filters_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalBackend::new(dir.path());
        let mut expired = record("users", "old");
        expired.void_time = 1;
        write_file(
            &storage,
            "r/backup/1/data/test/records_00000.kpr",
            &[record("users", "a"), record("orders", "b"), expired, record("users", "c")],
        )
        .await;

        let cluster = MemoryCluster::new(&["test"]);
        let restore = run(
            &cluster,
            RestorePolicy {
                set_list: Some(vec!["users".into()]),
                bin_list: Some(vec!["name".into()]),
                batch_size: Some(1),
                ..Default::default()
            },
        );
        restore
            .restore_chains(&storage, vec![vec!["r/backup/1/data/test".into()]])
            .await
            .unwrap();

        let stats = restore.stats();
        assert_eq!(stats.read_records, 4);
        assert_eq!(stats.inserted_records, 2);
        assert_eq!(stats.skipped_records, 1);
        assert_eq!(stats.expired_records, 1);
        assert!(stats.total_bytes > 0);

        let restored = cluster.get("test", &Digest::of("users", "a")).unwrap();
        assert_eq!(restored.bins.len(), 1);
        assert!(cluster.get("test", &Digest::of("orders", "b")).is_none());
    }

    #[tokio::test]
    async fn test_unique_and_generation_outcomes() {
        let cluster = MemoryCluster::new(&["test"]);
        let mut newer = record("users", "a");
        newer.generation = 9;
        cluster.insert(newer);
        cluster.insert(record("users", "b"));

        let mut stale = record("users", "a");
        stale.generation = 1;
        let restore = run(&cluster, RestorePolicy::default());
        restore
            .write_records(&[stale.clone(), record("users", "c")])
            .await
            .unwrap();
        assert_eq!(restore.stats().fresher_records, 1);
        assert_eq!(restore.stats().inserted_records, 1);

        let unique = run(
            &cluster,
            RestorePolicy {
                unique: Some(true),
                ..Default::default()
            },
        );
        unique.write_records(&[record("users", "b")]).await.unwrap();
        assert_eq!(unique.stats().existed_records, 1);

        let forced = run(
            &cluster,
            RestorePolicy {
                no_generation: Some(true),
                ..Default::default()
            },
        );
        forced.write_records(&[stale]).await.unwrap();
        assert_eq!(forced.stats().inserted_records, 1);
    }

    #[tokio::test]
    async fn test_namespace_mapping_and_missing_namespace() {
        let cluster = MemoryCluster::new(&["copy"]);
        let mapped = run(
            &cluster,
            RestorePolicy {
                namespace: Some(crate::model::RestoreNamespace {
                    source: "test".into(),
                    destination: "copy".into(),
                }),
                ..Default::default()
            },
        );
        let prepared = mapped.prepare(record("users", "a"), 0).unwrap();
        mapped.write_records(&[prepared]).await.unwrap();
        assert!(cluster.get("copy", &Digest::of("users", "a")).is_some());

        let unmapped = run(&cluster, RestorePolicy::default());
        let err = unmapped.write_records(&[record("users", "a")]).await.unwrap_err();
        assert!(matches!(err, RestoreError::Cluster(ClusterError::NamespaceNotFound(_))));
    }

    #[tokio::test]
    async fn test_cancelled_run_writes_nothing() {
        let cluster = MemoryCluster::new(&["test"]);
        let restore = run(&cluster, RestorePolicy::default());
        restore.cancel.cancel();
        let err = restore.write_records(&[record("users", "a")]).await.unwrap_err();
        assert!(matches!(err, RestoreError::Cancelled));
        assert!(cluster.get("test", &Digest::of("users", "a")).is_none());
    }

    #[tokio::test]
    async fn test_encrypted_artifact_needs_matching_policy() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalBackend::new(dir.path());
        let header = ArtifactHeader {
            compression: CompressionMode::None,
            encryption: EncryptionMode::None,
            namespace: "test".into(),
            record_count: 0,
            created: 1,
        };
        let sealed = CodecOptions::plain()
            .with_key(EncryptionMode::Aes256, [7u8; 32])
            .encode(&header, b"")
            .unwrap();
        storage
            .put("r/backup/1/data/test/records_00000.kpr", sealed)
            .await
            .unwrap();

        let cluster = MemoryCluster::new(&["test"]);
        let err = run(&cluster, RestorePolicy::default())
            .restore_chains(&storage, vec![vec!["r/backup/1/data/test".into()]])
            .await
            .unwrap_err();
        assert!(matches!(err, RestoreError::Storage(StorageError::PolicyMismatch(_))));
    }
}
