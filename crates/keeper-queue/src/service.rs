//! Durable queue between shipped mutations and committed record versions.
//!
//! Ingestion only inserts `NEW` rows. The processor claims rows in a
//! transaction, writes each backup's share into one batch object in the
//! continuous storage and indexes every record as a `RecordVersion`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use keeper_cluster::{Digest, Record};
use keeper_config::{CompressionMode, ConfigStore, EncryptionMode, QueueSettings};
use keeper_core::{now_millis, validation};
use keeper_entities::{queue_records, record_versions};
use keeper_metrics::KeeperMetrics;
use keeper_storage::{join_key, ArtifactHeader, CodecOptions, StorageBackend};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use tokio::task::JoinSet;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::QueueError;
use crate::model::{CommitOutcome, Mutation, QueueStats, QueueStatus};

pub struct QueueService {
    db: Arc<DatabaseConnection>,
    store: Arc<ConfigStore>,
    storage: Arc<dyn StorageBackend>,
    settings: QueueSettings,
    metrics: Arc<KeeperMetrics>,
    paused: AtomicBool,
}

impl QueueService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        store: Arc<ConfigStore>,
        storage: Arc<dyn StorageBackend>,
        settings: QueueSettings,
        metrics: Arc<KeeperMetrics>,
    ) -> Self {
        Self {
            db,
            store,
            storage,
            settings,
            metrics,
            paused: AtomicBool::new(false),
        }
    }

    /// Storage holding committed batch objects.
    pub fn storage(&self) -> Arc<dyn StorageBackend> {
        self.storage.clone()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        info!("Queue processing paused");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        info!("Queue processing resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Enqueue one `NEW` row per mutation and matching continuous backup.
    pub async fn ingest(&self, dc_name: &str, mutations: Vec<Mutation>) -> Result<usize, QueueError> {
        let config = self.store.snapshot();
        let connection = config
            .connections
            .values()
            .find(|c| c.backup_dc_name == dc_name)
            .ok_or_else(|| QueueError::UnknownDatacenter(dc_name.to_string()))?;

        let backups: Vec<_> = config
            .continuous_backups
            .values()
            .filter(|b| b.src_cluster_name == connection.src_cluster_name)
            .collect();

        let created_at = Utc::now();
        let mut rows = Vec::new();
        for mutation in &mutations {
            validation::not_empty("namespace", &mutation.namespace)?;
            validation::non_negative("last-update-time", Some(mutation.last_update_time))?;
            for backup in backups.iter().filter(|b| b.accepts(&mutation.namespace, &mutation.set)) {
                rows.push(queue_records::ActiveModel {
                    backup_name: Set(backup.name.clone()),
                    namespace: Set(mutation.namespace.clone()),
                    set_name: Set(mutation.set.clone()),
                    digest: Set(mutation.digest.to_hex()),
                    bins: Set(serde_json::Value::Object(mutation.bins.clone())),
                    generation: Set(mutation.generation as i32),
                    last_update_time: Set(mutation.last_update_time),
                    deleted: Set(mutation.deleted),
                    status: Set(QueueStatus::New.to_string()),
                    attempts: Set(0),
                    claimed_at: Set(None),
                    created_at: Set(created_at),
                    ..Default::default()
                });
            }
        }

        let accepted = rows.len();
        if accepted > 0 {
            queue_records::Entity::insert_many(rows)
                .exec_without_returning(self.db.as_ref())
                .await?;
        }
        debug!(
            "Ingested {} mutations from {} into {} queue records",
            mutations.len(),
            dc_name,
            accepted
        );
        self.refresh_gauges().await?;
        Ok(accepted)
    }

    /// Move up to `limit` `NEW` rows to `IN_PROGRESS`, optionally restricted
    /// to some backups and one set.
    pub async fn claim(
        &self,
        limit: u64,
        backups: Option<&[String]>,
        set: Option<&str>,
    ) -> Result<Vec<queue_records::Model>, QueueError> {
        let now = now_millis();
        let txn = self.db.begin().await?;

        let mut query = queue_records::Entity::find()
            .filter(queue_records::Column::Status.eq(QueueStatus::New.as_str()));
        if let Some(backups) = backups {
            query = query.filter(queue_records::Column::BackupName.is_in(backups.iter().cloned()));
        }
        if let Some(set) = set {
            query = query.filter(queue_records::Column::SetName.eq(set));
        }
        let mut rows = query
            .order_by_asc(queue_records::Column::Id)
            .limit(limit)
            .all(&txn)
            .await?;

        if !rows.is_empty() {
            let ids: Vec<i32> = rows.iter().map(|r| r.id).collect();
            queue_records::Entity::update_many()
                .col_expr(queue_records::Column::Status, Expr::value(QueueStatus::InProgress.as_str()))
                .col_expr(queue_records::Column::ClaimedAt, Expr::value(Some(now)))
                .filter(queue_records::Column::Id.is_in(ids))
                .exec(&txn)
                .await?;
        }
        txn.commit().await?;

        for row in rows.iter_mut() {
            row.status = QueueStatus::InProgress.to_string();
            row.claimed_at = Some(now);
        }
        Ok(rows)
    }

    /// Claim rows of backups writing into `backup_ns`.
    pub async fn claim_for_namespace(
        &self,
        backup_ns: Option<&str>,
        set: Option<&str>,
        limit: u64,
    ) -> Result<Vec<queue_records::Model>, QueueError> {
        let names: Option<Vec<String>> = backup_ns.map(|ns| {
            self.store
                .snapshot()
                .continuous_backups
                .values()
                .filter(|b| b.backup_ns == ns)
                .map(|b| b.name.clone())
                .collect()
        });
        if names.as_ref().is_some_and(|n| n.is_empty()) {
            return Ok(Vec::new());
        }
        let rows = self.claim(limit, names.as_deref(), set).await?;
        self.refresh_gauges().await?;
        Ok(rows)
    }

    /// One processor pass. Returns the number of rows claimed.
    pub async fn process_once(self: &Arc<Self>) -> Result<usize, QueueError> {
        if self.is_paused() {
            return Ok(0);
        }
        let claimed = self.claim(self.settings.batch_size, None, None).await?;
        let count = claimed.len();
        if count == 0 {
            return Ok(0);
        }

        let mut groups: BTreeMap<String, Vec<queue_records::Model>> = BTreeMap::new();
        for row in claimed {
            groups.entry(row.backup_name.clone()).or_default().push(row);
        }

        let mut tasks = JoinSet::new();
        for (backup_name, rows) in groups {
            let service = self.clone();
            tasks.spawn(async move {
                match service.commit(&backup_name, &rows).await {
                    Ok(outcome) => debug!("Committed {:?} for continuous backup {}", outcome, backup_name),
                    Err(e) => {
                        warn!("Commit of {} records for {} failed: {}", rows.len(), backup_name, e);
                        if let Err(e) = service.release_failed(&rows).await {
                            error!("Failed to release records of {}: {}", backup_name, e);
                        }
                    }
                }
            });
        }
        while tasks.join_next().await.is_some() {}

        self.refresh_gauges().await?;
        Ok(count)
    }

    /// Commit claimed rows of one backup: write the batch object, index every
    /// new version and mark all rows `COMMITTED`.
    pub async fn commit(
        &self,
        backup_name: &str,
        rows: &[queue_records::Model],
    ) -> Result<CommitOutcome, QueueError> {
        let config = self.store.snapshot();
        let backup = config
            .continuous_backups
            .get(backup_name)
            .ok_or_else(|| QueueError::UnknownBackup(backup_name.to_string()))?;
        let max_throughput = config
            .continuous_policies
            .get(&backup.policy)
            .and_then(|p| p.max_throughput)
            .filter(|tps| *tps > 0);

        let digests: Vec<String> = rows
            .iter()
            .map(|r| r.digest.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let existing = record_versions::Entity::find()
            .filter(record_versions::Column::BackupName.eq(backup_name))
            .filter(record_versions::Column::Digest.is_in(digests))
            .all(self.db.as_ref())
            .await?;

        let mut newest: HashMap<String, i64> = HashMap::new();
        let mut seen: HashSet<(String, i64)> = HashSet::new();
        for version in existing {
            let entry = newest.entry(version.digest.clone()).or_insert(version.timestamp);
            *entry = (*entry).max(version.timestamp);
            seen.insert((version.digest, version.timestamp));
        }

        let mut ordered: Vec<&queue_records::Model> = rows.iter().collect();
        ordered.sort_by(|a, b| (&a.digest, a.last_update_time).cmp(&(&b.digest, b.last_update_time)));

        let mut outcome = CommitOutcome::default();
        let mut accepted = Vec::new();
        for row in ordered {
            if newest.get(&row.digest).is_some_and(|ts| row.last_update_time < *ts) {
                outcome.stale += 1;
                continue;
            }
            if !seen.insert((row.digest.clone(), row.last_update_time)) {
                outcome.duplicates += 1;
                continue;
            }
            if row.deleted && !newest.contains_key(&row.digest) {
                outcome.key_not_found += 1;
            }
            newest.insert(row.digest.clone(), row.last_update_time);
            accepted.push(row);
        }

        let now = now_millis();
        let object_key = join_key(&[
            backup_name,
            &format!("{}-{}.kpr", now, uuid::Uuid::new_v4().simple()),
        ]);
        if !accepted.is_empty() {
            let mut body = Vec::new();
            for row in &accepted {
                let record = to_record(row)?;
                serde_json::to_writer(&mut body, &record)?;
                body.push(b'\n');
            }
            let header = ArtifactHeader {
                compression: CompressionMode::None,
                encryption: EncryptionMode::None,
                namespace: backup.backup_ns.clone(),
                record_count: accepted.len() as u64,
                created: now,
            };
            let data = CodecOptions::plain().encode(&header, &body)?;
            self.storage.put(&object_key, data).await?;
        }

        let txn = self.db.begin().await?;
        for (line, row) in accepted.iter().enumerate() {
            record_versions::ActiveModel {
                backup_name: Set(backup_name.to_string()),
                namespace: Set(row.namespace.clone()),
                set_name: Set(row.set_name.clone()),
                digest: Set(row.digest.clone()),
                timestamp: Set(row.last_update_time),
                generation: Set(row.generation),
                deleted: Set(row.deleted),
                object_key: Set(object_key.clone()),
                line: Set(line as i32),
                ..Default::default()
            }
            .insert(&txn)
            .await?;
        }
        let ids: Vec<i32> = rows.iter().map(|r| r.id).collect();
        queue_records::Entity::update_many()
            .col_expr(queue_records::Column::Status, Expr::value(QueueStatus::Committed.as_str()))
            .filter(queue_records::Column::Id.is_in(ids))
            .exec(&txn)
            .await?;
        txn.commit().await?;

        outcome.committed = accepted.len() as u64;
        self.metrics.queue_committed_total.inc_by(outcome.committed);
        self.metrics.queue_stale_total.inc_by(outcome.stale);
        self.metrics
            .queue_read_key_not_found_total
            .inc_by(outcome.key_not_found);

        if let Some(tps) = max_throughput {
            time::sleep(Duration::from_secs_f64(outcome.committed as f64 / tps as f64)).await;
        }
        Ok(outcome)
    }

    /// Return rows of a failed commit to `NEW`, or `FAILED` once they ran
    /// out of attempts.
    pub async fn release_failed(&self, rows: &[queue_records::Model]) -> Result<(), QueueError> {
        for row in rows {
            let attempts = row.attempts + 1;
            let status = if attempts >= self.settings.max_attempts {
                QueueStatus::Failed
            } else {
                QueueStatus::New
            };
            queue_records::ActiveModel {
                id: Set(row.id),
                status: Set(status.to_string()),
                attempts: Set(attempts),
                claimed_at: Set(None),
                ..Default::default()
            }
            .update(self.db.as_ref())
            .await?;
        }
        Ok(())
    }

    /// Return `IN_PROGRESS` rows claimed at or before `claimed_before` to `NEW`.
    pub async fn recover_zombies(&self, claimed_before: i64) -> Result<u64, QueueError> {
        let result = queue_records::Entity::update_many()
            .col_expr(queue_records::Column::Status, Expr::value(QueueStatus::New.as_str()))
            .col_expr(queue_records::Column::ClaimedAt, Expr::value(Option::<i64>::None))
            .filter(queue_records::Column::Status.eq(QueueStatus::InProgress.as_str()))
            .filter(queue_records::Column::ClaimedAt.lte(claimed_before))
            .exec(self.db.as_ref())
            .await?;
        if result.rows_affected > 0 {
            info!("Recovered {} zombie queue records", result.rows_affected);
            self.refresh_gauges().await?;
        }
        Ok(result.rows_affected)
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let count = |status: QueueStatus| {
            queue_records::Entity::find()
                .filter(queue_records::Column::Status.eq(status.as_str()))
                .count(self.db.as_ref())
        };
        let new = count(QueueStatus::New).await?;
        let in_process = count(QueueStatus::InProgress).await?;
        let committed = count(QueueStatus::Committed).await?;
        let failed = count(QueueStatus::Failed).await?;
        Ok(QueueStats {
            new,
            in_process,
            committed,
            failed,
            all: new + in_process + committed + failed,
        })
    }

    async fn refresh_gauges(&self) -> Result<(), QueueError> {
        let stats = self.stats().await?;
        self.metrics.queue_new.set(stats.new as i64);
        self.metrics.queue_in_process.set(stats.in_process as i64);
        self.metrics.queue_failed.set(stats.failed as i64);
        self.metrics.queue_all.set(stats.all as i64);
        Ok(())
    }

    pub async fn run(self: Arc<Self>, cancellation_token: CancellationToken) {
        info!("Queue processor started");
        let mut pulling = time::interval(Duration::from_millis(self.settings.pulling_interval_ms.max(1)));
        let mut zombie_check =
            time::interval(Duration::from_millis(self.settings.zombie_check_interval_ms.max(1)));
        loop {
            tokio::select! {
                _ = pulling.tick() => {
                    if let Err(e) = self.process_once().await {
                        error!("Queue processing pass failed: {}", e);
                    }
                }
                _ = zombie_check.tick() => {
                    let claimed_before = now_millis() - self.settings.zombie_recover_interval_ms as i64;
                    if let Err(e) = self.recover_zombies(claimed_before).await {
                        error!("Zombie recovery failed: {}", e);
                    }
                }
                _ = cancellation_token.cancelled() => {
                    info!("Queue processor received cancellation signal");
                    return;
                }
            }
        }
    }
}

fn to_record(row: &queue_records::Model) -> Result<Record, QueueError> {
    let digest: Digest = row.digest.parse().map_err(QueueError::InvalidDigest)?;
    let bins = if row.deleted {
        Default::default()
    } else {
        row.bins.as_object().cloned().unwrap_or_default()
    };
    Ok(Record {
        namespace: row.namespace.clone(),
        set: row.set_name.clone(),
        digest,
        bins,
        generation: row.generation as u32,
        last_update_time: row.last_update_time,
        void_time: 0,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use keeper_config::{ClusterConnection, ContinuousBackup, ContinuousPolicy};
    use keeper_database::test_utils::TestDatabase;
    use keeper_storage::LocalBackend;

    pub(crate) struct Fixture {
        pub db: TestDatabase,
        pub _dir: tempfile::TempDir,
        pub service: Arc<QueueService>,
        pub metrics: Arc<KeeperMetrics>,
    }

    pub(crate) async fn fixture() -> Fixture {
        let db = TestDatabase::new().await.unwrap();
        let store = Arc::new(ConfigStore::load(db.connection(), None).await.unwrap());
        store
            .mutate(|config| {
                config.connections.insert(
                    "src".into(),
                    ClusterConnection {
                        src_cluster_name: "src".into(),
                        src_cluster_host: "src".into(),
                        src_cluster_port: 3000,
                        backup_dc_name: "dc1".into(),
                        ..Default::default()
                    },
                );
                config.continuous_policies.insert(
                    "p".into(),
                    ContinuousPolicy {
                        name: "p".into(),
                        duration: 60,
                        ..Default::default()
                    },
                );
                config.continuous_backups.insert(
                    "b1".into(),
                    ContinuousBackup {
                        name: "b1".into(),
                        description: None,
                        src_cluster_name: "src".into(),
                        src_ns: "source".into(),
                        backup_ns: "backup".into(),
                        policy: "p".into(),
                        sets: vec!["users".into()],
                        enabled: true,
                    },
                );
                Ok(())
            })
            .await
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalBackend::new(dir.path()));
        let metrics = Arc::new(KeeperMetrics::new().unwrap());
        let service = Arc::new(QueueService::new(
            db.connection(),
            store,
            storage,
            QueueSettings {
                max_attempts: 2,
                ..Default::default()
            },
            metrics.clone(),
        ));
        Fixture {
            db,
            _dir: dir,
            service,
            metrics,
        }
    }

    pub(crate) fn mutation(key: &str, ts: i64) -> Mutation {
        let mut bins = keeper_cluster::Bins::new();
        bins.insert("value".into(), serde_json::json!(ts));
        Mutation {
            namespace: "source".into(),
            set: "users".into(),
            digest: Digest::of("users", key),
            bins,
            generation: 1,
            last_update_time: ts,
            deleted: false,
        }
    }

    async fn versions(f: &Fixture) -> Vec<record_versions::Model> {
        record_versions::Entity::find()
            .order_by_asc(record_versions::Column::Timestamp)
            .all(f.db.db.as_ref())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_ingest_filters_by_namespace_and_set() {
        let f = fixture().await;
        let mut other_set = mutation("a", 10);
        other_set.set = "orders".into();
        let accepted = f
            .service
            .ingest("dc1", vec![mutation("a", 10), other_set])
            .await
            .unwrap();
        assert_eq!(accepted, 1);
        assert!(matches!(
            f.service.ingest("dc9", vec![mutation("a", 10)]).await,
            Err(QueueError::UnknownDatacenter(_))
        ));
        assert_eq!(f.service.stats().await.unwrap().new, 1);
    }

    #[tokio::test]
    async fn test_process_commits_versions_and_batch_object() {
        let f = fixture().await;
        f.service
            .ingest("dc1", vec![mutation("a", 10), mutation("b", 11)])
            .await
            .unwrap();
        assert_eq!(f.service.process_once().await.unwrap(), 2);

        let stats = f.service.stats().await.unwrap();
        assert_eq!(stats.committed, 2);
        assert_eq!(stats.all, 2);

        let versions = versions(&f).await;
        assert_eq!(versions.len(), 2);
        let data = f.service.storage().get(&versions[0].object_key).await.unwrap();
        let (header, body) = CodecOptions::plain().decode(&data).unwrap();
        assert_eq!(header.record_count, 2);
        assert_eq!(header.namespace, "backup");
        assert_eq!(body.split(|b| *b == b'\n').filter(|l| !l.is_empty()).count(), 2);
        assert_eq!(f.metrics.queue_committed_total.get(), 2);
    }

    #[tokio::test]
    async fn test_recommit_is_idempotent_and_stale_is_dropped() {
        let f = fixture().await;
        f.service.ingest("dc1", vec![mutation("a", 20)]).await.unwrap();
        f.service.process_once().await.unwrap();

        // Same version again, then an older one
        f.service
            .ingest("dc1", vec![mutation("a", 20), mutation("a", 5)])
            .await
            .unwrap();
        f.service.process_once().await.unwrap();

        assert_eq!(versions(&f).await.len(), 1);
        assert_eq!(f.metrics.queue_committed_total.get(), 1);
        assert_eq!(f.metrics.queue_stale_total.get(), 1);
        assert_eq!(f.service.stats().await.unwrap().committed, 3);
    }

    #[tokio::test]
    async fn test_paused_queue_does_not_process() {
        let f = fixture().await;
        f.service.ingest("dc1", vec![mutation("a", 1)]).await.unwrap();
        f.service.pause();
        assert_eq!(f.service.process_once().await.unwrap(), 0);
        f.service.resume();
        assert_eq!(f.service.process_once().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_zombies_return_to_new() {
        let f = fixture().await;
        f.service.ingest("dc1", vec![mutation("a", 1)]).await.unwrap();
        let claimed = f
            .service
            .claim_for_namespace(Some("backup"), Some("users"), 10)
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(f.service.stats().await.unwrap().in_process, 1);

        assert_eq!(f.service.recover_zombies(now_millis() - 60_000).await.unwrap(), 0);
        assert_eq!(f.service.recover_zombies(now_millis()).await.unwrap(), 1);
        assert_eq!(f.service.stats().await.unwrap().new, 1);
    }

    #[tokio::test]
    async fn test_failed_commits_exhaust_attempts() {
        let f = fixture().await;
        f.service.ingest("dc1", vec![mutation("a", 1)]).await.unwrap();
        let claimed = f.service.claim(10, None, None).await.unwrap();
        assert!(f.service.commit("missing", &claimed).await.is_err());

        f.service.release_failed(&claimed).await.unwrap();
        assert_eq!(f.service.stats().await.unwrap().new, 1);

        let claimed = f.service.claim(10, None, None).await.unwrap();
        f.service.release_failed(&claimed).await.unwrap();
        assert_eq!(f.service.stats().await.unwrap().failed, 1);
    }
}
