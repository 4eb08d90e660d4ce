//! Restore jobs. Each job is a row in `restore_jobs` driven by one tokio
//! task; counters are flushed to the row while the job runs and once more
//! when it reaches a terminal state.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use keeper_backup::{BackupRunner, BackupType};
use keeper_cluster::ClusterConnector;
use keeper_config::{Cluster, ConfigError, ConfigStore};
use keeper_core::{from_epoch_millis, TimeBounds};
use keeper_entities::restore_jobs;
use keeper_metrics::KeeperMetrics;
use keeper_storage::{open_storage, CodecOptions, StorageBackend};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::engine::{self, discover_snapshot, RestoreRun};
use crate::error::RestoreError;
use crate::model::{
    RestoreJobState, RestoreJobStatus, RestoreStats, RestoreTask, RestoreTimestampRequest,
};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Artifacts a restore reads and how to decode them.
struct RestoreSource {
    storage: Arc<dyn StorageBackend>,
    chains: Vec<Vec<String>>,
    codec: CodecOptions,
}

struct RunningRestore {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// Keeps `restore_in_progress` accurate however a job ends.
struct InProgress(Arc<KeeperMetrics>);

impl InProgress {
    fn new(metrics: Arc<KeeperMetrics>) -> Self {
        metrics.restore_in_progress.inc();
        Self(metrics)
    }
}

impl Drop for InProgress {
    fn drop(&mut self) {
        self.0.restore_in_progress.dec();
    }
}

pub struct RestoreService {
    db: Arc<DatabaseConnection>,
    runner: Arc<BackupRunner>,
    connector: Arc<dyn ClusterConnector>,
    metrics: Arc<KeeperMetrics>,
    running: Arc<Mutex<HashMap<i32, RunningRestore>>>,
    shutdown: CancellationToken,
}

impl RestoreService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        runner: Arc<BackupRunner>,
        connector: Arc<dyn ClusterConnector>,
        metrics: Arc<KeeperMetrics>,
    ) -> Self {
        Self {
            db,
            runner,
            connector,
            metrics,
            running: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    fn store(&self) -> &Arc<ConfigStore> {
        self.runner.store()
    }

    /// Validate a request, persist its job and start it.
    pub async fn submit(self: &Arc<Self>, task: RestoreTask) -> Result<i32, RestoreError> {
        match &task {
            RestoreTask::Full(request) | RestoreTask::Incremental(request) => request.validate()?,
            RestoreTask::Timestamp(request) => {
                request.validate()?;
                self.store().routine(&request.routine)?;
            }
        }
        let destination = self.resolve_destination(&task)?;

        let model = restore_jobs::ActiveModel {
            kind: Set(task.kind().to_string()),
            status: Set(RestoreJobState::Running.to_string()),
            request: Set(serde_json::to_value(&task)?),
            read_records: Set(0),
            inserted_records: Set(0),
            existed_records: Set(0),
            fresher_records: Set(0),
            skipped_records: Set(0),
            expired_records: Set(0),
            ignored_records: Set(0),
            total_bytes: Set(0),
            index_count: Set(0),
            udf_count: Set(0),
            error: Set(None),
            created_at: Set(Utc::now()),
            finished_at: Set(None),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await?;

        info!("Started {} restore job {}", task.kind(), model.id);
        self.spawn(model.id, task, destination);
        Ok(model.id)
    }

    fn resolve_destination(&self, task: &RestoreTask) -> Result<Cluster, RestoreError> {
        match task.destination_ref() {
            Ok(cluster) => Ok(cluster.clone()),
            Err(name) => self
                .store()
                .snapshot()
                .resolve_cluster(name)
                .ok_or_else(|| ConfigError::not_found("Aerospike cluster", name).into()),
        }
    }

    fn spawn(self: &Arc<Self>, id: i32, task: RestoreTask, destination: Cluster) {
        let token = self.shutdown.child_token();
        self.running_lock().insert(
            id,
            RunningRestore {
                token: token.clone(),
                handle: None,
            },
        );

        let service = self.clone();
        let handle = tokio::spawn(async move {
            service.execute(id, task, destination, token).await;
        });
        if let Some(job) = self.running_lock().get_mut(&id) {
            job.handle = Some(handle);
        }
    }

    async fn execute(&self, id: i32, task: RestoreTask, destination: Cluster, token: CancellationToken) {
        let _in_progress = InProgress::new(self.metrics.clone());
        let stats = Arc::new(Mutex::new(RestoreStats::default()));

        let run = self.restore(&task, &destination, token.clone(), stats.clone());
        tokio::pin!(run);
        let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
        let result = loop {
            tokio::select! {
                result = &mut run => break result,
                _ = ticker.tick() => {
                    let snapshot = *stats.lock().unwrap_or_else(PoisonError::into_inner);
                    if let Err(e) = self.save_stats(id, &snapshot).await {
                        warn!("Failed to record progress of restore job {}: {}", id, e);
                    }
                }
            }
        };

        let (state, message) = match result {
            _ if self.shutdown.is_cancelled() => (
                RestoreJobState::Failed,
                Some("interrupted by shutdown".to_string()),
            ),
            _ if token.is_cancelled() => (RestoreJobState::Cancelled, None),
            Ok(()) => (RestoreJobState::Done, None),
            Err(RestoreError::Cancelled) => (RestoreJobState::Cancelled, None),
            Err(e) => (RestoreJobState::Failed, Some(e.to_string())),
        };
        let stats = *stats.lock().unwrap_or_else(PoisonError::into_inner);
        match &message {
            Some(message) => warn!("Restore job {} failed: {}", id, message),
            None => engine::log_summary(id, &stats),
        }

        if let Err(e) = self.save_stats(id, &stats).await {
            error!("Failed to record counters of restore job {}: {}", id, e);
        }
        if let Err(e) = self.transition(id, state, message).await {
            error!("Failed to record completion of restore job {}: {}", id, e);
        }
        self.running_lock().remove(&id);
    }

    async fn restore(
        &self,
        task: &RestoreTask,
        destination: &Cluster,
        token: CancellationToken,
        stats: Arc<Mutex<RestoreStats>>,
    ) -> Result<(), RestoreError> {
        let policy = task.policy().clone();
        let total_timeout = policy.total_timeout.filter(|t| *t > 0);
        let work = async move {
            let source = self.source(task).await?;
            let client = self.connector.connect(destination).await?;
            RestoreRun::new(client, policy, source.codec, token, stats)
                .restore_chains(source.storage.as_ref(), source.chains)
                .await
        };
        match total_timeout {
            Some(millis) => tokio::time::timeout(Duration::from_millis(millis as u64), work)
                .await
                .map_err(|_| RestoreError::Timeout(millis))?,
            None => work.await,
        }
    }

    async fn source(&self, task: &RestoreTask) -> Result<RestoreSource, RestoreError> {
        match task {
            RestoreTask::Full(request) | RestoreTask::Incremental(request) => {
                let storage = match &request.source {
                    Some(source) => open_storage(source).await?,
                    None => return Err(RestoreError::NoBackup("no source storage".to_string())),
                };
                let path = request.backup_data_path.as_deref().unwrap_or_default();
                let dirs = discover_snapshot(storage.as_ref(), path).await?;
                let codec = CodecOptions::from_policies(
                    request.policy.compression.as_ref(),
                    request.policy.encryption.as_ref(),
                )
                .await?;
                Ok(RestoreSource {
                    storage,
                    chains: dirs.into_iter().map(|dir| vec![dir]).collect(),
                    codec,
                })
            }
            RestoreTask::Timestamp(request) => self.timestamp_source(request).await,
        }
    }

    /// For every namespace, the last full backup not after `time` followed
    /// by each later incremental not after `time`.
    async fn timestamp_source(
        &self,
        request: &RestoreTimestampRequest,
    ) -> Result<RestoreSource, RestoreError> {
        let config = self.store().snapshot();
        let routine = config
            .backup_routines
            .get(&request.routine)
            .ok_or_else(|| ConfigError::not_found("routine", &request.routine))?;
        let storage = config
            .storage
            .get(&routine.storage)
            .ok_or_else(|| ConfigError::not_found("storage", &routine.storage))?;
        let backup_policy = config.backup_policies.get(&routine.backup_policy);

        let time = request.time.unwrap_or_default();
        let bounds = TimeBounds {
            from: None,
            to: Some(time),
        };
        let fulls = self
            .runner
            .list_runs(Some(&request.routine), BackupType::Full, &bounds)
            .await?;
        let incrementals = self
            .runner
            .list_runs(Some(&request.routine), BackupType::Incremental, &bounds)
            .await?;

        let mut chains: BTreeMap<String, (i64, Vec<String>)> = BTreeMap::new();
        for full in fulls {
            chains.insert(full.namespace, (full.created, vec![full.storage_key]));
        }
        if chains.is_empty() {
            return Err(RestoreError::NoBackup(format!(
                "no full backup of routine {} before {}",
                request.routine, time
            )));
        }
        for incremental in incrementals {
            if let Some((base, dirs)) = chains.get_mut(&incremental.namespace) {
                if incremental.created > *base {
                    dirs.push(incremental.storage_key);
                }
            }
        }

        let codec = CodecOptions::from_policies(
            request
                .policy
                .compression
                .as_ref()
                .or(backup_policy.and_then(|p| p.compression.as_ref())),
            request
                .policy
                .encryption
                .as_ref()
                .or(backup_policy.and_then(|p| p.encryption.as_ref())),
        )
        .await?;

        Ok(RestoreSource {
            storage: open_storage(storage).await?,
            chains: chains.into_values().map(|(_, dirs)| dirs).collect(),
            codec,
        })
    }

    pub async fn status(&self, id: i32) -> Result<RestoreJobStatus, RestoreError> {
        Ok(self.find(id).await?.into())
    }

    /// Jobs created within `bounds`, optionally in one state.
    pub async fn list(
        &self,
        bounds: &TimeBounds,
        status: Option<RestoreJobState>,
    ) -> Result<BTreeMap<i32, RestoreJobStatus>, RestoreError> {
        let mut query = restore_jobs::Entity::find();
        if let Some(from) = bounds.from {
            query = query.filter(restore_jobs::Column::CreatedAt.gte(from_epoch_millis(from)));
        }
        if let Some(to) = bounds.to {
            query = query.filter(restore_jobs::Column::CreatedAt.lte(from_epoch_millis(to)));
        }
        if let Some(status) = status {
            query = query.filter(restore_jobs::Column::Status.eq(status.as_str()));
        }
        Ok(query
            .order_by_asc(restore_jobs::Column::Id)
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(|model| (model.id, RestoreJobStatus::from(model)))
            .collect())
    }

    /// Stop a running job. Cancelling a cancelled job succeeds.
    pub async fn cancel(&self, id: i32) -> Result<RestoreJobStatus, RestoreError> {
        let model = self.find(id).await?;
        let state = model.status.parse().unwrap_or(RestoreJobState::Failed);
        match state {
            RestoreJobState::Cancelled => return Ok(model.into()),
            RestoreJobState::Done | RestoreJobState::Failed => {
                return Err(RestoreError::AlreadyFinished {
                    id,
                    status: state.to_string(),
                })
            }
            RestoreJobState::Running => {}
        }

        if let Some(job) = self.running_lock().get(&id) {
            job.token.cancel();
        }
        self.transition(id, RestoreJobState::Cancelled, None).await?;
        info!("Cancelled restore job {}", id);
        self.status(id).await
    }

    /// Fail jobs left `Running` by a previous process.
    pub async fn recover_interrupted(&self) -> Result<u64, RestoreError> {
        let result = restore_jobs::Entity::update_many()
            .col_expr(
                restore_jobs::Column::Status,
                sea_orm::sea_query::Expr::value(RestoreJobState::Failed.to_string()),
            )
            .col_expr(
                restore_jobs::Column::Error,
                sea_orm::sea_query::Expr::value("interrupted by a restart"),
            )
            .col_expr(
                restore_jobs::Column::FinishedAt,
                sea_orm::sea_query::Expr::value(Utc::now()),
            )
            .filter(restore_jobs::Column::Status.eq(RestoreJobState::Running.to_string()))
            .exec(self.db.as_ref())
            .await?;
        if result.rows_affected > 0 {
            warn!("Failed {} restore jobs interrupted by a restart", result.rows_affected);
        }
        Ok(result.rows_affected)
    }

    /// Wait for the task of a job to finish.
    pub async fn join(&self, id: i32) {
        let handle = self
            .running_lock()
            .get_mut(&id)
            .and_then(|job| job.handle.take());
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn find(&self, id: i32) -> Result<restore_jobs::Model, RestoreError> {
        restore_jobs::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| RestoreError::NotFound(format!("restore job {} not found", id)))
    }

    /// Move a running job to `state`. Terminal states are never left.
    async fn transition(
        &self,
        id: i32,
        state: RestoreJobState,
        message: Option<String>,
    ) -> Result<(), RestoreError> {
        restore_jobs::Entity::update_many()
            .col_expr(
                restore_jobs::Column::Status,
                sea_orm::sea_query::Expr::value(state.to_string()),
            )
            .col_expr(restore_jobs::Column::Error, sea_orm::sea_query::Expr::value(message))
            .col_expr(
                restore_jobs::Column::FinishedAt,
                sea_orm::sea_query::Expr::value(Some(Utc::now())),
            )
            .filter(restore_jobs::Column::Id.eq(id))
            .filter(restore_jobs::Column::Status.eq(RestoreJobState::Running.to_string()))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    async fn save_stats(&self, id: i32, stats: &RestoreStats) -> Result<(), RestoreError> {
        restore_jobs::ActiveModel {
            id: Set(id),
            read_records: Set(stats.read_records as i64),
            inserted_records: Set(stats.inserted_records as i64),
            existed_records: Set(stats.existed_records as i64),
            fresher_records: Set(stats.fresher_records as i64),
            skipped_records: Set(stats.skipped_records as i64),
            expired_records: Set(stats.expired_records as i64),
            ignored_records: Set(stats.ignored_records as i64),
            total_bytes: Set(stats.total_bytes as i64),
            index_count: Set(stats.index_count as i32),
            udf_count: Set(stats.udf_count as i32),
            ..Default::default()
        }
        .update(self.db.as_ref())
        .await?;
        Ok(())
    }

    fn running_lock(&self) -> std::sync::MutexGuard<'_, HashMap<i32, RunningRestore>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::{RestorePolicy, RestoreRequest};
    use keeper_backup::RunState;
    use keeper_cluster::{ClusterClient, Digest, MemoryCluster, MemoryConnector, Record, SecondaryIndex, Udf};
    use keeper_config::{BackupPolicy, BackupRoutine, SeedNode, Storage};
    use keeper_database::test_utils::TestDatabase;
    use serde_json::json;

    pub(crate) struct Fixture {
        pub db: TestDatabase,
        pub dir: tempfile::TempDir,
        pub source: MemoryCluster,
        pub target: MemoryCluster,
        pub runner: Arc<BackupRunner>,
        pub metrics: Arc<KeeperMetrics>,
        pub service: Arc<RestoreService>,
    }

    impl Fixture {
        pub fn storage(&self) -> Storage {
            Storage::local(self.dir.path().to_string_lossy().to_string())
        }

        pub async fn backup(&self, backup_type: BackupType) -> i64 {
            let runs = self
                .runner
                .run("daily", backup_type, &RunState::new("daily", backup_type))
                .await
                .unwrap();
            runs[0].created
        }

        pub fn request(&self, path: &str) -> RestoreRequest {
            RestoreRequest {
                backup_data_path: Some(path.to_string()),
                source: Some(self.storage()),
                destination_name: Some("target".into()),
                ..Default::default()
            }
        }

        pub async fn finish(&self, id: i32) -> RestoreJobStatus {
            self.service.join(id).await;
            self.service.status(id).await.unwrap()
        }
    }

    fn cluster_at(host: &str) -> Cluster {
        Cluster {
            seed_nodes: vec![SeedNode {
                host_name: host.into(),
                port: 3000,
                tls_name: None,
            }],
            ..Default::default()
        }
    }

    pub(crate) fn record(key: &str, updated: i64) -> Record {
        let mut bins = keeper_cluster::Bins::new();
        bins.insert("name".into(), json!(key));
        bins.insert("age".into(), json!(updated));
        Record {
            namespace: "test".into(),
            set: "users".into(),
            digest: Digest::of("users", key),
            bins,
            generation: 1,
            last_update_time: updated,
            void_time: 0,
        }
    }

    /// Routine `daily` backs up namespace `test` of `src:3000`; the
    /// configured cluster `target` is an empty `dst:3000`.
    pub(crate) async fn fixture() -> Fixture {
        let db = TestDatabase::new().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ConfigStore::load(db.connection(), None).await.unwrap());
        let path = dir.path().to_string_lossy().to_string();
        store
            .mutate(move |config| {
                config.aerospike_clusters.insert("c".into(), cluster_at("src"));
                config.aerospike_clusters.insert("target".into(), cluster_at("dst"));
                config.storage.insert("s".into(), Storage::local(path.clone()));
                config.backup_policies.insert("p".into(), BackupPolicy::default());
                config.backup_routines.insert(
                    "daily".into(),
                    BackupRoutine {
                        backup_policy: "p".into(),
                        source_cluster: "c".into(),
                        storage: "s".into(),
                        interval_cron: "0 0 * * *".into(),
                        namespaces: vec!["test".into()],
                        ..Default::default()
                    },
                );
                Ok(())
            })
            .await
            .unwrap();

        let source = MemoryCluster::new(&["test"]);
        for (i, key) in ["a", "b", "c"].iter().enumerate() {
            source.insert(record(key, 1_000 + i as i64));
        }
        source
            .put_udf(&Udf {
                name: "sum.lua".into(),
                language: "LUA".into(),
                content: "ZnVuY3Rpb24=".into(),
            })
            .await
            .unwrap();
        source
            .create_index(&SecondaryIndex {
                name: "age_idx".into(),
                namespace: "test".into(),
                set: "users".into(),
                bin: "age".into(),
                index_type: "NUMERIC".into(),
            })
            .await
            .unwrap();
        let target = MemoryCluster::new(&["test"]);

        let connector = Arc::new(MemoryConnector::new());
        connector.register("src:3000", source.clone());
        connector.register("dst:3000", target.clone());
        let runner = Arc::new(BackupRunner::new(db.connection(), store, connector.clone()));
        let metrics = Arc::new(KeeperMetrics::new().unwrap());
        let service = Arc::new(RestoreService::new(
            db.connection(),
            runner.clone(),
            connector,
            metrics.clone(),
        ));
        Fixture {
            db,
            dir,
            source,
            target,
            runner,
            metrics,
            service,
        }
    }

    #[tokio::test]
    async fn test_full_restore_copies_snapshot() {
        let f = fixture().await;
        let created = f.backup(BackupType::Full).await;

        let id = f
            .service
            .submit(RestoreTask::Full(f.request(&format!("daily/backup/{}", created))))
            .await
            .unwrap();
        let status = f.finish(id).await;

        assert_eq!(status.status, RestoreJobState::Done, "{:?}", status.error);
        assert_eq!(status.kind, "full");
        assert_eq!(status.stats.read_records, 3);
        assert_eq!(status.stats.inserted_records, 3);
        assert_eq!(status.stats.udf_count, 1);
        assert_eq!(status.stats.index_count, 1);
        assert!(status.finish_time.is_some());
        assert!(f.target.get("test", &Digest::of("users", "b")).is_some());
        assert_eq!(f.target.udfs().await.unwrap().len(), 1);
        assert_eq!(f.metrics.restore_in_progress.get(), 0);
    }

    #[tokio::test]
    async fn test_ambiguous_path_fails_job() {
        let f = fixture().await;
        f.backup(BackupType::Full).await;
        f.backup(BackupType::Full).await;

        let id = f
            .service
            .submit(RestoreTask::Full(f.request("daily/backup")))
            .await
            .unwrap();
        let status = f.finish(id).await;
        assert_eq!(status.status, RestoreJobState::Failed);
        assert!(status
            .error
            .unwrap()
            .starts_with("Failed to restore: ambiguous backup path daily/backup"));
    }

    #[tokio::test]
    async fn test_submit_rejects_unknown_destination() {
        let f = fixture().await;
        let mut request = f.request("daily/backup");
        request.destination_name = Some("nowhere".into());
        let err = f.service.submit(RestoreTask::Full(request)).await.unwrap_err();
        assert_eq!(err.to_string(), "Aerospike cluster \"nowhere\" not found");

        let mut request = f.request("daily/backup");
        request.destination_name = None;
        let err = f.service.submit(RestoreTask::Full(request)).await.unwrap_err();
        assert!(matches!(err, RestoreError::Validation(_)));
        assert!(f.service.list(&TimeBounds::default(), None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_timestamp_restore_applies_incrementals_in_order() {
        let f = fixture().await;
        let full = f.backup(BackupType::Full).await;

        let mut changed = record("a", full + 10);
        changed.generation = 2;
        changed.bins.insert("age".into(), json!(99));
        f.source.insert(changed);
        f.source.insert(record("d", full + 11));
        let incremental = f.backup(BackupType::Incremental).await;

        f.source.insert(record("late", incremental + 10));
        let after = f.backup(BackupType::Incremental).await;
        assert!(after > incremental);

        let id = f
            .service
            .submit(RestoreTask::Timestamp(RestoreTimestampRequest {
                routine: "daily".into(),
                time: Some(incremental),
                destination_name: Some("target".into()),
                ..Default::default()
            }))
            .await
            .unwrap();
        let status = f.finish(id).await;
        assert_eq!(status.status, RestoreJobState::Done, "{:?}", status.error);
        assert_eq!(status.kind, "timestamp");

        let restored = f.target.get("test", &Digest::of("users", "a")).unwrap();
        assert_eq!(restored.bins["age"], json!(99));
        assert!(f.target.get("test", &Digest::of("users", "d")).is_some());
        assert!(f.target.get("test", &Digest::of("users", "late")).is_none());
    }

    #[tokio::test]
    async fn test_timestamp_before_first_backup_fails() {
        let f = fixture().await;
        f.backup(BackupType::Full).await;
        let id = f
            .service
            .submit(RestoreTask::Timestamp(RestoreTimestampRequest {
                routine: "daily".into(),
                time: Some(1),
                destination_name: Some("target".into()),
                ..Default::default()
            }))
            .await
            .unwrap();
        let status = f.finish(id).await;
        assert_eq!(status.status, RestoreJobState::Failed);
        assert!(status.error.unwrap().starts_with("Failed to restore: no full backup"));
    }

    #[tokio::test]
    async fn test_cancel_and_list_by_status() {
        let f = fixture().await;
        let created = f.backup(BackupType::Full).await;

        let mut request = f.request(&format!("daily/backup/{}", created));
        request.policy = RestorePolicy {
            tps: Some(1),
            batch_size: Some(1),
            ..Default::default()
        };
        let id = f.service.submit(RestoreTask::Full(request)).await.unwrap();
        let cancelled = f.service.cancel(id).await.unwrap();
        assert_eq!(cancelled.status, RestoreJobState::Cancelled);
        let status = f.finish(id).await;
        assert_eq!(status.status, RestoreJobState::Cancelled);
        assert_eq!(
            f.service.cancel(id).await.unwrap().status,
            RestoreJobState::Cancelled
        );

        let done = f
            .service
            .submit(RestoreTask::Full(f.request(&format!("daily/backup/{}", created))))
            .await
            .unwrap();
        f.finish(done).await;
        assert!(matches!(
            f.service.cancel(done).await.unwrap_err(),
            RestoreError::AlreadyFinished { .. }
        ));

        let all = f.service.list(&TimeBounds::default(), None).await.unwrap();
        assert_eq!(all.len(), 2);
        let only_done = f
            .service
            .list(&TimeBounds::default(), Some(RestoreJobState::Done))
            .await
            .unwrap();
        assert_eq!(only_done.keys().copied().collect::<Vec<_>>(), vec![done]);
        let future = TimeBounds {
            from: Some(keeper_core::now_millis() + 60_000),
            to: None,
        };
        assert!(f.service.list(&future, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restart_fails_running_jobs() {
        let f = fixture().await;
        restore_jobs::ActiveModel {
            kind: Set("full".into()),
            status: Set(RestoreJobState::Running.to_string()),
            request: Set(json!({})),
            read_records: Set(0),
            inserted_records: Set(0),
            existed_records: Set(0),
            fresher_records: Set(0),
            skipped_records: Set(0),
            expired_records: Set(0),
            ignored_records: Set(0),
            total_bytes: Set(0),
            index_count: Set(0),
            udf_count: Set(0),
            error: Set(None),
            created_at: Set(Utc::now()),
            finished_at: Set(None),
            ..Default::default()
        }
        .insert(f.db.connection().as_ref())
        .await
        .unwrap();

        assert_eq!(f.service.recover_interrupted().await.unwrap(), 1);
        let jobs = f.service.list(&TimeBounds::default(), None).await.unwrap();
        let job = jobs.values().next().unwrap();
        assert_eq!(job.status, RestoreJobState::Failed);
        assert_eq!(job.error.as_deref(), Some("interrupted by a restart"));
    }
}
