//! Executes one backup of a routine: scans every namespace of the source
//! cluster and writes the snapshot to the routine's storage.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::{stream, StreamExt};
use keeper_cluster::{ClusterClient, ClusterConnector, ClusterError, ScanPartitions, ScanRequest};
use keeper_config::{
    parse_partition_list, BackupPolicy, BackupRoutine, CompressionMode, ConfigError, ConfigStore,
    EncryptionMode, RetentionPolicy,
};
use keeper_core::{now_millis, Throttle, TimeBounds};
use keeper_entities::backup_runs;
use keeper_storage::{open_storage, ArtifactHeader, CodecOptions, StorageBackend};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::BackupError;
use crate::layout;
use crate::model::{BackupMetadata, BackupType, NamespaceObjects, RunState};

const DEFAULT_RETRY_DELAY_MS: i64 = 1_000;

/// Everything resolved once per run and shared by the namespace tasks.
struct RunPlan {
    routine_name: String,
    routine: BackupRoutine,
    policy: BackupPolicy,
    backup_type: BackupType,
    created: i64,
    from: i64,
    client: Arc<dyn ClusterClient>,
    storage: Arc<dyn StorageBackend>,
    codec: CodecOptions,
    partitions: Vec<ScanPartitions>,
    throttle: Mutex<Throttle>,
}

pub struct BackupRunner {
    db: Arc<DatabaseConnection>,
    store: Arc<ConfigStore>,
    connector: Arc<dyn ClusterConnector>,
}

impl BackupRunner {
    pub fn new(
        db: Arc<DatabaseConnection>,
        store: Arc<ConfigStore>,
        connector: Arc<dyn ClusterConnector>,
    ) -> Self {
        Self { db, store, connector }
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    /// Creation time of the newest completed backup, of one type or of any.
    pub async fn last_backup_time(
        &self,
        routine: &str,
        backup_type: Option<BackupType>,
    ) -> Result<Option<i64>, BackupError> {
        let mut query = backup_runs::Entity::find().filter(backup_runs::Column::Routine.eq(routine));
        if let Some(backup_type) = backup_type {
            query = query.filter(backup_runs::Column::BackupType.eq(backup_type.as_str()));
        }
        let newest = query
            .order_by_desc(backup_runs::Column::Created)
            .one(self.db.as_ref())
            .await?;
        Ok(newest.map(|run| run.created))
    }

    /// Completed backups in creation order, one entry per namespace.
    pub async fn list_runs(
        &self,
        routine: Option<&str>,
        backup_type: BackupType,
        bounds: &TimeBounds,
    ) -> Result<Vec<backup_runs::Model>, BackupError> {
        let mut query = backup_runs::Entity::find()
            .filter(backup_runs::Column::BackupType.eq(backup_type.as_str()));
        if let Some(routine) = routine {
            query = query.filter(backup_runs::Column::Routine.eq(routine));
        }
        if let Some(from) = bounds.from {
            query = query.filter(backup_runs::Column::Created.gte(from));
        }
        if let Some(to) = bounds.to {
            query = query.filter(backup_runs::Column::Created.lte(to));
        }
        Ok(query
            .order_by_asc(backup_runs::Column::Created)
            .order_by_asc(backup_runs::Column::Namespace)
            .all(self.db.as_ref())
            .await?)
    }

    /// Run one backup. Returns one row per namespace written.
    pub async fn run(
        &self,
        routine_name: &str,
        backup_type: BackupType,
        state: &RunState,
    ) -> Result<Vec<backup_runs::Model>, BackupError> {
        let plan = self.plan(routine_name, backup_type).await?;

        let namespaces = if plan.routine.namespaces.is_empty() {
            plan.client.namespaces().await?
        } else {
            plan.routine.namespaces.clone()
        };

        if plan.policy.no_records != Some(true) {
            let mut total = 0;
            for namespace in &namespaces {
                match plan.client.object_count(namespace).await {
                    Ok(count) => total += count,
                    Err(e) => debug!("Could not count objects of {}: {}", namespace, e),
                }
            }
            state.total.store(total, Ordering::Relaxed);
        }

        info!(
            "Starting {} backup of routine {} ({} namespaces)",
            backup_type,
            routine_name,
            namespaces.len()
        );

        let parallel = plan.policy.parallel.filter(|p| *p > 0).unwrap_or(1) as usize;
        let results: Vec<Result<backup_runs::ActiveModel, BackupError>> = stream::iter(namespaces.iter().cloned())
            .map(|namespace| {
                let plan = &plan;
                async move { self.backup_namespace_with_retry(plan, &namespace, state).await }
            })
            .buffer_unordered(parallel)
            .collect()
            .await;

        let pending = match results.into_iter().collect::<Result<Vec<_>, _>>() {
            Ok(pending) => pending,
            Err(e) => {
                self.discard_snapshot(&plan).await;
                return Err(e);
            }
        };
        let mut runs = match self.record_runs(pending).await {
            Ok(runs) => runs,
            Err(e) => {
                self.discard_snapshot(&plan).await;
                return Err(e);
            }
        };
        runs.sort_by(|a, b| a.namespace.cmp(&b.namespace));

        if backup_type == BackupType::Full {
            if let Some(retention) = &plan.policy.retention {
                self.apply_retention(routine_name, plan.storage.as_ref(), retention)
                    .await?;
            }
        }

        info!(
            "Finished {} backup of routine {} at {}",
            backup_type, routine_name, plan.created
        );
        Ok(runs)
    }

    /// A snapshot is recorded only once every namespace is written.
    async fn record_runs(
        &self,
        pending: Vec<backup_runs::ActiveModel>,
    ) -> Result<Vec<backup_runs::Model>, BackupError> {
        let txn = self.db.begin().await?;
        let mut runs = Vec::with_capacity(pending.len());
        for run in pending {
            runs.push(run.insert(&txn).await?);
        }
        txn.commit().await?;
        Ok(runs)
    }

    async fn discard_snapshot(&self, plan: &RunPlan) {
        let dir = layout::snapshot_dir(&plan.routine_name, plan.backup_type, plan.created);
        match plan.storage.delete_prefix(&format!("{}/", dir)).await {
            Ok(removed) => warn!(
                "{} backup of routine {} failed, removed {} objects under {}",
                plan.backup_type, plan.routine_name, removed, dir
            ),
            Err(e) => warn!("Failed to clean up failed backup {}: {}", dir, e),
        }
    }

    async fn plan(&self, routine_name: &str, backup_type: BackupType) -> Result<RunPlan, BackupError> {
        let config = self.store.snapshot();
        let routine = config
            .backup_routines
            .get(routine_name)
            .cloned()
            .ok_or_else(|| BackupError::RoutineNotFound(routine_name.to_string()))?;
        let policy = config
            .backup_policies
            .get(&routine.backup_policy)
            .cloned()
            .ok_or_else(|| ConfigError::not_found("backup policy", &routine.backup_policy))?;
        let cluster = config
            .resolve_cluster(&routine.source_cluster)
            .ok_or_else(|| ConfigError::not_found("Aerospike cluster", &routine.source_cluster))?;
        let storage_config = config
            .storage
            .get(&routine.storage)
            .ok_or_else(|| ConfigError::not_found("storage", &routine.storage))?;

        let last = self.last_backup_time(routine_name, None).await?;
        let from = match backup_type {
            BackupType::Full => 0,
            BackupType::Incremental => match last {
                Some(created) => created,
                None => return Err(BackupError::NoBaseBackup(routine_name.to_string())),
            },
        };
        // Snapshot directories are keyed by creation time and must not collide.
        let created = last.map_or_else(now_millis, |last| now_millis().max(last + 1));

        let partitions = match routine.partition_list.as_deref() {
            Some(raw) => parse_partition_list(raw)?
                .into_iter()
                .map(ScanPartitions::from)
                .collect(),
            None => Vec::new(),
        };

        let client = self.connector.connect(&cluster).await?;
        let storage = open_storage(storage_config).await?;
        let codec =
            CodecOptions::from_policies(policy.compression.as_ref(), policy.encryption.as_ref())
                .await?;
        let throttle = Mutex::new(Throttle::new(policy.records_per_second, policy.bandwidth));

        Ok(RunPlan {
            routine_name: routine_name.to_string(),
            routine,
            policy,
            backup_type,
            created,
            from,
            client,
            storage,
            codec,
            partitions,
            throttle,
        })
    }

    async fn backup_namespace_with_retry(
        &self,
        plan: &RunPlan,
        namespace: &str,
        state: &RunState,
    ) -> Result<backup_runs::ActiveModel, BackupError> {
        let retry = plan.policy.retry_policy.clone().unwrap_or_default();
        let max_retries = retry.max_retries.unwrap_or(0).max(0);
        let base = retry.base_timeout.unwrap_or(DEFAULT_RETRY_DELAY_MS).max(0);
        let multiplier = retry.multiplier.filter(|m| *m >= 1.0).unwrap_or(1.0);
        let dir = layout::namespace_dir(&plan.routine_name, plan.backup_type, plan.created, namespace);

        let mut attempt = 0;
        loop {
            let result = match plan.policy.total_timeout.filter(|t| *t > 0) {
                Some(millis) => tokio::time::timeout(
                    Duration::from_millis(millis as u64),
                    self.backup_namespace(plan, namespace, &dir, state),
                )
                .await
                .unwrap_or_else(|_| {
                    Err(BackupError::Timeout {
                        namespace: namespace.to_string(),
                        millis,
                    })
                }),
                None => self.backup_namespace(plan, namespace, &dir, state).await,
            };

            match result {
                Err(e) if attempt < max_retries && e.is_retryable() => {
                    let delay = (base as f64 * multiplier.powi(attempt as i32)) as u64;
                    attempt += 1;
                    warn!(
                        "Backup of {} for routine {} failed, attempt {} of {} in {}ms: {}",
                        namespace, plan.routine_name, attempt, max_retries, delay, e
                    );
                    if let Err(e) = plan.storage.delete_prefix(&dir).await {
                        warn!("Failed to clean up {} before retrying: {}", dir, e);
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
                        _ = state.cancel.cancelled() => return Err(BackupError::Cancelled),
                    }
                }
                other => return other,
            }
        }
    }

    async fn backup_namespace(
        &self,
        plan: &RunPlan,
        namespace: &str,
        dir: &str,
        state: &RunState,
    ) -> Result<backup_runs::ActiveModel, BackupError> {
        let started = now_millis();
        let socket_timeout = plan.policy.socket_timeout.filter(|t| *t > 0);

        let records = if plan.policy.no_records == Some(true) {
            Vec::new()
        } else {
            let request = ScanRequest {
                namespace: namespace.to_string(),
                sets: plan.routine.set_list.clone().unwrap_or_default(),
                bins: plan.routine.bin_list.clone(),
                partitions: plan.partitions.clone(),
                modified_after: (plan.from > 0).then_some(plan.from),
                modified_before: None,
            };
            bounded(socket_timeout, namespace, plan.client.scan(&request)).await?
        };

        let file_limit = plan
            .policy
            .file_limit
            .filter(|l| *l > 0)
            .map_or(records.len().max(1), |l| l as usize);

        let mut byte_count: u64 = 0;
        let mut file_count: u32 = 0;
        for (index, chunk) in records.chunks(file_limit).enumerate() {
            if state.cancel.is_cancelled() {
                return Err(BackupError::Cancelled);
            }
            let mut body = Vec::new();
            for record in chunk {
                serde_json::to_writer(&mut body, record)?;
                body.push(b'\n');
            }
            plan.throttle
                .lock()
                .await
                .consume(chunk.len() as u64, body.len() as u64)
                .await;

            let header = ArtifactHeader {
                compression: CompressionMode::None,
                encryption: EncryptionMode::None,
                namespace: namespace.to_string(),
                record_count: chunk.len() as u64,
                created: plan.created,
            };
            let data = plan.codec.encode(&header, &body)?;
            byte_count += data.len() as u64;
            plan.storage.put(&layout::records_file(dir, index), data).await?;
            file_count += 1;
            state.add_done(chunk.len() as u64);
        }

        let objects = NamespaceObjects {
            udfs: if plan.policy.no_udfs == Some(true) {
                Vec::new()
            } else {
                bounded(socket_timeout, namespace, plan.client.udfs()).await?
            },
            indexes: if plan.policy.no_indexes == Some(true) {
                Vec::new()
            } else {
                bounded(socket_timeout, namespace, plan.client.indexes(namespace)).await?
            },
        };
        if !objects.udfs.is_empty() || !objects.indexes.is_empty() {
            let header = ArtifactHeader {
                compression: CompressionMode::None,
                encryption: EncryptionMode::None,
                namespace: namespace.to_string(),
                record_count: 0,
                created: plan.created,
            };
            let body = serde_json::to_vec(&objects)?;
            let data = plan.codec.encode(&header, &body)?;
            byte_count += data.len() as u64;
            plan.storage
                .put(&keeper_storage::join_key(&[dir, layout::SMD_FILE]), data)
                .await?;
        }

        let metadata = BackupMetadata {
            routine: plan.routine_name.clone(),
            namespace: namespace.to_string(),
            backup_type: plan.backup_type.as_str().to_string(),
            created: plan.created,
            from: plan.from,
            record_count: records.len() as u64,
            byte_count,
            file_count,
            udf_count: objects.udfs.len() as u32,
            secondary_index_count: objects.indexes.len() as u32,
            compression: plan.codec.compression.to_string(),
            encryption: plan.codec.encryption.to_string(),
        };
        plan.storage
            .put(
                &keeper_storage::join_key(&[dir, layout::METADATA_FILE]),
                serde_yaml::to_string(&metadata)?.into_bytes().into(),
            )
            .await?;

        let finished = now_millis();
        let run = backup_runs::ActiveModel {
            routine: Set(plan.routine_name.clone()),
            namespace: Set(namespace.to_string()),
            backup_type: Set(plan.backup_type.as_str().to_string()),
            created: Set(plan.created),
            from_time: Set(plan.from),
            finished: Set(finished),
            duration: Set(finished - started),
            record_count: Set(metadata.record_count as i64),
            byte_count: Set(metadata.byte_count as i64),
            file_count: Set(metadata.file_count as i32),
            udf_count: Set(metadata.udf_count as i32),
            secondary_index_count: Set(metadata.secondary_index_count as i32),
            storage_key: Set(dir.to_string()),
            compression: Set(metadata.compression.clone()),
            encryption: Set(metadata.encryption.clone()),
            ..Default::default()
        };

        debug!(
            "Backed up {} records of {} to {}",
            metadata.record_count, namespace, dir
        );
        Ok(run)
    }

    /// Keep the newest `retention.full` full backups, and the incrementals
    /// taken after the `retention.incremental`-th newest full backup.
    /// Incrementals older than the oldest kept full lose their base and go too.
    pub async fn apply_retention(
        &self,
        routine: &str,
        storage: &dyn StorageBackend,
        retention: &RetentionPolicy,
    ) -> Result<(), BackupError> {
        let fulls: Vec<i64> = self
            .snapshot_times(routine, BackupType::Full)
            .await?
            .into_iter()
            .rev()
            .collect();

        let mut incremental_cutoff = None;
        if let Some(keep) = retention.full.filter(|k| *k > 0) {
            for created in fulls.iter().skip(keep as usize) {
                self.remove_snapshot(routine, BackupType::Full, *created, storage)
                    .await?;
            }
            incremental_cutoff = fulls.iter().take(keep as usize).last().copied();
        }

        if let Some(keep) = retention.incremental.filter(|k| *k > 0) {
            if let Some(oldest_base) = fulls.get(keep as usize - 1) {
                incremental_cutoff = incremental_cutoff.max(Some(*oldest_base));
            }
        }

        if let Some(cutoff) = incremental_cutoff {
            let incrementals = self.snapshot_times(routine, BackupType::Incremental).await?;
            for created in incrementals.into_iter().filter(|c| *c < cutoff) {
                self.remove_snapshot(routine, BackupType::Incremental, created, storage)
                    .await?;
            }
        }
        Ok(())
    }

    async fn snapshot_times(
        &self,
        routine: &str,
        backup_type: BackupType,
    ) -> Result<BTreeSet<i64>, BackupError> {
        let runs = backup_runs::Entity::find()
            .filter(backup_runs::Column::Routine.eq(routine))
            .filter(backup_runs::Column::BackupType.eq(backup_type.as_str()))
            .all(self.db.as_ref())
            .await?;
        Ok(runs.into_iter().map(|run| run.created).collect())
    }

    async fn remove_snapshot(
        &self,
        routine: &str,
        backup_type: BackupType,
        created: i64,
        storage: &dyn StorageBackend,
    ) -> Result<(), BackupError> {
        let dir = layout::snapshot_dir(routine, backup_type, created);
        let removed = storage.delete_prefix(&format!("{}/", dir)).await?;
        backup_runs::Entity::delete_many()
            .filter(backup_runs::Column::Routine.eq(routine))
            .filter(backup_runs::Column::BackupType.eq(backup_type.as_str()))
            .filter(backup_runs::Column::Created.eq(created))
            .exec(self.db.as_ref())
            .await?;
        info!(
            "Retention removed {} backup {} ({} objects)",
            backup_type, dir, removed
        );
        Ok(())
    }
}

/// Bound one cluster call by the socket timeout.
async fn bounded<T>(
    millis: Option<i64>,
    namespace: &str,
    call: impl Future<Output = Result<T, ClusterError>>,
) -> Result<T, BackupError> {
    match millis {
        Some(millis) => tokio::time::timeout(Duration::from_millis(millis as u64), call)
            .await
            .map_err(|_| BackupError::Timeout {
                namespace: namespace.to_string(),
                millis,
            })?
            .map_err(BackupError::from),
        None => call.await.map_err(BackupError::from),
    }
}
