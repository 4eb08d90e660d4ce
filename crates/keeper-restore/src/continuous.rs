//! Restores from the version index of a continuous backup: the newest
//! version of every matching digest within the time window is written to
//! the target namespace, deletes included.

use std::sync::Arc;

use async_trait::async_trait;
use keeper_cluster::{ClusterClient, ClusterConnector, ExistsAction, Record, WritePolicy};
use keeper_config::{ConfigError, ConfigStore, ContinuousBackup};
use keeper_jobs::{JobContext, JobError, JobExecutor, JobManager};
use keeper_metadata::{normalize_digests, MetadataIndex, VersionFilter};
use tracing::{debug, info};

use crate::error::RestoreError;
use crate::model::{ContinuousRestoreParams, ContinuousRestoreRequest, ContinuousScope};

pub const RESTORE_SET_JOB: &str = "restore-set";
pub const RESTORE_NAMESPACE_JOB: &str = "restore-namespace";
const RESTORE_CHUNK: usize = 500;

const OVERWRITE: WritePolicy = WritePolicy {
    exists: ExistsAction::Replace,
    generation_check: false,
    extra_ttl: 0,
};

impl ContinuousRestoreParams {
    fn filter(&self) -> Result<VersionFilter, RestoreError> {
        let bounds = self.request.validate(self.scope)?;
        let digests = match self.scope {
            ContinuousScope::Records => Some(normalize_digests(
                self.request.src_digests.as_deref().unwrap_or_default(),
            )?),
            _ => None,
        };
        let set = match self.scope {
            ContinuousScope::Namespace => None,
            _ => self.request.set.clone().filter(|s| !s.is_empty()),
        };
        Ok(VersionFilter {
            namespace: Some(self.request.src_ns.clone()),
            set,
            digests,
            bounds,
        })
    }
}

pub struct ContinuousRestorer {
    store: Arc<ConfigStore>,
    connector: Arc<dyn ClusterConnector>,
    index: Arc<MetadataIndex>,
    jobs: Arc<JobManager>,
}

impl ContinuousRestorer {
    pub fn new(
        store: Arc<ConfigStore>,
        connector: Arc<dyn ClusterConnector>,
        index: Arc<MetadataIndex>,
        jobs: Arc<JobManager>,
    ) -> Self {
        Self {
            store,
            connector,
            index,
            jobs,
        }
    }

    /// Validate the request against the configuration and the target
    /// cluster.
    async fn prepare(
        &self,
        request: ContinuousRestoreRequest,
        scope: ContinuousScope,
    ) -> Result<ContinuousRestoreParams, RestoreError> {
        request.validate(scope)?;
        let config = self.store.snapshot();
        let backup = config
            .continuous_backups
            .iter()
            .find(|(_, backup)| {
                backup.src_cluster_name == request.src_cluster_name && backup.src_ns == request.src_ns
            })
            .map(|(name, backup): (&String, &ContinuousBackup)| {
                if backup.name.is_empty() {
                    name.clone()
                } else {
                    backup.name.clone()
                }
            })
            .ok_or_else(|| {
                RestoreError::NotFound(format!(
                    "no continuous backup of namespace \"{}\" on cluster \"{}\"",
                    request.src_ns, request.src_cluster_name
                ))
            })?;
        let destination = config
            .resolve_cluster(&request.trg_cluster_name)
            .ok_or_else(|| ConfigError::not_found("Aerospike cluster", &request.trg_cluster_name))?;

        let client = self.connector.connect(&destination).await?;
        if !client.namespaces().await?.contains(&request.trg_ns) {
            return Err(RestoreError::NotFound(format!(
                "namespace \"{}\" not found on cluster \"{}\"",
                request.trg_ns, request.trg_cluster_name
            )));
        }

        let params = ContinuousRestoreParams {
            request,
            scope,
            backup,
            destination,
        };
        params.filter()?;
        Ok(params)
    }

    /// Start a set or namespace restore as a background job.
    pub async fn submit(
        &self,
        request: ContinuousRestoreRequest,
        scope: ContinuousScope,
    ) -> Result<String, RestoreError> {
        let kind = match scope {
            ContinuousScope::Set => RESTORE_SET_JOB,
            ContinuousScope::Namespace => RESTORE_NAMESPACE_JOB,
            ContinuousScope::Records => {
                return Err(RestoreError::Validation(keeper_core::ValidationError::new(
                    "records are restored synchronously",
                )))
            }
        };
        let params = self.prepare(request, scope).await?;
        Ok(self.jobs.submit(kind, serde_json::to_value(&params)?).await?)
    }

    /// Restore the listed digests now. Returns the number of records
    /// written.
    pub async fn restore_records(&self, request: ContinuousRestoreRequest) -> Result<usize, RestoreError> {
        let params = self.prepare(request, ContinuousScope::Records).await?;
        let versions = self
            .index
            .latest_versions(&params.backup, &params.filter()?)
            .await?;
        let client = self.connector.connect(&params.destination).await?;

        let mut written = 0;
        for chunk in versions.chunks(RESTORE_CHUNK) {
            let records = self.index.load_records(chunk).await?;
            written += write_versions(client.as_ref(), &params.request.trg_ns, records).await?;
        }
        info!(
            "Restored {} records of continuous backup {} into {}",
            written, params.backup, params.request.trg_ns
        );
        Ok(written)
    }
}

async fn write_versions(
    client: &dyn ClusterClient,
    namespace: &str,
    records: Vec<Record>,
) -> Result<usize, RestoreError> {
    let count = records.len();
    for mut record in records {
        record.namespace = namespace.to_string();
        client.put(&record, &OVERWRITE).await?;
    }
    Ok(count)
}

/// Background job behind set and namespace restores. The cursor is the
/// number of versions already written.
pub struct ContinuousRestoreExecutor {
    kind: &'static str,
    connector: Arc<dyn ClusterConnector>,
    index: Arc<MetadataIndex>,
}

impl ContinuousRestoreExecutor {
    pub fn new(
        scope: ContinuousScope,
        connector: Arc<dyn ClusterConnector>,
        index: Arc<MetadataIndex>,
    ) -> Self {
        let kind = match scope {
            ContinuousScope::Set => RESTORE_SET_JOB,
            _ => RESTORE_NAMESPACE_JOB,
        };
        Self {
            kind,
            connector,
            index,
        }
    }

    async fn restore(&self, ctx: &mut JobContext) -> Result<(), RestoreError> {
        let params: ContinuousRestoreParams = ctx.params()?;
        let versions = self
            .index
            .latest_versions(&params.backup, &params.filter()?)
            .await?;
        let mut offset: usize = ctx.cursor()?.unwrap_or(0);
        if ctx.cursor.is_none() {
            ctx.set_total(versions.len() as i64).await?;
        }
        let client = self.connector.connect(&params.destination).await?;

        for chunk in versions.get(offset..).unwrap_or_default().chunks(RESTORE_CHUNK) {
            ctx.check_cancelled()?;
            let records = self.index.load_records(chunk).await?;
            offset += write_versions(client.as_ref(), &params.request.trg_ns, records).await?;
            ctx.checkpoint(&offset, offset as i64).await?;
            debug!("Continuous restore job {} wrote {} versions", ctx.id, offset);
        }
        Ok(())
    }
}

#[async_trait]
impl JobExecutor for ContinuousRestoreExecutor {
    fn kind(&self) -> &'static str {
        self.kind
    }

    async fn run(&self, ctx: &mut JobContext) -> Result<(), JobError> {
        Ok(self.restore(ctx).await?)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use keeper_cluster::{Digest, MemoryCluster, MemoryConnector};
    use keeper_config::{ClusterConnection, ContinuousPolicy, QueueSettings, SeedNode};
    use keeper_database::test_utils::TestDatabase;
    use keeper_jobs::JobStatus;
    use keeper_metrics::KeeperMetrics;
    use keeper_queue::{Mutation, QueueService};
    use keeper_storage::{LocalBackend, StorageBackend};
    use serde_json::json;

    pub(crate) struct Fixture {
        pub _db: TestDatabase,
        pub _dir: tempfile::TempDir,
        pub target: MemoryCluster,
        pub jobs: Arc<JobManager>,
        pub restorer: Arc<ContinuousRestorer>,
    }

    fn mutation(set: &str, key: &str, ts: i64, deleted: bool) -> Mutation {
        let mut bins = keeper_cluster::Bins::new();
        if !deleted {
            bins.insert("value".into(), json!(ts));
        }
        Mutation {
            namespace: "source".into(),
            set: set.into(),
            digest: Digest::of(set, key),
            bins,
            generation: 1,
            last_update_time: ts,
            deleted,
        }
    }

    /// Continuous backup `b1` of `src`/`source` holding `users` keys `a`
    /// (10, 20, 30) and `b` (15, deleted at 25), and `orders` key `o` (12).
    /// Cluster `dst` at `dst:3000` has namespaces `target` and `source`.
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
                config.aerospike_clusters.insert(
                    "dst".into(),
                    keeper_config::Cluster {
                        seed_nodes: vec![SeedNode {
                            host_name: "dst".into(),
                            port: 3000,
                            tls_name: None,
                        }],
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
                        sets: vec![],
                        enabled: true,
                    },
                );
                Ok(())
            })
            .await
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn StorageBackend> = Arc::new(LocalBackend::new(dir.path()));
        let queue = Arc::new(QueueService::new(
            db.connection(),
            store.clone(),
            storage.clone(),
            QueueSettings::default(),
            Arc::new(KeeperMetrics::new().unwrap()),
        ));
        queue
            .ingest(
                "dc1",
                vec![
                    mutation("users", "a", 10, false),
                    mutation("orders", "o", 12, false),
                    mutation("users", "b", 15, false),
                ],
            )
            .await
            .unwrap();
        queue.process_once().await.unwrap();
        queue
            .ingest(
                "dc1",
                vec![
                    mutation("users", "a", 20, false),
                    mutation("users", "b", 25, true),
                    mutation("users", "a", 30, false),
                ],
            )
            .await
            .unwrap();
        queue.process_once().await.unwrap();

        let target = MemoryCluster::new(&["target", "source"]);
        let connector = Arc::new(MemoryConnector::new());
        connector.register("dst:3000", target.clone());
        let index = Arc::new(MetadataIndex::new(db.connection(), storage));
        let jobs = Arc::new(JobManager::new(db.connection()));
        for scope in [ContinuousScope::Set, ContinuousScope::Namespace] {
            jobs.register_executor(Arc::new(ContinuousRestoreExecutor::new(
                scope,
                connector.clone(),
                index.clone(),
            )));
        }
        let restorer = Arc::new(ContinuousRestorer::new(store, connector, index, jobs.clone()));
        Fixture {
            _db: db,
            _dir: dir,
            target,
            jobs,
            restorer,
        }
    }

    pub(crate) fn request() -> ContinuousRestoreRequest {
        ContinuousRestoreRequest {
            src_cluster_name: "src".into(),
            trg_cluster_name: "dst".into(),
            src_ns: "source".into(),
            trg_ns: "target".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_namespace_job_writes_newest_versions() {
        let f = fixture().await;
        let id = f
            .restorer
            .submit(request(), ContinuousScope::Namespace)
            .await
            .unwrap();
        f.jobs.join(&id).await;

        let info = f.jobs.get(&id).await.unwrap();
        assert_eq!(info.status, JobStatus::Done, "{:?}", info.error);
        assert_eq!(info.kind, RESTORE_NAMESPACE_JOB);
        assert_eq!(info.processed, 3);

        let a = f.target.get("target", &Digest::of("users", "a")).unwrap();
        assert_eq!(a.bins["value"], json!(30));
        assert_eq!(a.namespace, "target");
        assert!(f.target.get("target", &Digest::of("orders", "o")).is_some());
        assert!(f.target.get("target", &Digest::of("users", "b")).is_none());
    }

    #[tokio::test]
    async fn test_set_job_honours_time_window() {
        let f = fixture().await;
        let id = f
            .restorer
            .submit(
                ContinuousRestoreRequest {
                    set: Some("users".into()),
                    to_time: Some(20),
                    ..request()
                },
                ContinuousScope::Set,
            )
            .await
            .unwrap();
        f.jobs.join(&id).await;
        assert_eq!(f.jobs.get(&id).await.unwrap().status, JobStatus::Done);

        let a = f.target.get("target", &Digest::of("users", "a")).unwrap();
        assert_eq!(a.bins["value"], json!(20));
        assert_eq!(f.target.get("target", &Digest::of("users", "b")).unwrap().bins["value"], json!(15));
        assert!(f.target.get("target", &Digest::of("orders", "o")).is_none());
    }

    #[tokio::test]
    async fn test_records_restore_is_synchronous() {
        let f = fixture().await;
        let written = f
            .restorer
            .restore_records(ContinuousRestoreRequest {
                src_digests: Some(vec![Digest::of("users", "a").to_hex()]),
                ..request()
            })
            .await
            .unwrap();
        assert_eq!(written, 1);
        assert!(f.target.get("target", &Digest::of("users", "a")).is_some());
        assert!(f.target.get("target", &Digest::of("orders", "o")).is_none());

        let err = f
            .restorer
            .restore_records(ContinuousRestoreRequest {
                src_digests: Some(vec!["zz".into()]),
                ..request()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RestoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_unknown_backup_target_or_namespace() {
        let f = fixture().await;
        let err = f
            .restorer
            .submit(
                ContinuousRestoreRequest {
                    src_ns: "other".into(),
                    ..request()
                },
                ContinuousScope::Namespace,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RestoreError::NotFound(_)));

        let err = f
            .restorer
            .submit(
                ContinuousRestoreRequest {
                    trg_cluster_name: "nowhere".into(),
                    ..request()
                },
                ContinuousScope::Namespace,
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Aerospike cluster \"nowhere\" not found");

        let err = f
            .restorer
            .submit(
                ContinuousRestoreRequest {
                    trg_ns: "missing".into(),
                    ..request()
                },
                ContinuousScope::Namespace,
            )
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "namespace \"missing\" not found on cluster \"dst\""
        );
    }
}
