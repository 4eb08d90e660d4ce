//! Persisted background jobs.
//!
//! A job row is created in `RUNNING` state and driven by the executor
//! registered for its kind. Executors checkpoint an opaque cursor; a job
//! interrupted by a restart is marked `PAUSED` and resuming it hands the
//! last cursor back to a fresh executor run.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use keeper_entities::background_jobs;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::JobError;
use crate::model::{JobInfo, JobStatus};

#[async_trait]
pub trait JobExecutor: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Run until done, returning `JobError::Cancelled` once
    /// `ctx.is_cancelled()` is observed.
    async fn run(&self, ctx: &mut JobContext) -> Result<(), JobError>;
}

/// Handle an executor uses to read its inputs and persist progress.
pub struct JobContext {
    pub id: String,
    pub params: Value,
    pub cursor: Option<Value>,
    pub processed: i64,
    pub total: i64,
    db: Arc<DatabaseConnection>,
    token: CancellationToken,
}

impl JobContext {
    pub fn params<T: DeserializeOwned>(&self) -> Result<T, JobError> {
        Ok(serde_json::from_value(self.params.clone())?)
    }

    pub fn cursor<T: DeserializeOwned>(&self) -> Result<Option<T>, JobError> {
        self.cursor
            .clone()
            .map(serde_json::from_value)
            .transpose()
            .map_err(JobError::from)
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn check_cancelled(&self) -> Result<(), JobError> {
        if self.is_cancelled() {
            Err(JobError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.token.clone()
    }

    pub async fn set_total(&mut self, total: i64) -> Result<(), JobError> {
        self.total = total;
        self.save().await
    }

    /// Persist the cursor and the processed count.
    pub async fn checkpoint<T: Serialize>(&mut self, cursor: &T, processed: i64) -> Result<(), JobError> {
        self.cursor = Some(serde_json::to_value(cursor)?);
        self.processed = processed;
        self.save().await
    }

    async fn save(&self) -> Result<(), JobError> {
        background_jobs::ActiveModel {
            id: Set(self.id.clone()),
            cursor: Set(self.cursor.clone()),
            processed: Set(self.processed),
            total: Set(self.total),
            updated_at: Set(Utc::now()),
            ..Default::default()
        }
        .update(self.db.as_ref())
        .await?;
        Ok(())
    }
}

struct RunningJob {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

pub struct JobManager {
    db: Arc<DatabaseConnection>,
    executors: RwLock<HashMap<&'static str, Arc<dyn JobExecutor>>>,
    running: Arc<Mutex<HashMap<String, RunningJob>>>,
    shutdown: CancellationToken,
}

impl JobManager {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            db,
            executors: RwLock::new(HashMap::new()),
            running: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn register_executor(&self, executor: Arc<dyn JobExecutor>) {
        debug!("Registering job executor: {}", executor.kind());
        self.executors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(executor.kind(), executor);
    }

    fn executor(&self, kind: &str) -> Result<Arc<dyn JobExecutor>, JobError> {
        self.executors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kind)
            .cloned()
            .ok_or_else(|| JobError::UnknownKind(kind.to_string()))
    }

    /// Create a job and start it.
    pub async fn submit(&self, kind: &str, params: Value) -> Result<String, JobError> {
        let executor = self.executor(kind)?;
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        let model = background_jobs::ActiveModel {
            id: Set(id.clone()),
            kind: Set(kind.to_string()),
            status: Set(JobStatus::Running.to_string()),
            params: Set(params),
            cursor: Set(None),
            processed: Set(0),
            total: Set(0),
            error: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            finished_at: Set(None),
        }
        .insert(self.db.as_ref())
        .await?;

        info!("Started {} job {}", kind, id);
        self.spawn(executor, model);
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Result<JobInfo, JobError> {
        Ok(self.find(id).await?.into())
    }

    /// Last checkpointed cursor of a job.
    pub async fn cursor<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>, JobError> {
        self.find(id)
            .await?
            .cursor
            .map(serde_json::from_value)
            .transpose()
            .map_err(JobError::from)
    }

    pub async fn list(&self, kind: Option<&str>) -> Result<Vec<JobInfo>, JobError> {
        let mut query = background_jobs::Entity::find().order_by_desc(background_jobs::Column::CreatedAt);
        if let Some(kind) = kind {
            query = query.filter(background_jobs::Column::Kind.eq(kind));
        }
        Ok(query
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(JobInfo::from)
            .collect())
    }

    /// Continue a paused or failed job from its last checkpoint.
    pub async fn resume(&self, id: &str) -> Result<JobInfo, JobError> {
        let model = self.find(id).await?;
        let status: JobStatus = model.status.parse().map_err(JobError::Failed)?;

        match status {
            JobStatus::Running if self.is_running(id) => return Ok(model.into()),
            JobStatus::Done | JobStatus::Cancelled => {
                return Err(JobError::InvalidState {
                    id: id.to_string(),
                    status: status.to_string(),
                    message: "job cannot be resumed".to_string(),
                })
            }
            _ => {}
        }

        let executor = self.executor(&model.kind)?;
        let model = background_jobs::ActiveModel {
            id: Set(model.id.clone()),
            status: Set(JobStatus::Running.to_string()),
            error: Set(None),
            finished_at: Set(None),
            updated_at: Set(Utc::now()),
            ..Default::default()
        }
        .update(self.db.as_ref())
        .await?;

        info!("Resuming {} job {} at {} processed", model.kind, model.id, model.processed);
        let info = JobInfo::from(model.clone());
        self.spawn(executor, model);
        Ok(info)
    }

    /// Stop a job. Cancelling a cancelled job succeeds.
    pub async fn cancel(&self, id: &str) -> Result<JobInfo, JobError> {
        let model = self.find(id).await?;
        let status: JobStatus = model.status.parse().map_err(JobError::Failed)?;

        match status {
            JobStatus::Cancelled => return Ok(model.into()),
            JobStatus::Done | JobStatus::Failed => {
                return Err(JobError::InvalidState {
                    id: id.to_string(),
                    status: status.to_string(),
                    message: "job already finished".to_string(),
                })
            }
            _ => {}
        }

        if let Some(job) = self.running_lock().get(id) {
            job.token.cancel();
        }
        let now = Utc::now();
        let model = background_jobs::ActiveModel {
            id: Set(id.to_string()),
            status: Set(JobStatus::Cancelled.to_string()),
            finished_at: Set(Some(now)),
            updated_at: Set(now),
            ..Default::default()
        }
        .update(self.db.as_ref())
        .await?;

        info!("Cancelled job {}", id);
        Ok(model.into())
    }

    /// Mark jobs left `RUNNING` by a previous process as `PAUSED`.
    pub async fn recover_interrupted(&self) -> Result<u64, JobError> {
        let result = background_jobs::Entity::update_many()
            .col_expr(
                background_jobs::Column::Status,
                sea_orm::sea_query::Expr::value(JobStatus::Paused.to_string()),
            )
            .filter(background_jobs::Column::Status.eq(JobStatus::Running.to_string()))
            .exec(self.db.as_ref())
            .await?;
        if result.rows_affected > 0 {
            warn!("Paused {} jobs interrupted by a restart", result.rows_affected);
        }
        Ok(result.rows_affected)
    }

    /// Wait for the in-process run of a job to finish.
    pub async fn join(&self, id: &str) {
        let handle = self
            .running_lock()
            .get_mut(id)
            .and_then(|job| job.handle.take());
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Stop every running job, leaving them resumable.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.running_lock().contains_key(id)
    }

    async fn find(&self, id: &str) -> Result<background_jobs::Model, JobError> {
        background_jobs::Entity::find_by_id(id.to_string())
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    fn running_lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, RunningJob>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn(&self, executor: Arc<dyn JobExecutor>, model: background_jobs::Model) {
        let token = self.shutdown.child_token();
        let mut ctx = JobContext {
            id: model.id.clone(),
            params: model.params,
            cursor: model.cursor,
            processed: model.processed,
            total: model.total,
            db: self.db.clone(),
            token: token.clone(),
        };

        self.running_lock().insert(
            model.id.clone(),
            RunningJob {
                token: token.clone(),
                handle: None,
            },
        );

        let db = self.db.clone();
        let running = self.running.clone();
        let shutdown = self.shutdown.clone();
        let id = model.id;

        let handle = tokio::spawn({
            let id = id.clone();
            async move {
                let result = executor.run(&mut ctx).await;
                let (status, error) = match result {
                    _ if shutdown.is_cancelled() => (JobStatus::Paused, None),
                    _ if token.is_cancelled() => (JobStatus::Cancelled, None),
                    Ok(()) => (JobStatus::Done, None),
                    Err(JobError::Cancelled) => (JobStatus::Cancelled, None),
                    Err(e) => (JobStatus::Failed, Some(e.to_string())),
                };

                if let Err(e) = finish(&db, &ctx, status, error).await {
                    error!("Failed to record completion of job {}: {}", id, e);
                }
                running.lock().unwrap_or_else(PoisonError::into_inner).remove(&id);
            }
        });

        if let Some(job) = self.running_lock().get_mut(&id) {
            job.handle = Some(handle);
        }
    }
}

async fn finish(
    db: &DatabaseConnection,
    ctx: &JobContext,
    status: JobStatus,
    error: Option<String>,
) -> Result<(), JobError> {
    let now = Utc::now();
    let finished_at = matches!(status, JobStatus::Done | JobStatus::Failed | JobStatus::Cancelled)
        .then_some(now);
    match &error {
        Some(message) => warn!("Job {} failed: {}", ctx.id, message),
        None => info!("Job {} is {}", ctx.id, status),
    }

    background_jobs::ActiveModel {
        id: Set(ctx.id.clone()),
        status: Set(status.to_string()),
        error: Set(error),
        cursor: Set(ctx.cursor.clone()),
        processed: Set(ctx.processed),
        total: Set(ctx.total),
        updated_at: Set(now),
        finished_at: Set(finished_at),
        ..Default::default()
    }
    .update(db)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_database::test_utils::TestDatabase;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Counts to `params.count`, checkpointing after each step.
    struct CountingExecutor {
        /// Stop with a failure at this value, once
        fail_at: Option<i64>,
        failed: AtomicBool,
        step_delay: Duration,
    }

    impl CountingExecutor {
        fn new() -> Self {
            Self {
                fail_at: None,
                failed: AtomicBool::new(false),
                step_delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl JobExecutor for CountingExecutor {
        fn kind(&self) -> &'static str {
            "count"
        }

        async fn run(&self, ctx: &mut JobContext) -> Result<(), JobError> {
            let count: i64 = ctx.params::<Value>()?["count"].as_i64().unwrap_or(0);
            ctx.set_total(count).await?;
            let mut next = ctx.cursor::<i64>()?.unwrap_or(0);

            while next < count {
                ctx.check_cancelled()?;
                if Some(next) == self.fail_at && !self.failed.swap(true, Ordering::SeqCst) {
                    return Err(JobError::failed("boom"));
                }
                tokio::time::sleep(self.step_delay).await;
                next += 1;
                ctx.checkpoint(&next, next).await?;
            }
            Ok(())
        }
    }

    async fn manager(executor: CountingExecutor) -> (TestDatabase, JobManager) {
        let test_db = TestDatabase::new().await.unwrap();
        let manager = JobManager::new(test_db.connection());
        manager.register_executor(Arc::new(executor));
        (test_db, manager)
    }

    #[tokio::test]
    async fn test_job_runs_to_completion() {
        let (_db, manager) = manager(CountingExecutor::new()).await;
        let id = manager.submit("count", serde_json::json!({"count": 5})).await.unwrap();
        manager.join(&id).await;

        let info = manager.get(&id).await.unwrap();
        assert_eq!(info.status, JobStatus::Done);
        assert_eq!(info.processed, 5);
        assert_eq!(info.percentage_done, 100);
        assert!(info.finished.is_some());
    }

    #[tokio::test]
    async fn test_unknown_kind_and_id() {
        let (_db, manager) = manager(CountingExecutor::new()).await;
        assert!(matches!(
            manager.submit("nope", Value::Null).await,
            Err(JobError::UnknownKind(_))
        ));
        assert!(matches!(manager.get("missing").await, Err(JobError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_failed_job_resumes_from_cursor() {
        let mut executor = CountingExecutor::new();
        executor.fail_at = Some(3);
        let (_db, manager) = manager(executor).await;

        let id = manager.submit("count", serde_json::json!({"count": 6})).await.unwrap();
        manager.join(&id).await;
        let info = manager.get(&id).await.unwrap();
        assert_eq!(info.status, JobStatus::Failed);
        assert_eq!(info.processed, 3);
        assert_eq!(info.error.as_deref(), Some("boom"));

        assert!(matches!(
            manager.cancel(&id).await,
            Err(JobError::InvalidState { .. })
        ));
        let info = manager.get(&id).await.unwrap();
        assert_eq!(info.status, JobStatus::Failed);
        assert_eq!(info.error.as_deref(), Some("boom"));

        manager.resume(&id).await.unwrap();
        manager.join(&id).await;
        let info = manager.get(&id).await.unwrap();
        assert_eq!(info.status, JobStatus::Done);
        assert_eq!(info.processed, 6);
        assert!(info.error.is_none());

        assert!(matches!(
            manager.resume(&id).await,
            Err(JobError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_running_job() {
        let mut executor = CountingExecutor::new();
        executor.step_delay = Duration::from_millis(20);
        let (_db, manager) = manager(executor).await;

        let id = manager.submit("count", serde_json::json!({"count": 1000})).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        manager.cancel(&id).await.unwrap();
        manager.join(&id).await;

        let info = manager.get(&id).await.unwrap();
        assert_eq!(info.status, JobStatus::Cancelled);
        assert!(info.processed < 1000);
        // Idempotent
        manager.cancel(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_interrupted_jobs_are_paused_then_resumable() {
        let test_db = TestDatabase::new().await.unwrap();
        let now = Utc::now();
        background_jobs::ActiveModel {
            id: Set("left-over".to_string()),
            kind: Set("count".to_string()),
            status: Set("RUNNING".to_string()),
            params: Set(serde_json::json!({"count": 4})),
            cursor: Set(Some(serde_json::json!(2))),
            processed: Set(2),
            total: Set(4),
            error: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            finished_at: Set(None),
        }
        .insert(test_db.db.as_ref())
        .await
        .unwrap();

        let manager = JobManager::new(test_db.connection());
        manager.register_executor(Arc::new(CountingExecutor::new()));
        assert_eq!(manager.recover_interrupted().await.unwrap(), 1);
        assert_eq!(manager.get("left-over").await.unwrap().status, JobStatus::Paused);
        assert_eq!(manager.get("left-over").await.unwrap().percentage_done, 50);

        manager.resume("left-over").await.unwrap();
        manager.join("left-over").await;
        let info = manager.get("left-over").await.unwrap();
        assert_eq!(info.status, JobStatus::Done);
        assert_eq!(info.processed, 4);
    }
}
