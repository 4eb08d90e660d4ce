use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use keeper_config::{parse_cron, ConfigError, ConfigStore};
use keeper_core::{format_offset_date_time, now_millis};
use keeper_metrics::KeeperMetrics;
use tokio::sync::{broadcast, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::BackupError;
use crate::model::{BackupType, CurrentBackups, RunState};
use crate::runner::BackupRunner;

type RunKey = (String, BackupType);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Started,
    /// A conflicting run of the routine is still in flight
    Skipped,
}

/// Fires routines on their cron schedules and tracks in-flight runs.
pub struct BackupScheduler {
    store: Arc<ConfigStore>,
    runner: Arc<BackupRunner>,
    metrics: Arc<KeeperMetrics>,
    running: Mutex<HashMap<RunKey, Arc<RunState>>>,
    permits: Arc<Semaphore>,
}

impl BackupScheduler {
    pub fn new(
        store: Arc<ConfigStore>,
        runner: Arc<BackupRunner>,
        metrics: Arc<KeeperMetrics>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            store,
            runner,
            metrics,
            running: Mutex::new(HashMap::new()),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn runner(&self) -> &Arc<BackupRunner> {
        &self.runner
    }

    fn running(&self) -> std::sync::MutexGuard<'_, HashMap<RunKey, Arc<RunState>>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_routine(&self, routine: &str) -> Result<(), BackupError> {
        self.store.routine(routine).map(|_| ()).map_err(|e| match e {
            ConfigError::NotFound { .. } => BackupError::RoutineNotFound(routine.to_string()),
            other => BackupError::Config(other),
        })
    }

    /// Start a run unless one conflicts: a running full blocks both types,
    /// a running incremental blocks another incremental.
    pub fn trigger(self: &Arc<Self>, routine: &str, backup_type: BackupType) -> TriggerOutcome {
        let state = {
            let mut running = self.running();
            let full_key = (routine.to_string(), BackupType::Full);
            let key = (routine.to_string(), backup_type);
            if running.contains_key(&full_key) || running.contains_key(&key) {
                drop(running);
                self.metrics
                    .backup_runs(backup_type.as_str())
                    .skips
                    .with_label_values(&[routine])
                    .inc();
                info!(
                    "Skipping {} backup of routine {}: previous run still in progress",
                    backup_type, routine
                );
                return TriggerOutcome::Skipped;
            }
            let state = Arc::new(RunState::new(routine, backup_type));
            running.insert(key, state.clone());
            state
        };

        let scheduler = self.clone();
        tokio::spawn(async move { scheduler.execute(state).await });
        TriggerOutcome::Started
    }

    async fn execute(self: Arc<Self>, state: Arc<RunState>) {
        let routine = state.routine.clone();
        let backup_type = state.backup_type;
        let kind = backup_type.as_str();
        let metrics = self.metrics.backup_runs(kind);

        let _permit = self.permits.clone().acquire_owned().await.ok();
        let started = Instant::now();
        let run = self.runner.run(&routine, backup_type, &state);
        tokio::pin!(run);
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        let result = loop {
            tokio::select! {
                result = &mut run => break result,
                _ = ticker.tick() => {
                    self.metrics.set_progress(&routine, kind, state.percentage() as f64);
                }
            }
        };

        match result {
            Ok(runs) => {
                metrics.runs.with_label_values(&[routine.as_str()]).inc();
                metrics
                    .duration_millis
                    .with_label_values(&[routine.as_str()])
                    .set(started.elapsed().as_millis() as i64);
                self.metrics.set_progress(&routine, kind, 100.0);
                info!(
                    "{} backup of routine {} completed ({} namespaces)",
                    backup_type,
                    routine,
                    runs.len()
                );
            }
            Err(BackupError::NoBaseBackup(_)) => {
                metrics.skips.with_label_values(&[routine.as_str()]).inc();
                info!(
                    "Skipping incremental backup of routine {}: no full backup yet",
                    routine
                );
            }
            Err(BackupError::Cancelled) => {
                info!("{} backup of routine {} cancelled", backup_type, routine);
            }
            Err(e) => {
                metrics.failures.with_label_values(&[routine.as_str()]).inc();
                error!("{} backup of routine {} failed: {}", backup_type, routine, e);
            }
        }

        self.running().remove(&(routine.clone(), backup_type));
    }

    /// Run a full backup once after `delay_ms`.
    pub fn schedule_full(self: &Arc<Self>, routine: &str, delay_ms: u64) -> Result<(), BackupError> {
        self.ensure_routine(routine)?;
        let scheduler = self.clone();
        let routine = routine.to_string();
        tokio::spawn(async move {
            if delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            scheduler.trigger(&routine, BackupType::Full);
        });
        Ok(())
    }

    pub async fn current(&self, routine: &str) -> Result<CurrentBackups, BackupError> {
        self.ensure_routine(routine)?;
        let last_full = self
            .runner
            .last_backup_time(routine, Some(BackupType::Full))
            .await?;
        let last_incremental = self
            .runner
            .last_backup_time(routine, Some(BackupType::Incremental))
            .await?;

        let now = now_millis();
        let running = self.running();
        let progress = |backup_type: BackupType| {
            running
                .get(&(routine.to_string(), backup_type))
                .map(|state| state.progress(now))
        };
        Ok(CurrentBackups {
            last_full: last_full.and_then(format_offset_date_time),
            last_incremental: last_incremental.and_then(format_offset_date_time),
            full: progress(BackupType::Full),
            incremental: progress(BackupType::Incremental),
        })
    }

    /// Cancel in-flight runs of a routine. Returns whether any was running.
    pub fn cancel(&self, routine: &str) -> Result<bool, BackupError> {
        self.ensure_routine(routine)?;
        let mut cancelled = false;
        for ((name, backup_type), state) in self.running().iter() {
            if name == routine {
                info!("Cancelling {} backup of routine {}", backup_type, routine);
                state.cancel.cancel();
                cancelled = true;
            }
        }
        Ok(cancelled)
    }

    pub fn is_running(&self, routine: &str) -> bool {
        self.running().keys().any(|(name, _)| name == routine)
    }

    /// Cron loop. Fire times are recomputed whenever the configuration changes.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut changes = self.store.subscribe();
        let mut next: HashMap<RunKey, DateTime<Utc>> = HashMap::new();
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        info!("Backup scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => self.fire_due(&mut next, Utc::now()),
                changed = changes.recv() => match changed {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        debug!("Configuration changed, recomputing backup schedules");
                        next.clear();
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("Configuration updates closed, backup scheduler stopping");
                        return;
                    }
                },
                _ = shutdown.cancelled() => {
                    info!("Backup scheduler received cancellation signal");
                    for state in self.running().values() {
                        state.cancel.cancel();
                    }
                    return;
                }
            }
        }
    }

    fn fire_due(self: &Arc<Self>, next: &mut HashMap<RunKey, DateTime<Utc>>, now: DateTime<Utc>) {
        let config = self.store.snapshot();
        next.retain(|(name, _), _| {
            config
                .backup_routines
                .get(name)
                .is_some_and(|routine| !routine.disabled)
        });

        for (name, routine) in &config.backup_routines {
            if routine.disabled {
                continue;
            }
            let schedules = [
                (BackupType::Full, Some(routine.interval_cron.as_str())),
                (BackupType::Incremental, routine.incr_interval_cron.as_deref()),
            ];
            for (backup_type, expression) in schedules {
                let Some(expression) = expression.filter(|e| !e.trim().is_empty()) else {
                    continue;
                };
                let key = (name.clone(), backup_type);
                if let Some(at) = next.get(&key) {
                    if *at > now {
                        continue;
                    }
                    self.trigger(name, backup_type);
                }
                match parse_cron(expression) {
                    Ok(schedule) => match schedule.after(&now).next() {
                        Some(at) => {
                            next.insert(key, at);
                        }
                        None => {
                            next.remove(&key);
                        }
                    },
                    Err(e) => warn!("Invalid schedule for routine {}: {}", name, e),
                }
            }
        }
    }
}
