//! Durable, copy-on-write configuration store.
//!
//! Readers take an `Arc<Config>` snapshot and never observe a half-applied
//! update. Writers are serialized: each mutation clones the live snapshot,
//! edits the clone, validates the whole graph, persists a new revision and
//! only then swaps the snapshot and notifies subscribers.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use keeper_core::validation;
use keeper_entities::config_revisions;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::model::*;
use crate::server::ConfigFile;
use crate::validate::validate_config;

/// Revisions kept in the database besides the live one.
const REVISION_HISTORY: i32 = 20;

pub struct ConfigStore {
    db: Arc<DatabaseConnection>,
    current: RwLock<Arc<Config>>,
    write_lock: Mutex<()>,
    changes: broadcast::Sender<Arc<Config>>,
    config_file: Option<PathBuf>,
}

type Field<T> = fn(&mut Config) -> &mut BTreeMap<String, T>;

impl ConfigStore {
    /// Load the newest persisted revision, seeding from the configuration
    /// file on first start.
    pub async fn load(
        db: Arc<DatabaseConnection>,
        config_file: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let latest = config_revisions::Entity::find()
            .order_by_desc(config_revisions::Column::Id)
            .one(db.as_ref())
            .await?;

        let (config, seeded) = match latest {
            Some(revision) => (serde_json::from_value::<Config>(revision.document)?, false),
            None => match &config_file {
                Some(path) => (read_config_file(path)?, true),
                None => (Config::default(), false),
            },
        };
        validate_config(&config)?;

        let (changes, _) = broadcast::channel(16);
        let store = Self {
            db,
            current: RwLock::new(Arc::new(config)),
            write_lock: Mutex::new(()),
            changes,
            config_file,
        };

        if seeded {
            let snapshot = store.snapshot();
            store.persist(&snapshot).await?;
            info!("Seeded configuration from file");
        }

        Ok(store)
    }

    pub fn snapshot(&self) -> Arc<Config> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Receive every committed configuration.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Config>> {
        self.changes.subscribe()
    }

    /// Apply `change` atomically. Nothing is committed if it or the
    /// validation of the resulting graph fails.
    pub async fn mutate<F>(&self, change: F) -> Result<Arc<Config>, ConfigError>
    where
        F: FnOnce(&mut Config) -> Result<(), ConfigError>,
    {
        let _guard = self.write_lock.lock().await;

        let mut next = (*self.snapshot()).clone();
        change(&mut next)?;
        validate_config(&next)?;
        self.persist(&next).await?;

        let next = Arc::new(next);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = next.clone();
        // No subscribers is fine
        let _ = self.changes.send(next.clone());
        debug!("Configuration updated");
        Ok(next)
    }

    /// Replace the whole document.
    pub async fn replace(&self, config: Config) -> Result<Arc<Config>, ConfigError> {
        self.mutate(move |current| {
            *current = config;
            Ok(())
        })
        .await
    }

    /// Reload the configuration file and commit it as the live document.
    pub async fn apply(&self) -> Result<Arc<Config>, ConfigError> {
        let path = self
            .config_file
            .as_ref()
            .ok_or_else(|| ConfigError::File("no configuration file configured".to_string()))?;
        let config = read_config_file(path)?;
        info!("Applying configuration from {}", path.display());
        self.replace(config).await
    }

    async fn persist(&self, config: &Config) -> Result<(), ConfigError> {
        let document = serde_json::to_value(config)?;
        let txn = self.db.begin().await?;
        let revision = config_revisions::ActiveModel {
            document: Set(document),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        config_revisions::Entity::delete_many()
            .filter(config_revisions::Column::Id.lte(revision.id - REVISION_HISTORY))
            .exec(&txn)
            .await?;
        txn.commit().await?;
        Ok(())
    }

    async fn add_entry<T: Send>(
        &self,
        field: Field<T>,
        label: &'static str,
        name: &str,
        value: T,
    ) -> Result<Arc<Config>, ConfigError> {
        validation::not_empty(&format!("{} name", label), name)?;
        self.mutate(|config| {
            let map = field(config);
            if map.contains_key(name) {
                return Err(ConfigError::DuplicateKey(name.to_string()));
            }
            map.insert(name.to_string(), value);
            Ok(())
        })
        .await
    }

    async fn update_entry<T: Send>(
        &self,
        field: Field<T>,
        label: &'static str,
        name: &str,
        value: T,
    ) -> Result<Arc<Config>, ConfigError> {
        self.mutate(|config| match field(config).get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(ConfigError::not_found(label, name)),
        })
        .await
    }

    /// Deleting a missing entry succeeds without a new revision.
    async fn delete_entry<T: Send>(
        &self,
        field: Field<T>,
        name: &str,
    ) -> Result<Arc<Config>, ConfigError> {
        let mut snapshot = (*self.snapshot()).clone();
        if !field(&mut snapshot).contains_key(name) {
            return Ok(self.snapshot());
        }
        self.mutate(|config| {
            field(config).remove(name);
            Ok(())
        })
        .await
    }

    pub async fn add_cluster(&self, name: &str, cluster: Cluster) -> Result<Arc<Config>, ConfigError> {
        self.add_entry(|c| &mut c.aerospike_clusters, "cluster", name, cluster).await
    }

    pub async fn update_cluster(&self, name: &str, cluster: Cluster) -> Result<Arc<Config>, ConfigError> {
        self.update_entry(|c| &mut c.aerospike_clusters, "cluster", name, cluster).await
    }

    pub async fn delete_cluster(&self, name: &str) -> Result<Arc<Config>, ConfigError> {
        self.delete_entry(|c| &mut c.aerospike_clusters, name).await
    }

    pub async fn add_storage(&self, name: &str, storage: Storage) -> Result<Arc<Config>, ConfigError> {
        self.add_entry(|c| &mut c.storage, "storage", name, storage).await
    }

    pub async fn update_storage(&self, name: &str, storage: Storage) -> Result<Arc<Config>, ConfigError> {
        self.update_entry(|c| &mut c.storage, "storage", name, storage).await
    }

    pub async fn delete_storage(&self, name: &str) -> Result<Arc<Config>, ConfigError> {
        self.delete_entry(|c| &mut c.storage, name).await
    }

    pub async fn add_policy(&self, name: &str, policy: BackupPolicy) -> Result<Arc<Config>, ConfigError> {
        self.add_entry(|c| &mut c.backup_policies, "policy", name, policy).await
    }

    pub async fn update_policy(&self, name: &str, policy: BackupPolicy) -> Result<Arc<Config>, ConfigError> {
        self.update_entry(|c| &mut c.backup_policies, "policy", name, policy).await
    }

    pub async fn delete_policy(&self, name: &str) -> Result<Arc<Config>, ConfigError> {
        self.delete_entry(|c| &mut c.backup_policies, name).await
    }

    pub async fn add_routine(&self, name: &str, routine: BackupRoutine) -> Result<Arc<Config>, ConfigError> {
        self.add_entry(|c| &mut c.backup_routines, "routine", name, routine).await
    }

    pub async fn update_routine(&self, name: &str, routine: BackupRoutine) -> Result<Arc<Config>, ConfigError> {
        self.update_entry(|c| &mut c.backup_routines, "routine", name, routine).await
    }

    pub async fn delete_routine(&self, name: &str) -> Result<Arc<Config>, ConfigError> {
        self.delete_entry(|c| &mut c.backup_routines, name).await
    }

    /// Enabling activates scheduling, disabling stops future triggers.
    /// Backup history is untouched either way.
    pub async fn set_routine_enabled(&self, name: &str, enabled: bool) -> Result<Arc<Config>, ConfigError> {
        self.mutate(|config| match config.backup_routines.get_mut(name) {
            Some(routine) => {
                routine.disabled = !enabled;
                Ok(())
            }
            None => Err(ConfigError::not_found("routine", name)),
        })
        .await
    }

    pub fn routine(&self, name: &str) -> Result<BackupRoutine, ConfigError> {
        self.snapshot()
            .backup_routines
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::not_found("routine", name))
    }
}

fn read_config_file(path: &std::path::Path) -> Result<Config, ConfigError> {
    ConfigFile::load(path)
        .map(|file| file.config)
        .map_err(|e| ConfigError::File(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_database::test_utils::TestDatabase;
    use sea_orm::{ConnectionTrait, PaginatorTrait};
    use std::io::Write;

    fn cluster() -> Cluster {
        Cluster {
            seed_nodes: vec![SeedNode {
                host_name: "localhost".into(),
                port: 3000,
                tls_name: None,
            }],
            ..Default::default()
        }
    }

    fn routine() -> BackupRoutine {
        BackupRoutine {
            backup_policy: "p".into(),
            source_cluster: "c".into(),
            storage: "s".into(),
            interval_cron: "@daily".into(),
            namespaces: vec!["test".into()],
            ..Default::default()
        }
    }

    async fn seeded_store() -> (TestDatabase, ConfigStore) {
        let test_db = TestDatabase::new().await.unwrap();
        let store = ConfigStore::load(test_db.connection(), None).await.unwrap();
        store.add_cluster("c", cluster()).await.unwrap();
        store.add_storage("s", Storage::local("/tmp/s")).await.unwrap();
        store.add_policy("p", BackupPolicy::default()).await.unwrap();
        store.add_routine("r", routine()).await.unwrap();
        (test_db, store)
    }

    #[tokio::test]
    async fn test_state_survives_reload() {
        let (test_db, store) = seeded_store().await;
        store.set_routine_enabled("r", false).await.unwrap();

        let reloaded = ConfigStore::load(test_db.connection(), None).await.unwrap();
        assert_eq!(reloaded.snapshot(), store.snapshot());
        assert!(reloaded.routine("r").unwrap().disabled);
    }

    #[tokio::test]
    async fn test_revision_history_is_pruned() {
        let (test_db, store) = seeded_store().await;
        for i in 0..(REVISION_HISTORY + 5) {
            store.set_routine_enabled("r", i % 2 == 0).await.unwrap();
        }
        let kept = config_revisions::Entity::find()
            .count(test_db.connection().as_ref())
            .await
            .unwrap();
        assert_eq!(kept, REVISION_HISTORY as u64);
    }

    #[tokio::test]
    async fn test_failed_prune_rolls_back_revision() {
        let (test_db, store) = seeded_store().await;
        let db = test_db.connection();
        db.execute_unprepared(
            "CREATE TRIGGER keep_revisions BEFORE DELETE ON config_revisions \
             BEGIN SELECT RAISE(ABORT, 'prune blocked'); END",
        )
        .await
        .unwrap();

        let mut failed = false;
        for i in 0..(REVISION_HISTORY + 5) {
            let before = store.snapshot();
            let count = config_revisions::Entity::find().count(db.as_ref()).await.unwrap();
            if store.set_routine_enabled("r", i % 2 == 0).await.is_err() {
                assert_eq!(store.snapshot(), before);
                let after = config_revisions::Entity::find().count(db.as_ref()).await.unwrap();
                assert_eq!(after, count);
                failed = true;
                break;
            }
        }
        assert!(failed);

        let reloaded = ConfigStore::load(db, None).await.unwrap();
        assert_eq!(reloaded.snapshot(), store.snapshot());
    }

    #[tokio::test]
    async fn test_duplicate_add_is_rejected() {
        let (_db, store) = seeded_store().await;
        let err = store.add_routine("r", routine()).await.unwrap_err();
        assert_eq!(err.to_string(), "duplicate key: r");
    }

    #[tokio::test]
    async fn test_invalid_mutation_leaves_snapshot_untouched() {
        let (_db, store) = seeded_store().await;
        let before = store.snapshot();

        // The routine still references the policy
        let err = store
            .mutate(|config| {
                config.backup_policies.clear();
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert_eq!(
            err.to_string(),
            "not found validation error: backup policy \"p\""
        );
        assert!(Arc::ptr_eq(&before, &store.snapshot()));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (_db, store) = seeded_store().await;
        store.delete_routine("r").await.unwrap();
        store.delete_routine("r").await.unwrap();
        store.delete_policy("missing").await.unwrap();
        assert!(!store.snapshot().backup_routines.contains_key("r"));
    }

    #[tokio::test]
    async fn test_update_unknown_routine_is_not_found() {
        let (_db, store) = seeded_store().await;
        let err = store.update_routine("X", routine()).await.unwrap_err();
        assert_eq!(err.to_string(), "routine \"X\" not found");
        let err = store.set_routine_enabled("X", true).await.unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_empty_name_is_rejected() {
        let (_db, store) = seeded_store().await;
        let err = store.add_routine("", routine()).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "empty field validation error: \"routine name\" required"
        );
    }

    #[tokio::test]
    async fn test_subscribers_see_committed_changes() {
        let (_db, store) = seeded_store().await;
        let mut changes = store.subscribe();
        store.set_routine_enabled("r", false).await.unwrap();
        let seen = changes.recv().await.unwrap();
        assert!(seen.backup_routines["r"].disabled);
    }

    #[tokio::test]
    async fn test_seed_and_apply_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "storage:\n  local:\n    local-storage:\n      path: /tmp/local\n"
        )
        .unwrap();

        let test_db = TestDatabase::new().await.unwrap();
        let store = ConfigStore::load(test_db.connection(), Some(file.path().to_path_buf()))
            .await
            .unwrap();
        assert!(store.snapshot().storage.contains_key("local"));

        store.delete_storage("local").await.unwrap();
        assert!(store.snapshot().storage.is_empty());

        store.apply().await.unwrap();
        assert!(store.snapshot().storage.contains_key("local"));
    }
}
