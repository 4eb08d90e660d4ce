//! Connections to shipping source clusters and the continuous backups bound
//! to them.

use std::sync::Arc;

use keeper_cluster::{ClusterConnector, ShippingTarget};
use keeper_config::{
    validate_connection, ClusterConnection, ConfigError, ConfigStore, ContinuousBackup,
    ContinuousPolicy,
};
use keeper_core::validation;
use keeper_entities::record_versions;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QuerySelect};
use tracing::{info, warn};

use crate::error::ConnectError;

pub struct ConnectionService {
    store: Arc<ConfigStore>,
    connector: Arc<dyn ClusterConnector>,
    db: Arc<DatabaseConnection>,
    static_xdr: bool,
}

impl ConnectionService {
    pub fn new(
        store: Arc<ConfigStore>,
        connector: Arc<dyn ClusterConnector>,
        db: Arc<DatabaseConnection>,
        static_xdr: bool,
    ) -> Self {
        Self {
            store,
            connector,
            db,
            static_xdr,
        }
    }

    pub fn is_static(&self) -> bool {
        self.static_xdr
    }

    /// Register a shipping link and tell the source cluster to start
    /// shipping to its datacenter.
    pub async fn create_connection(
        &self,
        connection: ClusterConnection,
    ) -> Result<ClusterConnection, ConnectError> {
        validate_connection(&connection)?;
        let name = connection.src_cluster_name.clone();
        if self.store.snapshot().connections.contains_key(&name) {
            return Err(ConnectError::Conflict(name));
        }

        self.set_shipping(&connection, true).await?;

        let stored = connection.clone();
        let committed = self
            .store
            .mutate(|config| {
                if config.connections.contains_key(&name) {
                    return Err(ConfigError::DuplicateKey(name.clone()));
                }
                config.connections.insert(name.clone(), stored);
                Ok(())
            })
            .await;
        if let Err(e) = committed {
            self.stop_shipping_after_failure(&connection).await;
            return Err(match e {
                ConfigError::DuplicateKey(name) => ConnectError::Conflict(name),
                other => other.into(),
            });
        }

        info!("Created connection for source cluster {}", connection.src_cluster_name);
        Ok(connection)
    }

    pub async fn update_connection(
        &self,
        connection: ClusterConnection,
    ) -> Result<ClusterConnection, ConnectError> {
        if self.static_xdr {
            return Err(ConnectError::StaticConfiguration);
        }
        validate_connection(&connection)?;
        let name = connection.src_cluster_name.clone();
        let previous = self.get_connection(&name)?;

        let moved = previous.backup_dc_name != connection.backup_dc_name
            || previous.src_cluster_host != connection.src_cluster_host
            || previous.src_cluster_port != connection.src_cluster_port;
        if moved {
            self.set_shipping(&connection, true).await?;
        }

        let stored = connection.clone();
        let committed = self
            .store
            .mutate(|config| {
                config.connections.insert(name.clone(), stored);
                Ok(())
            })
            .await;
        if let Err(e) = committed {
            if moved {
                self.stop_shipping_after_failure(&connection).await;
            }
            return Err(e.into());
        }

        if moved {
            if let Err(e) = self.set_shipping(&previous, false).await {
                warn!("Failed to stop shipping to old datacenter {}: {}", previous.backup_dc_name, e);
            }
        }
        Ok(connection)
    }

    /// Undo a shipping change whose connection was never stored.
    async fn stop_shipping_after_failure(&self, connection: &ClusterConnection) {
        match self.set_shipping(connection, false).await {
            Ok(()) => warn!(
                "Connection {} was not stored, stopped shipping to {}",
                connection.src_cluster_name, connection.backup_dc_name
            ),
            Err(e) => warn!(
                "Failed to stop shipping to {} after a failed connection change: {}",
                connection.backup_dc_name, e
            ),
        }
    }

    pub fn get_connection(&self, name: &str) -> Result<ClusterConnection, ConnectError> {
        self.store
            .snapshot()
            .connections
            .get(name)
            .cloned()
            .ok_or_else(|| ConnectError::NotFound(name.to_string()))
    }

    pub fn list_connections(&self) -> Vec<ClusterConnection> {
        self.store.snapshot().connections.values().cloned().collect()
    }

    /// Tear down a shipping link. Continuous backups still bound to it are
    /// disabled first when `disable_connected_backups` is set, otherwise
    /// their presence fails the call.
    pub async fn delete_connection(
        &self,
        name: &str,
        disable_connected_backups: bool,
    ) -> Result<(), ConnectError> {
        if self.static_xdr {
            return Err(ConnectError::StaticConfiguration);
        }
        let connection = self.get_connection(name)?;

        let dependents: Vec<String> = self
            .store
            .snapshot()
            .continuous_backups
            .values()
            .filter(|backup| backup.src_cluster_name == name && backup.enabled)
            .map(|backup| backup.name.clone())
            .collect();

        if !dependents.is_empty() {
            if !disable_connected_backups {
                return Err(ConnectError::InUse {
                    name: name.to_string(),
                    backups: dependents.join(", "),
                });
            }
            self.store
                .mutate(|config| {
                    for backup in config.continuous_backups.values_mut() {
                        if backup.src_cluster_name == name {
                            backup.enabled = false;
                        }
                    }
                    Ok(())
                })
                .await?;
            info!("Disabled continuous backups {} of connection {}", dependents.join(", "), name);
        }

        self.set_shipping(&connection, false).await?;
        self.store
            .mutate(|config| {
                config.connections.remove(name);
                Ok(())
            })
            .await?;
        info!("Deleted connection {}", name);
        Ok(())
    }

    async fn set_shipping(&self, connection: &ClusterConnection, enabled: bool) -> Result<(), ConnectError> {
        let client = self.connector.connect(&connection.as_cluster()).await?;
        client
            .configure_shipping(&ShippingTarget {
                dc_name: connection.backup_dc_name.clone(),
                enabled,
            })
            .await?;
        Ok(())
    }

    pub async fn create_policy(&self, policy: ContinuousPolicy) -> Result<ContinuousPolicy, ConnectError> {
        validation::not_empty("policy name", &policy.name)?;
        let stored = policy.clone();
        self.store
            .mutate(|config| {
                if config.continuous_policies.contains_key(&stored.name) {
                    return Err(ConfigError::DuplicateKey(stored.name.clone()));
                }
                config.continuous_policies.insert(stored.name.clone(), stored);
                Ok(())
            })
            .await?;
        Ok(policy)
    }

    pub async fn update_policy(&self, policy: ContinuousPolicy) -> Result<ContinuousPolicy, ConnectError> {
        validation::not_empty("policy name", &policy.name)?;
        let stored = policy.clone();
        self.store
            .mutate(|config| match config.continuous_policies.get_mut(&stored.name) {
                Some(slot) => {
                    *slot = stored;
                    Ok(())
                }
                None => Err(ConfigError::not_found("policy", stored.name.clone())),
            })
            .await?;
        Ok(policy)
    }

    pub fn get_policy(&self, name: &str) -> Result<ContinuousPolicy, ConnectError> {
        self.store
            .snapshot()
            .continuous_policies
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::not_found("policy", name).into())
    }

    pub fn list_policies(&self) -> Vec<ContinuousPolicy> {
        self.store.snapshot().continuous_policies.values().cloned().collect()
    }

    /// Deleting a missing policy succeeds.
    pub async fn delete_policy(&self, name: &str) -> Result<(), ConnectError> {
        if !self.store.snapshot().continuous_policies.contains_key(name) {
            return Ok(());
        }
        self.store
            .mutate(|config| {
                config.continuous_policies.remove(name);
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn create_backup(&self, backup: ContinuousBackup) -> Result<ContinuousBackup, ConnectError> {
        validation::not_empty("backup name", &backup.name)?;
        let stored = backup.clone();
        self.store
            .mutate(|config| {
                if config.continuous_backups.contains_key(&stored.name) {
                    return Err(ConfigError::DuplicateKey(stored.name.clone()));
                }
                config.continuous_backups.insert(stored.name.clone(), stored);
                Ok(())
            })
            .await?;
        info!("Created continuous backup {}", backup.name);
        Ok(backup)
    }

    pub async fn update_backup(
        &self,
        name: &str,
        mut backup: ContinuousBackup,
    ) -> Result<ContinuousBackup, ConnectError> {
        backup.name = name.to_string();
        let stored = backup.clone();
        self.store
            .mutate(|config| match config.continuous_backups.get_mut(name) {
                Some(slot) => {
                    *slot = stored;
                    Ok(())
                }
                None => Err(ConfigError::not_found("backup", name)),
            })
            .await?;
        Ok(backup)
    }

    pub async fn set_backup_enabled(&self, name: &str, enabled: bool) -> Result<ContinuousBackup, ConnectError> {
        let config = self
            .store
            .mutate(|config| match config.continuous_backups.get_mut(name) {
                Some(backup) => {
                    backup.enabled = enabled;
                    Ok(())
                }
                None => Err(ConfigError::not_found("backup", name)),
            })
            .await?;
        config
            .continuous_backups
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::not_found("backup", name).into())
    }

    pub fn get_backup(&self, name: &str) -> Result<ContinuousBackup, ConnectError> {
        self.store
            .snapshot()
            .continuous_backups
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::not_found("backup", name).into())
    }

    pub fn list_backups(&self) -> Vec<ContinuousBackup> {
        self.store.snapshot().continuous_backups.values().cloned().collect()
    }

    /// Deleting a missing backup succeeds.
    pub async fn delete_backup(&self, name: &str) -> Result<(), ConnectError> {
        if !self.store.snapshot().continuous_backups.contains_key(name) {
            return Ok(());
        }
        self.store
            .mutate(|config| {
                config.continuous_backups.remove(name);
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Sets with at least one committed version in the backup.
    pub async fn backup_sets(&self, name: &str) -> Result<Vec<String>, ConnectError> {
        self.get_backup(name)?;
        let mut sets: Vec<String> = record_versions::Entity::find()
            .select_only()
            .column(record_versions::Column::SetName)
            .distinct()
            .filter(record_versions::Column::BackupName.eq(name))
            .into_tuple()
            .all(self.db.as_ref())
            .await?;
        sets.sort();
        Ok(sets)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use keeper_cluster::{MemoryCluster, MemoryConnector};
    use keeper_database::test_utils::TestDatabase;
    use sea_orm::ConnectionTrait;

    pub(crate) struct Fixture {
        pub db: TestDatabase,
        pub store: Arc<ConfigStore>,
        pub connector: Arc<MemoryConnector>,
        pub service: ConnectionService,
    }

    pub(crate) async fn fixture(static_xdr: bool) -> Fixture {
        let db = TestDatabase::new().await.unwrap();
        let store = Arc::new(ConfigStore::load(db.connection(), None).await.unwrap());
        let connector = Arc::new(MemoryConnector::new());
        connector.register("src:3000", MemoryCluster::new(&["source"]));
        let service = ConnectionService::new(store.clone(), connector.clone(), db.connection(), static_xdr);
        Fixture {
            db,
            store,
            connector,
            service,
        }
    }

    pub(crate) fn connection(host: &str) -> ClusterConnection {
        ClusterConnection {
            src_cluster_name: "src".into(),
            src_cluster_host: host.into(),
            src_cluster_port: 3000,
            backup_dc_name: "dc1".into(),
            ..Default::default()
        }
    }

    fn backup(name: &str) -> ContinuousBackup {
        ContinuousBackup {
            name: name.into(),
            description: None,
            src_cluster_name: "src".into(),
            src_ns: "source".into(),
            backup_ns: "backup".into(),
            policy: "p".into(),
            sets: vec![],
            enabled: true,
        }
    }

    fn policy() -> ContinuousPolicy {
        ContinuousPolicy {
            name: "p".into(),
            duration: 60,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_starts_shipping_and_conflicts() {
        let f = fixture(false).await;
        f.service.create_connection(connection("src")).await.unwrap();
        assert!(f.connector.cluster("src:3000").unwrap().shipping_to("dc1"));

        let err = f.service.create_connection(connection("src")).await.unwrap_err();
        assert!(matches!(err, ConnectError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_failed_commit_stops_shipping() {
        let f = fixture(false).await;
        f.db.connection()
            .execute_unprepared("DROP TABLE config_revisions")
            .await
            .unwrap();

        let err = f.service.create_connection(connection("src")).await.unwrap_err();
        assert!(matches!(err, ConnectError::Config(_)));
        assert!(!f.connector.cluster("src:3000").unwrap().shipping_to("dc1"));
        assert!(f.service.list_connections().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_source_is_upstream_error() {
        let f = fixture(false).await;
        let err = f.service.create_connection(connection("nowhere")).await.unwrap_err();
        assert!(matches!(err, ConnectError::Upstream(_)));
        assert!(f.service.list_connections().is_empty());
    }

    #[tokio::test]
    async fn test_long_dc_name_is_rejected() {
        let f = fixture(false).await;
        let mut conn = connection("src");
        conn.backup_dc_name = "x".repeat(32);
        let err = f.service.create_connection(conn).await.unwrap_err();
        assert_eq!(err.to_string(), "dc name must be less than 32 characters");
    }

    #[tokio::test]
    async fn test_delete_with_dependent_backups() {
        let f = fixture(false).await;
        f.service.create_connection(connection("src")).await.unwrap();
        f.service.create_policy(policy()).await.unwrap();
        f.service.create_backup(backup("b1")).await.unwrap();

        let err = f.service.delete_connection("src", false).await.unwrap_err();
        assert!(matches!(err, ConnectError::InUse { .. }));

        f.service.delete_connection("src", true).await.unwrap();
        assert!(f.service.list_connections().is_empty());
        assert!(!f.service.get_backup("b1").unwrap().enabled);
        assert!(!f.connector.cluster("src:3000").unwrap().shipping_to("dc1"));
    }

    #[tokio::test]
    async fn test_static_mode_rejects_changes() {
        let f = fixture(true).await;
        f.service.create_connection(connection("src")).await.unwrap();
        let err = f.service.delete_connection("src", true).await.unwrap_err();
        assert!(err.to_string().contains("ClusterConnection cannot be deleted"));
        assert!(matches!(
            f.service.update_connection(connection("src")).await,
            Err(ConnectError::StaticConfiguration)
        ));
        assert_eq!(f.store.snapshot().connections.len(), 1);
    }

    #[tokio::test]
    async fn test_policy_and_backup_lifecycle() {
        let f = fixture(false).await;
        f.service.create_connection(connection("src")).await.unwrap();

        // Backup needs its policy
        let err = f.service.create_backup(backup("b1")).await.unwrap_err();
        assert!(err.to_string().contains("not found validation error: policy \"p\""));

        f.service.create_policy(policy()).await.unwrap();
        f.service.create_backup(backup("b1")).await.unwrap();
        assert!(matches!(
            f.service.create_backup(backup("b1")).await,
            Err(ConnectError::Config(ConfigError::DuplicateKey(_)))
        ));

        let disabled = f.service.set_backup_enabled("b1", false).await.unwrap();
        assert!(!disabled.enabled);

        f.service.delete_policy("missing").await.unwrap();
        f.service.delete_backup("b1").await.unwrap();
        f.service.delete_backup("b1").await.unwrap();
        assert!(f.service.list_backups().is_empty());
        assert!(f.service.backup_sets("b1").await.is_err());
    }
}
