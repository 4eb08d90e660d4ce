//! System metadata (users, roles, UDFs, secondary indexes) shipped from
//! connected source clusters.

use std::sync::Arc;
use std::time::Duration;

use keeper_cluster::ClusterConnector;
use keeper_config::{ClusterConnection, ConfigStore};
use keeper_core::{now_millis, TimeBounds};
use keeper_entities::smd_snapshots;
use keeper_metrics::KeeperMetrics;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use utoipa::ToSchema;

use crate::error::ConnectError;

pub const SMD_KINDS: [&str; 4] = ["users", "roles", "udfs", "sindexes"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SmdSnapshot {
    pub src_cluster_name: String,
    pub kind: String,
    pub captured_at: i64,
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
}

impl From<smd_snapshots::Model> for SmdSnapshot {
    fn from(model: smd_snapshots::Model) -> Self {
        Self {
            src_cluster_name: model.connection_name,
            kind: model.kind,
            captured_at: model.captured_at,
            payload: model.payload,
        }
    }
}

/// Newest snapshot of every kind for one connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SmdState {
    pub src_cluster_name: String,
    pub users: Option<SmdSnapshot>,
    pub roles: Option<SmdSnapshot>,
    pub udfs: Option<SmdSnapshot>,
    pub sindexes: Option<SmdSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SmdConnection {
    pub src_cluster_name: String,
    pub duration: i64,
    pub keep_for: i64,
    pub last_executed: Option<i64>,
}

pub struct SmdService {
    store: Arc<ConfigStore>,
    connector: Arc<dyn ClusterConnector>,
    db: Arc<DatabaseConnection>,
    metrics: Arc<KeeperMetrics>,
}

impl SmdService {
    pub fn new(
        store: Arc<ConfigStore>,
        connector: Arc<dyn ClusterConnector>,
        db: Arc<DatabaseConnection>,
        metrics: Arc<KeeperMetrics>,
    ) -> Self {
        Self {
            store,
            connector,
            db,
            metrics,
        }
    }

    pub fn connection(&self, name: &str) -> Result<ClusterConnection, ConnectError> {
        self.store
            .snapshot()
            .connections
            .get(name)
            .cloned()
            .ok_or_else(|| ConnectError::NotFound(name.to_string()))
    }

    /// Fetch every metadata kind from the source cluster and store one
    /// snapshot per kind, all stamped with the same capture time.
    pub async fn capture(&self, connection: &ClusterConnection) -> Result<i64, ConnectError> {
        self.capture_at(connection, now_millis()).await
    }

    async fn capture_at(&self, connection: &ClusterConnection, captured_at: i64) -> Result<i64, ConnectError> {
        let client = self.connector.connect(&connection.as_cluster()).await?;

        let users = serde_json::to_value(client.users().await?)?;
        let roles = serde_json::to_value(client.roles().await?)?;
        let udfs = serde_json::to_value(client.udfs().await?)?;
        let mut indexes = Vec::new();
        for namespace in client.namespaces().await? {
            indexes.extend(client.indexes(&namespace).await?);
        }
        let sindexes = serde_json::to_value(indexes)?;

        for (kind, payload) in SMD_KINDS.iter().zip([users, roles, udfs, sindexes]) {
            smd_snapshots::ActiveModel {
                connection_name: Set(connection.src_cluster_name.clone()),
                kind: Set(kind.to_string()),
                payload: Set(payload),
                captured_at: Set(captured_at),
                ..Default::default()
            }
            .insert(self.db.as_ref())
            .await?;
        }

        self.metrics
            .smd_snapshots_total
            .with_label_values(&[connection.src_cluster_name.as_str()])
            .inc();
        debug!("Captured SMD of {}", connection.src_cluster_name);
        Ok(captured_at)
    }

    pub async fn last_executed(&self, name: &str) -> Result<Option<i64>, ConnectError> {
        let newest = smd_snapshots::Entity::find()
            .filter(smd_snapshots::Column::ConnectionName.eq(name))
            .order_by_desc(smd_snapshots::Column::CapturedAt)
            .one(self.db.as_ref())
            .await?;
        Ok(newest.map(|s| s.captured_at))
    }

    pub async fn latest(&self, name: &str, bounds: TimeBounds) -> Result<SmdState, ConnectError> {
        self.connection(name)?;
        let mut state = SmdState {
            src_cluster_name: name.to_string(),
            ..Default::default()
        };
        for kind in SMD_KINDS {
            let mut query = smd_snapshots::Entity::find()
                .filter(smd_snapshots::Column::ConnectionName.eq(name))
                .filter(smd_snapshots::Column::Kind.eq(kind));
            if let Some(from) = bounds.from {
                query = query.filter(smd_snapshots::Column::CapturedAt.gte(from));
            }
            if let Some(to) = bounds.to {
                query = query.filter(smd_snapshots::Column::CapturedAt.lte(to));
            }
            let snapshot = query
                .order_by_desc(smd_snapshots::Column::CapturedAt)
                .one(self.db.as_ref())
                .await?
                .map(SmdSnapshot::from);
            match kind {
                "users" => state.users = snapshot,
                "roles" => state.roles = snapshot,
                "udfs" => state.udfs = snapshot,
                _ => state.sindexes = snapshot,
            }
        }
        Ok(state)
    }

    /// Every stored snapshot of one kind, newest first.
    pub async fn history(&self, name: &str, kind: &str) -> Result<Vec<SmdSnapshot>, ConnectError> {
        self.connection(name)?;
        let rows = smd_snapshots::Entity::find()
            .filter(smd_snapshots::Column::ConnectionName.eq(name))
            .filter(smd_snapshots::Column::Kind.eq(kind))
            .order_by_desc(smd_snapshots::Column::CapturedAt)
            .all(self.db.as_ref())
            .await?;
        Ok(rows.into_iter().map(SmdSnapshot::from).collect())
    }

    /// Remove snapshots captured strictly before `older_than`.
    pub async fn purge(&self, name: &str, older_than: i64) -> Result<u64, ConnectError> {
        let result = smd_snapshots::Entity::delete_many()
            .filter(smd_snapshots::Column::ConnectionName.eq(name))
            .filter(smd_snapshots::Column::CapturedAt.lt(older_than))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }

    pub async fn connections(&self) -> Result<Vec<SmdConnection>, ConnectError> {
        let mut out = Vec::new();
        for connection in self.store.snapshot().connections.values() {
            let policy = connection.smd_policy.clone().unwrap_or_default();
            out.push(SmdConnection {
                src_cluster_name: connection.src_cluster_name.clone(),
                duration: policy.duration,
                keep_for: policy.keep_for,
                last_executed: self.last_executed(&connection.src_cluster_name).await?,
            });
        }
        Ok(out)
    }

    /// One pass over all connections: capture what is due, then purge.
    pub async fn tick(&self, now: i64) -> Result<(), ConnectError> {
        for connection in self.store.snapshot().connections.values() {
            let Some(policy) = &connection.smd_policy else {
                continue;
            };
            if policy.duration <= 0 {
                continue;
            }
            let name = &connection.src_cluster_name;
            let due = match self.last_executed(name).await? {
                Some(last) => now - last >= policy.duration * 1000,
                None => true,
            };
            if due {
                if let Err(e) = self.capture_at(connection, now).await {
                    error!("Failed to capture SMD of {}: {}", name, e);
                    continue;
                }
            }
            if policy.keep_for > 0 {
                let purged = self.purge(name, now - policy.keep_for * 1000).await?;
                if purged > 0 {
                    debug!("Purged {} SMD snapshots of {}", purged, name);
                }
            }
        }
        Ok(())
    }

    pub async fn run(self: Arc<Self>, cancellation_token: CancellationToken) {
        info!("SMD shipping loop started");
        let mut interval = time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick(now_millis()).await {
                        error!("SMD shipping pass failed: {}", e);
                    }
                }
                _ = cancellation_token.cancelled() => {
                    info!("SMD shipping loop received cancellation signal");
                    return;
                }
            }
        }
    }
}
