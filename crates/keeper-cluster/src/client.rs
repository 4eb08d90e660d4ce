use std::sync::Arc;

use async_trait::async_trait;
use keeper_config::Cluster;

use crate::error::ClusterError;
use crate::record::{
    Record, Role, ScanRequest, SecondaryIndex, ShippingTarget, Udf, User, WriteOutcome, WritePolicy,
};

pub type ClusterResult<T> = Result<T, ClusterError>;

/// Session with one database cluster.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn namespaces(&self) -> ClusterResult<Vec<String>>;

    async fn scan(&self, request: &ScanRequest) -> ClusterResult<Vec<Record>>;

    /// Write one record. A record carrying no bins is a delete.
    async fn put(&self, record: &Record, policy: &WritePolicy) -> ClusterResult<WriteOutcome>;

    async fn udfs(&self) -> ClusterResult<Vec<Udf>>;

    async fn put_udf(&self, udf: &Udf) -> ClusterResult<()>;

    async fn indexes(&self, namespace: &str) -> ClusterResult<Vec<SecondaryIndex>>;

    async fn create_index(&self, index: &SecondaryIndex) -> ClusterResult<()>;

    async fn users(&self) -> ClusterResult<Vec<User>>;

    async fn roles(&self) -> ClusterResult<Vec<Role>>;

    async fn object_count(&self, namespace: &str) -> ClusterResult<u64>;

    /// Start or stop shipping the change feed to a datacenter.
    async fn configure_shipping(&self, target: &ShippingTarget) -> ClusterResult<()>;

    async fn truncate(&self, namespace: &str, set: Option<&str>) -> ClusterResult<()>;
}

/// Opens sessions from configured cluster definitions.
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    async fn connect(&self, cluster: &Cluster) -> ClusterResult<Arc<dyn ClusterClient>>;
}
