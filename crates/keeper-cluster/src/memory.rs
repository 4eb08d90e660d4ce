//! In-process clusters addressed by their seed `host:port`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use keeper_config::Cluster;
use tracing::debug;

use crate::client::{ClusterClient, ClusterConnector, ClusterResult};
use crate::error::ClusterError;
use crate::record::*;

#[derive(Default)]
struct ClusterState {
    namespaces: BTreeMap<String, BTreeMap<Digest, Record>>,
    udfs: BTreeMap<String, Udf>,
    indexes: Vec<SecondaryIndex>,
    users: Vec<User>,
    roles: Vec<Role>,
    shipping: BTreeMap<String, bool>,
}

/// A single in-memory cluster. Cheap to clone, clones share state.
#[derive(Clone, Default)]
pub struct MemoryCluster {
    state: Arc<RwLock<ClusterState>>,
    credentials: Option<(String, String)>,
}

impl MemoryCluster {
    pub fn new(namespaces: &[&str]) -> Self {
        let cluster = Self::default();
        {
            let mut state = cluster.write();
            for namespace in namespaces {
                state.namespaces.insert(namespace.to_string(), BTreeMap::new());
            }
        }
        cluster
    }

    pub fn with_credentials(mut self, user: &str, password: &str) -> Self {
        self.credentials = Some((user.to_string(), password.to_string()));
        self
    }

    pub fn add_namespace(&self, namespace: &str) {
        self.write()
            .namespaces
            .entry(namespace.to_string())
            .or_default();
    }

    /// Store a record as-is, bypassing write policies.
    pub fn insert(&self, record: Record) {
        self.write()
            .namespaces
            .entry(record.namespace.clone())
            .or_default()
            .insert(record.digest, record);
    }

    pub fn get(&self, namespace: &str, digest: &Digest) -> Option<Record> {
        self.read()
            .namespaces
            .get(namespace)
            .and_then(|records| records.get(digest))
            .cloned()
    }

    pub fn add_user(&self, user: User) {
        self.write().users.push(user);
    }

    pub fn add_role(&self, role: Role) {
        self.write().roles.push(role);
    }

    pub fn shipping_to(&self, dc_name: &str) -> bool {
        self.read().shipping.get(dc_name).copied().unwrap_or(false)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ClusterState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ClusterState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn authenticate(&self, cluster: &Cluster) -> ClusterResult<()> {
        let Some((user, password)) = &self.credentials else {
            return Ok(());
        };
        let supplied = cluster.credentials.as_ref();
        let matches = supplied.is_some_and(|c| {
            c.user.as_deref() == Some(user.as_str()) && c.password.as_deref() == Some(password.as_str())
        });
        if matches {
            Ok(())
        } else {
            Err(ClusterError::Authentication(format!(
                "invalid credentials for user {:?}",
                supplied.and_then(|c| c.user.clone()).unwrap_or_default()
            )))
        }
    }
}

#[async_trait]
impl ClusterClient for MemoryCluster {
    async fn namespaces(&self) -> ClusterResult<Vec<String>> {
        Ok(self.read().namespaces.keys().cloned().collect())
    }

    async fn scan(&self, request: &ScanRequest) -> ClusterResult<Vec<Record>> {
        let state = self.read();
        let records = state
            .namespaces
            .get(&request.namespace)
            .ok_or_else(|| ClusterError::NamespaceNotFound(request.namespace.clone()))?;

        Ok(records
            .values()
            .filter(|record| request.matches(record))
            .cloned()
            .map(|mut record| {
                if let Some(bins) = &request.bins {
                    record.project(bins);
                }
                record
            })
            .collect())
    }

    async fn put(&self, record: &Record, policy: &WritePolicy) -> ClusterResult<WriteOutcome> {
        let mut state = self.write();
        let records = state
            .namespaces
            .get_mut(&record.namespace)
            .ok_or_else(|| ClusterError::NamespaceNotFound(record.namespace.clone()))?;

        let mut incoming = record.clone();
        if policy.extra_ttl > 0 && incoming.void_time > 0 {
            incoming.void_time += policy.extra_ttl * 1000;
        }

        match records.get_mut(&record.digest) {
            Some(existing) => {
                if policy.exists == ExistsAction::CreateOnly {
                    return Ok(WriteOutcome::Existed);
                }
                if policy.generation_check && existing.generation > incoming.generation {
                    return Ok(WriteOutcome::Fresher);
                }
                if incoming.bins.is_empty() {
                    records.remove(&record.digest);
                    return Ok(WriteOutcome::Inserted);
                }
                match policy.exists {
                    ExistsAction::Replace => *existing = incoming,
                    _ => {
                        existing.bins.extend(incoming.bins);
                        existing.generation = incoming.generation.max(existing.generation);
                        existing.last_update_time = incoming.last_update_time;
                        existing.void_time = incoming.void_time;
                    }
                }
            }
            None => {
                if !incoming.bins.is_empty() {
                    records.insert(record.digest, incoming);
                }
            }
        }
        Ok(WriteOutcome::Inserted)
    }

    async fn udfs(&self) -> ClusterResult<Vec<Udf>> {
        Ok(self.read().udfs.values().cloned().collect())
    }

    async fn put_udf(&self, udf: &Udf) -> ClusterResult<()> {
        self.write().udfs.insert(udf.name.clone(), udf.clone());
        Ok(())
    }

    async fn indexes(&self, namespace: &str) -> ClusterResult<Vec<SecondaryIndex>> {
        Ok(self
            .read()
            .indexes
            .iter()
            .filter(|index| index.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn create_index(&self, index: &SecondaryIndex) -> ClusterResult<()> {
        let mut state = self.write();
        if !state.namespaces.contains_key(&index.namespace) {
            return Err(ClusterError::NamespaceNotFound(index.namespace.clone()));
        }
        state.indexes.retain(|existing| existing.name != index.name);
        state.indexes.push(index.clone());
        Ok(())
    }

    async fn users(&self) -> ClusterResult<Vec<User>> {
        Ok(self.read().users.clone())
    }

    async fn roles(&self) -> ClusterResult<Vec<Role>> {
        Ok(self.read().roles.clone())
    }

    async fn object_count(&self, namespace: &str) -> ClusterResult<u64> {
        self.read()
            .namespaces
            .get(namespace)
            .map(|records| records.len() as u64)
            .ok_or_else(|| ClusterError::NamespaceNotFound(namespace.to_string()))
    }

    async fn configure_shipping(&self, target: &ShippingTarget) -> ClusterResult<()> {
        self.write()
            .shipping
            .insert(target.dc_name.clone(), target.enabled);
        Ok(())
    }

    async fn truncate(&self, namespace: &str, set: Option<&str>) -> ClusterResult<()> {
        let mut state = self.write();
        let records = state
            .namespaces
            .get_mut(namespace)
            .ok_or_else(|| ClusterError::NamespaceNotFound(namespace.to_string()))?;
        match set {
            Some(set) => records.retain(|_, record| record.set != set),
            None => records.clear(),
        }
        Ok(())
    }
}

/// Resolves clusters by the address of their first seed node.
#[derive(Default)]
pub struct MemoryConnector {
    clusters: RwLock<HashMap<String, MemoryCluster>>,
    /// Namespaces given to clusters created on first connect
    provision: Option<Vec<String>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unknown addresses get a fresh cluster instead of failing.
    pub fn auto_provision(namespaces: Vec<String>) -> Self {
        Self {
            clusters: RwLock::new(HashMap::new()),
            provision: Some(namespaces),
        }
    }

    pub fn register(&self, address: impl Into<String>, cluster: MemoryCluster) {
        self.clusters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address.into(), cluster);
    }

    pub fn cluster(&self, address: &str) -> Option<MemoryCluster> {
        self.clusters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .cloned()
    }
}

#[async_trait]
impl ClusterConnector for MemoryConnector {
    async fn connect(&self, cluster: &Cluster) -> ClusterResult<Arc<dyn ClusterClient>> {
        let mut last_error = ClusterError::Unreachable("no seed nodes".to_string());

        for seed in &cluster.seed_nodes {
            let address = seed.address();
            let found = match self.cluster(&address) {
                Some(found) => Some(found),
                None => self.provision.as_ref().map(|namespaces| {
                    let names: Vec<&str> = namespaces.iter().map(String::as_str).collect();
                    let created = MemoryCluster::new(&names);
                    self.register(address.clone(), created.clone());
                    debug!("Provisioned in-memory cluster at {}", address);
                    created
                }),
            };

            match found {
                Some(found) => {
                    found.authenticate(cluster)?;
                    return Ok(Arc::new(found));
                }
                None => last_error = ClusterError::Unreachable(format!("no cluster at {}", address)),
            }
        }

        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_config::{Credentials, SeedNode};

    fn cluster_at(host: &str, port: i64) -> Cluster {
        Cluster {
            seed_nodes: vec![SeedNode {
                host_name: host.into(),
                port,
                tls_name: None,
            }],
            ..Default::default()
        }
    }

    fn record(key: &str, generation: u32, value: i64) -> Record {
        let mut bins = Bins::new();
        bins.insert("v".into(), value.into());
        Record {
            namespace: "test".into(),
            set: "s".into(),
            digest: Digest::of("s", key),
            bins,
            generation,
            last_update_time: 1,
            void_time: 0,
        }
    }

    #[tokio::test]
    async fn test_connect_resolves_seed_address() {
        let connector = MemoryConnector::new();
        connector.register("db1:3000", MemoryCluster::new(&["test"]));

        let client = connector.connect(&cluster_at("db1", 3000)).await.unwrap();
        assert_eq!(client.namespaces().await.unwrap(), vec!["test".to_string()]);

        let err = connector.connect(&cluster_at("db2", 3000)).await.err().unwrap();
        assert!(matches!(err, ClusterError::Unreachable(_)));
    }

    #[tokio::test]
    async fn test_credentials_are_checked() {
        let connector = MemoryConnector::new();
        connector.register("db1:3000", MemoryCluster::new(&["test"]).with_credentials("admin", "secret"));

        let mut cluster = cluster_at("db1", 3000);
        cluster.credentials = Some(Credentials {
            user: Some("admin".into()),
            password: Some("wrong".into()),
        });
        let err = connector.connect(&cluster).await.err().unwrap();
        assert!(matches!(err, ClusterError::Authentication(_)));

        cluster.credentials = Some(Credentials {
            user: Some("admin".into()),
            password: Some("secret".into()),
        });
        assert!(connector.connect(&cluster).await.is_ok());
    }

    #[tokio::test]
    async fn test_write_policies() {
        let cluster = MemoryCluster::new(&["test"]);
        let digest = Digest::of("s", "k");

        let policy = WritePolicy::default();
        assert_eq!(cluster.put(&record("k", 5, 1), &policy).await.unwrap(), WriteOutcome::Inserted);

        let create_only = WritePolicy {
            exists: ExistsAction::CreateOnly,
            ..Default::default()
        };
        assert_eq!(cluster.put(&record("k", 6, 2), &create_only).await.unwrap(), WriteOutcome::Existed);

        let generation = WritePolicy {
            generation_check: true,
            ..Default::default()
        };
        assert_eq!(cluster.put(&record("k", 4, 3), &generation).await.unwrap(), WriteOutcome::Fresher);
        assert_eq!(cluster.get("test", &digest).unwrap().bins["v"], 1);

        cluster.put(&record("k", 4, 3), &policy).await.unwrap();
        assert_eq!(cluster.get("test", &digest).unwrap().bins["v"], 3);

        let missing = Record {
            namespace: "nope".into(),
            ..record("k", 1, 1)
        };
        assert!(matches!(
            cluster.put(&missing, &policy).await,
            Err(ClusterError::NamespaceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_auto_provision_and_truncate() {
        let connector = MemoryConnector::auto_provision(vec!["test".into()]);
        let client = connector.connect(&cluster_at("fresh", 3000)).await.unwrap();
        client.put(&record("a", 1, 1), &WritePolicy::default()).await.unwrap();
        assert_eq!(client.object_count("test").await.unwrap(), 1);

        client.truncate("test", None).await.unwrap();
        assert_eq!(client.object_count("test").await.unwrap(), 0);
        assert!(connector.cluster("fresh:3000").is_some());
    }
}
