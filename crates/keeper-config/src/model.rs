//! Configuration document and the entities it holds.
//!
//! Scheduled-backup entities use kebab-case on the wire, continuous-backup
//! entities use camelCase, matching the two API families.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// The whole configuration graph. Names are the map keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub aerospike_clusters: BTreeMap<String, Cluster>,
    #[serde(default)]
    pub storage: BTreeMap<String, Storage>,
    #[serde(default)]
    pub backup_policies: BTreeMap<String, BackupPolicy>,
    #[serde(default)]
    pub backup_routines: BTreeMap<String, BackupRoutine>,
    #[serde(default)]
    pub continuous_policies: BTreeMap<String, ContinuousPolicy>,
    #[serde(default)]
    pub continuous_backups: BTreeMap<String, ContinuousBackup>,
    /// Keyed by source cluster name
    #[serde(default)]
    pub connections: BTreeMap<String, ClusterConnection>,
}

impl Config {
    /// Resolve a cluster by name, falling back to a connection's source cluster.
    pub fn resolve_cluster(&self, name: &str) -> Option<Cluster> {
        if let Some(cluster) = self.aerospike_clusters.get(name) {
            return Some(cluster.clone());
        }
        self.connections.get(name).map(ClusterConnection::as_cluster)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub struct Cluster {
    #[serde(default)]
    pub seed_nodes: Vec<SeedNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Connection timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conn_timeout: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel_scans: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub struct SeedNode {
    #[serde(default)]
    pub host_name: String,
    #[serde(default)]
    pub port: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_name: Option<String>,
}

impl SeedNode {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host_name, self.port)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub struct Storage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_storage: Option<LocalStorage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_storage: Option<S3Storage>,
}

impl Storage {
    pub fn local(path: impl Into<String>) -> Self {
        Self {
            local_storage: Some(LocalStorage { path: path.into() }),
            s3_storage: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub struct LocalStorage {
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub struct S3Storage {
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_endpoint_override: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_path_style: Option<bool>,
}

/// Tunables for a backup run. Absent fields take service defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub struct BackupPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_timeout: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_timeout: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records_per_second: Option<i64>,
    /// Bytes per second
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bandwidth: Option<i64>,
    /// Records per output file, 0 for unbounded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_limit: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_records: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_indexes: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_udfs: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sealed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<EncryptionPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<CompressionPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention: Option<RetentionPolicy>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub struct RetryPolicy {
    /// Initial delay between attempts in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_timeout: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub struct EncryptionPolicy {
    #[serde(default)]
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_secret: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub struct CompressionPolicy {
    #[serde(default)]
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub struct RetentionPolicy {
    /// Number of full backups to keep
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full: Option<i64>,
    /// Keep incrementals belonging to this many of the newest full backups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incremental: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum EncryptionMode {
    None,
    Aes128,
    Aes256,
}

impl FromStr for EncryptionMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "" | "NONE" => Ok(Self::None),
            "AES128" => Ok(Self::Aes128),
            "AES256" => Ok(Self::Aes256),
            _ => Err(()),
        }
    }
}

impl fmt::Display for EncryptionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "NONE",
            Self::Aes128 => "AES128",
            Self::Aes256 => "AES256",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum CompressionMode {
    None,
    Gzip,
}

impl FromStr for CompressionMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "" | "NONE" => Ok(Self::None),
            "GZIP" => Ok(Self::Gzip),
            _ => Err(()),
        }
    }
}

impl fmt::Display for CompressionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "NONE",
            Self::Gzip => "GZIP",
        })
    }
}

/// Binds a source cluster, namespaces, storage, policy and schedule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub struct BackupRoutine {
    #[serde(default)]
    pub backup_policy: String,
    #[serde(default)]
    pub source_cluster: String,
    #[serde(default)]
    pub storage: String,
    #[serde(default)]
    pub interval_cron: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incr_interval_cron: Option<String>,
    /// Empty means every namespace of the source cluster
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_list: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin_list: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_list: Option<String>,
    #[serde(default)]
    pub disabled: bool,
}

/// Checkpointing policy for continuous backups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContinuousPolicy {
    #[serde(default)]
    pub name: String,
    /// Seconds between checkpoints
    #[serde(default)]
    pub duration: i64,
    /// Days to keep committed versions, 0 keeps forever
    #[serde(default)]
    pub retention: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_for: Option<i64>,
    /// Records per second committed, 0 for unbounded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_throughput: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_sync: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContinuousBackup {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub src_cluster_name: String,
    #[serde(default, rename = "srcNS")]
    pub src_ns: String,
    #[serde(default, rename = "backupNS")]
    pub backup_ns: String,
    #[serde(default)]
    pub policy: String,
    /// Empty means every set of the namespace
    #[serde(default)]
    pub sets: Vec<String>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl ContinuousBackup {
    pub fn accepts(&self, namespace: &str, set: &str) -> bool {
        self.enabled
            && self.src_ns == namespace
            && (self.sets.is_empty() || self.sets.iter().any(|s| s == set))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterRole {
    Shipping,
    Restore,
}

/// Shipping link between a source cluster and this service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConnection {
    #[serde(default)]
    pub src_cluster_name: String,
    #[serde(default)]
    pub src_cluster_host: String,
    #[serde(default)]
    pub src_cluster_port: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_cluster_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_cluster_pwd: Option<String>,
    #[serde(default, rename = "backupDCName")]
    pub backup_dc_name: String,
    #[serde(default)]
    pub cluster_roles: Vec<ClusterRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smd_policy: Option<SmdPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smd_last_executed: Option<i64>,
}

impl ClusterConnection {
    pub fn as_cluster(&self) -> Cluster {
        let credentials = self.src_cluster_user.as_ref().map(|user| Credentials {
            user: Some(user.clone()),
            password: self.src_cluster_pwd.clone(),
        });
        Cluster {
            seed_nodes: vec![SeedNode {
                host_name: self.src_cluster_host.clone(),
                port: self.src_cluster_port,
                tls_name: None,
            }],
            credentials,
            label: Some(self.src_cluster_name.clone()),
            conn_timeout: None,
            max_parallel_scans: None,
        }
    }
}

/// Retention of shipped system metadata, both values in seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SmdPolicy {
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub keep_for: i64,
}
