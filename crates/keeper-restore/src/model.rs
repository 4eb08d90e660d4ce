use std::fmt;
use std::str::FromStr;

use keeper_cluster::{ExistsAction, WritePolicy};
use keeper_config::{
    validate_cluster, validate_compression, validate_encryption, validate_storage, Cluster,
    CompressionPolicy, EncryptionPolicy, Storage,
};
use keeper_core::{validation, TimeBounds, ValidationError};
use keeper_entities::restore_jobs;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

const DEFAULT_BATCH_SIZE: usize = 128;
const DEFAULT_MAX_ASYNC_BATCHES: usize = 32;

/// Rename a namespace while restoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub struct RestoreNamespace {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub destination: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub struct RestorePolicy {
    /// Namespace directories restored concurrently
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel: Option<i64>,
    /// Write regardless of the destination generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_generation: Option<bool>,
    /// Only create records, never touch existing ones
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique: Option<bool>,
    /// Replace existing records instead of merging bins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace: Option<bool>,
    /// Seconds added to every record's expiry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_ttl: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_batch_writes: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_async_batches: Option<i64>,
    /// Records per second
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tps: Option<i64>,
    /// Bytes per second
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bandwidth: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_timeout: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_timeout: Option<i64>,
    /// Bound on reading one artifact from storage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_records: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_indexes: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_udfs: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_list: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin_list: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<RestoreNamespace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<EncryptionPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<CompressionPolicy>,
}

impl RestorePolicy {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validation::positive("parallel", self.parallel)?;
        validation::positive("batch-size", self.batch_size)?;
        validation::positive("tps", self.tps)?;
        validation::positive("max-async-batches", self.max_async_batches)?;
        validation::non_negative("bandwidth", self.bandwidth)?;
        validation::non_negative("socket-timeout", self.socket_timeout)?;
        validation::non_negative("total-timeout", self.total_timeout)?;
        validation::non_negative("timeout", self.timeout)?;
        validation::non_negative("extra-ttl", self.extra_ttl)?;
        if self.unique == Some(true) && self.replace == Some(true) {
            return Err(ValidationError::new(
                "\"unique\" and \"replace\" cannot both be set",
            ));
        }
        if let Some(namespace) = &self.namespace {
            validation::required("source", Some(&namespace.source))?;
            validation::required("destination", Some(&namespace.destination))?;
        }
        if let Some(encryption) = &self.encryption {
            validate_encryption(encryption)?;
        }
        if let Some(compression) = &self.compression {
            validate_compression(compression)?;
        }
        Ok(())
    }

    pub fn write_policy(&self) -> WritePolicy {
        let exists = if self.unique == Some(true) {
            ExistsAction::CreateOnly
        } else if self.replace == Some(true) {
            ExistsAction::Replace
        } else {
            ExistsAction::Update
        };
        WritePolicy {
            exists,
            generation_check: self.no_generation != Some(true),
            extra_ttl: self.extra_ttl.unwrap_or(0),
        }
    }

    pub fn batch_size(&self) -> usize {
        if self.disable_batch_writes == Some(true) {
            return 1;
        }
        self.batch_size
            .filter(|size| *size > 0)
            .map_or(DEFAULT_BATCH_SIZE, |size| size as usize)
    }

    pub fn max_async_batches(&self) -> usize {
        self.max_async_batches
            .filter(|n| *n > 0)
            .map_or(DEFAULT_MAX_ASYNC_BATCHES, |n| n as usize)
    }

    pub fn parallel(&self) -> usize {
        self.parallel.filter(|p| *p > 0).map_or(1, |p| p as usize)
    }

    /// Target namespace of a record read from `namespace`.
    pub fn map_namespace<'a>(&'a self, namespace: &'a str) -> &'a str {
        match &self.namespace {
            Some(mapping) if mapping.source == namespace => &mapping.destination,
            _ => namespace,
        }
    }
}

fn validate_destination(
    destination: Option<&Cluster>,
    destination_name: Option<&str>,
) -> Result<(), ValidationError> {
    match (destination, destination_name.filter(|n| !n.trim().is_empty())) {
        (Some(cluster), _) => validate_cluster(cluster),
        (None, Some(_)) => Ok(()),
        (None, None) => Err(ValidationError::new(
            "must specify either \"destination\" or \"destination-name\"",
        )),
    }
}

/// Restore from a backup path inside a storage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub struct RestoreRequest {
    #[serde(default)]
    pub backup_data_path: Option<String>,
    #[serde(default)]
    pub source: Option<Storage>,
    #[serde(default)]
    pub destination: Option<Cluster>,
    #[serde(default)]
    pub destination_name: Option<String>,
    #[serde(default)]
    pub policy: RestorePolicy,
    /// Accepted for compatibility; `key-secret` sources are not resolvable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_agent: Option<String>,
}

impl RestoreRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validation::required("backup-data-path", self.backup_data_path.as_deref())?;
        match &self.source {
            Some(storage) => validate_storage(storage)?,
            None => return Err(ValidationError::new("\"source\" required")),
        }
        validate_destination(self.destination.as_ref(), self.destination_name.as_deref())?;
        self.policy.validate()
    }
}

/// Restore a routine to a point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub struct RestoreTimestampRequest {
    #[serde(default)]
    pub routine: String,
    /// Epoch millis
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub destination: Option<Cluster>,
    #[serde(default)]
    pub destination_name: Option<String>,
    #[serde(default)]
    pub policy: RestorePolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_agent: Option<String>,
}

impl RestoreTimestampRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validation::required("routine", Some(&self.routine))?;
        match self.time {
            Some(time) if time < 0 => Err(ValidationError::new(format!(
                "\"time\" {} invalid, should not be negative number",
                time
            ))),
            Some(_) => Ok(()),
            None => Err(ValidationError::new("\"time\" required")),
        }?;
        validate_destination(self.destination.as_ref(), self.destination_name.as_deref())?;
        self.policy.validate()
    }
}

/// Restore of a continuous backup from the version index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContinuousRestoreRequest {
    #[serde(default)]
    pub src_cluster_name: String,
    #[serde(default)]
    pub trg_cluster_name: String,
    #[serde(default, rename = "srcNS")]
    pub src_ns: String,
    #[serde(default, rename = "trgNS")]
    pub trg_ns: String,
    #[serde(default)]
    pub set: Option<String>,
    #[serde(default)]
    pub from_time: Option<i64>,
    #[serde(default)]
    pub to_time: Option<i64>,
    #[serde(default)]
    pub src_digests: Option<Vec<String>>,
}

fn not_blank(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new(format!("\"{}\" must not be blank", field)));
    }
    Ok(())
}

impl ContinuousRestoreRequest {
    pub fn validate(&self, scope: ContinuousScope) -> Result<TimeBounds, ValidationError> {
        not_blank("srcClusterName", &self.src_cluster_name)?;
        not_blank("trgClusterName", &self.trg_cluster_name)?;
        not_blank("srcNS", &self.src_ns)?;
        not_blank("trgNS", &self.trg_ns)?;
        match scope {
            ContinuousScope::Set => not_blank("set", self.set.as_deref().unwrap_or_default())?,
            ContinuousScope::Records => {
                if self.src_digests.as_ref().map_or(true, Vec::is_empty) {
                    return Err(ValidationError::new("\"srcDigests\" must not be empty"));
                }
            }
            ContinuousScope::Namespace => {}
        }
        TimeBounds::new(self.from_time, self.to_time)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContinuousScope {
    Namespace,
    Set,
    Records,
}

/// Request of a snapshot restore job, stored with the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RestoreTask {
    Full(RestoreRequest),
    Incremental(RestoreRequest),
    Timestamp(RestoreTimestampRequest),
}

impl RestoreTask {
    pub fn kind(&self) -> &'static str {
        match self {
            RestoreTask::Full(_) => "full",
            RestoreTask::Incremental(_) => "incremental",
            RestoreTask::Timestamp(_) => "timestamp",
        }
    }

    pub fn policy(&self) -> &RestorePolicy {
        match self {
            RestoreTask::Full(request) | RestoreTask::Incremental(request) => &request.policy,
            RestoreTask::Timestamp(request) => &request.policy,
        }
    }

    fn destination(&self) -> (Option<&Cluster>, Option<&str>) {
        match self {
            RestoreTask::Full(request) | RestoreTask::Incremental(request) => {
                (request.destination.as_ref(), request.destination_name.as_deref())
            }
            RestoreTask::Timestamp(request) => {
                (request.destination.as_ref(), request.destination_name.as_deref())
            }
        }
    }

    /// Inline destination, or the name of a configured cluster.
    pub fn destination_ref(&self) -> Result<&Cluster, &str> {
        match self.destination() {
            (Some(cluster), _) => Ok(cluster),
            (None, name) => Err(name.unwrap_or_default()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum RestoreJobState {
    Running,
    Done,
    Failed,
    Cancelled,
}

impl RestoreJobState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "Running",
            Self::Done => "Done",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        self != Self::Running
    }
}

impl fmt::Display for RestoreJobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RestoreJobState {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "running" => Ok(Self::Running),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(ValidationError::new(format!(
                "invalid value validation error: '{}' is not a valid status.",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub struct RestoreStats {
    pub read_records: u64,
    pub inserted_records: u64,
    pub existed_records: u64,
    pub fresher_records: u64,
    /// Filtered out by the set list
    pub skipped_records: u64,
    pub expired_records: u64,
    /// Left without bins by the bin list
    pub ignored_records: u64,
    pub total_bytes: u64,
    pub index_count: u64,
    pub udf_count: u64,
}

impl RestoreStats {
    pub fn merge(&mut self, other: &RestoreStats) {
        self.read_records += other.read_records;
        self.inserted_records += other.inserted_records;
        self.existed_records += other.existed_records;
        self.fresher_records += other.fresher_records;
        self.skipped_records += other.skipped_records;
        self.expired_records += other.expired_records;
        self.ignored_records += other.ignored_records;
        self.total_bytes += other.total_bytes;
        self.index_count += other.index_count;
        self.udf_count += other.udf_count;
    }
}

impl From<&restore_jobs::Model> for RestoreStats {
    fn from(model: &restore_jobs::Model) -> Self {
        Self {
            read_records: model.read_records as u64,
            inserted_records: model.inserted_records as u64,
            existed_records: model.existed_records as u64,
            fresher_records: model.fresher_records as u64,
            skipped_records: model.skipped_records as u64,
            expired_records: model.expired_records as u64,
            ignored_records: model.ignored_records as u64,
            total_bytes: model.total_bytes as u64,
            index_count: model.index_count as u64,
            udf_count: model.udf_count as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub struct RestoreJobStatus {
    pub id: i32,
    /// full, incremental or timestamp
    pub kind: String,
    pub status: RestoreJobState,
    #[serde(flatten)]
    pub stats: RestoreStats,
    pub start_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<restore_jobs::Model> for RestoreJobStatus {
    fn from(model: restore_jobs::Model) -> Self {
        Self {
            id: model.id,
            status: model.status.parse().unwrap_or(RestoreJobState::Failed),
            stats: RestoreStats::from(&model),
            kind: model.kind,
            start_time: model.created_at.to_rfc3339(),
            finish_time: model.finished_at.map(|t| t.to_rfc3339()),
            error: model.error,
        }
    }
}

/// Parameters of a continuous restore background job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ContinuousRestoreParams {
    pub request: ContinuousRestoreRequest,
    pub scope: ContinuousScope,
    /// Name of the continuous backup read from
    pub backup: String,
    pub destination: Cluster,
}
