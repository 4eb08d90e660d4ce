//! Whole-graph validation.
//!
//! A configuration is only committed when every entity is valid on its own
//! and every reference between entities resolves.

use std::str::FromStr;

use cron::Schedule;
use keeper_core::validation::{self, ValidationError, ValidationResult};

use crate::model::*;

pub const PARTITION_COUNT: u16 = 4096;

/// Inclusive start and length of a partition range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionRange {
    pub begin: u16,
    pub count: u16,
}

impl PartitionRange {
    pub fn contains(&self, partition: u16) -> bool {
        partition >= self.begin && partition < self.begin + self.count
    }
}

/// Parse `begin[-count]` entries separated by commas.
pub fn parse_partition_list(raw: &str) -> Result<Vec<PartitionRange>, ValidationError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            parse_partition_entry(entry).ok_or_else(|| {
                ValidationError::new(format!("invalid partition list: \"{}\"", entry))
            })
        })
        .collect()
}

fn parse_partition_entry(entry: &str) -> Option<PartitionRange> {
    let (begin, count) = match entry.split_once('-') {
        Some((begin, count)) => (begin.parse::<u16>().ok()?, count.parse::<u16>().ok()?),
        None => (entry.parse::<u16>().ok()?, 1),
    };
    if count == 0 || begin >= PARTITION_COUNT || u32::from(begin) + u32::from(count) > u32::from(PARTITION_COUNT) {
        return None;
    }
    Some(PartitionRange { begin, count })
}

/// Parse a cron expression; five-field expressions get a zero seconds field.
pub fn parse_cron(expression: &str) -> Result<Schedule, ValidationError> {
    let trimmed = expression.trim();
    let normalized = if !trimmed.starts_with('@') && trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    };
    Schedule::from_str(&normalized).map_err(|e| {
        ValidationError::new(format!("invalid cron expression \"{}\": {}", expression, e))
    })
}

pub fn validate_config(config: &Config) -> ValidationResult {
    for (name, cluster) in &config.aerospike_clusters {
        validation::not_empty("cluster name", name)?;
        validate_cluster(cluster).map_err(|e| e.context(&format!("cluster \"{}\"", name)))?;
    }
    for (name, storage) in &config.storage {
        validation::not_empty("storage name", name)?;
        validate_storage(storage).map_err(|e| e.context(&format!("storage \"{}\"", name)))?;
    }
    for (name, policy) in &config.backup_policies {
        validation::not_empty("policy name", name)?;
        validate_backup_policy(policy)?;
    }
    for (name, routine) in &config.backup_routines {
        validation::not_empty("routine name", name)?;
        validate_routine(config, routine)?;
    }
    for (name, connection) in &config.connections {
        validation::not_empty("srcClusterName", name)?;
        validate_connection(connection)?;
    }
    for (name, policy) in &config.continuous_policies {
        validation::not_empty("policy name", name)?;
        validate_continuous_policy(policy)?;
    }
    for (name, backup) in &config.continuous_backups {
        validation::not_empty("backup name", name)?;
        validate_continuous_backup(config, backup)?;
    }
    Ok(())
}

pub fn validate_cluster(cluster: &Cluster) -> ValidationResult {
    if cluster.seed_nodes.is_empty() {
        return Err(ValidationError::new("\"seed-nodes\" required"));
    }
    for node in &cluster.seed_nodes {
        validation::not_empty("hostname", &node.host_name)?;
        validation::port(node.port)?;
    }
    validation::non_negative("conn-timeout", cluster.conn_timeout)?;
    validation::positive("max-parallel-scans", cluster.max_parallel_scans)?;
    Ok(())
}

pub fn validate_storage(storage: &Storage) -> ValidationResult {
    match (&storage.local_storage, &storage.s3_storage) {
        (Some(local), None) => validation::required("path", Some(&local.path)),
        (None, Some(s3)) => {
            validation::required("bucket", Some(&s3.bucket))?;
            validation::required("path", Some(&s3.path))
        }
        _ => Err(ValidationError::new(
            "exactly one of \"local-storage\" or \"s3-storage\" must be set",
        )),
    }
}

pub fn validate_backup_policy(policy: &BackupPolicy) -> ValidationResult {
    validation::positive("parallel", policy.parallel)?;
    validation::non_negative("socket-timeout", policy.socket_timeout)?;
    validation::non_negative("total-timeout", policy.total_timeout)?;
    validation::non_negative("records-per-second", policy.records_per_second)?;
    validation::non_negative("bandwidth", policy.bandwidth)?;
    validation::non_negative("file-limit", policy.file_limit)?;
    if let Some(retry) = &policy.retry_policy {
        validate_retry_policy(retry)?;
    }
    if let Some(encryption) = &policy.encryption {
        validate_encryption(encryption)?;
    }
    if let Some(compression) = &policy.compression {
        validate_compression(compression)?;
    }
    if let Some(retention) = &policy.retention {
        validation::positive("full", retention.full)?;
        validation::non_negative("incremental", retention.incremental)?;
    }
    Ok(())
}

pub fn validate_retry_policy(retry: &RetryPolicy) -> ValidationResult {
    validation::positive("base-timeout", retry.base_timeout)?;
    validation::non_negative("max-retries", retry.max_retries)?;
    if let Some(multiplier) = retry.multiplier {
        if !(multiplier > 0.0) {
            return Err(ValidationError::new(format!(
                "\"multiplier\" {} invalid, should be positive number",
                multiplier
            )));
        }
    }
    Ok(())
}

pub fn validate_encryption(policy: &EncryptionPolicy) -> ValidationResult {
    let mode = EncryptionMode::from_str(&policy.mode)
        .map_err(|_| ValidationError::new("invalid encryption mode"))?;
    if mode == EncryptionMode::None {
        return Ok(());
    }
    let sources = [&policy.key_file, &policy.key_env, &policy.key_secret]
        .iter()
        .filter(|source| source.as_deref().is_some_and(|s| !s.trim().is_empty()))
        .count();
    if sources != 1 {
        return Err(ValidationError::new(
            "encryption policy invalid: exactly one of \"key-file\", \"key-env\" or \"key-secret\" required",
        ));
    }
    Ok(())
}

pub fn validate_compression(policy: &CompressionPolicy) -> ValidationResult {
    CompressionMode::from_str(&policy.mode)
        .map_err(|_| ValidationError::new("invalid compression mode"))?;
    if let Some(level) = policy.level {
        if !(0..=9).contains(&level) {
            return Err(ValidationError::new("invalid compression level"));
        }
    }
    Ok(())
}

fn validate_routine(config: &Config, routine: &BackupRoutine) -> ValidationResult {
    validation::required("backup-policy", Some(&routine.backup_policy))?;
    validation::required("source-cluster", Some(&routine.source_cluster))?;
    validation::required("storage", Some(&routine.storage))?;

    if !config.backup_policies.contains_key(&routine.backup_policy) {
        return Err(not_found("backup policy", &routine.backup_policy));
    }
    if !config.storage.contains_key(&routine.storage) {
        return Err(not_found("storage", &routine.storage));
    }
    if config.resolve_cluster(&routine.source_cluster).is_none() {
        return Err(not_found("Aerospike cluster", &routine.source_cluster));
    }

    validation::required("interval-cron", Some(&routine.interval_cron))?;
    parse_cron(&routine.interval_cron)?;
    if let Some(incremental) = &routine.incr_interval_cron {
        if !incremental.trim().is_empty() {
            parse_cron(incremental)?;
        }
    }
    if let Some(partitions) = &routine.partition_list {
        parse_partition_list(partitions)?;
    }
    Ok(())
}

pub fn validate_connection(connection: &ClusterConnection) -> ValidationResult {
    validation::not_empty("srcClusterName", &connection.src_cluster_name)?;
    validation::not_empty("srcClusterHost", &connection.src_cluster_host)?;
    validation::port(connection.src_cluster_port)?;
    validation::not_empty("backupDCName", &connection.backup_dc_name)?;
    if connection.backup_dc_name.chars().count() >= 32 {
        return Err(ValidationError::new("dc name must be less than 32 characters"));
    }
    if let Some(smd) = &connection.smd_policy {
        validation::non_negative("duration", Some(smd.duration))?;
        validation::non_negative("keepFor", Some(smd.keep_for))?;
    }
    Ok(())
}

fn validate_continuous_policy(policy: &ContinuousPolicy) -> ValidationResult {
    validation::positive("duration", Some(policy.duration))?;
    validation::non_negative("retention", Some(policy.retention))?;
    validation::non_negative("keepFor", policy.keep_for)?;
    validation::non_negative("maxThroughput", policy.max_throughput)?;
    Ok(())
}

fn validate_continuous_backup(config: &Config, backup: &ContinuousBackup) -> ValidationResult {
    validation::required("srcClusterName", Some(&backup.src_cluster_name))?;
    validation::required("srcNS", Some(&backup.src_ns))?;
    validation::required("backupNS", Some(&backup.backup_ns))?;
    validation::required("policy", Some(&backup.policy))?;
    if !config.continuous_policies.contains_key(&backup.policy) {
        return Err(not_found("policy", &backup.policy));
    }
    // A disabled backup may outlive its connection
    if backup.enabled && !config.connections.contains_key(&backup.src_cluster_name) {
        return Err(not_found("connection", &backup.src_cluster_name));
    }
    Ok(())
}

fn not_found(kind: &str, name: &str) -> ValidationError {
    ValidationError::new(format!("not found validation error: {} \"{}\"", kind, name))
}
