//! Records and cluster metadata exchanged with a cluster.

use std::fmt;
use std::str::FromStr;

use keeper_config::PartitionRange;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use utoipa::ToSchema;

pub const DIGEST_LEN: usize = 20;

/// Fixed-length hash of a record's set and user key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(pub [u8; DIGEST_LEN]);

impl Digest {
    pub fn of(set: &str, key: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(set.as_bytes());
        hasher.update(key.as_bytes());
        let hash = hasher.finalize();
        let mut bytes = [0u8; DIGEST_LEN];
        bytes.copy_from_slice(&hash[..DIGEST_LEN]);
        Self(bytes)
    }

    /// Partition owning this digest, 0..4096.
    pub fn partition_id(&self) -> u16 {
        u16::from_le_bytes([self.0[0], self.0[1]]) & 0x0FFF
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Digest {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = hex::decode(s.trim()).map_err(|e| format!("invalid digest \"{}\": {}", s, e))?;
        let bytes: [u8; DIGEST_LEN] = raw
            .try_into()
            .map_err(|_| format!("invalid digest \"{}\": expected {} bytes", s, DIGEST_LEN))?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for Digest {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        digest.to_hex()
    }
}

pub type Bins = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub struct Record {
    pub namespace: String,
    #[serde(default)]
    pub set: String,
    #[schema(value_type = String)]
    pub digest: Digest,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub bins: Bins,
    #[serde(default)]
    pub generation: u32,
    /// Epoch milliseconds of the last write
    #[serde(default)]
    pub last_update_time: i64,
    /// Epoch milliseconds at which the record expires, 0 for never
    #[serde(default)]
    pub void_time: i64,
}

impl Record {
    pub fn is_expired(&self, now_millis: i64) -> bool {
        self.void_time > 0 && self.void_time <= now_millis
    }

    /// Keep only the listed bins.
    pub fn project(&mut self, bins: &[String]) {
        self.bins.retain(|name, _| bins.iter().any(|b| b == name));
    }

    /// Approximate encoded size used for bandwidth accounting.
    pub fn size_hint(&self) -> usize {
        self.namespace.len()
            + self.set.len()
            + DIGEST_LEN
            + serde_json::to_vec(&self.bins).map(|b| b.len()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub struct Udf {
    pub name: String,
    #[serde(default)]
    pub language: String,
    /// Base64 encoded module
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub struct SecondaryIndex {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub set: String,
    pub bin: String,
    #[serde(default)]
    pub index_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub struct User {
    pub name: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub struct Role {
    pub name: String,
    #[serde(default)]
    pub privileges: Vec<String>,
}

/// Selection for a namespace scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ScanRequest {
    pub namespace: String,
    /// Empty scans every set
    #[serde(default)]
    pub sets: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bins: Option<Vec<String>>,
    /// Empty scans every partition
    #[serde(default)]
    pub partitions: Vec<ScanPartitions>,
    /// Only records written strictly after this time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_after: Option<i64>,
    /// Only records written at or before this time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_before: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanPartitions {
    pub begin: u16,
    pub count: u16,
}

impl From<PartitionRange> for ScanPartitions {
    fn from(range: PartitionRange) -> Self {
        Self {
            begin: range.begin,
            count: range.count,
        }
    }
}

impl ScanRequest {
    pub fn namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        if !self.sets.is_empty() && !self.sets.iter().any(|s| s == &record.set) {
            return false;
        }
        if !self.partitions.is_empty() {
            let partition = record.digest.partition_id();
            let owned = self.partitions.iter().any(|range| {
                partition >= range.begin && u32::from(partition) < u32::from(range.begin) + u32::from(range.count)
            });
            if !owned {
                return false;
            }
        }
        if let Some(after) = self.modified_after {
            if record.last_update_time <= after {
                return false;
            }
        }
        if let Some(before) = self.modified_before {
            if record.last_update_time > before {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExistsAction {
    /// Create or merge bins into an existing record
    #[default]
    Update,
    /// Fail on an existing record
    CreateOnly,
    /// Create or replace every bin
    Replace,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WritePolicy {
    pub exists: ExistsAction,
    /// Skip the write when the destination generation is newer
    pub generation_check: bool,
    /// Seconds added to the record expiry
    pub extra_ttl: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WriteOutcome {
    Inserted,
    Existed,
    Fresher,
}

/// Where a cluster ships its change feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ShippingTarget {
    pub dc_name: String,
    pub enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(set: &str, key: &str, updated: i64) -> Record {
        Record {
            namespace: "test".into(),
            set: set.into(),
            digest: Digest::of(set, key),
            bins: Bins::new(),
            generation: 1,
            last_update_time: updated,
            void_time: 0,
        }
    }

    #[test]
    fn test_digest_hex_round_trip() {
        let digest = Digest::of("users", "alice");
        let parsed: Digest = digest.to_hex().parse().unwrap();
        assert_eq!(parsed, digest);
        assert!(digest.partition_id() < 4096);
        assert!("abc".parse::<Digest>().is_err());
    }

    #[test]
    fn test_scan_filters() {
        let r = record("users", "alice", 100);
        assert!(ScanRequest::namespace("test").matches(&r));

        let mut by_set = ScanRequest::namespace("test");
        by_set.sets = vec!["orders".into()];
        assert!(!by_set.matches(&r));

        let mut incremental = ScanRequest::namespace("test");
        incremental.modified_after = Some(100);
        assert!(!incremental.matches(&r));
        incremental.modified_after = Some(99);
        assert!(incremental.matches(&r));

        let partition = r.digest.partition_id();
        let mut by_partition = ScanRequest::namespace("test");
        by_partition.partitions = vec![ScanPartitions { begin: partition, count: 1 }];
        assert!(by_partition.matches(&r));
        by_partition.partitions = vec![ScanPartitions { begin: (partition + 1) % 4096, count: 1 }];
        assert!(!by_partition.matches(&r));
    }

    #[test]
    fn test_projection_and_expiry() {
        let mut r = record("users", "bob", 1);
        r.bins.insert("a".into(), 1.into());
        r.bins.insert("b".into(), 2.into());
        r.project(&["a".to_string()]);
        assert_eq!(r.bins.len(), 1);

        assert!(!r.is_expired(10));
        r.void_time = 5;
        assert!(r.is_expired(10));
    }
}
