use std::fmt;
use std::str::FromStr;

use keeper_cluster::{Bins, Digest};
use keeper_entities::queue_records;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    New,
    InProgress,
    Committed,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::New => "NEW",
            QueueStatus::InProgress => "IN_PROGRESS",
            QueueStatus::Committed => "COMMITTED",
            QueueStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(QueueStatus::New),
            "IN_PROGRESS" => Ok(QueueStatus::InProgress),
            "COMMITTED" => Ok(QueueStatus::Committed),
            "FAILED" => Ok(QueueStatus::Failed),
            other => Err(format!("unknown queue status {}", other)),
        }
    }
}

/// One write or delete shipped from a source cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub struct Mutation {
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
    pub last_update_time: i64,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub struct QueueEntry {
    pub id: i32,
    pub backup_name: String,
    pub namespace: String,
    pub set: String,
    pub digest: String,
    pub generation: i32,
    pub last_update_time: i64,
    pub deleted: bool,
    pub status: String,
    pub attempts: i32,
    pub claimed_at: Option<i64>,
}

impl From<queue_records::Model> for QueueEntry {
    fn from(model: queue_records::Model) -> Self {
        Self {
            id: model.id,
            backup_name: model.backup_name,
            namespace: model.namespace,
            set: model.set_name,
            digest: model.digest,
            generation: model.generation,
            last_update_time: model.last_update_time,
            deleted: model.deleted,
            status: model.status,
            attempts: model.attempts,
            claimed_at: model.claimed_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub struct QueueStats {
    pub new: u64,
    pub in_process: u64,
    pub committed: u64,
    pub failed: u64,
    pub all: u64,
}

/// Result of committing one group of claimed records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    pub committed: u64,
    pub duplicates: u64,
    pub stale: u64,
    pub key_not_found: u64,
}
