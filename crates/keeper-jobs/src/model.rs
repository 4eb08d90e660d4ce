use std::fmt;
use std::str::FromStr;

use keeper_entities::background_jobs;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Running,
    Paused,
    Done,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RUNNING" => Ok(Self::Running),
            "PAUSED" => Ok(Self::Paused),
            "DONE" => Ok(Self::Done),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(format!("'{}' is not a valid job status", other)),
        }
    }
}

/// Job state as reported by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub struct JobInfo {
    pub id: String,
    pub kind: String,
    pub status: JobStatus,
    pub processed: i64,
    pub total: i64,
    pub percentage_done: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created: String,
    pub updated: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished: Option<String>,
}

impl From<background_jobs::Model> for JobInfo {
    fn from(model: background_jobs::Model) -> Self {
        let status = model.status.parse().unwrap_or(JobStatus::Failed);
        let percentage_done = match (status, model.total) {
            (JobStatus::Done, _) => 100,
            (_, total) if total > 0 => (model.processed.min(total) * 100) / total,
            _ => 0,
        };
        Self {
            id: model.id,
            kind: model.kind,
            status,
            processed: model.processed,
            total: model.total,
            percentage_done,
            error: model.error,
            created: model.created_at.to_rfc3339(),
            updated: model.updated_at.to_rfc3339(),
            finished: model.finished_at.map(|t| t.to_rfc3339()),
        }
    }
}
