use std::sync::Arc;

use async_trait::async_trait;
use keeper_core::now_millis;
use keeper_jobs::{JobContext, JobError, JobExecutor};
use serde::{Deserialize, Serialize};

use crate::service::QueueService;

pub const QUEUE_RECOVERY_JOB: &str = "queue-recovery";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryParams {
    /// Only rows claimed at least this long ago are recovered
    #[serde(default)]
    pub max_age_ms: i64,
}

/// Immediate zombie sweep run as a background job.
pub struct QueueRecoveryExecutor {
    service: Arc<QueueService>,
}

impl QueueRecoveryExecutor {
    pub fn new(service: Arc<QueueService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl JobExecutor for QueueRecoveryExecutor {
    fn kind(&self) -> &'static str {
        QUEUE_RECOVERY_JOB
    }

    async fn run(&self, ctx: &mut JobContext) -> Result<(), JobError> {
        let params: RecoveryParams = ctx.params()?;
        ctx.check_cancelled()?;
        let recovered = self
            .service
            .recover_zombies(now_millis() - params.max_age_ms.max(0))
            .await
            .map_err(|e| JobError::failed(e.to_string()))? as i64;
        ctx.set_total(recovered).await?;
        ctx.checkpoint(&recovered, recovered).await
    }
}
