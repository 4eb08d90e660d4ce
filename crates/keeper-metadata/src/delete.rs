use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use keeper_core::{validation, TimeBounds, ValidationError};
use keeper_entities::record_versions;
use keeper_jobs::{JobContext, JobError, JobExecutor};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use utoipa::ToSchema;

use crate::index::{versions_query, MetadataIndex, VersionFilter};

pub const DELETE_BACKUP_DATA_JOB: &str = "delete-backup-data";
const DELETE_CHUNK: u64 = 500;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteBackupDataRequest {
    #[serde(default)]
    pub continuous_backup_name: String,
    #[serde(default)]
    pub set: Option<String>,
    #[serde(default)]
    pub from_time: Option<i64>,
    #[serde(default)]
    pub to_time: Option<i64>,
}

impl DeleteBackupDataRequest {
    pub fn validate(&self) -> Result<TimeBounds, ValidationError> {
        validation::required("continuousBackupName", Some(&self.continuous_backup_name))?;
        TimeBounds::new(self.from_time, self.to_time)
    }

    fn filter(&self) -> Result<VersionFilter, ValidationError> {
        Ok(VersionFilter {
            set: self.set.clone().filter(|s| !s.is_empty()),
            bounds: self.validate()?,
            ..Default::default()
        })
    }
}

/// Deletes index rows in id order, then batch objects nothing references
/// any more. The cursor is the last deleted row id.
pub struct DeleteBackupDataExecutor {
    db: Arc<DatabaseConnection>,
    index: Arc<MetadataIndex>,
}

impl DeleteBackupDataExecutor {
    pub fn new(db: Arc<DatabaseConnection>, index: Arc<MetadataIndex>) -> Self {
        Self { db, index }
    }

    async fn drop_unreferenced(&self, keys: BTreeSet<String>) -> Result<(), JobError> {
        let storage = self.index.storage();
        for key in keys {
            let remaining = record_versions::Entity::find()
                .filter(record_versions::Column::ObjectKey.eq(key.as_str()))
                .count(self.db.as_ref())
                .await?;
            if remaining == 0 {
                storage
                    .delete(&key)
                    .await
                    .map_err(|e| JobError::failed(e.to_string()))?;
                debug!("Removed batch object {}", key);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl JobExecutor for DeleteBackupDataExecutor {
    fn kind(&self) -> &'static str {
        DELETE_BACKUP_DATA_JOB
    }

    async fn run(&self, ctx: &mut JobContext) -> Result<(), JobError> {
        let request: DeleteBackupDataRequest = ctx.params()?;
        let filter = request
            .filter()
            .map_err(|e| JobError::failed(e.to_string()))?;
        let backup = request.continuous_backup_name.as_str();

        let mut cursor: i32 = ctx.cursor()?.unwrap_or(0);
        let mut processed = ctx.processed;
        if ctx.cursor.is_none() {
            let total = versions_query(backup, &filter).count(self.db.as_ref()).await?;
            ctx.set_total(total as i64).await?;
        }

        loop {
            ctx.check_cancelled()?;
            let chunk = versions_query(backup, &filter)
                .filter(record_versions::Column::Id.gt(cursor))
                .order_by_asc(record_versions::Column::Id)
                .limit(DELETE_CHUNK)
                .all(self.db.as_ref())
                .await?;
            let Some(last) = chunk.last() else {
                break;
            };
            cursor = last.id;

            let ids: Vec<i32> = chunk.iter().map(|row| row.id).collect();
            let keys: BTreeSet<String> = chunk.into_iter().map(|row| row.object_key).collect();
            let deleted = record_versions::Entity::delete_many()
                .filter(record_versions::Column::Id.is_in(ids))
                .exec(self.db.as_ref())
                .await?;
            self.drop_unreferenced(keys).await?;

            processed += deleted.rows_affected as i64;
            ctx.checkpoint(&cursor, processed).await?;
        }

        info!("Deleted {} record versions of continuous backup {}", processed, backup);
        Ok(())
    }
}
