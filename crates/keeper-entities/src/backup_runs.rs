use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "backup_runs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub routine: String,
    pub namespace: String,
    /// "full" or "incremental"
    pub backup_type: String,
    /// Snapshot time in epoch millis, also the directory name in storage
    pub created: i64,
    /// Lower bound of the scan (0 for full backups)
    pub from_time: i64,
    pub finished: i64,
    pub duration: i64,
    pub record_count: i64,
    pub byte_count: i64,
    pub file_count: i32,
    pub udf_count: i32,
    pub secondary_index_count: i32,
    pub storage_key: String,
    pub compression: String,
    pub encryption: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
