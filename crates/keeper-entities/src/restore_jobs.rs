use keeper_core::DBDateTime;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "restore_jobs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub kind: String,
    pub status: String,
    pub request: Json,
    pub read_records: i64,
    pub inserted_records: i64,
    pub existed_records: i64,
    pub fresher_records: i64,
    pub skipped_records: i64,
    pub expired_records: i64,
    pub ignored_records: i64,
    pub total_bytes: i64,
    pub index_count: i32,
    pub udf_count: i32,
    pub error: Option<String>,
    pub created_at: DBDateTime,
    pub finished_at: Option<DBDateTime>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
