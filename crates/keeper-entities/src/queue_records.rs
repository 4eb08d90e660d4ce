use keeper_core::DBDateTime;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "queue_records")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub backup_name: String,
    pub namespace: String,
    pub set_name: String,
    pub digest: String,
    pub bins: Json,
    pub generation: i32,
    /// Source last-update-time in epoch millis
    pub last_update_time: i64,
    pub deleted: bool,
    /// NEW, IN_PROGRESS, COMMITTED or FAILED
    pub status: String,
    pub attempts: i32,
    pub claimed_at: Option<i64>,
    pub created_at: DBDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
