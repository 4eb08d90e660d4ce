use keeper_core::DBDateTime;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Long running maintenance work that survives restarts.
///
/// `cursor` is owned by the executor of `kind`; resuming a job hands the
/// last persisted cursor back to it.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "background_jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub kind: String,
    pub status: String,
    pub params: Json,
    pub cursor: Option<Json>,
    pub processed: i64,
    pub total: i64,
    pub error: Option<String>,
    pub created_at: DBDateTime,
    pub updated_at: DBDateTime,
    pub finished_at: Option<DBDateTime>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
