use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "smd_snapshots")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub connection_name: String,
    /// users, roles, udfs or sindexes
    pub kind: String,
    pub payload: Json,
    pub captured_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
