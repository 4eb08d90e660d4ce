use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One committed version of a record in a continuous backup.
///
/// Unique on (backup_name, digest, timestamp).
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "record_versions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub backup_name: String,
    pub namespace: String,
    pub set_name: String,
    pub digest: String,
    pub timestamp: i64,
    pub generation: i32,
    pub deleted: bool,
    /// Storage key of the batch object holding the record
    pub object_key: String,
    /// Line of the record inside the batch object
    pub line: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
