//! Object naming inside a backup storage.
//!
//! ```text
//! {routine}/backup/{created}/data/{namespace}/records_00000.kpr
//! {routine}/backup/{created}/data/{namespace}/smd.kpr
//! {routine}/backup/{created}/data/{namespace}/metadata.yaml
//! {routine}/incremental/{created}/data/{namespace}/...
//! ```

use keeper_storage::join_key;

use crate::model::BackupType;

pub const DATA_DIR: &str = "data";
pub const RECORDS_PREFIX: &str = "records_";
pub const SMD_FILE: &str = "smd.kpr";
pub const METADATA_FILE: &str = "metadata.yaml";

/// Root of one snapshot, shared by all of its namespaces.
pub fn snapshot_dir(routine: &str, backup_type: BackupType, created: i64) -> String {
    join_key(&[routine, backup_type.directory(), &created.to_string()])
}

pub fn namespace_dir(routine: &str, backup_type: BackupType, created: i64, namespace: &str) -> String {
    join_key(&[&snapshot_dir(routine, backup_type, created), DATA_DIR, namespace])
}

pub fn records_file(namespace_dir: &str, index: usize) -> String {
    join_key(&[namespace_dir, &format!("{}{:05}.kpr", RECORDS_PREFIX, index)])
}

pub fn is_records_file(key: &str) -> bool {
    key.rsplit('/')
        .next()
        .is_some_and(|name| name.starts_with(RECORDS_PREFIX) && name.ends_with(".kpr"))
}

/// Snapshot directory owning an object key: everything before `/data/`.
pub fn snapshot_of(key: &str) -> Option<&str> {
    key.find(&format!("/{}/", DATA_DIR)).map(|at| &key[..at])
}
