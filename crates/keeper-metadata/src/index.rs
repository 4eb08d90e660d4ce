//! Queries over committed record versions of continuous backups.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use keeper_cluster::{Digest, Record};
use keeper_core::{TimeBounds, ValidationError};
use keeper_entities::record_versions;
use keeper_storage::{CodecOptions, StorageBackend};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Select,
};

use crate::error::MetadataError;

/// Which versions of a continuous backup to look at.
#[derive(Debug, Clone, Default)]
pub struct VersionFilter {
    pub namespace: Option<String>,
    pub set: Option<String>,
    pub digests: Option<Vec<String>>,
    pub bounds: TimeBounds,
}

pub struct MetadataIndex {
    db: Arc<DatabaseConnection>,
    storage: Arc<dyn StorageBackend>,
}

impl MetadataIndex {
    pub fn new(db: Arc<DatabaseConnection>, storage: Arc<dyn StorageBackend>) -> Self {
        Self { db, storage }
    }

    pub fn storage(&self) -> Arc<dyn StorageBackend> {
        self.storage.clone()
    }

    /// Committed timestamps per requested digest, ascending. Every requested
    /// digest is present in the result, possibly with no timestamps.
    pub async fn timestamps_for_keys(
        &self,
        backup: &str,
        bounds: TimeBounds,
        digests: &[String],
    ) -> Result<BTreeMap<String, Vec<i64>>, MetadataError> {
        let digests = normalize_digests(digests)?;
        let rows = versions_query(
            backup,
            &VersionFilter {
                digests: Some(digests.clone()),
                bounds,
                ..Default::default()
            },
        )
        .order_by_asc(record_versions::Column::Timestamp)
        .all(self.db.as_ref())
        .await?;

        let mut out: BTreeMap<String, Vec<i64>> =
            digests.into_iter().map(|d| (d, Vec::new())).collect();
        for row in rows {
            out.entry(row.digest).or_default().push(row.timestamp);
        }
        Ok(out)
    }

    /// Newest version per digest within the filter.
    pub async fn latest_versions(
        &self,
        backup: &str,
        filter: &VersionFilter,
    ) -> Result<Vec<record_versions::Model>, MetadataError> {
        let rows = versions_query(backup, filter)
            .order_by_asc(record_versions::Column::Digest)
            .order_by_desc(record_versions::Column::Timestamp)
            .all(self.db.as_ref())
            .await?;

        let mut latest: Vec<record_versions::Model> = Vec::new();
        for row in rows {
            if latest.last().is_some_and(|last| last.digest == row.digest) {
                continue;
            }
            latest.push(row);
        }
        Ok(latest)
    }

    /// Read the stored record of every version, loading each batch object
    /// once.
    pub async fn load_records(
        &self,
        versions: &[record_versions::Model],
    ) -> Result<Vec<Record>, MetadataError> {
        let mut objects: HashMap<&str, Vec<Vec<u8>>> = HashMap::new();
        let mut records = Vec::with_capacity(versions.len());
        for version in versions {
            if !objects.contains_key(version.object_key.as_str()) {
                let data = self.storage.get(&version.object_key).await?;
                let (_, body) = CodecOptions::plain().decode(&data)?;
                let lines = body
                    .split(|b| *b == b'\n')
                    .filter(|line| !line.is_empty())
                    .map(<[u8]>::to_vec)
                    .collect();
                objects.insert(version.object_key.as_str(), lines);
            }
            let line = objects
                .get(version.object_key.as_str())
                .and_then(|lines| lines.get(version.line as usize))
                .ok_or_else(|| MetadataError::MissingLine {
                    key: version.object_key.clone(),
                    line: version.line,
                })?;
            records.push(serde_json::from_slice(line)?);
        }
        Ok(records)
    }

    pub async fn count_versions(&self, backup: &str, filter: &VersionFilter) -> Result<u64, MetadataError> {
        Ok(versions_query(backup, filter).count(self.db.as_ref()).await?)
    }
}

pub(crate) fn versions_query(backup: &str, filter: &VersionFilter) -> Select<record_versions::Entity> {
    let mut query =
        record_versions::Entity::find().filter(record_versions::Column::BackupName.eq(backup));
    if let Some(namespace) = &filter.namespace {
        query = query.filter(record_versions::Column::Namespace.eq(namespace.as_str()));
    }
    if let Some(set) = &filter.set {
        query = query.filter(record_versions::Column::SetName.eq(set.as_str()));
    }
    if let Some(digests) = &filter.digests {
        query = query.filter(record_versions::Column::Digest.is_in(digests.iter().cloned()));
    }
    if let Some(from) = filter.bounds.from {
        query = query.filter(record_versions::Column::Timestamp.gte(from));
    }
    if let Some(to) = filter.bounds.to {
        query = query.filter(record_versions::Column::Timestamp.lte(to));
    }
    query
}

/// Digests as lowercase hex, rejecting anything that is not one.
pub fn normalize_digests(digests: &[String]) -> Result<Vec<String>, ValidationError> {
    digests
        .iter()
        .map(|raw| {
            raw.parse::<Digest>()
                .map(|d| d.to_hex())
                .map_err(ValidationError::new)
        })
        .collect()
}
