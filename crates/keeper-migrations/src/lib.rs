//! Database migrations for the Keeper service

pub use sea_orm_migration::prelude::*;

mod migration;
pub use migration::Migrator;

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::Database;

    #[tokio::test]
    async fn test_migrations_apply_and_revert_on_sqlite() -> anyhow::Result<()> {
        let db = Database::connect("sqlite::memory:").await?;
        Migrator::up(&db, None).await?;

        let manager = SchemaManager::new(&db);
        for table in [
            "config_revisions",
            "backup_runs",
            "restore_jobs",
            "background_jobs",
            "queue_records",
            "record_versions",
            "smd_snapshots",
        ] {
            assert!(manager.has_table(table).await?, "missing table {}", table);
        }

        Migrator::down(&db, None).await?;
        assert!(!manager.has_table("backup_runs").await?);
        Ok(())
    }
}
