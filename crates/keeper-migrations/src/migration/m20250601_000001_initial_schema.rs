use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // ========================================
        // CONFIG_REVISIONS TABLE
        // ========================================
        manager
            .create_table(
                Table::create()
                    .table(ConfigRevisions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ConfigRevisions::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ConfigRevisions::Document).json().not_null())
                    .col(
                        ColumnDef::new(ConfigRevisions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // ========================================
        // BACKUP_RUNS TABLE
        // ========================================
        manager
            .create_table(
                Table::create()
                    .table(BackupRuns::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(BackupRuns::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(BackupRuns::Routine).string().not_null())
                    .col(ColumnDef::new(BackupRuns::Namespace).string().not_null())
                    .col(ColumnDef::new(BackupRuns::BackupType).string().not_null())
                    .col(ColumnDef::new(BackupRuns::Created).big_integer().not_null())
                    .col(ColumnDef::new(BackupRuns::FromTime).big_integer().not_null())
                    .col(ColumnDef::new(BackupRuns::Finished).big_integer().not_null())
                    .col(ColumnDef::new(BackupRuns::Duration).big_integer().not_null())
                    .col(ColumnDef::new(BackupRuns::RecordCount).big_integer().not_null())
                    .col(ColumnDef::new(BackupRuns::ByteCount).big_integer().not_null())
                    .col(ColumnDef::new(BackupRuns::FileCount).integer().not_null())
                    .col(ColumnDef::new(BackupRuns::UdfCount).integer().not_null())
                    .col(
                        ColumnDef::new(BackupRuns::SecondaryIndexCount)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(BackupRuns::StorageKey).string().not_null())
                    .col(ColumnDef::new(BackupRuns::Compression).string().not_null())
                    .col(ColumnDef::new(BackupRuns::Encryption).string().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_backup_runs_routine_type_created")
                    .table(BackupRuns::Table)
                    .col(BackupRuns::Routine)
                    .col(BackupRuns::BackupType)
                    .col(BackupRuns::Created)
                    .to_owned(),
            )
            .await?;

        // ========================================
        // RESTORE_JOBS TABLE
        // ========================================
        manager
            .create_table(
                Table::create()
                    .table(RestoreJobs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RestoreJobs::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(RestoreJobs::Kind).string().not_null())
                    .col(ColumnDef::new(RestoreJobs::Status).string().not_null())
                    .col(ColumnDef::new(RestoreJobs::Request).json().not_null())
                    .col(counter(RestoreJobs::ReadRecords))
                    .col(counter(RestoreJobs::InsertedRecords))
                    .col(counter(RestoreJobs::ExistedRecords))
                    .col(counter(RestoreJobs::FresherRecords))
                    .col(counter(RestoreJobs::SkippedRecords))
                    .col(counter(RestoreJobs::ExpiredRecords))
                    .col(counter(RestoreJobs::IgnoredRecords))
                    .col(counter(RestoreJobs::TotalBytes))
                    .col(
                        ColumnDef::new(RestoreJobs::IndexCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(RestoreJobs::UdfCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(RestoreJobs::Error).text().null())
                    .col(
                        ColumnDef::new(RestoreJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(RestoreJobs::FinishedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        // ========================================
        // BACKGROUND_JOBS TABLE
        // ========================================
        manager
            .create_table(
                Table::create()
                    .table(BackgroundJobs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(BackgroundJobs::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(BackgroundJobs::Kind).string().not_null())
                    .col(ColumnDef::new(BackgroundJobs::Status).string().not_null())
                    .col(ColumnDef::new(BackgroundJobs::Params).json().not_null())
                    .col(ColumnDef::new(BackgroundJobs::Cursor).json().null())
                    .col(counter(BackgroundJobs::Processed))
                    .col(counter(BackgroundJobs::Total))
                    .col(ColumnDef::new(BackgroundJobs::Error).text().null())
                    .col(
                        ColumnDef::new(BackgroundJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(BackgroundJobs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(BackgroundJobs::FinishedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_background_jobs_status")
                    .table(BackgroundJobs::Table)
                    .col(BackgroundJobs::Status)
                    .to_owned(),
            )
            .await?;

        // ========================================
        // QUEUE_RECORDS TABLE
        // ========================================
        manager
            .create_table(
                Table::create()
                    .table(QueueRecords::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(QueueRecords::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(QueueRecords::BackupName).string().not_null())
                    .col(ColumnDef::new(QueueRecords::Namespace).string().not_null())
                    .col(ColumnDef::new(QueueRecords::SetName).string().not_null())
                    .col(ColumnDef::new(QueueRecords::Digest).string().not_null())
                    .col(ColumnDef::new(QueueRecords::Bins).json().not_null())
                    .col(ColumnDef::new(QueueRecords::Generation).integer().not_null())
                    .col(
                        ColumnDef::new(QueueRecords::LastUpdateTime)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(QueueRecords::Deleted).boolean().not_null())
                    .col(ColumnDef::new(QueueRecords::Status).string().not_null())
                    .col(
                        ColumnDef::new(QueueRecords::Attempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(QueueRecords::ClaimedAt).big_integer().null())
                    .col(
                        ColumnDef::new(QueueRecords::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_queue_records_status")
                    .table(QueueRecords::Table)
                    .col(QueueRecords::Status)
                    .col(QueueRecords::Id)
                    .to_owned(),
            )
            .await?;

        // ========================================
        // RECORD_VERSIONS TABLE
        // ========================================
        manager
            .create_table(
                Table::create()
                    .table(RecordVersions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RecordVersions::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(RecordVersions::BackupName).string().not_null())
                    .col(ColumnDef::new(RecordVersions::Namespace).string().not_null())
                    .col(ColumnDef::new(RecordVersions::SetName).string().not_null())
                    .col(ColumnDef::new(RecordVersions::Digest).string().not_null())
                    .col(ColumnDef::new(RecordVersions::Timestamp).big_integer().not_null())
                    .col(ColumnDef::new(RecordVersions::Generation).integer().not_null())
                    .col(ColumnDef::new(RecordVersions::Deleted).boolean().not_null())
                    .col(ColumnDef::new(RecordVersions::ObjectKey).string().not_null())
                    .col(ColumnDef::new(RecordVersions::Line).integer().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_record_versions_backup_digest_ts")
                    .table(RecordVersions::Table)
                    .col(RecordVersions::BackupName)
                    .col(RecordVersions::Digest)
                    .col(RecordVersions::Timestamp)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_record_versions_backup_set_ts")
                    .table(RecordVersions::Table)
                    .col(RecordVersions::BackupName)
                    .col(RecordVersions::SetName)
                    .col(RecordVersions::Timestamp)
                    .to_owned(),
            )
            .await?;

        // ========================================
        // SMD_SNAPSHOTS TABLE
        // ========================================
        manager
            .create_table(
                Table::create()
                    .table(SmdSnapshots::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SmdSnapshots::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SmdSnapshots::ConnectionName).string().not_null())
                    .col(ColumnDef::new(SmdSnapshots::Kind).string().not_null())
                    .col(ColumnDef::new(SmdSnapshots::Payload).json().not_null())
                    .col(ColumnDef::new(SmdSnapshots::CapturedAt).big_integer().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_smd_snapshots_connection_kind")
                    .table(SmdSnapshots::Table)
                    .col(SmdSnapshots::ConnectionName)
                    .col(SmdSnapshots::Kind)
                    .col(SmdSnapshots::CapturedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SmdSnapshots::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(RecordVersions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(QueueRecords::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(BackgroundJobs::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(RestoreJobs::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(BackupRuns::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ConfigRevisions::Table).to_owned())
            .await?;
        Ok(())
    }
}

fn counter<T: IntoIden>(column: T) -> ColumnDef {
    ColumnDef::new(column)
        .big_integer()
        .not_null()
        .default(0)
        .to_owned()
}

#[derive(DeriveIden)]
enum ConfigRevisions {
    Table,
    Id,
    Document,
    CreatedAt,
}

#[derive(DeriveIden)]
enum BackupRuns {
    Table,
    Id,
    Routine,
    Namespace,
    BackupType,
    Created,
    FromTime,
    Finished,
    Duration,
    RecordCount,
    ByteCount,
    FileCount,
    UdfCount,
    SecondaryIndexCount,
    StorageKey,
    Compression,
    Encryption,
}

#[derive(DeriveIden)]
enum RestoreJobs {
    Table,
    Id,
    Kind,
    Status,
    Request,
    ReadRecords,
    InsertedRecords,
    ExistedRecords,
    FresherRecords,
    SkippedRecords,
    ExpiredRecords,
    IgnoredRecords,
    TotalBytes,
    IndexCount,
    UdfCount,
    Error,
    CreatedAt,
    FinishedAt,
}

#[derive(DeriveIden)]
enum BackgroundJobs {
    Table,
    Id,
    Kind,
    Status,
    Params,
    Cursor,
    Processed,
    Total,
    Error,
    CreatedAt,
    UpdatedAt,
    FinishedAt,
}

#[derive(DeriveIden)]
enum QueueRecords {
    Table,
    Id,
    BackupName,
    Namespace,
    SetName,
    Digest,
    Bins,
    Generation,
    LastUpdateTime,
    Deleted,
    Status,
    Attempts,
    ClaimedAt,
    CreatedAt,
}

#[derive(DeriveIden)]
enum RecordVersions {
    Table,
    Id,
    BackupName,
    Namespace,
    SetName,
    Digest,
    Timestamp,
    Generation,
    Deleted,
    ObjectKey,
    Line,
}

#[derive(DeriveIden)]
enum SmdSnapshots {
    Table,
    Id,
    ConnectionName,
    Kind,
    Payload,
    CapturedAt,
}
