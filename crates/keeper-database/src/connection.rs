//! Database connection management

use keeper_migrations::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub type DbConnection = DatabaseConnection;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {0}")]
    Connect(DbErr),

    #[error("Failed to run migrations: {0}")]
    Migration(DbErr),
}

/// Connect and bring the schema up to date.
pub async fn establish_connection(database_url: &str) -> Result<Arc<DbConnection>, DatabaseError> {
    let mut opt = ConnectOptions::new(database_url);
    if database_url.starts_with("sqlite:") {
        // SQLite serializes writers anyway; a single connection avoids lock errors.
        opt.max_connections(1).min_connections(1);
    } else {
        opt.max_connections(50).min_connections(2);
    }
    opt.connect_timeout(Duration::from_secs(10))
        .sqlx_logging(false);

    let db = Database::connect(opt).await.map_err(DatabaseError::Connect)?;

    debug!("Running database migrations");
    Migrator::up(&db, None)
        .await
        .map_err(DatabaseError::Migration)?;

    Ok(Arc::new(db))
}
