//! Test utilities for database backed tests
//!
//! Every `TestDatabase` is a fresh, fully migrated in-memory SQLite
//! database, so tests never share state.

use crate::{establish_connection, DbConnection};
use std::sync::Arc;

pub struct TestDatabase {
    pub db: Arc<DbConnection>,
}

impl TestDatabase {
    pub async fn new() -> anyhow::Result<Self> {
        let db = establish_connection("sqlite::memory:").await?;
        Ok(Self { db })
    }

    pub fn connection(&self) -> Arc<DbConnection> {
        self.db.clone()
    }
}
