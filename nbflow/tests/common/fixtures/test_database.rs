//! Test database utilities for in-memory SQLite testing

use anyhow::Result;
use nbflow::Database;
use sqlx::SqlitePool;
use std::sync::Arc;

use super::test_data::projects;

/// In-memory database with the default test project registered
pub struct TestDatabase {
    database: Arc<Database>,
}

impl TestDatabase {
    /// Create a new in-memory test database
    pub async fn new() -> Result<Self> {
        let database = Arc::new(Database::in_memory().await?);
        database
            .create_project(projects::ANALYTICS, "Analytics", Some("Test project"))
            .await?;
        Ok(Self { database })
    }

    /// Create a database without any project
    pub async fn empty() -> Result<Self> {
        Ok(Self {
            database: Arc::new(Database::in_memory().await?),
        })
    }

    pub fn database(&self) -> Arc<Database> {
        self.database.clone()
    }

    /// Get the database pool
    pub fn pool(&self) -> &SqlitePool {
        self.database.pool()
    }

    /// Number of stored workflow definitions
    pub async fn workflow_count(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM workflows")
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }
}
