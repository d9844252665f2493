//! Database layer for the workflow scheduler.
//!
//! This module provides SQLite persistence for:
//! - Projects (the project directory consulted on register)
//! - Workflow definitions (task spec + optional schedule)
//! - Execution history (append-only)
//!
//! The module is organized into submodules:
//! - `records` - All record types (entities)
//! - `projects` - Project directory operations
//! - `workflows` - Workflow definition store
//! - `history` - Execution history operations

mod history;
mod projects;
mod records;
mod workflows;

pub use records::*;

use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite, SqlitePool};
use std::path::Path;
use tracing::{error, info};

pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Expose pool for integration test queries
    #[allow(dead_code)]
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn new(database_path: &str) -> Result<Self> {
        info!("=== Starting database initialization ===");
        info!("Database path: {}", database_path);

        if let Some(parent) = Path::new(database_path).parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    error!("FAILED to create parent directory {:?}: {}", parent, e);
                    return Err(e.into());
                }
            }
        }

        let database_url = format!("sqlite:{}?mode=rwc", database_path);
        info!("Connecting to database with URL: {}", database_url);

        let pool = match SqlitePool::connect(&database_url).await {
            Ok(pool) => pool,
            Err(e) => {
                error!("FAILED to connect to database: {}", e);
                error!("   Database path: {}", database_path);
                return Err(e.into());
            }
        };

        let database = Self { pool };
        database.initialize_tables().await?;
        database.test_database().await?;

        info!("=== Database initialization completed successfully ===");
        Ok(database)
    }

    /// Single-connection in-memory database; every handle shares one SQLite memory store.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let database = Self { pool };
        database.initialize_tables().await?;
        Ok(database)
    }

    /// Close the pool; subsequent operations fail with a storage error.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn initialize_tables(&self) -> Result<()> {
        info!("Step 1: Creating projects table...");
        let projects_table_sql = r#"
            CREATE TABLE IF NOT EXISTS projects (
                project_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                created_at DATETIME NOT NULL
            )
        "#;
        if let Err(e) = sqlx::query(projects_table_sql).execute(&self.pool).await {
            error!("FAILED to create projects table: {}", e);
            return Err(e.into());
        }

        info!("Step 2: Creating workflows table...");
        let workflows_table_sql = r#"
            CREATE TABLE IF NOT EXISTS workflows (
                workflow_id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(project_id),
                alias TEXT NOT NULL,
                task TEXT NOT NULL,
                schedule TEXT,
                version INTEGER NOT NULL DEFAULT 1,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL,
                UNIQUE (project_id, alias)
            )
        "#;
        if let Err(e) = sqlx::query(workflows_table_sql).execute(&self.pool).await {
            error!("FAILED to create workflows table: {}", e);
            return Err(e.into());
        }

        info!("Step 3: Creating history table...");
        let history_table_sql = r#"
            CREATE TABLE IF NOT EXISTS history (
                execution_id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                project_id TEXT NOT NULL,
                notebook TEXT NOT NULL,
                status INTEGER NOT NULL,
                elapsed_seconds REAL NOT NULL,
                result TEXT NOT NULL,
                created_at DATETIME NOT NULL
            )
        "#;
        if let Err(e) = sqlx::query(history_table_sql).execute(&self.pool).await {
            error!("FAILED to create history table: {}", e);
            return Err(e.into());
        }

        info!("Step 4: Creating history index...");
        let history_index_sql = "CREATE INDEX IF NOT EXISTS idx_history_workflow_created ON history(workflow_id, created_at DESC)";
        if let Err(e) = sqlx::query(history_index_sql).execute(&self.pool).await {
            error!("FAILED to create history index: {}", e);
            return Err(e.into());
        }

        info!("All database tables and indexes created successfully");
        Ok(())
    }

    async fn test_database(&self) -> Result<()> {
        info!("Testing table existence...");
        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type='table' AND name IN ('projects', 'workflows', 'history')",
        )
        .fetch_all(&self.pool)
        .await?;

        if tables.len() != 3 {
            error!("Expected 3 tables, found {}: {:?}", tables.len(), tables);
            return Err(anyhow::anyhow!("Database tables not properly created"));
        }
        info!("All required tables exist: {:?}", tables);
        Ok(())
    }
}
