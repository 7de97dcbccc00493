//! Database access for LeadLink
//!
//! Shared SQLite pool initialization. The database doubles as the work
//! queue for every pipeline stage, so all services share one pool.

pub mod init;
pub mod migrations;
pub mod models;

use crate::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool and run migrations.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Use proper SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePoolOptions::new().connect(&db_url).await?;
    configure_pool(&pool).await?;
    migrations::run_migrations(&pool).await?;

    Ok(pool)
}

/// Initialize an in-memory database (tests and tooling).
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    configure_pool(&pool).await?;
    migrations::run_migrations(&pool).await?;
    Ok(pool)
}

async fn configure_pool(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(pool).await?;
    Ok(())
}
