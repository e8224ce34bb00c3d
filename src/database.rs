//! SQLite connection setup
//!
//! One database file under the configured data directory holds workflows and
//! run history. Created on first start.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use std::path::Path;

/// Database file name inside the data directory
pub const DATABASE_FILE: &str = "nodeflow.db";

/// Open (creating if missing) the main database pool
pub async fn open_pool(data_dir: &str) -> Result<SqlitePool> {
    std::fs::create_dir_all(data_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create data directory '{}': {}", data_dir, e))?;
    let db_path = Path::new(data_dir).join(DATABASE_FILE);

    tracing::info!("🗄️ Opening database: {}", db_path.display());

    let options = SqliteConnectOptions::new()
        .filename(&db_path)
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(options).await?;

    Ok(pool)
}
