//! Database initialization
//!
//! Opens (creating if needed) the SQLite database and makes sure the
//! queue and artifact tables exist. Any failure here is fatal for startup.

use crate::{Error, Result};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| Error::DatabaseFolder {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }

    // Pragmas go on the connect options so every pooled connection gets them.
    // WAL lets readers (queue snapshots, library listings) proceed while a
    // session writes.
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables and indices (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_session_queue_table(pool).await?;
    create_downloaded_artifacts_table(pool).await?;
    Ok(())
}

/// Create the per-session playback queue table
///
/// Ordered by the autoincrement `id`; AUTOINCREMENT keeps ids monotonic even
/// after the highest row has been consumed.
pub async fn create_session_queue_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS session_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            url TEXT NOT NULL,
            title TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_session_queue_session ON session_queue(session_id, id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the downloaded artifact cache table
pub async fn create_downloaded_artifacts_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS downloaded_artifacts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            url TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            local_path TEXT NOT NULL,
            last_access_time INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_downloaded_artifacts_access ON downloaded_artifacts(last_access_time)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
