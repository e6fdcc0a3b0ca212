//! Downloaded artifact queries
//!
//! Raw row access for the `downloaded_artifacts` table. File-system
//! freshness is layered on top by `crate::cache::ArtifactCache`.

use crate::error::StorageError;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, QueryBuilder, Row, Sqlite};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tunebot_common::db::CachedArtifact;

type Result<T> = std::result::Result<T, StorageError>;

const SELECT_COLUMNS: &str = "SELECT id, url, title, local_path, last_access_time FROM downloaded_artifacts";

fn from_row(row: &SqliteRow) -> CachedArtifact {
    let millis: i64 = row.get("last_access_time");
    CachedArtifact {
        id: row.get("id"),
        url: row.get("url"),
        title: row.get("title"),
        local_path: PathBuf::from(row.get::<String, _>("local_path")),
        last_access_time: millis_to_datetime(millis),
    }
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}

/// Get the artifact row for a source url
pub async fn get_by_url(db: &Pool<Sqlite>, url: &str) -> Result<Option<CachedArtifact>> {
    let row = sqlx::query(&format!("{} WHERE url = ?", SELECT_COLUMNS))
        .bind(url)
        .fetch_optional(db)
        .await?;

    Ok(row.as_ref().map(from_row))
}

/// Insert or update the row for `url`
///
/// Path and title take the new values (last writer wins); the access time
/// never moves backwards.
pub async fn upsert(
    db: &Pool<Sqlite>,
    url: &str,
    title: &str,
    local_path: &Path,
    accessed_at: DateTime<Utc>,
) -> Result<CachedArtifact> {
    let row = sqlx::query(
        r#"
        INSERT INTO downloaded_artifacts (url, title, local_path, last_access_time)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(url) DO UPDATE SET
            title = excluded.title,
            local_path = excluded.local_path,
            last_access_time = MAX(downloaded_artifacts.last_access_time, excluded.last_access_time)
        RETURNING id, url, title, local_path, last_access_time
        "#,
    )
    .bind(url)
    .bind(title)
    .bind(local_path.to_string_lossy().as_ref())
    .bind(accessed_at.timestamp_millis())
    .fetch_one(db)
    .await?;

    Ok(from_row(&row))
}

/// Refresh the access time of `url`; returns false if no row exists
pub async fn touch(db: &Pool<Sqlite>, url: &str, accessed_at: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE downloaded_artifacts SET last_access_time = MAX(last_access_time, ?) WHERE url = ?",
    )
    .bind(accessed_at.timestamp_millis())
    .bind(url)
    .execute(db)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// All artifacts, most recently accessed first
pub async fn list_all(db: &Pool<Sqlite>) -> Result<Vec<CachedArtifact>> {
    let rows = sqlx::query(&format!(
        "{} ORDER BY last_access_time DESC, id DESC",
        SELECT_COLUMNS
    ))
    .fetch_all(db)
    .await?;

    Ok(rows.iter().map(from_row).collect())
}

/// Artifacts whose id is in `ids`, in the order the ids were given
///
/// Unknown ids are skipped and repeated ids yield a single artifact.
pub async fn list_by_ids(db: &Pool<Sqlite>, ids: &[i64]) -> Result<Vec<CachedArtifact>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(SELECT_COLUMNS);
    builder.push(" WHERE id IN (");
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");

    let rows = builder.build().fetch_all(db).await?;
    let mut by_id: HashMap<i64, CachedArtifact> = rows
        .iter()
        .map(from_row)
        .map(|artifact| (artifact.id, artifact))
        .collect();

    Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
}
