//! Database models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Row of the `session_queue` table
///
/// `id` doubles as the insertion order: entries of one session are
/// consumed in ascending `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: i64,
    pub session_id: String,
    pub url: String,
    pub title: String,
}

/// Row of the `downloaded_artifacts` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedArtifact {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub local_path: PathBuf,
    pub last_access_time: DateTime<Utc>,
}
