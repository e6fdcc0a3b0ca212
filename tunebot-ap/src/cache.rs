//! Artifact cache
//!
//! Persistent mapping from a source url to a downloaded file. A row only
//! counts as a hit while its file still exists and can be opened; a row
//! pointing at a vanished file is reported as a miss and left for the next
//! upsert to replace.

use crate::db::artifacts;
use crate::error::StorageError;
use chrono::Utc;
use sqlx::{Pool, Sqlite};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};
use tunebot_common::db::CachedArtifact;

type Result<T> = std::result::Result<T, StorageError>;

/// Held while a url is being resolved and downloaded
pub type FetchGuard = OwnedMutexGuard<()>;

/// Url-keyed artifact cache backed by the `downloaded_artifacts` table
#[derive(Clone)]
pub struct ArtifactCache {
    db: Pool<Sqlite>,
    inflight: Arc<Mutex<HashMap<String, Weak<tokio::sync::Mutex<()>>>>>,
}

impl ArtifactCache {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self {
            db,
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Usable artifact for `url`, or `None` on a miss
    ///
    /// Does not refresh the access time; callers `touch` on reuse.
    pub async fn lookup(&self, url: &str) -> Result<Option<CachedArtifact>> {
        let Some(artifact) = artifacts::get_by_url(&self.db, url).await? else {
            return Ok(None);
        };

        if is_readable(&artifact.local_path).await {
            Ok(Some(artifact))
        } else {
            debug!(url = %url, path = %artifact.local_path.display(), "Cached artifact missing on disk");
            Ok(None)
        }
    }

    /// Record a downloaded artifact, stamping it as accessed now
    ///
    /// A file the row pointed at before is deleted once the row has moved
    /// on to `local_path`.
    pub async fn upsert(&self, url: &str, title: &str, local_path: &Path) -> Result<CachedArtifact> {
        let previous = artifacts::get_by_url(&self.db, url).await?;
        let artifact = artifacts::upsert(&self.db, url, title, local_path, Utc::now()).await?;

        if let Some(previous) = previous.filter(|p| p.local_path != artifact.local_path) {
            remove_superseded(&previous.local_path).await;
        }

        Ok(artifact)
    }

    /// Refresh the access time of an existing artifact
    pub async fn touch(&self, url: &str) -> Result<()> {
        if !artifacts::touch(&self.db, url, Utc::now()).await? {
            warn!(url = %url, "Touched artifact that is not in the cache");
        }
        Ok(())
    }

    /// Every cached artifact, most recently used first
    pub async fn list_all(&self) -> Result<Vec<CachedArtifact>> {
        artifacts::list_all(&self.db).await
    }

    /// Cached artifacts for the given ids, in request order
    pub async fn list_by_ids(&self, ids: &[i64]) -> Result<Vec<CachedArtifact>> {
        artifacts::list_by_ids(&self.db, ids).await
    }

    /// Serialize fetches of the same url across sessions
    ///
    /// The holder should re-check `lookup` after acquiring: a concurrent
    /// fetch may have populated the cache while it waited.
    pub async fn fetch_lock(&self, url: &str) -> FetchGuard {
        let lock = {
            let mut inflight = self
                .inflight
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            inflight.retain(|_, weak| weak.strong_count() > 0);

            match inflight.get(url).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(tokio::sync::Mutex::new(()));
                    inflight.insert(url.to_string(), Arc::downgrade(&lock));
                    lock
                }
            }
        };

        lock.lock_owned().await
    }
}

async fn remove_superseded(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed superseded artifact"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove superseded artifact"),
    }
}

/// True if `path` is an existing regular file that can be opened for reading
pub async fn is_readable(path: &Path) -> bool {
    match tokio::fs::File::open(path).await {
        Ok(file) => file.metadata().await.map(|m| m.is_file()).unwrap_or(false),
        Err(_) => false,
    }
}
