//! Per-session playback queue
//!
//! Persisted FIFO of pending tracks, one per session. A session advances by
//! peeking at the `front` entry and only `remove`s it once the track has
//! started or has been given up on, so an entry whose download is cut short
//! by a disconnect is still there afterwards. The entry currently playing is
//! never in here.

use crate::db::queue;
use crate::error::StorageError;
use sqlx::{Pool, Sqlite};
use tracing::debug;
use tunebot_common::db::QueueEntry;

type Result<T> = std::result::Result<T, StorageError>;

#[derive(Clone)]
pub struct SessionQueue {
    db: Pool<Sqlite>,
}

impl SessionQueue {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// Append to the tail; returns the entry and its 1-based position
    pub async fn enqueue(&self, session_id: &str, url: &str, title: &str) -> Result<(QueueEntry, usize)> {
        let (entry, position) = queue::enqueue(&self.db, session_id, url, title).await?;
        debug!(session = %session_id, url = %url, position, "Enqueued track");
        Ok((entry, position))
    }

    pub async fn dequeue_front(&self, session_id: &str) -> Result<Option<QueueEntry>> {
        queue::dequeue_front(&self.db, session_id).await
    }

    pub async fn front(&self, session_id: &str) -> Result<Option<QueueEntry>> {
        queue::front(&self.db, session_id).await
    }

    /// Delete a consumed entry; false if a clear got to it first
    pub async fn remove(&self, entry: &QueueEntry) -> Result<bool> {
        let removed = queue::remove(&self.db, entry.id).await?;
        debug!(session = %entry.session_id, url = %entry.url, removed, "Consumed queue entry");
        Ok(removed)
    }

    pub async fn set_title(&self, entry: &QueueEntry, title: &str) -> Result<bool> {
        queue::set_title(&self.db, entry.id, title).await
    }

    pub async fn clear(&self, session_id: &str) -> Result<u64> {
        let removed = queue::clear(&self.db, session_id).await?;
        debug!(session = %session_id, removed, "Cleared queue");
        Ok(removed)
    }

    pub async fn snapshot(&self, session_id: &str) -> Result<Vec<QueueEntry>> {
        queue::snapshot(&self.db, session_id).await
    }

    pub async fn len(&self, session_id: &str) -> Result<usize> {
        queue::len(&self.db, session_id).await
    }
}
