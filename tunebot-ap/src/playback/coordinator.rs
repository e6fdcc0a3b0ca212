//! Playback coordinator
//!
//! Front-end facing entry point. Play and skip go through the session
//! actor; queue edits and library reads go straight to storage, since they
//! never change what is playing.

use super::registry::SessionRegistry;
use super::session::{SessionCommand, SessionContext};
use super::state::{
    LibraryOutcome, LibrarySelection, PlayOutcome, QueuedTrack, SessionStatus, SkipOutcome,
    TrackRequest,
};
use crate::cache::ArtifactCache;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::queue::SessionQueue;
use crate::resolver::{ContentResolver, RetryPolicy};
use crate::transport::{ChannelRef, Transport};
use chrono::Utc;
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::info;
use tunebot_common::db::{CachedArtifact, QueueEntry};
use tunebot_common::{EventBus, PlayerEvent};

/// Tuning passed to every session
#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub retry: RetryPolicy,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            connect_timeout: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(300),
        }
    }
}

impl CoordinatorOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retry: config.retry.policy(),
            connect_timeout: config.playback.connect_timeout(),
            idle_timeout: config.playback.idle_timeout(),
        }
    }
}

#[derive(Clone)]
pub struct PlaybackCoordinator {
    registry: Arc<SessionRegistry>,
    queue: SessionQueue,
    cache: ArtifactCache,
    events: EventBus,
}

impl PlaybackCoordinator {
    pub fn new(
        db: Pool<Sqlite>,
        resolver: Arc<dyn ContentResolver>,
        transport: Arc<dyn Transport>,
        events: EventBus,
        options: CoordinatorOptions,
    ) -> Self {
        let queue = SessionQueue::new(db.clone());
        let cache = ArtifactCache::new(db);

        let ctx = Arc::new(SessionContext {
            queue: queue.clone(),
            cache: cache.clone(),
            resolver,
            transport,
            retry: options.retry,
            events: events.clone(),
            connect_timeout: options.connect_timeout,
            idle_timeout: options.idle_timeout,
        });

        Self {
            registry: Arc::new(SessionRegistry::new(ctx)),
            queue,
            cache,
            events,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Connect if needed and play `track` (or the queue front), or queue it
    /// behind the current track
    pub async fn play(&self, session_id: &str, channel: ChannelRef, track: Option<TrackRequest>) -> Result<PlayOutcome> {
        let reply = self
            .dispatch(session_id, |reply| SessionCommand::Play {
                channel: channel.clone(),
                track: track.clone(),
                reply,
            })
            .await?;
        reply.await.map_err(|_| Error::Cancelled)?
    }

    /// Append to the session queue without starting playback
    pub async fn enqueue(&self, session_id: &str, track: TrackRequest) -> Result<QueuedTrack> {
        let (entry, position) = self
            .queue
            .enqueue(session_id, &track.url, track.display_title())
            .await?;
        self.emit_queue_changed(session_id, position);
        Ok(QueuedTrack { entry, position })
    }

    pub async fn skip(&self, session_id: &str) -> Result<SkipOutcome> {
        let Some(handle) = self.registry.get(session_id) else {
            return Ok(SkipOutcome::NothingPlaying);
        };

        let (tx, rx) = oneshot::channel();
        handle
            .send(SessionCommand::Skip { reply: tx })
            .map_err(|_| Error::Cancelled)?;
        rx.await.map_err(|_| Error::Cancelled)?
    }

    /// Drop every pending entry; the current track keeps playing
    pub async fn clear(&self, session_id: &str) -> Result<u64> {
        let removed = self.queue.clear(session_id).await?;
        self.emit_queue_changed(session_id, 0);
        info!(session = %session_id, removed, "Queue cleared");
        Ok(removed)
    }

    pub async fn snapshot(&self, session_id: &str) -> Result<Vec<QueueEntry>> {
        Ok(self.queue.snapshot(session_id).await?)
    }

    pub async fn status(&self, session_id: &str) -> Result<SessionStatus> {
        let mut status = match self.registry.get(session_id) {
            Some(handle) => handle.status(),
            None => SessionStatus::disconnected(session_id),
        };
        status.queue_length = self.queue.len(session_id).await?;
        Ok(status)
    }

    /// Leave the channel and forget the session; the queue is kept
    ///
    /// Returns false if the session was not active.
    pub async fn disconnect(&self, session_id: &str) -> bool {
        match self.registry.remove(session_id) {
            Some(handle) => {
                info!(session = %session_id, "Disconnecting session");
                handle.shutdown().await;
                true
            }
            None => false,
        }
    }

    /// All cached artifacts, most recently used first
    pub async fn library(&self) -> Result<Vec<CachedArtifact>> {
        Ok(self.cache.list_all().await?)
    }

    /// Queue cached artifacts, then start playback if idle
    pub async fn queue_library(
        &self,
        session_id: &str,
        channel: ChannelRef,
        selection: LibrarySelection,
    ) -> Result<LibraryOutcome> {
        let artifacts = match &selection {
            LibrarySelection::All => self.cache.list_all().await?,
            LibrarySelection::Ids(ids) => self.cache.list_by_ids(ids).await?,
        };

        let mut length = 0;
        for artifact in &artifacts {
            let (_, position) = self
                .queue
                .enqueue(session_id, &artifact.url, &artifact.title)
                .await?;
            length = position;
        }

        if !artifacts.is_empty() {
            self.emit_queue_changed(session_id, length);
        }
        info!(session = %session_id, queued = artifacts.len(), "Queued library tracks");

        let play = self.play(session_id, channel, None).await?;
        Ok(LibraryOutcome {
            queued: artifacts.len(),
            play,
        })
    }

    pub fn active_sessions(&self) -> Vec<String> {
        self.registry.session_ids()
    }

    /// Disconnect every session
    pub async fn shutdown(&self) {
        let handles = self.registry.drain();
        if !handles.is_empty() {
            info!(sessions = handles.len(), "Disconnecting all sessions");
        }
        for handle in handles {
            handle.shutdown().await;
        }
    }

    /// Send a command built around a fresh reply channel
    ///
    /// Retries once with a new session if the current actor exited between
    /// lookup and send.
    async fn dispatch<T>(
        &self,
        session_id: &str,
        build: impl Fn(oneshot::Sender<Result<T>>) -> SessionCommand,
    ) -> Result<oneshot::Receiver<Result<T>>> {
        for _ in 0..2 {
            let handle = self.registry.get_or_create(session_id);
            let (tx, rx) = oneshot::channel();
            if handle.send(build(tx)).is_ok() {
                return Ok(rx);
            }
        }
        Err(Error::Cancelled)
    }

    fn emit_queue_changed(&self, session_id: &str, length: usize) {
        self.events.emit_lossy(PlayerEvent::QueueChanged {
            session_id: session_id.to_string(),
            length,
            timestamp: Utc::now(),
        });
    }
}
