//! Per-session playback actor
//!
//! One tokio task per session owns the session state (transport handle,
//! now-playing, `SessionState`). Play and skip requests and transport
//! completions are all messages on the session channel, so they are handled
//! strictly one at a time.
//!
//! **Completion callbacks:** every `Transport::play` is tagged with a fresh
//! generation number. The callback only posts `PlaybackFinished { generation }`
//! back to the channel; a generation older than the current one (a skipped
//! or replaced playback) is ignored.
//!
//! **Cancellation:** the session's `CancellationToken` aborts an in-flight
//! connect or resolve. An abandoned download is never recorded in the cache,
//! and the queue entry it was for stays queued.
//!
//! **Queueing behind a playing track:** the entry is stored right away (so
//! queue order is request order) and downloaded by a spawned task, which
//! answers the caller once the resolved title is known. The actor keeps
//! serving commands meanwhile.

use super::state::{NowPlaying, PlayOutcome, SessionStatus, SkipOutcome, TrackRequest};
use crate::cache::{is_readable, ArtifactCache};
use crate::error::{Error, ResolutionError, Result, TransportError};
use crate::queue::SessionQueue;
use crate::resolver::{ContentResolver, RetryPolicy};
use crate::transport::{ChannelRef, CompletionCallback, Transport, TransportHandle};
use chrono::Utc;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tunebot_common::db::QueueEntry;
use tunebot_common::events::SkipReason;
use tunebot_common::{EventBus, PlayerEvent, SessionState};

/// Collaborators shared by every session
pub struct SessionContext {
    pub queue: SessionQueue,
    pub cache: ArtifactCache,
    pub resolver: Arc<dyn ContentResolver>,
    pub transport: Arc<dyn Transport>,
    pub retry: RetryPolicy,
    pub events: EventBus,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
}

/// Messages handled by a session actor
pub enum SessionCommand {
    Play {
        channel: ChannelRef,
        track: Option<TrackRequest>,
        reply: oneshot::Sender<Result<PlayOutcome>>,
    },
    Skip {
        reply: oneshot::Sender<Result<SkipOutcome>>,
    },
    PlaybackFinished {
        generation: u64,
        error: Option<TransportError>,
    },
}

impl SessionCommand {
    /// Answer a command that will never run
    fn reject(self) {
        match self {
            SessionCommand::Play { reply, .. } => {
                let _ = reply.send(Err(Error::Cancelled));
            }
            SessionCommand::Skip { reply } => {
                let _ = reply.send(Err(Error::Cancelled));
            }
            SessionCommand::PlaybackFinished { .. } => {}
        }
    }
}

/// A local artifact ready to hand to the transport
struct Playable {
    title: String,
    url: String,
    path: PathBuf,
    from_cache: bool,
}

pub struct SessionActor {
    session_id: String,
    ctx: Arc<SessionContext>,
    state: SessionState,
    handle: Option<TransportHandle>,
    current: Option<NowPlaying>,
    generation: u64,
    self_tx: mpsc::WeakUnboundedSender<SessionCommand>,
    status_tx: watch::Sender<SessionStatus>,
    cancel: CancellationToken,
}

impl SessionActor {
    pub fn new(
        session_id: String,
        ctx: Arc<SessionContext>,
        self_tx: mpsc::WeakUnboundedSender<SessionCommand>,
        status_tx: watch::Sender<SessionStatus>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session_id,
            ctx,
            state: SessionState::Disconnected,
            handle: None,
            current: None,
            generation: 0,
            self_tx,
            status_tx,
            cancel,
        }
    }

    /// Process commands until cancelled, idle for too long, or every sender
    /// is gone; then release the transport and reject whatever is left.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SessionCommand>) {
        info!(session = %self.session_id, "Session started");
        let cancel = self.cancel.clone();
        let idle_timeout = self.ctx.idle_timeout;

        let reason = loop {
            let idle = self.state.needs_connection();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break "disconnected",
                cmd = rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break "closed",
                },
                _ = tokio::time::sleep(idle_timeout), if idle => break "idle",
            }
        };

        // Idle or closed exits must still look cancelled to late callers
        cancel.cancel();
        self.shutdown().await;

        rx.close();
        while let Ok(cmd) = rx.try_recv() {
            cmd.reject();
        }

        info!(session = %self.session_id, reason, "Session ended");
    }

    async fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Play { channel, track, reply } => match track {
                Some(track) if !self.state.needs_connection() => {
                    self.queue_behind(channel, track, reply).await;
                }
                track => {
                    let result = self.handle_play(channel, track).await;
                    let _ = reply.send(result);
                }
            },
            SessionCommand::Skip { reply } => {
                let result = self.handle_skip().await;
                let _ = reply.send(result);
            }
            SessionCommand::PlaybackFinished { generation, error } => {
                self.handle_finished(generation, error).await;
            }
        }
    }

    async fn handle_play(&mut self, channel: ChannelRef, track: Option<TrackRequest>) -> Result<PlayOutcome> {
        if !self.state.needs_connection() {
            return Ok(match &self.current {
                Some(np) => PlayOutcome::AlreadyPlaying {
                    title: np.title.clone(),
                    url: np.url.clone(),
                    channel: self.channel_name(&channel),
                },
                None => PlayOutcome::NothingToPlay,
            });
        }

        if track.is_none() && self.ctx.queue.len(&self.session_id).await? == 0 {
            return Ok(PlayOutcome::NothingToPlay);
        }

        self.connect(&channel).await?;

        match track {
            Some(track) => match self.start_track(&track.url).await {
                Ok(np) => Ok(PlayOutcome::Started {
                    title: np.title,
                    url: np.url,
                }),
                Err(Error::Cancelled) => Err(Error::Cancelled),
                Err(e) => {
                    self.emit_skipped(&track.url, track.display_title(), &e);
                    if matches!(e, Error::Transport(_)) {
                        self.release(SessionState::Disconnected).await;
                    } else if let Err(advance_err) = self.advance().await {
                        warn!(session = %self.session_id, error = %advance_err, "Failed to advance after rejected track");
                    }
                    Err(e)
                }
            },
            None => Ok(match self.advance().await? {
                Some(np) => PlayOutcome::Started {
                    title: np.title,
                    url: np.url,
                },
                None => PlayOutcome::NothingToPlay,
            }),
        }
    }

    /// Store `track` behind the current one and download it off the actor
    async fn queue_behind(
        &mut self,
        channel: ChannelRef,
        track: TrackRequest,
        reply: oneshot::Sender<Result<PlayOutcome>>,
    ) {
        let channel = self.channel_name(&channel);

        let (entry, position) = match self
            .ctx
            .queue
            .enqueue(&self.session_id, &track.url, track.display_title())
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                let _ = reply.send(Err(e.into()));
                return;
            }
        };
        self.emit(PlayerEvent::QueueChanged {
            session_id: self.session_id.clone(),
            length: position,
            timestamp: Utc::now(),
        });

        let prefetch = Prefetch {
            ctx: Arc::clone(&self.ctx),
            cancel: self.cancel.clone(),
            session_id: self.session_id.clone(),
            entry,
            position,
            channel,
        };
        tokio::spawn(async move {
            let _ = reply.send(prefetch.run().await);
        });
    }

    /// Name of the channel the session plays in
    ///
    /// A request naming another channel does not move a connected session.
    fn channel_name(&self, requested: &ChannelRef) -> String {
        match &self.handle {
            Some(handle) => {
                if handle.channel != *requested {
                    info!(
                        session = %self.session_id,
                        requested = %requested,
                        current = %handle.channel,
                        "Already connected to another channel, staying there"
                    );
                }
                handle.channel.to_string()
            }
            None => requested.to_string(),
        }
    }

    async fn handle_skip(&mut self) -> Result<SkipOutcome> {
        let Some(skipped) = self.current.clone() else {
            return Ok(SkipOutcome::NothingPlaying);
        };

        info!(session = %self.session_id, title = %skipped.title, "Skipping track");

        // The pending completion for this playback becomes stale
        self.generation += 1;
        if let Some(handle) = &self.handle {
            if self.ctx.transport.is_playing(handle).await {
                self.ctx.transport.stop(handle).await;
            }
        }
        self.current = None;

        if let Err(e) = self.advance().await {
            warn!(session = %self.session_id, error = %e, "Failed to advance after skip");
        }

        Ok(SkipOutcome::Skipped {
            title: skipped.title,
            url: skipped.url,
        })
    }

    async fn handle_finished(&mut self, generation: u64, error: Option<TransportError>) {
        if generation != self.generation || self.current.is_none() {
            debug!(session = %self.session_id, generation, current = self.generation, "Ignoring stale completion");
            return;
        }

        let finished = self.current.take();
        if let Some(np) = &finished {
            debug!(session = %self.session_id, title = %np.title, "Track finished");
        }

        match error {
            Some(TransportError::LostConnection(msg)) => {
                warn!(session = %self.session_id, error = %msg, "Transport connection lost");
                self.release(SessionState::Disconnected).await;
                return;
            }
            Some(other) => {
                warn!(session = %self.session_id, error = %other, "Playback ended with error");
            }
            None => {}
        }

        match self.advance().await {
            Ok(_) | Err(Error::Cancelled) => {}
            Err(e) => error!(session = %self.session_id, error = %e, "Failed to advance queue"),
        }
    }

    /// Acquire a transport handle; lands in `Disconnected` on failure
    ///
    /// On success the state stays `Connecting` until a track starts, with
    /// the channel already published in the status.
    async fn connect(&mut self, channel: &ChannelRef) -> Result<()> {
        self.set_state(SessionState::Connecting);
        info!(session = %self.session_id, channel = %channel, "Connecting");

        let transport = Arc::clone(&self.ctx.transport);
        let timeout = self.ctx.connect_timeout;
        let attempt = cancellable(&self.cancel, tokio::time::timeout(timeout, transport.connect(channel))).await;

        let result = match attempt {
            Ok(Ok(Ok(handle))) => Ok(handle),
            Ok(Ok(Err(e))) => Err(Error::Transport(e)),
            Ok(Err(_)) => Err(Error::Transport(TransportError::ConnectFailed(format!(
                "Timed out after {}s",
                timeout.as_secs()
            )))),
            Err(e) => Err(e),
        };

        match result {
            Ok(handle) => {
                self.handle = Some(handle);
                self.publish_status();
                Ok(())
            }
            Err(e) => {
                warn!(session = %self.session_id, error = %e, "Connect failed");
                self.set_state(SessionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Start the next playable queue entry
    ///
    /// The front entry stays queued until it starts or is given up on, so a
    /// cancelled download leaves it in place. Entries that cannot be resolved
    /// are skipped. An empty queue releases the transport and moves to
    /// `Empty`.
    async fn advance(&mut self) -> Result<Option<NowPlaying>> {
        loop {
            let entry = match self.ctx.queue.front(&self.session_id).await {
                Ok(Some(entry)) => entry,
                Ok(None) => {
                    self.release(SessionState::Empty).await;
                    return Ok(None);
                }
                Err(e) => {
                    error!(session = %self.session_id, error = %e, "Queue unavailable");
                    self.release(SessionState::Empty).await;
                    return Err(e.into());
                }
            };

            let result = self.start_track(&entry.url).await;
            if let Err(Error::Cancelled) = result {
                return Err(Error::Cancelled);
            }
            if let Err(e) = &result {
                self.emit_skipped(&entry.url, &entry.title, e);
            }

            if let Err(e) = self.ctx.queue.remove(&entry).await {
                error!(session = %self.session_id, error = %e, "Failed to consume queue entry");
                if result.is_err() {
                    self.release(SessionState::Empty).await;
                    return Err(e.into());
                }
            }

            match result {
                Ok(np) => return Ok(Some(np)),
                Err(e @ Error::Transport(_)) => {
                    self.release(SessionState::Disconnected).await;
                    return Err(e);
                }
                Err(_) => {}
            }
        }
    }

    /// Resolve `url` and hand it to the transport
    async fn start_track(&mut self, url: &str) -> Result<NowPlaying> {
        let mut playable = self.source().resolve_or_fetch(url).await?;

        if !is_readable(&playable.path).await {
            warn!(session = %self.session_id, path = %playable.path.display(), "Artifact vanished before playback, fetching again");
            playable = self.source().resolve_or_fetch(url).await?;
            if !is_readable(&playable.path).await {
                return Err(Error::StaleArtifact(playable.path));
            }
        }

        let handle = self.handle.clone().ok_or_else(|| {
            Error::Transport(TransportError::LostConnection("No transport handle".to_string()))
        })?;

        self.generation += 1;
        let generation = self.generation;
        let tx = self.self_tx.clone();
        let on_complete: CompletionCallback = Box::new(move |error| {
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(SessionCommand::PlaybackFinished { generation, error });
            }
        });

        self.ctx.transport.play(&handle, &playable.path, on_complete).await?;

        let np = NowPlaying {
            title: playable.title,
            url: playable.url,
            from_cache: playable.from_cache,
            started_at: Utc::now(),
        };
        self.current = Some(np.clone());
        self.set_state(SessionState::Playing);

        info!(session = %self.session_id, title = %np.title, from_cache = np.from_cache, "Now playing");
        self.emit(PlayerEvent::TrackStarted {
            session_id: self.session_id.clone(),
            title: np.title.clone(),
            url: np.url.clone(),
            from_cache: np.from_cache,
            timestamp: np.started_at,
        });

        Ok(np)
    }

    fn source(&self) -> TrackSource<'_> {
        TrackSource {
            ctx: &self.ctx,
            cancel: &self.cancel,
            session_id: &self.session_id,
        }
    }

    /// Drop the transport handle (disconnecting it once) and settle in `next`
    async fn release(&mut self, next: SessionState) {
        if let Some(handle) = self.handle.take() {
            if self.current.is_some() {
                self.generation += 1;
                if self.ctx.transport.is_playing(&handle).await {
                    self.ctx.transport.stop(&handle).await;
                }
            }
            self.ctx.transport.disconnect(&handle).await;
        }
        self.current = None;
        self.set_state(next);

        if next == SessionState::Empty {
            info!(session = %self.session_id, "Queue exhausted, left channel");
            self.emit(PlayerEvent::QueueExhausted {
                session_id: self.session_id.clone(),
                timestamp: Utc::now(),
            });
        }
    }

    async fn shutdown(&mut self) {
        if self.handle.is_some() || self.state != SessionState::Disconnected {
            self.release(SessionState::Disconnected).await;
        }
    }

    fn set_state(&mut self, new_state: SessionState) {
        let old_state = self.state;
        self.state = new_state;
        self.publish_status();

        if old_state != new_state {
            debug!(session = %self.session_id, %old_state, %new_state, "State changed");
            self.emit(PlayerEvent::StateChanged {
                session_id: self.session_id.clone(),
                old_state,
                new_state,
                timestamp: Utc::now(),
            });
        }
    }

    fn publish_status(&self) {
        self.status_tx.send_replace(SessionStatus {
            session_id: self.session_id.clone(),
            state: self.state,
            channel: self.handle.as_ref().map(|h| h.channel.to_string()),
            now_playing: self.current.clone(),
            queue_length: 0,
        });
    }

    fn emit_skipped(&self, url: &str, title: &str, err: &Error) {
        warn!(session = %self.session_id, url = %url, error = %err, "Skipping unplayable track");
        self.emit(skipped_event(&self.session_id, url, title, err));
    }

    fn emit(&self, event: PlayerEvent) {
        self.ctx.events.emit_lossy(event);
    }
}

/// Cache-or-resolver access for one session
struct TrackSource<'a> {
    ctx: &'a SessionContext,
    cancel: &'a CancellationToken,
    session_id: &'a str,
}

impl TrackSource<'_> {
    /// Cache hit (refreshing its access time) or resolver fetch
    ///
    /// Fetches of one url are serialized across sessions by the cache's
    /// fetch lock.
    async fn resolve_or_fetch(&self, url: &str) -> Result<Playable> {
        if let Some(hit) = self.cached(url).await {
            return Ok(hit);
        }

        let _guard = cancellable(self.cancel, self.ctx.cache.fetch_lock(url)).await?;

        // Another session may have fetched it while we waited
        if let Some(hit) = self.cached(url).await {
            return Ok(hit);
        }

        self.fetch(url).await
    }

    async fn cached(&self, url: &str) -> Option<Playable> {
        match self.ctx.cache.lookup(url).await {
            Ok(Some(artifact)) => {
                if let Err(e) = self.ctx.cache.touch(url).await {
                    warn!(url = %url, error = %e, "Failed to refresh artifact access time");
                }
                debug!(session = %self.session_id, url = %url, "Cache hit");
                Some(Playable {
                    title: artifact.title,
                    url: artifact.url,
                    path: artifact.local_path,
                    from_cache: true,
                })
            }
            Ok(None) => None,
            Err(e) => {
                warn!(url = %url, error = %e, "Cache lookup failed, treating as miss");
                None
            }
        }
    }

    /// Resolve through the retry policy and record the artifact
    async fn fetch(&self, url: &str) -> Result<Playable> {
        let resolver = &self.ctx.resolver;
        let resolved = cancellable(
            self.cancel,
            self.ctx.retry.run("resolve", || resolver.resolve(url)),
        )
        .await??;

        info!(
            session = %self.session_id,
            url = %url,
            canonical_url = %resolved.canonical_url,
            title = %resolved.title,
            "Downloaded track"
        );

        // A failed upsert only costs a re-download next time
        if let Err(e) = self.ctx.cache.upsert(url, &resolved.title, &resolved.local_path).await {
            warn!(url = %url, error = %e, "Failed to record downloaded artifact");
        }

        Ok(Playable {
            title: resolved.title,
            url: url.to_string(),
            path: resolved.local_path,
            from_cache: false,
        })
    }
}

/// Download of a track queued behind the current one
struct Prefetch {
    ctx: Arc<SessionContext>,
    cancel: CancellationToken,
    session_id: String,
    entry: QueueEntry,
    position: usize,
    channel: String,
}

impl Prefetch {
    /// Warm the cache and give the entry its resolved title
    ///
    /// A track that cannot be downloaded is taken back out of the queue. A
    /// disconnect leaves the entry as stored.
    async fn run(self) -> Result<PlayOutcome> {
        let source = TrackSource {
            ctx: &self.ctx,
            cancel: &self.cancel,
            session_id: &self.session_id,
        };

        let title = match source.resolve_or_fetch(&self.entry.url).await {
            Ok(playable) => {
                if let Err(e) = self.ctx.queue.set_title(&self.entry, &playable.title).await {
                    warn!(session = %self.session_id, error = %e, "Failed to store resolved title");
                }
                playable.title
            }
            Err(Error::Cancelled) => self.entry.title.clone(),
            Err(e) => {
                warn!(session = %self.session_id, url = %self.entry.url, error = %e, "Queued track could not be downloaded");
                if let Err(remove_err) = self.ctx.queue.remove(&self.entry).await {
                    error!(session = %self.session_id, error = %remove_err, "Failed to drop unplayable queue entry");
                }
                self.ctx.events.emit_lossy(skipped_event(
                    &self.session_id,
                    &self.entry.url,
                    &self.entry.title,
                    &e,
                ));
                return Err(e);
            }
        };

        Ok(PlayOutcome::Queued {
            title,
            url: self.entry.url,
            position: self.position,
            channel: self.channel,
        })
    }
}

fn skipped_event(session_id: &str, url: &str, title: &str, err: &Error) -> PlayerEvent {
    PlayerEvent::TrackSkipped {
        session_id: session_id.to_string(),
        title: title.to_string(),
        url: url.to_string(),
        reason: skip_reason(err),
        timestamp: Utc::now(),
    }
}

/// Await `fut` unless the session is cancelled first
async fn cancellable<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        output = fut => Ok(output),
    }
}

fn skip_reason(err: &Error) -> SkipReason {
    match err {
        Error::Resolution(ResolutionError::RateLimited(_)) => SkipReason::RateLimited,
        Error::Resolution(ResolutionError::Forbidden(_)) => SkipReason::Forbidden,
        Error::Resolution(ResolutionError::NotFound(_)) => SkipReason::NotFound,
        Error::Transport(_) => SkipReason::PlaybackFailed,
        _ => SkipReason::ResolutionFailed,
    }
}
