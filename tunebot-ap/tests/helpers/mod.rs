//! Shared fixtures for tunebot-ap integration tests
//!
//! - `MockTransport`: records connects/plays and lets the test finish a
//!   playback by hand
//! - `MockResolver`: writes a small file per resolve, with scripted failures
//! - `Harness`: coordinator over a temporary SQLite database

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tunebot_ap::error::{ResolutionError, TransportError};
use tunebot_ap::playback::{CoordinatorOptions, PlaybackCoordinator, SessionStatus};
use tunebot_ap::resolver::{ContentResolver, ResolvedTrack, RetryPolicy};
use tunebot_ap::transport::{ChannelRef, CompletionCallback, Transport, TransportHandle};
use tunebot_common::{EventBus, PlayerEvent, SessionState};

// ========================================
// MockTransport
// ========================================

#[derive(Default)]
pub struct MockTransport {
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub stops: AtomicUsize,
    pub connect_delay: Mutex<Duration>,
    pub fail_connect: Mutex<bool>,
    played: Mutex<Vec<PathBuf>>,
    pending: Mutex<HashMap<String, CompletionCallback>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock().unwrap() = delay;
    }

    pub fn set_fail_connect(&self, fail: bool) {
        *self.fail_connect.lock().unwrap() = fail;
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn played(&self) -> Vec<PathBuf> {
        self.played.lock().unwrap().clone()
    }

    /// End the playback on `channel` as if the track ran out
    pub fn finish(&self, channel: &str) -> bool {
        self.finish_with(channel, None)
    }

    pub fn finish_with(&self, channel: &str, error: Option<TransportError>) -> bool {
        let callback = self.pending.lock().unwrap().remove(channel);
        match callback {
            Some(callback) => {
                callback(error);
                true
            }
            None => false,
        }
    }

    fn fire_pending(&self, channel: &ChannelRef) {
        let callback = self.pending.lock().unwrap().remove(&channel.0);
        if let Some(callback) = callback {
            callback(None);
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, channel: &ChannelRef) -> Result<TransportHandle, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let delay = *self.connect_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if *self.fail_connect.lock().unwrap() {
            return Err(TransportError::ConnectFailed("channel unavailable".to_string()));
        }
        Ok(TransportHandle::new(channel.clone()))
    }

    async fn play(
        &self,
        handle: &TransportHandle,
        artifact: &Path,
        on_complete: CompletionCallback,
    ) -> Result<(), TransportError> {
        self.fire_pending(&handle.channel);
        self.played.lock().unwrap().push(artifact.to_path_buf());
        self.pending
            .lock()
            .unwrap()
            .insert(handle.channel.0.clone(), on_complete);
        Ok(())
    }

    async fn stop(&self, handle: &TransportHandle) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.fire_pending(&handle.channel);
    }

    async fn disconnect(&self, handle: &TransportHandle) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.fire_pending(&handle.channel);
    }

    async fn is_playing(&self, handle: &TransportHandle) -> bool {
        self.pending.lock().unwrap().contains_key(&handle.channel.0)
    }
}

// ========================================
// MockResolver
// ========================================

pub struct MockResolver {
    dir: PathBuf,
    failures: Mutex<HashMap<String, VecDeque<ResolutionError>>>,
    calls: Mutex<Vec<String>>,
    counter: AtomicUsize,
    delay: Mutex<Duration>,
}

impl MockResolver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            counter: AtomicUsize::new(0),
            delay: Mutex::new(Duration::ZERO),
        }
    }

    /// Queue failures returned by the next resolves of `url`
    pub fn fail_next(&self, url: &str, errors: Vec<ResolutionError>) {
        self.failures
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .extend(errors);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ContentResolver for MockResolver {
    async fn resolve(&self, reference: &str) -> Result<ResolvedTrack, ResolutionError> {
        self.calls.lock().unwrap().push(reference.to_string());

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .failures
            .lock()
            .unwrap()
            .get_mut(reference)
            .and_then(VecDeque::pop_front);
        if let Some(err) = scripted {
            return Err(err);
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let path = self.dir.join(format!("track-{}.m4a", n));
        tokio::fs::write(&path, b"fake audio")
            .await
            .map_err(|e| ResolutionError::Unknown(e.to_string()))?;

        Ok(ResolvedTrack {
            title: title_of(reference),
            canonical_url: format!("https://canonical.example/{}", reference),
            local_path: path,
        })
    }
}

/// Title the mock resolver reports for `url`
pub fn title_of(url: &str) -> String {
    format!("Title {}", url)
}

// ========================================
// Harness
// ========================================

pub const CHANNEL: &str = "voice-1";

pub struct Harness {
    pub coordinator: PlaybackCoordinator,
    pub transport: Arc<MockTransport>,
    pub resolver: Arc<MockResolver>,
    pub pool: sqlx::SqlitePool,
    pub events: EventBus,
    pub dir: TempDir,
}

pub fn fast_options() -> CoordinatorOptions {
    CoordinatorOptions {
        retry: RetryPolicy::new(1, Duration::from_millis(1), 2.0, Duration::from_millis(5)),
        connect_timeout: Duration::from_secs(2),
        idle_timeout: Duration::from_secs(60),
    }
}

pub async fn harness() -> Harness {
    harness_with(fast_options()).await
}

pub async fn harness_with(options: CoordinatorOptions) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let pool = tunebot_common::db::init_database(&dir.path().join("test.db"))
        .await
        .unwrap();

    let songs = dir.path().join("songs");
    std::fs::create_dir_all(&songs).unwrap();

    let transport = Arc::new(MockTransport::new());
    let resolver = Arc::new(MockResolver::new(songs));
    let events = EventBus::new(256);

    let coordinator = PlaybackCoordinator::new(
        pool.clone(),
        resolver.clone(),
        transport.clone(),
        events.clone(),
        options,
    );

    Harness {
        coordinator,
        transport,
        resolver,
        pool,
        events,
        dir,
    }
}

pub fn channel() -> ChannelRef {
    ChannelRef(CHANNEL.to_string())
}

/// Poll the session status until `predicate` holds (2s limit)
pub async fn wait_for_status<F>(coordinator: &PlaybackCoordinator, session_id: &str, predicate: F) -> SessionStatus
where
    F: Fn(&SessionStatus) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let status = coordinator.status(session_id).await.unwrap();
        if predicate(&status) {
            return status;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("Timed out waiting for session status, last: {:?}", status);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for_state(coordinator: &PlaybackCoordinator, session_id: &str, state: SessionState) -> SessionStatus {
    wait_for_status(coordinator, session_id, |s| s.state == state).await
}

pub async fn wait_for_track(coordinator: &PlaybackCoordinator, session_id: &str, url: &str) -> SessionStatus {
    wait_for_status(coordinator, session_id, |s| {
        s.state == SessionState::Playing && s.now_playing.as_ref().map(|np| np.url.as_str()) == Some(url)
    })
    .await
}

/// Receive events until one matches (2s limit)
pub async fn expect_event<F>(rx: &mut tokio::sync::broadcast::Receiver<PlayerEvent>, predicate: F) -> PlayerEvent
where
    F: Fn(&PlayerEvent) -> bool,
{
    let deadline = Duration::from_secs(2);
    tokio::time::timeout(deadline, async {
        loop {
            let event = rx.recv().await.unwrap();
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("Timed out waiting for event")
}
