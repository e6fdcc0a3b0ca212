//! Player event types and broadcast bus
//!
//! The playback coordinator never renders user-facing text. Everything the
//! front end needs to announce ("now playing", "skipped", "left the channel")
//! is emitted as a structured `PlayerEvent` on the `EventBus`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// Playback state of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No transport handle held
    Disconnected,
    /// Transport connection in progress
    Connecting,
    /// A track is playing
    Playing,
    /// Queue ran dry, transport released
    Empty,
}

impl SessionState {
    /// True when a play-request has to (re)acquire a transport handle
    pub fn needs_connection(self) -> bool {
        matches!(self, SessionState::Disconnected | SessionState::Empty)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Playing => write!(f, "playing"),
            SessionState::Empty => write!(f, "empty"),
        }
    }
}

/// Why a track was dropped without being played
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Still rate-limited after the bounded retries
    RateLimited,
    Forbidden,
    NotFound,
    /// Unclassified resolver failure
    ResolutionFailed,
    /// The transport refused to play the artifact
    PlaybackFailed,
}

/// Events broadcast by the playback coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlayerEvent {
    /// Session changed state
    StateChanged {
        session_id: String,
        old_state: SessionState,
        new_state: SessionState,
        timestamp: DateTime<Utc>,
    },

    /// A track started playing
    TrackStarted {
        session_id: String,
        title: String,
        url: String,
        /// Served from the artifact cache without a download
        from_cache: bool,
        timestamp: DateTime<Utc>,
    },

    /// A track was skipped without playing (resolution or playback failure)
    TrackSkipped {
        session_id: String,
        title: String,
        url: String,
        reason: SkipReason,
        timestamp: DateTime<Utc>,
    },

    /// Entries were appended to a session queue
    QueueChanged {
        session_id: String,
        length: usize,
        timestamp: DateTime<Utc>,
    },

    /// Queue ran dry; the transport was released
    QueueExhausted {
        session_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl PlayerEvent {
    /// Session the event belongs to
    pub fn session_id(&self) -> &str {
        match self {
            PlayerEvent::StateChanged { session_id, .. }
            | PlayerEvent::TrackStarted { session_id, .. }
            | PlayerEvent::TrackSkipped { session_id, .. }
            | PlayerEvent::QueueChanged { session_id, .. }
            | PlayerEvent::QueueExhausted { session_id, .. } => session_id,
        }
    }

    /// Event name used for the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            PlayerEvent::StateChanged { .. } => "StateChanged",
            PlayerEvent::TrackStarted { .. } => "TrackStarted",
            PlayerEvent::TrackSkipped { .. } => "TrackSkipped",
            PlayerEvent::QueueChanged { .. } => "QueueChanged",
            PlayerEvent::QueueExhausted { .. } => "QueueExhausted",
        }
    }
}

/// One-to-many broadcast of `PlayerEvent`s
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PlayerEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PlayerEvent) {
        if self.tx.send(event).is_err() {
            trace!("No subscribers for player event");
        }
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
