//! Request and result types shared by the coordinator, sessions and API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tunebot_common::db::QueueEntry;
use tunebot_common::SessionState;

/// A track to play or queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRequest {
    /// Link or search terms
    pub url: String,

    /// Display title until the track has been downloaded
    #[serde(default)]
    pub title: Option<String>,
}

impl TrackRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
        }
    }

    pub fn with_title(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: Some(title.into()),
        }
    }

    /// Title to show before the resolved one is known
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.url)
    }
}

/// The track a session is currently playing (never persisted)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NowPlaying {
    pub title: String,
    pub url: String,
    pub from_cache: bool,
    pub started_at: DateTime<Utc>,
}

/// Point-in-time view of a session
///
/// After a successful connect `channel` is set while `state` is still
/// `Connecting`; the state only becomes `Playing` once the first track has
/// been downloaded and handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub state: SessionState,
    pub channel: Option<String>,
    pub now_playing: Option<NowPlaying>,
    pub queue_length: usize,
}

impl SessionStatus {
    pub fn disconnected(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            state: SessionState::Disconnected,
            channel: None,
            now_playing: None,
            queue_length: 0,
        }
    }
}

/// Result of a play-request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PlayOutcome {
    /// Playback began with this track
    Started { title: String, url: String },

    /// Something else is playing; the track went to the queue
    ///
    /// `channel` is where the session is playing, which may differ from the
    /// channel the request named.
    Queued {
        title: String,
        url: String,
        position: usize,
        channel: String,
    },

    /// Bare play-request while a track is already playing
    AlreadyPlaying {
        title: String,
        url: String,
        channel: String,
    },

    /// Bare play-request with an empty queue
    NothingToPlay,
}

/// Result of a skip
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SkipOutcome {
    Skipped { title: String, url: String },
    NothingPlaying,
}

/// A track appended to a session queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedTrack {
    pub entry: QueueEntry,
    /// 1-based position in the session queue
    pub position: usize,
}

/// Which library artifacts to queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibrarySelection {
    All,
    Ids(Vec<i64>),
}

/// Result of queueing library artifacts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryOutcome {
    pub queued: usize,
    pub play: PlayOutcome,
}
