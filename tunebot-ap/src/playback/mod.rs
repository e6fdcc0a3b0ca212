//! Playback coordination
//!
//! `PlaybackCoordinator` is the front-end facing API. Each session runs as
//! its own actor task (`session`), tracked by the `SessionRegistry`.
//!
//! Session states: `Disconnected` → `Connecting` → `Playing` → `Empty`.
//! Any failure lands a session in `Empty` or `Disconnected`.

pub mod coordinator;
pub mod registry;
pub mod session;
pub mod state;

pub use coordinator::{CoordinatorOptions, PlaybackCoordinator};
pub use state::{
    LibraryOutcome, LibrarySelection, NowPlaying, PlayOutcome, QueuedTrack, SessionStatus,
    SkipOutcome, TrackRequest,
};
