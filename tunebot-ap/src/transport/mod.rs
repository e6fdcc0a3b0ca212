//! Audio output transport
//!
//! The coordinator drives playback through the `Transport` trait and never
//! touches the voice protocol or audio encoding itself.

pub mod command;

pub use command::CommandTransport;

use crate::error::TransportError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// Opaque reference to the voice channel a session plays into
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelRef(pub String);

impl std::fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Connected transport handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportHandle {
    pub id: Uuid,
    pub channel: ChannelRef,
}

impl TransportHandle {
    pub fn new(channel: ChannelRef) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel,
        }
    }
}

/// Called when a playback ends; `Some` carries the failure that ended it
pub type CompletionCallback = Box<dyn FnOnce(Option<TransportError>) + Send + 'static>;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, channel: &ChannelRef) -> Result<TransportHandle, TransportError>;

    /// Start playing `artifact`
    ///
    /// On `Ok`, `on_complete` is invoked exactly once when this playback
    /// ends, whether it finished, was stopped or failed. On `Err` playback
    /// never started and `on_complete` is dropped uncalled.
    async fn play(
        &self,
        handle: &TransportHandle,
        artifact: &Path,
        on_complete: CompletionCallback,
    ) -> Result<(), TransportError>;

    /// Stop the current playback, if any
    async fn stop(&self, handle: &TransportHandle);

    async fn disconnect(&self, handle: &TransportHandle);

    async fn is_playing(&self, handle: &TransportHandle) -> bool;
}
