//! Content resolution
//!
//! Turns a user reference (link or search terms) into a canonical title and
//! url plus a local artifact ready for playback.

pub mod retry;
pub mod ytdlp;

pub use retry::RetryPolicy;
pub use ytdlp::YtDlpResolver;

use crate::error::ResolutionError;
use async_trait::async_trait;
use std::path::PathBuf;

/// A resolved and downloaded track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTrack {
    pub title: String,
    pub canonical_url: String,
    pub local_path: PathBuf,
}

/// Network fetch boundary
///
/// Dropping the returned future abandons the fetch; implementations must not
/// leave a partial artifact at a path they would otherwise return.
#[async_trait]
pub trait ContentResolver: Send + Sync {
    async fn resolve(&self, reference: &str) -> Result<ResolvedTrack, ResolutionError>;
}
