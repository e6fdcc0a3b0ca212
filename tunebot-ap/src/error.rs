//! Error types for tunebot-ap
//!
//! The playback error taxonomy:
//! - `ResolutionError`: the content resolver could not produce an artifact
//! - `StorageError`: the backing store failed
//! - `TransportError`: the voice transport failed
//! - `Error::StaleArtifact`: a cached path vanished before playback (internal,
//!   always recovered by re-resolving)

use std::path::PathBuf;
use thiserror::Error;

/// Classified content resolution failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    /// Upstream is throttling us; retryable after a backoff
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Resolution failed: {0}")]
    Unknown(String),
}

impl ResolutionError {
    /// Only rate limiting is worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, ResolutionError::RateLimited(_))
    }
}

/// Backing store failure
#[derive(Error, Debug)]
#[error("Storage error: {0}")]
pub struct StorageError(#[from] pub sqlx::Error);

/// Voice transport failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Failed to connect: {0}")]
    ConnectFailed(String),

    #[error("Lost connection: {0}")]
    LostConnection(String),
}

/// Main error type for tunebot-ap
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Cached artifact path no longer readable at play time
    #[error("Stale artifact: {}", .0.display())]
    StaleArtifact(PathBuf),

    /// Pending work abandoned because the session disconnected
    #[error("Session disconnected")]
    Cancelled,

    /// Invalid request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Storage(StorageError(err))
    }
}

impl Error {
    /// Short machine-readable classification for the front end
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Storage(_) => "storage",
            Error::Resolution(ResolutionError::RateLimited(_)) => "rate_limited",
            Error::Resolution(ResolutionError::Forbidden(_)) => "forbidden",
            Error::Resolution(ResolutionError::NotFound(_)) => "not_found",
            Error::Resolution(ResolutionError::Unknown(_)) => "resolution_failed",
            Error::Transport(TransportError::ConnectFailed(_)) => "connect_failed",
            Error::Transport(TransportError::LostConnection(_)) => "lost_connection",
            Error::StaleArtifact(_) => "stale_artifact",
            Error::Cancelled => "cancelled",
            Error::BadRequest(_) => "bad_request",
            Error::Internal(_) => "internal",
        }
    }
}

/// Convenience Result type using tunebot-ap Error
pub type Result<T> = std::result::Result<T, Error>;
