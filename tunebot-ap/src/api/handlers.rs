//! HTTP request handlers
//!
//! Thin translation between JSON bodies and `PlaybackCoordinator` calls.
//! Failures are returned as `{"status": "error", "kind": ..., "message": ...}`.

use super::AppContext;
use crate::error::{Error, ResolutionError, TransportError};
use crate::playback::{
    LibraryOutcome, LibrarySelection, PlayOutcome, QueuedTrack, SessionStatus, SkipOutcome,
    TrackRequest,
};
use crate::transport::ChannelRef;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use tunebot_common::db::{CachedArtifact, QueueEntry};

// ========================================
// Request/Response Types
// ========================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct PlayRequest {
    channel: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    url: String,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LibraryRequest {
    channel: String,
    #[serde(default)]
    ids: Option<Vec<i64>>,
    #[serde(default)]
    all: bool,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    removed: u64,
}

#[derive(Debug, Serialize)]
pub struct DisconnectResponse {
    disconnected: bool,
}

#[derive(Debug, Serialize)]
pub struct QueueResponse {
    session_id: String,
    entries: Vec<QueueEntry>,
}

#[derive(Debug, Serialize)]
pub struct LibraryResponse {
    artifacts: Vec<CachedArtifact>,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

fn status_code(err: &Error) -> StatusCode {
    match err {
        Error::BadRequest(_) => StatusCode::BAD_REQUEST,
        Error::Resolution(ResolutionError::RateLimited(_)) => StatusCode::TOO_MANY_REQUESTS,
        Error::Resolution(ResolutionError::Forbidden(_)) => StatusCode::FORBIDDEN,
        Error::Resolution(ResolutionError::NotFound(_)) => StatusCode::NOT_FOUND,
        Error::Resolution(ResolutionError::Unknown(_)) | Error::StaleArtifact(_) => StatusCode::BAD_GATEWAY,
        Error::Transport(TransportError::ConnectFailed(_))
        | Error::Transport(TransportError::LostConnection(_)) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Cancelled => StatusCode::CONFLICT,
        Error::Config(_) | Error::Storage(_) | Error::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_response(err: Error) -> (StatusCode, Json<ErrorResponse>) {
    let code = status_code(&err);
    if code.is_server_error() {
        error!(kind = err.kind(), "Request failed: {}", err);
    }
    (
        code,
        Json(ErrorResponse {
            status: "error".to_string(),
            kind: err.kind().to_string(),
            message: err.to_string(),
        }),
    )
}

fn non_empty(field: &str, value: &str) -> Result<String, Error> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::BadRequest(format!("{} must not be empty", field)));
    }
    Ok(trimmed.to_string())
}

// ========================================
// Health
// ========================================

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "tunebot-ap".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ========================================
// Session control
// ========================================

/// POST /sessions/:id/play
pub async fn play(
    State(ctx): State<AppContext>,
    Path(session_id): Path<String>,
    Json(req): Json<PlayRequest>,
) -> ApiResult<PlayOutcome> {
    let channel = non_empty("channel", &req.channel).map_err(error_response)?;
    let track = match req.url.as_deref() {
        Some(url) => Some(TrackRequest {
            url: non_empty("url", url).map_err(error_response)?,
            title: req.title.clone(),
        }),
        None => None,
    };

    info!(session = %session_id, url = ?track.as_ref().map(|t| &t.url), "Play request");

    ctx.coordinator
        .play(&session_id, ChannelRef(channel), track)
        .await
        .map(Json)
        .map_err(error_response)
}

/// POST /sessions/:id/enqueue
pub async fn enqueue(
    State(ctx): State<AppContext>,
    Path(session_id): Path<String>,
    Json(req): Json<EnqueueRequest>,
) -> ApiResult<QueuedTrack> {
    let url = non_empty("url", &req.url).map_err(error_response)?;

    ctx.coordinator
        .enqueue(&session_id, TrackRequest { url, title: req.title })
        .await
        .map(Json)
        .map_err(error_response)
}

/// POST /sessions/:id/skip
pub async fn skip(
    State(ctx): State<AppContext>,
    Path(session_id): Path<String>,
) -> ApiResult<SkipOutcome> {
    ctx.coordinator
        .skip(&session_id)
        .await
        .map(Json)
        .map_err(error_response)
}

/// POST /sessions/:id/clear
pub async fn clear(
    State(ctx): State<AppContext>,
    Path(session_id): Path<String>,
) -> ApiResult<ClearResponse> {
    ctx.coordinator
        .clear(&session_id)
        .await
        .map(|removed| Json(ClearResponse { removed }))
        .map_err(error_response)
}

/// POST /sessions/:id/disconnect
pub async fn disconnect(
    State(ctx): State<AppContext>,
    Path(session_id): Path<String>,
) -> Json<DisconnectResponse> {
    let disconnected = ctx.coordinator.disconnect(&session_id).await;
    Json(DisconnectResponse { disconnected })
}

/// GET /sessions/:id/queue
pub async fn get_queue(
    State(ctx): State<AppContext>,
    Path(session_id): Path<String>,
) -> ApiResult<QueueResponse> {
    let entries = ctx
        .coordinator
        .snapshot(&session_id)
        .await
        .map_err(error_response)?;
    Ok(Json(QueueResponse { session_id, entries }))
}

/// GET /sessions/:id/status
pub async fn get_status(
    State(ctx): State<AppContext>,
    Path(session_id): Path<String>,
) -> ApiResult<SessionStatus> {
    ctx.coordinator
        .status(&session_id)
        .await
        .map(Json)
        .map_err(error_response)
}

// ========================================
// Library
// ========================================

/// POST /sessions/:id/library
pub async fn queue_library(
    State(ctx): State<AppContext>,
    Path(session_id): Path<String>,
    Json(req): Json<LibraryRequest>,
) -> ApiResult<LibraryOutcome> {
    let channel = non_empty("channel", &req.channel).map_err(error_response)?;
    let selection = match (req.all, req.ids) {
        (true, _) => LibrarySelection::All,
        (false, Some(ids)) if !ids.is_empty() => LibrarySelection::Ids(ids),
        _ => {
            return Err(error_response(Error::BadRequest(
                "Either ids or all must be given".to_string(),
            )))
        }
    };

    ctx.coordinator
        .queue_library(&session_id, ChannelRef(channel), selection)
        .await
        .map(Json)
        .map_err(error_response)
}

/// GET /library
pub async fn list_library(State(ctx): State<AppContext>) -> ApiResult<LibraryResponse> {
    ctx.coordinator
        .library()
        .await
        .map(|artifacts| Json(LibraryResponse { artifacts }))
        .map_err(error_response)
}
