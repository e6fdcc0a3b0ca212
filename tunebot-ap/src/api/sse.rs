//! Server-Sent Events stream of player events

use super::AppContext;
use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Only forward events of this session
    #[serde(default)]
    session: Option<String>,
}

/// GET /events
pub async fn event_stream(
    State(ctx): State<AppContext>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!(session = ?query.session, "New SSE client connected");

    let rx = ctx.coordinator.events().subscribe();
    let filter = query.session;

    let stream = BroadcastStream::new(rx).filter_map(move |result| {
        let filter = filter.clone();
        async move {
            let event = match result {
                Ok(event) => event,
                Err(e) => {
                    // Lagged receivers skip ahead
                    warn!("SSE stream error: {:?}", e);
                    return None;
                }
            };

            if let Some(session) = &filter {
                if event.session_id() != session {
                    return None;
                }
            }

            match serde_json::to_string(&event) {
                Ok(json) => Some(Ok(Event::default().event(event.event_type()).data(json))),
                Err(e) => {
                    warn!("Failed to serialize event: {}", e);
                    None
                }
            }
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
