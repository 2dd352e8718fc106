use std::convert::Infallible;

use axum::{
    extract::{Query, State},
    http::{HeaderName, header},
    response::{
        IntoResponse,
        sse::{Event, Sse},
    },
};
use axum_extra::extract::WithRejection;
use futures_util::stream::Stream;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::warn;

use agora_gateway::{StreamGuard, StreamRequest};
use agora_types::RoomTier;
use agora_types::events::StreamEvent;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::middleware::BearerToken;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub room_type: Option<String>,
    #[serde(default)]
    pub last_id: i64,
    pub token: Option<String>,
}

/// Server-sent event stream for one room. The response body owns the
/// connection's guard, so the connection closes as soon as the client goes away.
pub async fn stream(
    State(state): State<AppState>,
    bearer: BearerToken,
    WithRejection(Query(query), _): WithRejection<Query<StreamQuery>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let request = StreamRequest {
        token: bearer.or_query(query.token),
        room_type: RoomTier::parse_or(query.room_type.as_deref(), RoomTier::Silver),
        last_id: query.last_id,
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let conn = state.connections.connect(request, tx).await?;
    let guard = state.connections.guard(conn);

    Ok((
        [
            (header::CACHE_CONTROL, "no-cache, no-transform"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(events(guard, rx)),
    ))
}

fn events(
    guard: StreamGuard,
    mut rx: mpsc::UnboundedReceiver<StreamEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        loop {
            // Queued events are flushed before a close is honoured.
            let event = tokio::select! {
                biased;
                event = rx.recv() => event,
                _ = guard.connection().closed() => None,
            };
            let Some(event) = event else { break };
            if event != StreamEvent::Connected {
                guard.connection().mark_consumed();
            }
            yield Ok::<_, Infallible>(to_sse(&event));
        }
    }
}

fn to_sse(event: &StreamEvent) -> Event {
    match event {
        StreamEvent::Connected => Event::default().event("connected").data("stream established"),
        StreamEvent::Message(message) => Event::default()
            .event("message")
            .id(message.id.to_string())
            .json_data(message.as_ref())
            .unwrap_or_else(|e| {
                warn!("Failed to encode message {}: {}", message.id, e);
                Event::default().comment("dropped")
            }),
        StreamEvent::Ping => Event::default().event("ping").comment("keep-alive"),
    }
}
