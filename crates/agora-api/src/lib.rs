pub mod auth;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod rooms;
pub mod stream;

use axum::{
    Router,
    routing::{delete, get},
};

use crate::auth::AppState;

/// All group-chat routes under `/api/groupchat`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/groupchat",
            get(messages::list_messages).post(messages::post_message),
        )
        .route("/api/groupchat/recent", get(messages::recent))
        .route("/api/groupchat/all", delete(messages::purge))
        .route("/api/groupchat/rooms", get(rooms::list_rooms))
        .route("/api/groupchat/stream", get(stream::stream))
        .route("/api/groupchat/health", get(rooms::health))
        .with_state(state)
}
