use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use serde::Deserialize;
use tracing::info;

use agora_gateway::store::row_to_message;
use agora_gateway::{GatewayError, MessageStore, PostRequest, resolve_identity};
use agora_types::api::{PostMessageRequest, PurgeResponse};
use agora_types::{Message, RoomTier};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::middleware::BearerToken;

const MAX_RECENT: u32 = 50;
const MAX_PAGE_SIZE: u32 = 200;

pub async fn post_message(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
    WithRejection(Json(req), _): WithRejection<Json<PostMessageRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state
        .pipeline
        .post(PostRequest {
            token,
            room_type: req.room_type,
            text: req.text,
            looking_for_companion: req.looking_for_companion.unwrap_or(false),
        })
        .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub room_type: Option<String>,
    #[serde(default = "default_recent_limit")]
    pub limit: u32,
}

fn default_recent_limit() -> u32 {
    MAX_RECENT
}

/// Newest-first messages of one room, only those inside the retention window.
pub async fn recent(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
    WithRejection(Query(query), _): WithRejection<Query<RecentQuery>, ApiError>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let identity = resolve_identity(state.auth.clone(), token).await?;
    let room_type = RoomTier::parse_or(query.room_type.as_deref(), RoomTier::Silver);
    if !room_type.can_access(identity.reputation) {
        return Err(GatewayError::insufficient(room_type, identity.reputation).into());
    }

    let since = state.retention.cutoff(chrono::Utc::now());
    let limit = query.limit.min(MAX_RECENT);
    let db = state.db.clone();
    let messages =
        tokio::task::spawn_blocking(move || db.recent(room_type, limit, Some(since))).await??;

    Ok(Json(messages))
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub size: u32,
}

fn default_page_size() -> u32 {
    50
}

/// Public history across all rooms, newest first.
pub async fn list_messages(
    State(state): State<AppState>,
    WithRejection(Query(query), _): WithRejection<Query<PageQuery>, ApiError>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let size = query.size.min(MAX_PAGE_SIZE);
    let offset = u64::from(query.page) * u64::from(size);
    let db = state.db.clone();
    let rows = tokio::task::spawn_blocking(move || db.get_message_page(offset, size)).await??;

    Ok(Json(rows.into_iter().map(row_to_message).collect()))
}

pub async fn purge(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
) -> Result<Json<PurgeResponse>, ApiError> {
    let identity = resolve_identity(state.auth.clone(), token).await?;
    if identity.user_id != state.admin_user_id {
        return Err(ApiError::forbidden("only the administrator may purge messages"));
    }

    let db = state.db.clone();
    let deleted = tokio::task::spawn_blocking(move || db.delete_all_messages()).await??;
    info!("User {} purged {} messages", identity.user_id, deleted);

    Ok(Json(PurgeResponse { deleted }))
}
