use axum::{Json, extract::State};

use agora_gateway::resolve_identity;
use agora_types::RoomTier;
use agora_types::api::{HealthResponse, RoomInfo};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::middleware::BearerToken;

/// Every room with its threshold and whether the caller may enter.
pub async fn list_rooms(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
) -> Result<Json<Vec<RoomInfo>>, ApiError> {
    let identity = resolve_identity(state.auth.clone(), token).await?;
    let rooms = RoomTier::ALL
        .iter()
        .map(|tier| RoomInfo::for_reputation(*tier, identity.reputation))
        .collect();

    Ok(Json(rooms))
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        connections: state.connections.registry().len(),
    })
}
