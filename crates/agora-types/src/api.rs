use serde::{Deserialize, Serialize};

use crate::tier::RoomTier;

// -- JWT Claims --

/// Claims issued by the external auth service. `sub` carries the numeric
/// user id as a string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostMessageRequest {
    /// Explicit room; omitted means "my own tier".
    #[serde(default)]
    pub room_type: Option<String>,
    #[serde(alias = "message")]
    pub text: String,
    #[serde(default)]
    pub looking_for_companion: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub deleted: u64,
}

// -- Rooms --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomInfo {
    pub room_type: RoomTier,
    pub label: String,
    pub min_reputation: i64,
    pub accessible: bool,
}

impl RoomInfo {
    pub fn for_reputation(tier: RoomTier, reputation: i64) -> Self {
        Self {
            room_type: tier,
            label: tier.label().to_string(),
            min_reputation: tier.min_reputation(),
            accessible: tier.can_access(reputation),
        }
    }
}

// -- Errors --

/// Structured rejection body. `required`/`current` are only present for
/// reputation rejections so clients can explain the gap.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<i64>,
}

// -- Health --

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub connections: usize,
}
