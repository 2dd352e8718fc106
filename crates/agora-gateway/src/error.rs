use agora_types::RoomTier;

use crate::connection::ConnectionId;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Missing, invalid or unparseable credential. Never retried.
    #[error("authentication required")]
    Unauthenticated,

    /// Reputation below the room threshold; carries the gap for display.
    #[error("reputation too low for {tier}: required {required}, current {current}")]
    InsufficientReputation {
        tier: RoomTier,
        required: i64,
        current: i64,
    },

    #[error("message text must not be empty")]
    EmptyMessage,

    /// The stream's receiving side is gone.
    #[error("stream transport closed")]
    TransportClosed,

    #[error("connection id {0} is already registered")]
    DuplicateConnection(ConnectionId),

    #[error("server is shutting down")]
    ShuttingDown,

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl GatewayError {
    pub fn insufficient(tier: RoomTier, current: i64) -> Self {
        Self::InsufficientReputation {
            tier,
            required: tier.min_reputation(),
            current,
        }
    }
}

pub type Result<T, E = GatewayError> = std::result::Result<T, E>;
