use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tier::RoomTier;

/// Store-assigned, strictly increasing message identifier.
pub type MessageId = i64;

pub type UserId = i64;

/// A persisted group-chat message. Immutable once the store has assigned its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub room_type: RoomTier,
    pub author_id: UserId,
    pub author_name: String,
    pub text: String,
    /// Author is looking for a travel companion; clients offer a whisper button.
    pub looking_for_companion: bool,
    /// Always UTC.
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn has_valid_id(&self) -> bool {
        self.id > 0
    }
}

/// A message that has passed validation but has not been persisted yet.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub room_type: RoomTier,
    pub author_id: UserId,
    pub author_name: String,
    pub text: String,
    pub looking_for_companion: bool,
}
