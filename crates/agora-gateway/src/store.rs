use chrono::{DateTime, Utc};
use tracing::warn;

use agora_db::Database;
use agora_db::models::MessageRow;
use agora_types::{Message, MessageId, NewMessage, RoomTier};

/// Persistence boundary for group-chat messages. Implementations are
/// blocking; async callers go through `spawn_blocking`.
pub trait MessageStore: Send + Sync + 'static {
    /// Persist a message, assigning its id and creation time.
    fn append(&self, message: NewMessage) -> anyhow::Result<Message>;

    /// Messages in `room_type` with id greater than `after`, ascending.
    fn messages_after(&self, room_type: RoomTier, after: MessageId) -> anyhow::Result<Vec<Message>>;

    /// Newest-first messages in `room_type`, at most `limit`, optionally only
    /// those created at or after `since`.
    fn recent(
        &self,
        room_type: RoomTier,
        limit: u32,
        since: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Vec<Message>>;

    fn count_older_than(&self, cutoff: &DateTime<Utc>) -> anyhow::Result<u64>;

    fn delete_older_than(&self, cutoff: &DateTime<Utc>) -> anyhow::Result<u64>;
}

impl MessageStore for Database {
    fn append(&self, message: NewMessage) -> anyhow::Result<Message> {
        // Round-trip through the stored format so the returned timestamp is
        // exactly what later reads will see.
        let created_at = agora_db::parse_timestamp(&agora_db::format_timestamp(&Utc::now()))?;
        let id = self.insert_message(
            message.room_type.as_str(),
            message.author_id,
            &message.author_name,
            &message.text,
            message.looking_for_companion,
            &created_at,
        )?;

        Ok(Message {
            id,
            room_type: message.room_type,
            author_id: message.author_id,
            author_name: message.author_name,
            text: message.text,
            looking_for_companion: message.looking_for_companion,
            created_at,
        })
    }

    fn messages_after(&self, room_type: RoomTier, after: MessageId) -> anyhow::Result<Vec<Message>> {
        let rows = self.get_messages_after(room_type.as_str(), after)?;
        Ok(rows.into_iter().map(row_to_message).collect())
    }

    fn recent(
        &self,
        room_type: RoomTier,
        limit: u32,
        since: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Vec<Message>> {
        let rows = self.get_recent_messages(room_type.as_str(), limit, since.as_ref())?;
        Ok(rows.into_iter().map(row_to_message).collect())
    }

    fn count_older_than(&self, cutoff: &DateTime<Utc>) -> anyhow::Result<u64> {
        self.count_messages_before(cutoff)
    }

    fn delete_older_than(&self, cutoff: &DateTime<Utc>) -> anyhow::Result<u64> {
        self.delete_messages_before(cutoff)
    }
}

/// Convert a stored row. Rows written before room tiers existed, or with a
/// corrupt tier, are treated as SILVER.
pub fn row_to_message(row: MessageRow) -> Message {
    let room_type = RoomTier::parse(&row.room_type).unwrap_or_else(|| {
        warn!("Unknown room_type '{}' on message {}", row.room_type, row.id);
        RoomTier::Silver
    });
    let created_at = agora_db::parse_timestamp(&row.created_at).unwrap_or_else(|e| {
        warn!("Corrupt created_at '{}' on message {}: {}", row.created_at, row.id, e);
        DateTime::default()
    });

    Message {
        id: row.id,
        room_type,
        author_id: row.author_id,
        author_name: row.author_name,
        text: row.text,
        looking_for_companion: row.looking_for_companion,
        created_at,
    }
}
