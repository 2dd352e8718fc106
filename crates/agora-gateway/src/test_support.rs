use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use agora_types::events::StreamEvent;
use agora_types::{Message, MessageId, NewMessage, RoomTier, UserId};

use crate::auth::AuthProvider;
use crate::connection::{Connection, ConnectionId};
use crate::registry::ConnectionRegistry;
use crate::store::MessageStore;

/// Token table auth: token -> (user id, reputation).
#[derive(Default)]
pub struct StaticAuth {
    users: HashMap<String, (UserId, i64)>,
}

impl StaticAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(mut self, token: &str, user_id: UserId, reputation: i64) -> Self {
        self.users.insert(token.to_string(), (user_id, reputation));
        self
    }
}

impl AuthProvider for StaticAuth {
    fn validate(&self, token: &str) -> bool {
        self.users.contains_key(token)
    }

    fn user_id_of(&self, token: &str) -> Option<UserId> {
        self.users.get(token).map(|(id, _)| *id)
    }

    fn reputation_of(&self, user_id: UserId) -> i64 {
        self.users
            .values()
            .find(|(id, _)| *id == user_id)
            .map(|(_, reputation)| *reputation)
            .unwrap_or(0)
    }
}

/// Store whose every call fails.
pub struct FailingStore;

impl MessageStore for FailingStore {
    fn append(&self, _message: NewMessage) -> anyhow::Result<Message> {
        anyhow::bail!("store offline")
    }

    fn messages_after(&self, _room_type: RoomTier, _after: MessageId) -> anyhow::Result<Vec<Message>> {
        anyhow::bail!("store offline")
    }

    fn recent(
        &self,
        _room_type: RoomTier,
        _limit: u32,
        _since: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Vec<Message>> {
        anyhow::bail!("store offline")
    }

    fn count_older_than(&self, _cutoff: &DateTime<Utc>) -> anyhow::Result<u64> {
        anyhow::bail!("store offline")
    }

    fn delete_older_than(&self, _cutoff: &DateTime<Utc>) -> anyhow::Result<u64> {
        anyhow::bail!("store offline")
    }
}

pub fn message(id: MessageId, room_type: RoomTier) -> Message {
    Message {
        id,
        room_type,
        author_id: 1,
        author_name: "tester".into(),
        text: format!("message {}", id),
        looking_for_companion: false,
        created_at: Utc::now(),
    }
}

pub fn new_message(room_type: RoomTier, text: &str) -> NewMessage {
    NewMessage {
        room_type,
        author_id: 1,
        author_name: "tester".into(),
        text: text.into(),
        looking_for_companion: false,
    }
}

/// A registered, open connection with replay already finished.
pub fn open_connection(
    registry: &ConnectionRegistry,
    room_type: RoomTier,
    cursor: MessageId,
) -> (Arc<Connection>, mpsc::UnboundedReceiver<StreamEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let conn = Arc::new(Connection::new(
        ConnectionId::new(),
        1,
        room_type,
        cursor,
        tx,
        CancellationToken::new(),
    ));
    registry.register(conn.clone()).unwrap();
    conn.mark_open();
    conn.finish_replay(Vec::new()).unwrap();
    (conn, rx)
}

pub fn drain(rx: &mut mpsc::UnboundedReceiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn drain_ids(rx: &mut mpsc::UnboundedReceiver<StreamEvent>) -> Vec<MessageId> {
    drain(rx).iter().filter_map(StreamEvent::message_id).collect()
}
