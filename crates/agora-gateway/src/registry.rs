use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::info;

use agora_types::{MessageId, RoomTier};

use crate::connection::{CloseReason, Connection, ConnectionId};
use crate::error::{GatewayError, Result};

type RoomIndex = DashMap<ConnectionId, Arc<Connection>>;

/// Every live stream, keyed by id and indexed by room for fan-out.
///
/// Both maps are sharded, so register/unregister of unrelated connections do
/// not serialise on one lock. Nothing here performs I/O.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    rooms: [RoomIndex; RoomTier::COUNT],
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                connections: DashMap::new(),
                rooms: std::array::from_fn(|_| DashMap::new()),
            }),
        }
    }

    fn room(&self, room_type: RoomTier) -> &RoomIndex {
        &self.inner.rooms[room_type as usize]
    }

    /// Insert a connection. An id that is already live is rejected, never
    /// overwritten.
    pub fn register(&self, conn: Arc<Connection>) -> Result<()> {
        let id = conn.id();
        match self.inner.connections.entry(id) {
            Entry::Occupied(_) => return Err(GatewayError::DuplicateConnection(id)),
            Entry::Vacant(slot) => {
                slot.insert(conn.clone());
            }
        }
        self.room(conn.room_type()).insert(id, conn);
        Ok(())
    }

    /// Remove a connection from the room index and the id map. Idempotent.
    ///
    /// The room entry goes first so a fan-out snapshot sees either the whole
    /// connection or nothing.
    pub fn unregister(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let room_type = self.inner.connections.get(&id).map(|c| c.room_type())?;
        self.room(room_type).remove(&id);
        self.inner.connections.remove(&id).map(|(_, conn)| conn)
    }

    /// Point-in-time snapshot of a room. Safe to iterate while other
    /// connections come and go.
    pub fn connections_in_room(&self, room_type: RoomTier) -> Vec<Arc<Connection>> {
        self.room(room_type)
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Conditional cursor update; see [`Connection::advance_cursor`].
    /// Unknown ids never apply.
    pub fn advance_cursor(&self, id: ConnectionId, message_id: MessageId) -> bool {
        self.inner
            .connections
            .get(&id)
            .is_some_and(|conn| conn.advance_cursor(message_id))
    }

    pub fn cursor(&self, id: ConnectionId) -> Option<MessageId> {
        self.inner.connections.get(&id).map(|conn| conn.cursor())
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.inner.connections.get(&id).map(|conn| conn.clone())
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.inner.connections.contains_key(&id)
    }

    pub fn room_contains(&self, room_type: RoomTier, id: ConnectionId) -> bool {
        self.room(room_type).contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.connections.is_empty()
    }

    pub fn room_len(&self, room_type: RoomTier) -> usize {
        self.room(room_type).len()
    }

    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.inner
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// The `Closed` transition: cancel the connection's timers and drop all
    /// registry state. Safe to call any number of times from any path;
    /// only the first call logs and returns `true`.
    pub fn close(&self, conn: &Connection, reason: CloseReason) -> bool {
        let first = conn.mark_closed();
        self.unregister(conn.id());
        if first {
            info!(
                "Stream {} (user {}, {}) closed: {} after {:?}, {} open",
                conn.id(),
                conn.user_id(),
                conn.room_type(),
                reason,
                conn.age(),
                self.len()
            );
        }
        first
    }

    pub fn close_by_id(&self, id: ConnectionId, reason: CloseReason) -> bool {
        match self.get(id) {
            Some(conn) => self.close(&conn, reason),
            None => false,
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn conn(room_type: RoomTier) -> Arc<Connection> {
        conn_with_id(ConnectionId::new(), room_type)
    }

    fn conn_with_id(id: ConnectionId, room_type: RoomTier) -> Arc<Connection> {
        let (tx, _rx) = mpsc::unbounded_channel();
        Arc::new(Connection::new(id, 1, room_type, 0, tx, CancellationToken::new()))
    }

    #[test]
    fn test_register_indexes_by_room() {
        let registry = ConnectionRegistry::new();
        let gold = conn(RoomTier::Gold);
        let silver = conn(RoomTier::Silver);
        registry.register(gold.clone()).unwrap();
        registry.register(silver.clone()).unwrap();

        let in_gold = registry.connections_in_room(RoomTier::Gold);
        assert_eq!(in_gold.len(), 1);
        assert_eq!(in_gold[0].id(), gold.id());
        assert!(registry.connections_in_room(RoomTier::Diamond).is_empty());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_duplicate_id_is_rejected() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::new();
        let first = conn_with_id(id, RoomTier::Gold);
        registry.register(first.clone()).unwrap();

        let second = conn_with_id(id, RoomTier::Silver);
        assert!(matches!(
            registry.register(second),
            Err(GatewayError::DuplicateConnection(dup)) if dup == id
        ));

        // The live entry is untouched.
        let live = registry.get(id).unwrap();
        assert!(Arc::ptr_eq(&live, &first));
        assert!(registry.room_contains(RoomTier::Gold, id));
        assert!(!registry.room_contains(RoomTier::Silver, id));
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let c = conn(RoomTier::Platinum);
        let id = c.id();
        registry.register(c).unwrap();

        assert!(registry.unregister(id).is_some());
        assert!(!registry.contains(id));
        assert!(!registry.room_contains(RoomTier::Platinum, id));
        assert_eq!(registry.cursor(id), None);

        assert!(registry.unregister(id).is_none());
        assert!(registry.unregister(ConnectionId::new()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_advance_cursor_by_id() {
        let registry = ConnectionRegistry::new();
        let c = conn(RoomTier::Gold);
        let id = c.id();
        registry.register(c).unwrap();

        assert!(registry.advance_cursor(id, 5));
        assert!(!registry.advance_cursor(id, 5));
        assert!(!registry.advance_cursor(id, 4));
        assert_eq!(registry.cursor(id), Some(5));
        assert!(!registry.advance_cursor(ConnectionId::new(), 100));
    }

    #[test]
    fn test_close_twice() {
        let registry = ConnectionRegistry::new();
        let c = conn(RoomTier::Silver);
        registry.register(c.clone()).unwrap();

        assert!(registry.close(&c, CloseReason::TransportError));
        assert!(!registry.close(&c, CloseReason::Completed));
        assert!(!registry.close_by_id(c.id(), CloseReason::Completed));
        assert!(c.is_cancelled());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_register_unregister() {
        let registry = ConnectionRegistry::new();
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let room_type = RoomTier::ALL[t % RoomTier::ALL.len()];
                    for _ in 0..200 {
                        let c = conn(room_type);
                        let id = c.id();
                        registry.register(c).unwrap();
                        for snapshot in registry.connections_in_room(room_type) {
                            assert_eq!(snapshot.room_type(), room_type);
                        }
                        assert!(registry.unregister(id).is_some());
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(registry.is_empty());
        for room_type in RoomTier::ALL {
            assert_eq!(registry.room_len(room_type), 0);
        }
    }
}
