use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::warn;
use uuid::Uuid;

use agora_types::events::StreamEvent;
use agora_types::{Message, MessageId, RoomTier, UserId};

use crate::error::{GatewayError, Result};

/// Unread events a client may accumulate before it counts as stalled.
pub const DEFAULT_QUEUE_LIMIT: usize = 1024;

/// Opaque per-stream identifier. Random, so collisions are improbable but
/// still rejected by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ConnectionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// `Connecting -> Open -> Closed`. No state is revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Closed = 2,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connecting,
            1 => Self::Open,
            _ => Self::Closed,
        }
    }
}

/// Why a connection reached `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Client went away or the response finished normally.
    Completed,
    /// Maximum stream lifetime reached.
    Timeout,
    /// A push to the client failed.
    TransportError,
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Completed => "completed",
            Self::Timeout => "timeout",
            Self::TransportError => "transport error",
            Self::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// Result of offering one message to one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Buffered until backlog replay finishes.
    Deferred,
    /// Already delivered, older than the cursor, or connection closed.
    Skipped,
    Failed,
}

/// One open room stream.
///
/// The cursor is the highest message id already pushed to the client and
/// only ever moves forward. Every push goes through the `replay` lock, so
/// for a single connection the gate check and the send happen as one step
/// and concurrent publishers cannot interleave out of order.
///
/// The outbound queue is bounded by counting: the reader reports each event
/// it takes with `mark_consumed`, and a push that would exceed the limit
/// fails like a closed transport. Backlog replay raises the limit by the
/// backlog size, so a long catch-up never trips it.
pub struct Connection {
    id: ConnectionId,
    user_id: UserId,
    room_type: RoomTier,
    cursor: AtomicI64,
    state: AtomicU8,
    outbound: mpsc::UnboundedSender<StreamEvent>,
    cancel: CancellationToken,
    /// `Some` while backlog replay is pending; live messages queue here.
    replay: Mutex<Option<Vec<Arc<Message>>>>,
    queued: AtomicUsize,
    queue_limit: AtomicUsize,
    created_at: Instant,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        user_id: UserId,
        room_type: RoomTier,
        cursor: MessageId,
        outbound: mpsc::UnboundedSender<StreamEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            user_id,
            room_type,
            cursor: AtomicI64::new(cursor),
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            outbound,
            cancel,
            replay: Mutex::new(Some(Vec::new())),
            queued: AtomicUsize::new(0),
            queue_limit: AtomicUsize::new(DEFAULT_QUEUE_LIMIT),
            created_at: Instant::now(),
        }
    }

    pub fn with_queue_limit(self, limit: usize) -> Self {
        self.queue_limit.store(limit, Ordering::Release);
        self
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn room_type(&self) -> RoomTier {
        self.room_type
    }

    pub fn cursor(&self) -> MessageId {
        self.cursor.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Resolves once the connection is closed or the server shuts down.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Events pushed but not yet taken by the reader.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    /// The reader took one pushed event off the channel.
    pub fn mark_consumed(&self) {
        let _ = self
            .queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Move the cursor to `id` only if it is strictly ahead of the current
    /// value. Returns whether the update applied.
    pub fn advance_cursor(&self, id: MessageId) -> bool {
        self.cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (id > current).then_some(id)
            })
            .is_ok()
    }

    pub(crate) fn mark_open(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Connecting as u8,
                ConnectionState::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Enter `Closed` and cancel the connection's timers. Returns `true`
    /// only for the first caller.
    pub(crate) fn mark_closed(&self) -> bool {
        let previous = self.state.swap(ConnectionState::Closed as u8, Ordering::AcqRel);
        self.cancel.cancel();
        previous != ConnectionState::Closed as u8
    }

    /// Push a non-message event (acknowledgement, keep-alive).
    pub fn send(&self, event: StreamEvent) -> Result<()> {
        if self.enqueue(event) {
            Ok(())
        } else {
            Err(GatewayError::TransportClosed)
        }
    }

    /// Offer a live message. Deferred while replay is pending, otherwise
    /// gated by the cursor.
    pub fn deliver(&self, message: &Arc<Message>) -> Delivery {
        if self.state() == ConnectionState::Closed {
            return Delivery::Skipped;
        }

        let mut replay = self.lock_replay();
        if let Some(pending) = replay.as_mut() {
            pending.push(message.clone());
            return Delivery::Deferred;
        }
        self.push(message)
    }

    /// Send the backlog, then flush whatever live traffic queued up in the
    /// meantime, both through the cursor gate. Returns the number of messages
    /// sent.
    pub fn finish_replay(&self, backlog: Vec<Message>) -> Result<usize> {
        let mut replay = self.lock_replay();
        let mut pending = replay.take().unwrap_or_default();
        self.queue_limit.fetch_add(backlog.len(), Ordering::AcqRel);
        pending.sort_by_key(|message| message.id);

        let backlog = backlog.into_iter().map(Arc::new);
        let mut sent = 0;
        for message in backlog.chain(pending) {
            match self.push(&message) {
                Delivery::Sent => sent += 1,
                Delivery::Failed => return Err(GatewayError::TransportClosed),
                Delivery::Deferred | Delivery::Skipped => {}
            }
        }
        Ok(sent)
    }

    // Callers hold the replay lock.
    fn push(&self, message: &Arc<Message>) -> Delivery {
        if !self.advance_cursor(message.id) {
            return Delivery::Skipped;
        }
        if self.enqueue(StreamEvent::Message(message.clone())) {
            Delivery::Sent
        } else {
            Delivery::Failed
        }
    }

    fn enqueue(&self, event: StreamEvent) -> bool {
        let limit = self.queue_limit.load(Ordering::Acquire);
        let reserved = self
            .queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < limit).then_some(n + 1));
        if reserved.is_err() {
            warn!("Stream {} left {} events unread, treating it as stalled", self.id, limit);
            return false;
        }

        if self.outbound.send(event).is_err() {
            self.mark_consumed();
            return false;
        }
        true
    }

    fn lock_replay(&self) -> MutexGuard<'_, Option<Vec<Arc<Message>>>> {
        self.replay.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("room_type", &self.room_type)
            .field("cursor", &self.cursor())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{drain_ids, message};

    fn connection(cursor: MessageId) -> (Connection, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Connection::new(
            ConnectionId::new(),
            1,
            RoomTier::Gold,
            cursor,
            tx,
            CancellationToken::new(),
        );
        (conn, rx)
    }

    #[test]
    fn test_cursor_only_moves_forward() {
        let (conn, _rx) = connection(9);
        assert!(!conn.advance_cursor(9));
        assert!(!conn.advance_cursor(3));
        assert!(conn.advance_cursor(10));
        assert!(conn.advance_cursor(12));
        assert!(!conn.advance_cursor(11));
        assert_eq!(conn.cursor(), 12);
    }

    #[test]
    fn test_live_messages_wait_for_replay() {
        let (conn, mut rx) = connection(0);
        assert!(conn.mark_open());

        // Live traffic races ahead of the backlog fetch.
        assert_eq!(conn.deliver(&Arc::new(message(3, RoomTier::Gold))), Delivery::Deferred);
        assert_eq!(conn.deliver(&Arc::new(message(2, RoomTier::Gold))), Delivery::Deferred);

        let backlog = vec![message(1, RoomTier::Gold), message(2, RoomTier::Gold)];
        assert_eq!(conn.finish_replay(backlog).unwrap(), 3);
        assert_eq!(drain_ids(&mut rx), vec![1, 2, 3]);

        assert_eq!(conn.deliver(&Arc::new(message(4, RoomTier::Gold))), Delivery::Sent);
        assert_eq!(conn.deliver(&Arc::new(message(4, RoomTier::Gold))), Delivery::Skipped);
        assert_eq!(drain_ids(&mut rx), vec![4]);
    }

    #[test]
    fn test_closed_connection_skips() {
        let (conn, mut rx) = connection(0);
        conn.finish_replay(Vec::new()).unwrap();
        assert!(conn.mark_closed());
        assert!(!conn.mark_closed());
        assert!(conn.is_cancelled());

        assert_eq!(conn.deliver(&Arc::new(message(1, RoomTier::Gold))), Delivery::Skipped);
        assert!(drain_ids(&mut rx).is_empty());
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_dropped_receiver_fails_delivery() {
        let (conn, rx) = connection(0);
        conn.finish_replay(Vec::new()).unwrap();
        drop(rx);

        assert_eq!(conn.deliver(&Arc::new(message(5, RoomTier::Gold))), Delivery::Failed);
        assert!(matches!(conn.send(StreamEvent::Ping), Err(GatewayError::TransportClosed)));
    }

    #[test]
    fn test_unread_queue_is_bounded() {
        let (conn, mut rx) = connection(0);
        let conn = conn.with_queue_limit(2);
        conn.finish_replay(Vec::new()).unwrap();

        assert_eq!(conn.deliver(&Arc::new(message(1, RoomTier::Gold))), Delivery::Sent);
        assert_eq!(conn.deliver(&Arc::new(message(2, RoomTier::Gold))), Delivery::Sent);
        assert_eq!(conn.deliver(&Arc::new(message(3, RoomTier::Gold))), Delivery::Failed);
        assert!(matches!(conn.send(StreamEvent::Ping), Err(GatewayError::TransportClosed)));
        assert_eq!(conn.queued(), 2);

        // The reader catches up by one.
        assert!(rx.try_recv().is_ok());
        conn.mark_consumed();
        assert_eq!(conn.deliver(&Arc::new(message(4, RoomTier::Gold))), Delivery::Sent);
        assert_eq!(drain_ids(&mut rx), vec![2, 4]);
    }

    #[test]
    fn test_backlog_extends_queue_limit() {
        let (conn, mut rx) = connection(0);
        let conn = conn.with_queue_limit(2);

        let backlog = (1..=5).map(|id| message(id, RoomTier::Gold)).collect();
        assert_eq!(conn.finish_replay(backlog).unwrap(), 5);
        assert_eq!(conn.queued(), 5);

        assert_eq!(conn.deliver(&Arc::new(message(6, RoomTier::Gold))), Delivery::Sent);
        assert_eq!(conn.deliver(&Arc::new(message(7, RoomTier::Gold))), Delivery::Sent);
        assert_eq!(conn.deliver(&Arc::new(message(8, RoomTier::Gold))), Delivery::Failed);
        assert_eq!(drain_ids(&mut rx), vec![1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_consumed_never_underflows() {
        let (conn, _rx) = connection(0);
        conn.mark_consumed();
        assert_eq!(conn.queued(), 0);
    }

    #[test]
    fn test_open_only_from_connecting() {
        let (conn, _rx) = connection(0);
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(conn.mark_open());
        assert!(!conn.mark_open());
        conn.mark_closed();
        assert!(!conn.mark_open());
        assert_eq!(conn.state(), ConnectionState::Closed);
    }
}
