use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use agora_types::events::StreamEvent;
use agora_types::{Message, MessageId, RoomTier, UserId};

use crate::auth::{AuthProvider, resolve_identity};
use crate::connection::{CloseReason, Connection, ConnectionId, DEFAULT_QUEUE_LIMIT};
use crate::error::{GatewayError, Result};
use crate::registry::ConnectionRegistry;
use crate::store::MessageStore;

/// Attempts at drawing an unused connection id before giving up.
const MAX_ID_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub heartbeat_interval: Duration,
    /// `None` keeps streams open until the client leaves.
    pub max_lifetime: Option<Duration>,
    /// Unread events after which a client is treated as stalled and closed.
    pub queue_limit: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            max_lifetime: None,
            queue_limit: DEFAULT_QUEUE_LIMIT,
        }
    }
}

/// A client's request to follow a room.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub token: Option<String>,
    pub room_type: RoomTier,
    /// Highest id the client already has; backlog starts after it.
    pub last_id: MessageId,
}

/// Opens, supervises and closes room streams.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    registry: ConnectionRegistry,
    store: Arc<dyn MessageStore>,
    auth: Arc<dyn AuthProvider>,
    config: StreamConfig,
    /// Parent of every connection's token.
    shutdown: CancellationToken,
}

impl ConnectionManager {
    pub fn new(
        registry: ConnectionRegistry,
        store: Arc<dyn MessageStore>,
        auth: Arc<dyn AuthProvider>,
        config: StreamConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                registry,
                store,
                auth,
                config,
                shutdown,
            }),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.inner.registry
    }

    /// Run a stream through `Connecting` into `Open`.
    ///
    /// Events for the client go to `outbound`: first `Connected`, then the
    /// backlog after `last_id` in ascending order, then live traffic and
    /// pings. Rejections happen before anything is sent. If the
    /// acknowledgement cannot be sent the connection is never registered.
    pub async fn connect(
        &self,
        request: StreamRequest,
        outbound: mpsc::UnboundedSender<StreamEvent>,
    ) -> Result<Arc<Connection>> {
        if self.inner.shutdown.is_cancelled() {
            return Err(GatewayError::ShuttingDown);
        }

        let identity = resolve_identity(self.inner.auth.clone(), request.token).await?;
        let room_type = request.room_type;
        if !room_type.can_access(identity.reputation) {
            debug!(
                "User {} ({}) denied {} stream with reputation {}",
                identity.display_name, identity.user_id, room_type, identity.reputation
            );
            return Err(GatewayError::insufficient(room_type, identity.reputation));
        }

        if outbound.send(StreamEvent::Connected).is_err() {
            warn!("User {} left before the stream opened", identity.user_id);
            return Err(GatewayError::TransportClosed);
        }

        let cursor = request.last_id.max(0);
        let conn = self.register(identity.user_id, room_type, cursor, outbound)?;
        conn.mark_open();
        info!(
            "Stream {} opened: {} ({}) in {} after {}, {} open",
            conn.id(),
            identity.display_name,
            identity.user_id,
            room_type,
            cursor,
            self.inner.registry.len()
        );

        tokio::spawn(self.clone().supervise(conn.clone()));

        let backlog = self.fetch_backlog(room_type, cursor).await;
        match conn.finish_replay(backlog) {
            Ok(sent) => {
                debug!("Stream {} replayed {} messages", conn.id(), sent);
                Ok(conn)
            }
            Err(e) => {
                self.close(&conn, CloseReason::TransportError);
                Err(e)
            }
        }
    }

    fn register(
        &self,
        user_id: UserId,
        room_type: RoomTier,
        cursor: MessageId,
        outbound: mpsc::UnboundedSender<StreamEvent>,
    ) -> Result<Arc<Connection>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let conn = Arc::new(Connection::new(
                ConnectionId::new(),
                user_id,
                room_type,
                cursor,
                outbound.clone(),
                self.inner.shutdown.child_token(),
            )
            .with_queue_limit(self.inner.config.queue_limit));
            match self.inner.registry.register(conn.clone()) {
                Ok(()) => return Ok(conn),
                Err(e) if attempt < MAX_ID_ATTEMPTS => warn!("{}, drawing a new id", e),
                Err(e) => return Err(e),
            }
        }
    }

    /// Store failures degrade to an empty backlog instead of failing the stream.
    async fn fetch_backlog(&self, room_type: RoomTier, after: MessageId) -> Vec<Message> {
        let store = self.inner.store.clone();
        match tokio::task::spawn_blocking(move || store.messages_after(room_type, after)).await {
            Ok(Ok(backlog)) => backlog,
            Ok(Err(e)) => {
                warn!("Backlog fetch for {} after {} failed: {}", room_type, after, e);
                Vec::new()
            }
            Err(e) => {
                warn!("Backlog fetch task failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Heartbeat and lifetime timer for one connection. Exits as soon as the
    /// connection is closed from anywhere, then converges on `close`.
    async fn supervise(self, conn: Arc<Connection>) {
        let mut heartbeat = tokio::time::interval(self.inner.config.heartbeat_interval);
        heartbeat.tick().await;

        let lifetime = self.inner.config.max_lifetime;
        let deadline = async move {
            match lifetime {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);

        let reason = loop {
            tokio::select! {
                _ = conn.closed() => {
                    break if self.inner.shutdown.is_cancelled() {
                        CloseReason::Shutdown
                    } else {
                        CloseReason::Completed
                    };
                }
                _ = &mut deadline => break CloseReason::Timeout,
                _ = heartbeat.tick() => {
                    if conn.send(StreamEvent::Ping).is_err() {
                        debug!("Heartbeat to stream {} failed", conn.id());
                        break CloseReason::TransportError;
                    }
                    trace!("Heartbeat sent to stream {}", conn.id());
                }
            }
        };

        self.close(&conn, reason);
    }

    /// The `Closed` transition. Idempotent.
    pub fn close(&self, conn: &Connection, reason: CloseReason) -> bool {
        self.inner.registry.close(conn, reason)
    }

    pub fn disconnect(&self, id: ConnectionId, reason: CloseReason) -> bool {
        self.inner.registry.close_by_id(id, reason)
    }

    /// Guard that closes the connection when dropped, tying the stream's
    /// lifetime to the response body that owns it.
    pub fn guard(&self, conn: Arc<Connection>) -> StreamGuard {
        StreamGuard {
            manager: self.clone(),
            conn,
        }
    }

    /// Refuse new streams and close every open one. Returns how many were closed.
    pub fn shutdown(&self) -> usize {
        self.inner.shutdown.cancel();
        let open = self.inner.registry.snapshot();
        let mut closed = 0;
        for conn in &open {
            if self.close(conn, CloseReason::Shutdown) {
                closed += 1;
            }
        }
        info!("Closed {} streams for shutdown", closed);
        closed
    }
}

/// Closes its connection with `CloseReason::Completed` on drop.
pub struct StreamGuard {
    manager: ConnectionManager,
    conn: Arc<Connection>,
}

impl StreamGuard {
    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.manager.close(&self.conn, CloseReason::Completed);
    }
}
