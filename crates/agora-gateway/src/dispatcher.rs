use std::sync::Arc;

use tracing::{debug, warn};

use agora_types::Message;

use crate::connection::{CloseReason, Connection, Delivery};
use crate::registry::ConnectionRegistry;

/// Per-publish tallies, mostly for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    pub matched: usize,
    pub delivered: usize,
    pub deferred: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Fans persisted messages out to the open streams of their room.
#[derive(Clone)]
pub struct Dispatcher {
    registry: ConnectionRegistry,
}

impl Dispatcher {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Push a freshly persisted message to every connection in its room.
    ///
    /// Fire-and-forget: nothing is buffered for connections that are not
    /// open right now, they catch up through backlog replay. A failed push
    /// never stops the loop; the failed connections are torn down once the
    /// loop is done.
    pub fn publish(&self, message: &Message) -> PublishReport {
        let mut report = PublishReport::default();

        if !message.has_valid_id() {
            warn!("Refusing to broadcast message without a valid id ({})", message.id);
            return report;
        }

        let targets = self.registry.connections_in_room(message.room_type);
        if targets.is_empty() {
            return report;
        }
        report.matched = targets.len();

        let message = Arc::new(message.clone());
        let mut failed: Vec<Arc<Connection>> = Vec::new();
        for conn in &targets {
            match conn.deliver(&message) {
                Delivery::Sent => report.delivered += 1,
                Delivery::Deferred => report.deferred += 1,
                Delivery::Skipped => report.skipped += 1,
                Delivery::Failed => {
                    report.failed += 1;
                    failed.push(conn.clone());
                }
            }
        }

        for conn in failed {
            warn!("Broadcast of message {} to stream {} failed", message.id, conn.id());
            self.registry.close(&conn, CloseReason::TransportError);
        }

        debug!(
            "Message {} in {}: {} delivered, {} deferred, {} skipped, {} failed",
            message.id,
            message.room_type,
            report.delivered,
            report.deferred,
            report.skipped,
            report.failed
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{drain_ids, message, open_connection};
    use agora_types::RoomTier;

    #[test]
    fn test_publish_to_empty_room_is_noop() {
        let dispatcher = Dispatcher::new(ConnectionRegistry::new());
        let report = dispatcher.publish(&message(1, RoomTier::Gold));
        assert_eq!(report, PublishReport::default());
    }

    #[test]
    fn test_invalid_id_is_rejected() {
        let registry = ConnectionRegistry::new();
        let (_conn, mut rx) = open_connection(&registry, RoomTier::Gold, 0);
        let dispatcher = Dispatcher::new(registry);

        let report = dispatcher.publish(&message(0, RoomTier::Gold));
        assert_eq!(report.matched, 0);
        assert!(drain_ids(&mut rx).is_empty());
    }

    #[test]
    fn test_only_matching_room_receives() {
        let registry = ConnectionRegistry::new();
        let (_gold, mut gold_rx) = open_connection(&registry, RoomTier::Gold, 0);
        let (_silver, mut silver_rx) = open_connection(&registry, RoomTier::Silver, 0);
        let dispatcher = Dispatcher::new(registry);

        let report = dispatcher.publish(&message(4, RoomTier::Gold));
        assert_eq!(report.delivered, 1);
        assert_eq!(drain_ids(&mut gold_rx), vec![4]);
        assert!(drain_ids(&mut silver_rx).is_empty());
    }

    #[test]
    fn test_at_most_once_per_connection() {
        let registry = ConnectionRegistry::new();
        let (_conn, mut rx) = open_connection(&registry, RoomTier::Gold, 5);
        let dispatcher = Dispatcher::new(registry);

        dispatcher.publish(&message(5, RoomTier::Gold));
        dispatcher.publish(&message(6, RoomTier::Gold));
        let again = dispatcher.publish(&message(6, RoomTier::Gold));
        assert_eq!(again.skipped, 1);

        assert_eq!(drain_ids(&mut rx), vec![6]);
    }

    #[test]
    fn test_failed_connection_is_torn_down_after_loop() {
        let registry = ConnectionRegistry::new();
        let (dead, dead_rx) = open_connection(&registry, RoomTier::Gold, 0);
        let (_live, mut live_rx) = open_connection(&registry, RoomTier::Gold, 0);
        drop(dead_rx);
        let dispatcher = Dispatcher::new(registry.clone());

        let report = dispatcher.publish(&message(1, RoomTier::Gold));
        assert_eq!(report.failed, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(drain_ids(&mut live_rx), vec![1]);
        assert!(!registry.contains(dead.id()));
        assert!(dead.is_cancelled());

        let report = dispatcher.publish(&message(2, RoomTier::Gold));
        assert_eq!(report.matched, 1);
        assert_eq!(drain_ids(&mut live_rx), vec![2]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_publishes_stay_ordered() {
        let registry = ConnectionRegistry::new();
        let receivers: Vec<_> = (0..4)
            .map(|_| open_connection(&registry, RoomTier::Diamond, 0))
            .collect();
        let dispatcher = Dispatcher::new(registry);

        let tasks: Vec<_> = (0..8_i64)
            .map(|worker| {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    for id in (1..=400_i64).filter(|id| id % 8 == worker) {
                        dispatcher.publish(&message(id, RoomTier::Diamond));
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        for (_conn, mut rx) in receivers {
            let ids = drain_ids(&mut rx);
            assert!(!ids.is_empty());
            assert!(
                ids.windows(2).all(|pair| pair[0] < pair[1]),
                "ids not strictly increasing: {:?}",
                ids
            );
        }
    }
}
