use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::store::MessageStore;

/// Maximum age a message may reach before it is evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    window: chrono::Duration,
}

impl RetentionPolicy {
    pub const DEFAULT_HOURS: i64 = 24;

    pub fn new(window: chrono::Duration) -> Self {
        Self { window }
    }

    pub fn hours(hours: i64) -> Self {
        Self::new(chrono::Duration::hours(hours))
    }

    /// `None` unless `hours` is positive and representable.
    pub fn try_hours(hours: i64) -> Option<Self> {
        if hours <= 0 {
            return None;
        }
        chrono::Duration::try_hours(hours).map(Self::new)
    }

    pub fn window(&self) -> chrono::Duration {
        self.window
    }

    /// Messages created strictly before this instant are expired.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::hours(Self::DEFAULT_HOURS)
    }
}

/// Periodic sweep deleting expired messages. Works only against the store;
/// open streams are never touched.
#[derive(Clone)]
pub struct RetentionEvictor {
    store: Arc<dyn MessageStore>,
    policy: RetentionPolicy,
}

impl RetentionEvictor {
    pub fn new(store: Arc<dyn MessageStore>, policy: RetentionPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// One sweep. Returns how many messages were deleted.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = self.policy.cutoff(now);
        let store = self.store.clone();
        let deleted = tokio::task::spawn_blocking(move || -> anyhow::Result<u64> {
            let expired = store.count_older_than(&cutoff)?;
            if expired == 0 {
                return Ok(0);
            }
            store.delete_older_than(&cutoff)
        })
        .await??;

        if deleted > 0 {
            info!("Retention: deleted {} messages created before {}", deleted, cutoff);
        } else {
            debug!("Retention: nothing older than {}", cutoff);
        }
        Ok(deleted)
    }

    /// Sweep every `every` until `shutdown` fires. A failed sweep is logged
    /// and retried on the next tick only.
    pub async fn run(self, every: Duration, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(every);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            if let Err(e) = self.run_once(Utc::now()).await {
                warn!("Retention sweep failed: {}", e);
            }
        }

        info!("Retention evictor stopped");
    }
}
