use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use agora_types::{Message, NewMessage, RoomTier};

use crate::auth::{AuthProvider, resolve_identity};
use crate::dispatcher::Dispatcher;
use crate::error::{GatewayError, Result};
use crate::store::MessageStore;

#[derive(Debug, Clone)]
pub struct PostRequest {
    pub token: Option<String>,
    /// Explicit room. `None`, blank and unknown names mean "author's own tier".
    pub room_type: Option<String>,
    pub text: String,
    pub looking_for_companion: bool,
}

/// Validate, persist, then broadcast.
#[derive(Clone)]
pub struct PostPipeline {
    inner: Arc<PipelineInner>,
}

struct PipelineInner {
    store: Arc<dyn MessageStore>,
    auth: Arc<dyn AuthProvider>,
    dispatcher: Dispatcher,
    /// One turn per room: persist-then-publish runs in id order within a room.
    turns: [Mutex<()>; RoomTier::COUNT],
}

impl PostPipeline {
    pub fn new(
        store: Arc<dyn MessageStore>,
        auth: Arc<dyn AuthProvider>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                store,
                auth,
                dispatcher,
                turns: std::array::from_fn(|_| Mutex::new(())),
            }),
        }
    }

    /// The message is sent once it is persisted. Broadcast is best-effort and
    /// its outcome never reaches the poster.
    pub async fn post(&self, request: PostRequest) -> Result<Message> {
        let identity = resolve_identity(self.inner.auth.clone(), request.token).await?;

        if request.text.trim().is_empty() {
            return Err(GatewayError::EmptyMessage);
        }

        let own_tier = RoomTier::for_reputation(identity.reputation);
        let room_type = match request.room_type.as_deref().and_then(RoomTier::parse) {
            Some(requested) if !requested.can_access(identity.reputation) => {
                return Err(GatewayError::insufficient(requested, identity.reputation));
            }
            Some(requested) => requested,
            None => own_tier,
        };

        let new_message = NewMessage {
            room_type,
            author_id: identity.user_id,
            author_name: identity.display_name,
            text: request.text,
            looking_for_companion: request.looking_for_companion,
        };

        let _turn = self.inner.turns[room_type as usize].lock().await;

        let store = self.inner.store.clone();
        let message = tokio::task::spawn_blocking(move || store.append(new_message)).await??;
        info!(
            "Message {} stored in {} by {} ({})",
            message.id, message.room_type, message.author_name, message.author_id
        );

        let report = self.inner.dispatcher.publish(&message);
        debug!("Message {} reached {} of {} streams", message.id, report.delivered, report.matched);

        Ok(message)
    }
}
