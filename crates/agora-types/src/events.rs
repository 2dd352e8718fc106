use std::sync::Arc;

use crate::models::{Message, MessageId};

/// Events pushed down a room stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// One-time acknowledgement sent before anything else.
    Connected,

    /// A persisted message, from backlog replay or live fan-out.
    Message(Arc<Message>),

    /// Keep-alive with no payload semantics.
    Ping,
}

impl StreamEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Message(_) => "message",
            Self::Ping => "ping",
        }
    }

    pub fn message_id(&self) -> Option<MessageId> {
        match self {
            Self::Message(message) => Some(message.id),
            _ => None,
        }
    }
}
