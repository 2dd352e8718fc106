pub mod auth;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod lifecycle;
pub mod pipeline;
pub mod registry;
pub mod retention;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

pub use auth::{AuthProvider, Identity, identify, resolve_identity};
pub use connection::{
    CloseReason, Connection, ConnectionId, ConnectionState, DEFAULT_QUEUE_LIMIT, Delivery,
};
pub use dispatcher::{Dispatcher, PublishReport};
pub use error::{GatewayError, Result};
pub use lifecycle::{ConnectionManager, StreamConfig, StreamGuard, StreamRequest};
pub use pipeline::{PostPipeline, PostRequest};
pub use registry::ConnectionRegistry;
pub use retention::{RetentionEvictor, RetentionPolicy};
pub use store::MessageStore;
