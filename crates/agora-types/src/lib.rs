pub mod api;
pub mod events;
pub mod models;
pub mod tier;

pub use models::{Message, MessageId, NewMessage, UserId};
pub use tier::{MAX_REPUTATION, RoomTier};
