//! Model for the `channel_messages` table.

use ark_core::ports::Delivery;
use ark_core::types::{DbId, Timestamp};
use sqlx::FromRow;

/// A leased row from the `channel_messages` table.
#[derive(Debug, Clone, FromRow)]
pub struct ChannelMessage {
    pub id: DbId,
    pub topic: String,
    pub payload: Vec<u8>,
    pub attempts: i32,
    pub leased_until: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl From<ChannelMessage> for Delivery {
    fn from(msg: ChannelMessage) -> Self {
        Self {
            id: msg.id,
            payload: msg.payload,
            attempts: msg.attempts,
        }
    }
}
