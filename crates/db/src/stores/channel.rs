use std::time::Duration;

use ark_core::ports::{Delivery, MessageChannel, StoreResult, Topic};
use ark_core::types::DbId;
use async_trait::async_trait;

use crate::repositories::ChannelRepo;
use crate::{store_error, DbPool};

/// At-least-once message channel backed by `channel_messages`.
#[derive(Clone)]
pub struct PgChannel {
    pool: DbPool,
    lease: Duration,
}

impl PgChannel {
    /// `lease` is how long a pulled message stays invisible before it is
    /// redelivered.
    pub fn new(pool: DbPool, lease: Duration) -> Self {
        Self { pool, lease }
    }
}

#[async_trait]
impl MessageChannel for PgChannel {
    async fn publish(&self, topic: Topic, payload: &[u8]) -> StoreResult<()> {
        ChannelRepo::publish(&self.pool, topic.as_str(), payload)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn pull(&self, topic: Topic, max: usize) -> StoreResult<Vec<Delivery>> {
        let limit = i64::try_from(max).unwrap_or(i64::MAX);
        let rows = ChannelRepo::lease(&self.pool, topic.as_str(), limit, self.lease.as_secs_f64())
            .await
            .map_err(store_error)?;
        Ok(rows.into_iter().map(Delivery::from).collect())
    }

    async fn ack(&self, topic: Topic, delivery_id: DbId) -> StoreResult<()> {
        ChannelRepo::ack(&self.pool, topic.as_str(), delivery_id)
            .await
            .map_err(store_error)?;
        Ok(())
    }
}
