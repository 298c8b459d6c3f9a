//! In-process message channel with lease-based redelivery.
//!
//! Mirrors the semantics of the durable channel: `pull` leases messages for
//! a fixed duration, `ack` removes them, and an expired lease makes a
//! message visible again with its attempt counter bumped.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use ark_core::ports::{Delivery, MessageChannel, StoreResult, Topic};
use ark_core::types::DbId;
use async_trait::async_trait;
use tokio::time::Instant;

struct Message {
    id: DbId,
    payload: Vec<u8>,
    attempts: i32,
    leased_until: Option<Instant>,
}

#[derive(Default)]
struct Inner {
    next_id: DbId,
    topics: HashMap<Topic, Vec<Message>>,
}

pub struct MemoryChannel {
    inner: Mutex<Inner>,
    lease: Duration,
}

impl MemoryChannel {
    pub fn new(lease: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            lease,
        }
    }

    /// Messages on `topic`, leased or not.
    pub fn depth(&self, topic: Topic) -> usize {
        self.lock().topics.get(&topic).map_or(0, Vec::len)
    }

    /// Raw payloads on `topic`, oldest first.
    pub fn payloads(&self, topic: Topic) -> Vec<Vec<u8>> {
        self.lock()
            .topics
            .get(&topic)
            .map(|msgs| msgs.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl MessageChannel for MemoryChannel {
    async fn publish(&self, topic: Topic, payload: &[u8]) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.topics.entry(topic).or_default().push(Message {
            id,
            payload: payload.to_vec(),
            attempts: 0,
            leased_until: None,
        });
        Ok(())
    }

    async fn pull(&self, topic: Topic, max: usize) -> StoreResult<Vec<Delivery>> {
        let now = Instant::now();
        let until = now + self.lease;
        let mut inner = self.lock();
        let Some(messages) = inner.topics.get_mut(&topic) else {
            return Ok(Vec::new());
        };
        Ok(messages
            .iter_mut()
            .filter(|m| m.leased_until.map_or(true, |t| t <= now))
            .take(max)
            .map(|m| {
                m.leased_until = Some(until);
                m.attempts += 1;
                Delivery {
                    id: m.id,
                    payload: m.payload.clone(),
                    attempts: m.attempts,
                }
            })
            .collect())
    }

    async fn ack(&self, topic: Topic, delivery_id: DbId) -> StoreResult<()> {
        if let Some(messages) = self.lock().topics.get_mut(&topic) {
            messages.retain(|m| m.id != delivery_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn leased_messages_are_hidden_until_expiry() {
        let channel = MemoryChannel::new(Duration::from_secs(60));
        channel.publish(Topic::Results, b"a").await.unwrap();
        channel.publish(Topic::Results, b"b").await.unwrap();

        let first = channel.pull(Topic::Results, 1).await.unwrap();
        assert_eq!(first[0].payload, b"a");
        let second = channel.pull(Topic::Results, 10).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].payload, b"b");
        assert!(channel.pull(Topic::Results, 10).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lease_redelivers() {
        let channel = MemoryChannel::new(Duration::from_secs(30));
        channel.publish(Topic::Requests, b"check").await.unwrap();
        let first = channel.pull(Topic::Requests, 10).await.unwrap();

        tokio::time::advance(Duration::from_secs(31)).await;
        let again = channel.pull(Topic::Requests, 10).await.unwrap();
        assert_eq!(again[0].id, first[0].id);
        assert_eq!(again[0].attempts, 2);

        channel.ack(Topic::Requests, first[0].id).await.unwrap();
        assert_eq!(channel.depth(Topic::Requests), 0);
    }

    #[tokio::test]
    async fn topics_are_independent() {
        let channel = MemoryChannel::new(Duration::from_secs(60));
        channel.publish(Topic::Requests, b"req").await.unwrap();
        assert!(channel.pull(Topic::Results, 10).await.unwrap().is_empty());
        assert_eq!(channel.depth(Topic::Requests), 1);
    }
}
