//! Fixity Worker: records verification results as fixity events.
//!
//! Consumes the `Results` topic. Each well-formed result becomes one fixity
//! event, is published on the event bus, and is then acknowledged. Delivery
//! is at-least-once; a duplicate result only appends a second event, and the
//! node's current state is still decided by observation time.

use std::sync::Arc;

use ark_core::fixity::FixityResult;
use ark_core::ports::{Delivery, FixityEventStore, MessageChannel, PreservationStore, Topic};
use ark_events::{EventBus, PreservationEvent};
use tokio_util::sync::CancellationToken;

use crate::backoff::{next_delay, pause, ReconnectConfig};
use crate::error::PreservationError;

/// What happened to one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    Recorded,
    /// Malformed, or for a node that no longer exists. Acknowledged.
    Dropped,
}

pub struct FixityWorker {
    records: Arc<dyn PreservationStore>,
    events: Arc<dyn FixityEventStore>,
    channel: Arc<dyn MessageChannel>,
    bus: Arc<EventBus>,
    pull_batch: usize,
    reconnect: ReconnectConfig,
}

impl FixityWorker {
    pub fn new(
        records: Arc<dyn PreservationStore>,
        events: Arc<dyn FixityEventStore>,
        channel: Arc<dyn MessageChannel>,
        bus: Arc<EventBus>,
        pull_batch: usize,
    ) -> Self {
        Self {
            records,
            events,
            channel,
            bus,
            pull_batch: pull_batch.max(1),
            reconnect: ReconnectConfig::default(),
        }
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Handle one delivery. Store errors are returned without acknowledging
    /// so the message is redelivered once its lease expires.
    pub async fn handle(&self, delivery: &Delivery) -> Result<HandleOutcome, PreservationError> {
        let result: FixityResult = match serde_json::from_slice(&delivery.payload) {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(delivery_id = delivery.id, error = %e, "Dropping malformed fixity result");
                return self.drop_delivery(delivery).await;
            }
        };
        if let Err(e) = result.validate() {
            tracing::warn!(delivery_id = delivery.id, error = %e, "Dropping invalid fixity result");
            return self.drop_delivery(delivery).await;
        }

        let node = result.node();
        let Some(record) = self.records.find(node.resource_id).await? else {
            tracing::info!(node = %node, "Result for deleted record, dropping");
            return self.drop_delivery(delivery).await;
        };
        if let Some(child_id) = node.child_id {
            if record.binary_node_by_id(child_id).is_none() {
                tracing::info!(node = %node, "Result for unknown binary node, dropping");
                return self.drop_delivery(delivery).await;
            }
        }

        let event = self.events.record(&result.into_event()).await?;
        tracing::info!(
            resource_id = event.node.resource_id,
            child_property = %event.node.child_property,
            status = %event.status,
            "Fixity event recorded"
        );
        self.bus.publish(PreservationEvent::FixityRecorded { event });
        self.channel.ack(Topic::Results, delivery.id).await?;
        Ok(HandleOutcome::Recorded)
    }

    async fn drop_delivery(&self, delivery: &Delivery) -> Result<HandleOutcome, PreservationError> {
        self.channel.ack(Topic::Results, delivery.id).await?;
        Ok(HandleOutcome::Dropped)
    }

    /// Pull and handle one batch. Returns the number of deliveries pulled.
    ///
    /// A failing delivery does not stop the rest of the batch; the first
    /// error is returned after every delivery has been tried.
    pub async fn process_once(&self) -> Result<usize, PreservationError> {
        let deliveries = self.channel.pull(Topic::Results, self.pull_batch).await?;
        let pulled = deliveries.len();
        let mut first_error = None;
        for delivery in &deliveries {
            if let Err(e) = self.handle(delivery).await {
                tracing::error!(
                    delivery_id = delivery.id,
                    attempts = delivery.attempts,
                    error = %e,
                    "Failed to record fixity result"
                );
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(pulled),
        }
    }

    /// Consume results until cancelled.
    ///
    /// Cancellation is checked between batches, so messages already pulled
    /// are recorded and acknowledged before the loop exits. Errors back off
    /// exponentially and reset on the next clean batch.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut delay = self.reconnect.initial_delay;
        tracing::info!(pull_batch = self.pull_batch, "Fixity worker started");

        loop {
            if cancel.is_cancelled() {
                break;
            }
            let wait = match self.process_once().await {
                Ok(0) => {
                    delay = self.reconnect.initial_delay;
                    self.reconnect.idle_delay
                }
                Ok(_) => {
                    delay = self.reconnect.initial_delay;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Fixity worker backing off"
                    );
                    let current = delay;
                    delay = next_delay(delay, &self.reconnect);
                    current
                }
            };
            if !pause(wait, &cancel).await {
                break;
            }
        }
        tracing::info!("Fixity worker stopped");
    }
}
