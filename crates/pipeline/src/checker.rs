//! Fixity Checker: answers verification requests.
//!
//! Pulls from the `Requests` topic, reads the blob back from the backup
//! store, and publishes a SUCCESS or FAILURE result on the `Results` topic.
//! A request is acknowledged only after its result is published; backend
//! errors leave it leased so it is redelivered later.

use std::sync::Arc;

use ark_core::error::BackupError;
use ark_core::fixity::{FixityRequest, FixityResult, FixityStatus};
use ark_core::hashing::sha256_hex;
use ark_core::ports::{BackupStore, Delivery, MessageChannel, Topic};
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::backoff::{next_delay, pause, ReconnectConfig};
use crate::error::PreservationError;

pub struct FixityChecker {
    backup: Arc<dyn BackupStore>,
    channel: Arc<dyn MessageChannel>,
    pull_batch: usize,
    reconnect: ReconnectConfig,
}

impl FixityChecker {
    pub fn new(backup: Arc<dyn BackupStore>, channel: Arc<dyn MessageChannel>, pull_batch: usize) -> Self {
        Self {
            backup,
            channel,
            pull_batch: pull_batch.max(1),
            reconnect: ReconnectConfig::default(),
        }
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Verify one preserved node. A missing blob is a FAILURE; any other
    /// backend error is returned so the request can be retried.
    pub async fn verify(&self, request: &FixityRequest) -> Result<FixityResult, BackupError> {
        let node = request.correlation;
        let (status, detail) = match self.backup.get(&request.blob_locator).await {
            Ok(bytes) => {
                let actual = sha256_hex(&bytes);
                let size = bytes.len() as i64;
                if !actual.eq_ignore_ascii_case(&request.expected_checksum) {
                    (
                        FixityStatus::Failure,
                        Some(format!(
                            "checksum mismatch at {}: expected {}, got {actual}",
                            request.blob_locator, request.expected_checksum
                        )),
                    )
                } else if size != request.expected_size {
                    (
                        FixityStatus::Failure,
                        Some(format!(
                            "size mismatch at {}: expected {}, got {size}",
                            request.blob_locator, request.expected_size
                        )),
                    )
                } else {
                    (FixityStatus::Success, None)
                }
            }
            Err(err) if err.is_not_found() => (
                FixityStatus::Failure,
                Some(format!("preserved copy missing at {}", request.blob_locator)),
            ),
            Err(err) => return Err(err),
        };

        Ok(FixityResult {
            status,
            resource_id: node.resource_id,
            child_id: node.child_id,
            child_property: node.child_property,
            detail,
            observed_at: Utc::now(),
        })
    }

    /// Pull and answer one batch of requests. Returns the number pulled.
    pub async fn process_once(&self) -> Result<usize, PreservationError> {
        let deliveries = self.channel.pull(Topic::Requests, self.pull_batch).await?;
        let pulled = deliveries.len();
        for delivery in deliveries {
            self.handle(delivery).await?;
        }
        Ok(pulled)
    }

    async fn handle(&self, delivery: Delivery) -> Result<(), PreservationError> {
        let request: FixityRequest = match serde_json::from_slice(&delivery.payload) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(delivery_id = delivery.id, error = %e, "Dropping malformed fixity request");
                self.channel.ack(Topic::Requests, delivery.id).await?;
                return Ok(());
            }
        };

        match self.verify(&request).await {
            Ok(result) => {
                if result.status == FixityStatus::Failure {
                    tracing::warn!(
                        node = %request.correlation,
                        detail = result.detail.as_deref().unwrap_or_default(),
                        "Fixity check failed"
                    );
                }
                let payload = serde_json::to_vec(&result)?;
                self.channel.publish(Topic::Results, &payload).await?;
                self.channel.ack(Topic::Requests, delivery.id).await?;
            }
            Err(e) => {
                tracing::error!(
                    node = %request.correlation,
                    attempts = delivery.attempts,
                    error = %e,
                    "Fixity check could not read preserved copy, leaving for redelivery"
                );
            }
        }
        Ok(())
    }

    /// Answer requests until cancelled. The pulled batch always finishes
    /// before the cancel is observed.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut delay = self.reconnect.initial_delay;
        tracing::info!(pull_batch = self.pull_batch, "Fixity checker started");

        loop {
            if cancel.is_cancelled() {
                break;
            }
            let wait = match self.process_once().await {
                Ok(pulled) => {
                    delay = self.reconnect.initial_delay;
                    if pulled > 0 {
                        continue;
                    }
                    self.reconnect.idle_delay
                }
                Err(e) => {
                    tracing::warn!(error = %e, delay_ms = delay.as_millis() as u64, "Fixity checker pull failed, backing off");
                    let current = delay;
                    delay = next_delay(delay, &self.reconnect);
                    current
                }
            };
            if !pause(wait, &cancel).await {
                break;
            }
        }
        tracing::info!("Fixity checker stopped");
    }
}
