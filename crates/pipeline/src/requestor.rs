//! Fixity Requestor: turns records into verification requests on the
//! `Requests` topic.
//!
//! One request is published per preserved node (the metadata node and every
//! binary node). The daily sample covers `annual_percent` of the corpus over
//! a year; targeted checks bypass sampling.

use std::sync::Arc;
use std::time::Duration;

use ark_core::fixity::{daily_sample_count, FixityRequest, NodeRef};
use ark_core::ports::{MessageChannel, PreservationStore, Topic};
use ark_core::preservation::PreservationRecord;
use ark_core::types::DbId;
use tokio_util::sync::CancellationToken;

use crate::error::PreservationError;

pub struct FixityRequestor {
    records: Arc<dyn PreservationStore>,
    channel: Arc<dyn MessageChannel>,
}

impl FixityRequestor {
    pub fn new(records: Arc<dyn PreservationStore>, channel: Arc<dyn MessageChannel>) -> Self {
        Self { records, channel }
    }

    /// Build one request per preserved node of `record`.
    pub fn requests_for(record: &PreservationRecord) -> Vec<FixityRequest> {
        let metadata = record.metadata_node.iter().map(|node| FixityRequest {
            expected_checksum: node.checksums.sha256.clone(),
            expected_size: node.size,
            blob_locator: node.location.clone(),
            correlation: NodeRef::metadata(record.id),
        });
        let binaries = record.binary_nodes.iter().map(|b| FixityRequest {
            expected_checksum: b.node.checksums.sha256.clone(),
            expected_size: b.node.size,
            blob_locator: b.node.location.clone(),
            correlation: NodeRef::binary(record.id, b.id),
        });
        metadata.chain(binaries).collect()
    }

    /// Queue today's share of the corpus. Returns the number of records
    /// sampled.
    pub async fn queue_daily_sample(&self, annual_percent: f64) -> Result<u64, PreservationError> {
        let total = self.records.count().await?;
        let count = daily_sample_count(total, annual_percent);
        if count == 0 {
            tracing::info!(total, annual_percent, "Nothing to sample");
            return Ok(0);
        }

        let sample = self.records.sample(count).await?;
        let mut requests = 0usize;
        for record in &sample {
            requests += self.publish_all(record).await?;
        }
        tracing::info!(
            total,
            sampled = sample.len(),
            requests,
            "Daily fixity sample queued"
        );
        Ok(sample.len() as u64)
    }

    /// Queue every node of one record. Returns the number of requests.
    pub async fn queue_resource_check(&self, record_id: DbId) -> Result<usize, PreservationError> {
        let record = self.load(record_id).await?;
        let queued = self.publish_all(&record).await?;
        tracing::info!(record_id, requests = queued, "Resource check queued");
        Ok(queued)
    }

    /// Queue a single node. Returns `false` when the record no longer has
    /// that node.
    pub async fn queue_node_check(
        &self,
        record_id: DbId,
        node: &NodeRef,
    ) -> Result<bool, PreservationError> {
        let record = self.load(record_id).await?;
        let Some(request) = Self::requests_for(&record)
            .into_iter()
            .find(|r| r.correlation == *node)
        else {
            tracing::warn!(record_id, node = %node, "Node not on record, check not queued");
            return Ok(false);
        };
        self.publish(&request).await?;
        tracing::debug!(node = %node, "Node check queued");
        Ok(true)
    }

    /// Queue the daily sample every `period` until cancelled. The first run
    /// happens one period after start.
    pub async fn run_schedule(&self, annual_percent: f64, period: Duration, cancel: CancellationToken) {
        let start = tokio::time::Instant::now() + period;
        let mut interval = tokio::time::interval_at(start, period);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Fixity sampling schedule stopping");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.queue_daily_sample(annual_percent).await {
                        tracing::error!(error = %e, "Daily fixity sample failed");
                    }
                }
            }
        }
    }

    async fn load(&self, record_id: DbId) -> Result<PreservationRecord, PreservationError> {
        self.records
            .find(record_id)
            .await?
            .ok_or(PreservationError::RecordNotFound(record_id))
    }

    async fn publish_all(&self, record: &PreservationRecord) -> Result<usize, PreservationError> {
        let requests = Self::requests_for(record);
        for request in &requests {
            self.publish(request).await?;
        }
        Ok(requests.len())
    }

    async fn publish(&self, request: &FixityRequest) -> Result<(), PreservationError> {
        let payload = serde_json::to_vec(request)?;
        self.channel.publish(Topic::Requests, &payload).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryPreservationStore;
    use ark_core::hashing::Checksums;
    use ark_core::object::BinaryUse;
    use ark_core::preservation::{NewBinaryNode, PreservedNode};
    use ark_core::version::LockToken;
    use ark_events::MemoryChannel;
    use assert_matches::assert_matches;

    fn node(location: &str) -> PreservedNode {
        PreservedNode {
            location: location.into(),
            checksums: Checksums::compute(location.as_bytes()),
            size: location.len() as i64,
        }
    }

    async fn seeded(records: &MemoryPreservationStore, object_id: DbId) -> PreservationRecord {
        let record = records.create(object_id).await.unwrap();
        records
            .set_metadata_node(record.id, &node("mem://m"), &LockToken::from("v1"))
            .await
            .unwrap();
        for binary_use in [BinaryUse::Original, BinaryUse::Intermediate] {
            records
                .upsert_binary_node(
                    record.id,
                    &NewBinaryNode {
                        binary_use,
                        source_binary_id: 1,
                        source_checksum: "aa".into(),
                        node: node(&format!("mem://{binary_use}")),
                    },
                )
                .await
                .unwrap();
        }
        records.find(record.id).await.unwrap().unwrap()
    }

    fn setup() -> (Arc<MemoryPreservationStore>, Arc<MemoryChannel>, FixityRequestor) {
        let records = Arc::new(MemoryPreservationStore::new());
        let channel = Arc::new(MemoryChannel::new(Duration::from_secs(60)));
        let requestor = FixityRequestor::new(records.clone(), channel.clone());
        (records, channel, requestor)
    }

    #[tokio::test]
    async fn one_request_per_node() {
        let (records, channel, requestor) = setup();
        let record = seeded(&records, 5).await;

        assert_eq!(requestor.queue_resource_check(record.id).await.unwrap(), 3);
        let sent: Vec<FixityRequest> = channel
            .payloads(Topic::Requests)
            .iter()
            .map(|p| serde_json::from_slice(p).unwrap())
            .collect();
        assert_eq!(sent[0].correlation, NodeRef::metadata(record.id));
        assert_eq!(sent[0].blob_locator, "mem://m");
        assert!(sent[1..]
            .iter()
            .all(|r| r.correlation.child_id.is_some()));
    }

    #[tokio::test]
    async fn daily_sample_rounds_up_to_one() {
        let (records, channel, requestor) = setup();
        for id in 1..=3 {
            seeded(&records, id).await;
        }
        assert_eq!(requestor.queue_daily_sample(25.0).await.unwrap(), 1);
        assert_eq!(channel.depth(Topic::Requests), 3);
    }

    #[tokio::test]
    async fn empty_corpus_samples_nothing() {
        let (_, channel, requestor) = setup();
        assert_eq!(requestor.queue_daily_sample(25.0).await.unwrap(), 0);
        assert_eq!(channel.depth(Topic::Requests), 0);
    }

    #[tokio::test]
    async fn node_check_targets_one_node() {
        let (records, channel, requestor) = setup();
        let record = seeded(&records, 9).await;
        let target = NodeRef::binary(record.id, record.binary_nodes[0].id);

        assert!(requestor.queue_node_check(record.id, &target).await.unwrap());
        assert!(!requestor
            .queue_node_check(record.id, &NodeRef::binary(record.id, 9999))
            .await
            .unwrap());
        assert_eq!(channel.depth(Topic::Requests), 1);
    }

    #[tokio::test]
    async fn unknown_record_is_an_error() {
        let (_, _, requestor) = setup();
        assert_matches!(
            requestor.queue_resource_check(404).await,
            Err(PreservationError::RecordNotFound(404))
        );
    }
}
