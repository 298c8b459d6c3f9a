//! Port traits: every collaborator the preservation pipeline talks to.
//!
//! Implementations are injected as `Arc<dyn Trait>`; PostgreSQL adapters live
//! in `ark-db`, backup backends in `ark-cloud`, the message channel and
//! notifiers in `ark-events`.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;

use crate::audit::{AuditStatus, CheckFailure, NewAudit, PreservationAudit};
use crate::batch::{BatchCallback, BatchJob, BatchProgress, FailureDisposition, RetryPolicy};
use crate::error::{BackupError, StoreError};
use crate::fixity::{FixityEvent, NewFixityEvent, NodeRef};
use crate::live::LiveObject;
use crate::notification::Notification;
use crate::preservation::{BinaryNode, NewBinaryNode, PreservationRecord, PreservedNode};
use crate::types::DbId;
use crate::version::LockToken;

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Live repository
// ---------------------------------------------------------------------------

/// Read access to the live metadata store owned by the editing pipeline.
#[async_trait]
pub trait LiveRepository: Send + Sync {
    async fn find(&self, id: DbId) -> StoreResult<Option<LiveObject>>;

    /// Ids of every live object of a preservable kind, ascending.
    async fn preservable_ids(&self) -> StoreResult<Vec<DbId>>;

    /// Committed children of a container.
    async fn committed_children(&self, id: DbId) -> StoreResult<Vec<LiveObject>>;
}

// ---------------------------------------------------------------------------
// Preservation records
// ---------------------------------------------------------------------------

#[async_trait]
pub trait PreservationStore: Send + Sync {
    async fn find(&self, id: DbId) -> StoreResult<Option<PreservationRecord>>;

    async fn find_by_object(&self, object_id: DbId) -> StoreResult<Option<PreservationRecord>>;

    /// Create an empty record. Fails with [`StoreError::Duplicate`] when a
    /// record for `object_id` already exists.
    async fn create(&self, object_id: DbId) -> StoreResult<PreservationRecord>;

    async fn set_metadata_node(
        &self,
        id: DbId,
        node: &PreservedNode,
        version: &LockToken,
    ) -> StoreResult<PreservationRecord>;

    /// Insert or replace the node for `node.binary_use`, keeping the node id
    /// stable across replacements.
    async fn upsert_binary_node(&self, id: DbId, node: &NewBinaryNode) -> StoreResult<BinaryNode>;

    async fn delete(&self, id: DbId) -> StoreResult<()>;

    async fn count(&self) -> StoreResult<u64>;

    /// Up to `n` records chosen pseudo-randomly.
    async fn sample(&self, n: u64) -> StoreResult<Vec<PreservationRecord>>;

    async fn list_ids(&self) -> StoreResult<Vec<DbId>>;
}

// ---------------------------------------------------------------------------
// Fixity events
// ---------------------------------------------------------------------------

#[async_trait]
pub trait FixityEventStore: Send + Sync {
    /// Append an event and advance the latest-event index if it is newer
    /// than the node's current event.
    async fn record(&self, event: &NewFixityEvent) -> StoreResult<FixityEvent>;

    /// The node's current event (latest by timestamp).
    async fn current(&self, node: &NodeRef) -> StoreResult<Option<FixityEvent>>;

    /// All events for the node, oldest first.
    async fn history(&self, node: &NodeRef) -> StoreResult<Vec<FixityEvent>>;

    /// Nodes whose current event is a verification FAILURE, by event id,
    /// starting after `after_id`. Repair-origin failures are terminal and
    /// never listed.
    async fn current_failures(&self, after_id: DbId, limit: i64) -> StoreResult<Vec<FixityEvent>>;

    /// Insert a REPAIRING event only if `failure_event_id` is still the
    /// node's current event. Returns `None` when another actor got there
    /// first.
    async fn begin_repair(
        &self,
        node: &NodeRef,
        failure_event_id: DbId,
    ) -> StoreResult<Option<FixityEvent>>;

    async fn delete_for_resource(&self, resource_id: DbId) -> StoreResult<u64>;
}

// ---------------------------------------------------------------------------
// Audits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn create(&self, audit: &NewAudit) -> StoreResult<PreservationAudit>;

    async fn find(&self, id: DbId) -> StoreResult<Option<PreservationAudit>>;

    async fn attach_batch(&self, id: DbId, batch_id: DbId) -> StoreResult<()>;

    /// Idempotent per `(audit_id, resource_id, reason)`.
    async fn add_failure(&self, audit_id: DbId, resource_id: DbId, reason: &str)
        -> StoreResult<()>;

    async fn failures(&self, audit_id: DbId) -> StoreResult<Vec<CheckFailure>>;

    /// Distinct failing resource ids, ascending.
    async fn failing_ids(&self, audit_id: DbId) -> StoreResult<Vec<DbId>>;

    /// Move the audit to `to` only if its status is one of `from`.
    async fn transition(&self, id: DbId, from: &[AuditStatus], to: AuditStatus)
        -> StoreResult<bool>;
}

// ---------------------------------------------------------------------------
// Backup store
// ---------------------------------------------------------------------------

/// Bytes to upload.
#[derive(Debug, Clone)]
pub enum BlobSource {
    Bytes(Vec<u8>),
    File(PathBuf),
}

/// Where a blob landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub location: String,
    pub size: i64,
}

#[async_trait]
pub trait BackupStore: Send + Sync {
    /// Write `source` under `key`. When `expected_sha256` is given the
    /// backend rejects the write if the received bytes do not match.
    async fn put(
        &self,
        key: &str,
        source: BlobSource,
        expected_sha256: Option<&str>,
    ) -> Result<StoredBlob, BackupError>;

    async fn get(&self, location: &str) -> Result<Vec<u8>, BackupError>;

    async fn exists(&self, location: &str) -> Result<bool, BackupError>;

    async fn delete(&self, location: &str) -> Result<(), BackupError>;

    /// Versioned (append-only) stores never delete on object removal.
    fn is_versioned(&self) -> bool;
}

// ---------------------------------------------------------------------------
// Message channel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Requests,
    Results,
}

impl Topic {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Requests => "fixity.requests",
            Self::Results => "fixity.results",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message handed to a subscriber. Redelivered until acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: DbId,
    pub payload: Vec<u8>,
    pub attempts: i32,
}

#[async_trait]
pub trait MessageChannel: Send + Sync {
    async fn publish(&self, topic: Topic, payload: &[u8]) -> StoreResult<()>;

    /// Lease up to `max` messages. Unacknowledged leases expire and the
    /// messages become visible again.
    async fn pull(&self, topic: Topic, max: usize) -> StoreResult<Vec<Delivery>>;

    async fn ack(&self, topic: Topic, delivery_id: DbId) -> StoreResult<()>;
}

// ---------------------------------------------------------------------------
// Batch scheduler
// ---------------------------------------------------------------------------

#[async_trait]
pub trait BatchScheduler: Send + Sync {
    /// Atomically create a batch with one job per payload.
    async fn create_batch(
        &self,
        description: &str,
        metadata: &Value,
        payloads: &[Value],
    ) -> StoreResult<DbId>;

    /// Claim the next runnable job, if any.
    async fn claim_next(&self) -> StoreResult<Option<BatchJob>>;

    async fn mark_succeeded(&self, job: &BatchJob) -> StoreResult<BatchProgress>;

    async fn mark_failed(
        &self,
        job: &BatchJob,
        error: &str,
        policy: &RetryPolicy,
    ) -> StoreResult<(FailureDisposition, BatchProgress)>;

    /// Record that `callback` fired. Returns `true` exactly once per
    /// `(batch, callback)`.
    async fn fire(&self, batch_id: DbId, callback: BatchCallback) -> StoreResult<bool>;

    async fn progress(&self, batch_id: DbId) -> StoreResult<BatchProgress>;
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> StoreResult<()>;
}
