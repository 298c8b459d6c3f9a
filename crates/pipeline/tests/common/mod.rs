//! Shared harness: every pipeline component wired to in-memory ports.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ark_cloud::MemoryBackupStore;
use ark_core::audit::{AuditStatus, CheckFailure, NewAudit, PreservationAudit};
use ark_core::batch::RetryPolicy;
use ark_core::error::StoreError;
use ark_core::hashing::sha256_hex;
use ark_core::live::{LiveBinary, LiveObject};
use ark_core::object::{BinaryUse, ObjectKind};
use ark_core::ports::{AuditStore, PreservationStore, StoreResult};
use ark_core::preservation::{BinaryNode, NewBinaryNode, PreservationRecord, PreservedNode};
use ark_core::types::DbId;
use ark_core::version::LockToken;
use async_trait::async_trait;
use ark_events::{EventBus, MemoryChannel, MemoryNotifier};
use ark_pipeline::memory::{
    MemoryAuditStore, MemoryBatchScheduler, MemoryFixityEventStore, MemoryLiveRepository,
    MemoryPreservationStore,
};
use ark_pipeline::{
    AuditRunner, BatchRunner, FixityChecker, FixityRequestor, FixityWorker, ObjectInspector,
    Preserver, RepairCoordinator,
};
use serde_json::json;
use tokio::sync::Barrier;

// ---------------------------------------------------------------------------
// Store decorators
// ---------------------------------------------------------------------------

/// Holds the first `gated` record lookups until all of them have arrived,
/// so concurrent first-time preserves all see "no record" before any of
/// them creates one.
pub struct GatedRecords {
    inner: Arc<MemoryPreservationStore>,
    remaining: AtomicUsize,
    barrier: Barrier,
    creates: AtomicUsize,
}

impl GatedRecords {
    fn new(inner: Arc<MemoryPreservationStore>, gated: usize) -> Self {
        Self {
            inner,
            remaining: AtomicUsize::new(gated),
            barrier: Barrier::new(gated.max(1)),
            creates: AtomicUsize::new(0),
        }
    }

    /// Record creations attempted, including ones rejected as duplicates.
    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PreservationStore for GatedRecords {
    async fn find(&self, id: DbId) -> StoreResult<Option<PreservationRecord>> {
        self.inner.find(id).await
    }
    async fn find_by_object(&self, object_id: DbId) -> StoreResult<Option<PreservationRecord>> {
        let found = self.inner.find_by_object(object_id).await?;
        let gated = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if gated {
            self.barrier.wait().await;
        }
        Ok(found)
    }
    async fn create(&self, object_id: DbId) -> StoreResult<PreservationRecord> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create(object_id).await
    }
    async fn set_metadata_node(
        &self,
        id: DbId,
        node: &PreservedNode,
        version: &LockToken,
    ) -> StoreResult<PreservationRecord> {
        self.inner.set_metadata_node(id, node, version).await
    }
    async fn upsert_binary_node(&self, id: DbId, node: &NewBinaryNode) -> StoreResult<BinaryNode> {
        self.inner.upsert_binary_node(id, node).await
    }
    async fn delete(&self, id: DbId) -> StoreResult<()> {
        self.inner.delete(id).await
    }
    async fn count(&self) -> StoreResult<u64> {
        self.inner.count().await
    }
    async fn sample(&self, n: u64) -> StoreResult<Vec<PreservationRecord>> {
        self.inner.sample(n).await
    }
    async fn list_ids(&self) -> StoreResult<Vec<DbId>> {
        self.inner.list_ids().await
    }
}

/// Rejects the first `failing` check-failure writes.
pub struct FailingAuditWrites {
    inner: Arc<MemoryAuditStore>,
    remaining: AtomicUsize,
}

#[async_trait]
impl AuditStore for FailingAuditWrites {
    async fn create(&self, audit: &NewAudit) -> StoreResult<PreservationAudit> {
        self.inner.create(audit).await
    }
    async fn find(&self, id: DbId) -> StoreResult<Option<PreservationAudit>> {
        self.inner.find(id).await
    }
    async fn attach_batch(&self, id: DbId, batch_id: DbId) -> StoreResult<()> {
        self.inner.attach_batch(id, batch_id).await
    }
    async fn add_failure(&self, audit_id: DbId, resource_id: DbId, reason: &str) -> StoreResult<()> {
        let rejected = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(StoreError::Backend("audit store unavailable".into()));
        }
        self.inner.add_failure(audit_id, resource_id, reason).await
    }
    async fn failures(&self, audit_id: DbId) -> StoreResult<Vec<CheckFailure>> {
        self.inner.failures(audit_id).await
    }
    async fn failing_ids(&self, audit_id: DbId) -> StoreResult<Vec<DbId>> {
        self.inner.failing_ids(audit_id).await
    }
    async fn transition(&self, id: DbId, from: &[AuditStatus], to: AuditStatus) -> StoreResult<bool> {
        self.inner.transition(id, from, to).await
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct Options {
    pub retry: RetryPolicy,
    /// Record lookups held until this many are in flight.
    pub gated_lookups: usize,
    /// Check-failure writes rejected before the audit store accepts them.
    pub failing_audit_writes: usize,
    pub sweep_page: Option<i64>,
}

/// Retries that become runnable immediately.
pub fn immediate_retries(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_backoff: Duration::ZERO,
        ..RetryPolicy::default()
    }
}

pub struct Harness {
    pub live: Arc<MemoryLiveRepository>,
    pub records: Arc<MemoryPreservationStore>,
    /// The record store as the preserver sees it.
    pub gate: Arc<GatedRecords>,
    pub events: Arc<MemoryFixityEventStore>,
    pub audits: Arc<MemoryAuditStore>,
    pub scheduler: Arc<MemoryBatchScheduler>,
    pub channel: Arc<MemoryChannel>,
    pub backup: Arc<MemoryBackupStore>,
    pub notifier: Arc<MemoryNotifier>,
    pub bus: Arc<EventBus>,
    pub preserver: Arc<Preserver>,
    pub requestor: Arc<FixityRequestor>,
    pub checker: FixityChecker,
    pub worker: FixityWorker,
    pub repair: Arc<RepairCoordinator>,
    pub audit: Arc<AuditRunner>,
    pub batches: BatchRunner,
    files: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(Options::default())
    }

    pub fn with(options: Options) -> Self {
        let live = Arc::new(MemoryLiveRepository::new());
        let records = Arc::new(MemoryPreservationStore::new());
        let events = Arc::new(MemoryFixityEventStore::new());
        let audits = Arc::new(MemoryAuditStore::new());
        let scheduler = Arc::new(MemoryBatchScheduler::new());
        let channel = Arc::new(MemoryChannel::new(Duration::from_secs(300)));
        let backup = Arc::new(MemoryBackupStore::new(false));
        let notifier = Arc::new(MemoryNotifier::new());
        let bus = Arc::new(EventBus::default());
        let gate = Arc::new(GatedRecords::new(records.clone(), options.gated_lookups));
        let record_port: Arc<dyn PreservationStore> = gate.clone();
        let audit_port: Arc<dyn AuditStore> = Arc::new(FailingAuditWrites {
            inner: audits.clone(),
            remaining: AtomicUsize::new(options.failing_audit_writes),
        });

        let preserver = Arc::new(Preserver::new(
            live.clone(),
            record_port.clone(),
            events.clone(),
            backup.clone(),
            bus.clone(),
            true,
        ));
        let requestor = Arc::new(FixityRequestor::new(records.clone(), channel.clone()));
        let checker = FixityChecker::new(backup.clone(), channel.clone(), 64);
        let worker = FixityWorker::new(
            records.clone(),
            events.clone(),
            channel.clone(),
            bus.clone(),
            64,
        );
        let mut repair = RepairCoordinator::new(
            live.clone(),
            records.clone(),
            events.clone(),
            backup.clone(),
            preserver.clone(),
            requestor.clone(),
            Duration::from_secs(3600),
        );
        if let Some(page) = options.sweep_page {
            repair = repair.with_sweep_page(page);
        }
        let inspector = Arc::new(ObjectInspector::new(
            live.clone(),
            records.clone(),
            backup.clone(),
        ));
        let audit = Arc::new(AuditRunner::new(
            inspector,
            audit_port,
            live.clone(),
            scheduler.clone(),
            notifier.clone(),
            bus.clone(),
        ));
        let batches = BatchRunner::new(scheduler.clone(), audit.clone(), options.retry, 4);

        Self {
            live,
            records,
            gate,
            events,
            audits,
            scheduler,
            channel,
            backup,
            notifier,
            bus,
            preserver,
            requestor,
            checker,
            worker,
            repair: Arc::new(repair),
            audit,
            batches,
            files: tempfile::tempdir().expect("tempdir"),
        }
    }

    /// A committed live object with simple metadata and no binaries.
    pub fn object(&self, id: DbId, kind: ObjectKind) -> LiveObject {
        let object = LiveObject {
            id,
            kind,
            parent_id: None,
            lock_token: LockToken::from("v1"),
            metadata: json!({"title": format!("Object {id}")}),
            binaries: Vec::new(),
        };
        self.live.put(object.clone());
        object
    }

    /// Write `content` to a local file and attach it to the object as a
    /// characterized binary.
    pub fn attach(&self, object_id: DbId, binary_use: BinaryUse, content: &[u8]) -> PathBuf {
        let path = self.files.path().join(format!("{object_id}-{binary_use}"));
        std::fs::write(&path, content).expect("write local file");
        let local_path = path.clone();
        self.live.update(object_id, |object| {
            object.binaries.push(LiveBinary {
                id: object_id * 100 + object.binaries.len() as DbId,
                binary_use,
                local_path,
                checksum: Some(sha256_hex(content)),
                size: content.len() as i64,
            });
        });
        path
    }

    pub async fn live_object(&self, id: DbId) -> LiveObject {
        use ark_core::ports::LiveRepository;
        self.live.find(id).await.unwrap().expect("live object")
    }

    /// Answer every queued request and record every result.
    pub async fn verify_queued(&self) {
        self.checker.process_once().await.unwrap();
        self.worker.process_once().await.unwrap();
    }
}
