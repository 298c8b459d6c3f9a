//! In-process implementations of the store ports.
//!
//! Used by the test suites and by single-process tooling that has no
//! database. Semantics follow the PostgreSQL adapters: unique record per
//! object, latest-event currency ordered by observation time, compare-and-set
//! repair claims, at-most-once batch callbacks.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use ark_core::audit::{AuditStatus, CheckFailure, NewAudit, PreservationAudit};
use ark_core::batch::{BatchCallback, BatchJob, BatchProgress, FailureDisposition, RetryPolicy};
use ark_core::error::StoreError;
use ark_core::fixity::{EventOrigin, FixityEvent, FixityStatus, NewFixityEvent, NodeRef};
use ark_core::live::LiveObject;
use ark_core::ports::{
    AuditStore, BatchScheduler, FixityEventStore, LiveRepository, PreservationStore, StoreResult,
};
use ark_core::preservation::{BinaryNode, NewBinaryNode, PreservationRecord, PreservedNode};
use ark_core::types::{DbId, Timestamp};
use ark_core::version::LockToken;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use rand::seq::IndexedRandom;
use serde_json::Value;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Live repository
// ---------------------------------------------------------------------------

/// Live objects keyed by id. Every stored object counts as committed.
#[derive(Default)]
pub struct MemoryLiveRepository {
    objects: Mutex<BTreeMap<DbId, LiveObject>>,
}

impl MemoryLiveRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an object.
    pub fn put(&self, object: LiveObject) {
        lock(&self.objects).insert(object.id, object);
    }

    pub fn remove(&self, id: DbId) -> Option<LiveObject> {
        lock(&self.objects).remove(&id)
    }

    /// Apply `f` to a stored object. Returns `false` when it does not exist.
    pub fn update(&self, id: DbId, f: impl FnOnce(&mut LiveObject)) -> bool {
        match lock(&self.objects).get_mut(&id) {
            Some(object) => {
                f(object);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl LiveRepository for MemoryLiveRepository {
    async fn find(&self, id: DbId) -> StoreResult<Option<LiveObject>> {
        Ok(lock(&self.objects).get(&id).cloned())
    }

    async fn preservable_ids(&self) -> StoreResult<Vec<DbId>> {
        Ok(lock(&self.objects).keys().copied().collect())
    }

    async fn committed_children(&self, id: DbId) -> StoreResult<Vec<LiveObject>> {
        Ok(lock(&self.objects)
            .values()
            .filter(|o| o.parent_id == Some(id))
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Preservation records
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecordState {
    next_record_id: DbId,
    next_node_id: DbId,
    records: BTreeMap<DbId, PreservationRecord>,
}

#[derive(Default)]
pub struct MemoryPreservationStore {
    state: Mutex<RecordState>,
}

impl MemoryPreservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn not_found(id: DbId) -> StoreError {
        StoreError::NotFound {
            entity: "PreservationRecord",
            id,
        }
    }
}

#[async_trait]
impl PreservationStore for MemoryPreservationStore {
    async fn find(&self, id: DbId) -> StoreResult<Option<PreservationRecord>> {
        Ok(lock(&self.state).records.get(&id).cloned())
    }

    async fn find_by_object(&self, object_id: DbId) -> StoreResult<Option<PreservationRecord>> {
        Ok(lock(&self.state)
            .records
            .values()
            .find(|r| r.preserved_object_id == object_id)
            .cloned())
    }

    async fn create(&self, object_id: DbId) -> StoreResult<PreservationRecord> {
        let mut state = lock(&self.state);
        if state
            .records
            .values()
            .any(|r| r.preserved_object_id == object_id)
        {
            return Err(StoreError::Duplicate(
                "uq_preservation_records_object".into(),
            ));
        }
        state.next_record_id += 1;
        let now = Utc::now();
        let record = PreservationRecord {
            id: state.next_record_id,
            preserved_object_id: object_id,
            metadata_node: None,
            metadata_version: None,
            binary_nodes: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        state.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn set_metadata_node(
        &self,
        id: DbId,
        node: &PreservedNode,
        version: &LockToken,
    ) -> StoreResult<PreservationRecord> {
        let mut state = lock(&self.state);
        let record = state.records.get_mut(&id).ok_or_else(|| Self::not_found(id))?;
        record.metadata_node = Some(node.clone());
        record.metadata_version = Some(version.clone());
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn upsert_binary_node(&self, id: DbId, node: &NewBinaryNode) -> StoreResult<BinaryNode> {
        let mut state = lock(&self.state);
        if !state.records.contains_key(&id) {
            return Err(Self::not_found(id));
        }
        state.next_node_id += 1;
        let fresh_id = state.next_node_id;
        let record = state.records.get_mut(&id).ok_or_else(|| Self::not_found(id))?;

        let position = record
            .binary_nodes
            .iter()
            .position(|n| n.binary_use == node.binary_use);
        let stored = match position {
            Some(idx) => {
                let current = &mut record.binary_nodes[idx];
                current.source_binary_id = node.source_binary_id;
                current.source_checksum = node.source_checksum.clone();
                current.node = node.node.clone();
                current.clone()
            }
            None => {
                let created = BinaryNode {
                    id: fresh_id,
                    binary_use: node.binary_use,
                    source_binary_id: node.source_binary_id,
                    source_checksum: node.source_checksum.clone(),
                    node: node.node.clone(),
                };
                record.binary_nodes.push(created.clone());
                record
                    .binary_nodes
                    .sort_by(|a, b| a.binary_use.as_str().cmp(b.binary_use.as_str()));
                created
            }
        };
        record.updated_at = Utc::now();
        Ok(stored)
    }

    async fn delete(&self, id: DbId) -> StoreResult<()> {
        lock(&self.state)
            .records
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Self::not_found(id))
    }

    async fn count(&self) -> StoreResult<u64> {
        Ok(lock(&self.state).records.len() as u64)
    }

    async fn sample(&self, n: u64) -> StoreResult<Vec<PreservationRecord>> {
        let state = lock(&self.state);
        let all: Vec<&PreservationRecord> = state.records.values().collect();
        Ok(all
            .choose_multiple(&mut rand::rng(), n as usize)
            .map(|r| (*r).clone())
            .collect())
    }

    async fn list_ids(&self) -> StoreResult<Vec<DbId>> {
        Ok(lock(&self.state).records.keys().copied().collect())
    }
}

// ---------------------------------------------------------------------------
// Fixity events
// ---------------------------------------------------------------------------

#[derive(Default)]
struct EventState {
    next_id: DbId,
    events: Vec<FixityEvent>,
    /// Node -> index into `events` of its current event.
    latest: HashMap<NodeRef, usize>,
}

impl EventState {
    fn append(&mut self, event: &NewFixityEvent) -> FixityEvent {
        self.next_id += 1;
        let stored = FixityEvent {
            id: self.next_id,
            status: event.status,
            node: event.node,
            origin: event.origin,
            detail: event.detail.clone(),
            created_at: event.observed_at,
        };
        self.events.push(stored.clone());
        let idx = self.events.len() - 1;
        let newer = match self.latest.get(&stored.node) {
            Some(&cur) => {
                let current = &self.events[cur];
                (stored.created_at, stored.id) > (current.created_at, current.id)
            }
            None => true,
        };
        if newer {
            self.latest.insert(stored.node, idx);
        }
        stored
    }

    fn current(&self, node: &NodeRef) -> Option<&FixityEvent> {
        self.latest.get(node).map(|&idx| &self.events[idx])
    }
}

#[derive(Default)]
pub struct MemoryFixityEventStore {
    state: Mutex<EventState>,
}

impl MemoryFixityEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored event, in insertion order.
    pub fn all(&self) -> Vec<FixityEvent> {
        lock(&self.state).events.clone()
    }
}

#[async_trait]
impl FixityEventStore for MemoryFixityEventStore {
    async fn record(&self, event: &NewFixityEvent) -> StoreResult<FixityEvent> {
        Ok(lock(&self.state).append(event))
    }

    async fn current(&self, node: &NodeRef) -> StoreResult<Option<FixityEvent>> {
        Ok(lock(&self.state).current(node).cloned())
    }

    async fn history(&self, node: &NodeRef) -> StoreResult<Vec<FixityEvent>> {
        let state = lock(&self.state);
        let mut events: Vec<FixityEvent> = state
            .events
            .iter()
            .filter(|e| e.node == *node)
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.created_at, e.id));
        Ok(events)
    }

    async fn current_failures(&self, after_id: DbId, limit: i64) -> StoreResult<Vec<FixityEvent>> {
        let state = lock(&self.state);
        let mut failures: Vec<FixityEvent> = state
            .latest
            .values()
            .map(|&idx| &state.events[idx])
            .filter(|e| {
                e.status == FixityStatus::Failure
                    && e.origin == EventOrigin::Verification
                    && e.id > after_id
            })
            .cloned()
            .collect();
        failures.sort_by_key(|e| e.id);
        failures.truncate(limit.max(0) as usize);
        Ok(failures)
    }

    async fn begin_repair(
        &self,
        node: &NodeRef,
        failure_event_id: DbId,
    ) -> StoreResult<Option<FixityEvent>> {
        let mut state = lock(&self.state);
        let failure_at = match state.current(node) {
            Some(cur) if cur.id == failure_event_id && cur.status == FixityStatus::Failure => {
                cur.created_at
            }
            _ => return Ok(None),
        };
        let observed_at = Utc::now().max(failure_at + ChronoDuration::microseconds(1));
        Ok(Some(state.append(&NewFixityEvent {
            status: FixityStatus::Repairing,
            node: *node,
            origin: EventOrigin::Repair,
            detail: None,
            observed_at,
        })))
    }

    async fn delete_for_resource(&self, resource_id: DbId) -> StoreResult<u64> {
        let mut state = lock(&self.state);
        let before = state.events.len();
        state.events.retain(|e| e.node.resource_id != resource_id);
        let removed = (before - state.events.len()) as u64;

        // Indices shifted; rebuild the latest index from scratch.
        let mut latest: HashMap<NodeRef, usize> = HashMap::new();
        for (idx, event) in state.events.iter().enumerate() {
            let newer = match latest.get(&event.node) {
                Some(&cur) => {
                    let current = &state.events[cur];
                    (event.created_at, event.id) > (current.created_at, current.id)
                }
                None => true,
            };
            if newer {
                latest.insert(event.node, idx);
            }
        }
        state.latest = latest;
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// Audits
// ---------------------------------------------------------------------------

#[derive(Default)]
struct AuditState {
    next_audit_id: DbId,
    next_failure_id: DbId,
    audits: BTreeMap<DbId, PreservationAudit>,
    failures: Vec<CheckFailure>,
}

#[derive(Default)]
pub struct MemoryAuditStore {
    state: Mutex<AuditState>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn create(&self, audit: &NewAudit) -> StoreResult<PreservationAudit> {
        let mut state = lock(&self.state);
        state.next_audit_id += 1;
        let now = Utc::now();
        let created = PreservationAudit {
            id: state.next_audit_id,
            status: AuditStatus::InProcess,
            extent: audit.extent,
            ids_from: audit.ids_from,
            batch_id: None,
            skip_metadata_checksum: audit.skip_metadata_checksum,
            object_count: audit.object_count,
            created_at: now,
            updated_at: now,
        };
        state.audits.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find(&self, id: DbId) -> StoreResult<Option<PreservationAudit>> {
        Ok(lock(&self.state).audits.get(&id).cloned())
    }

    async fn attach_batch(&self, id: DbId, batch_id: DbId) -> StoreResult<()> {
        let mut state = lock(&self.state);
        let audit = state.audits.get_mut(&id).ok_or(StoreError::NotFound {
            entity: "PreservationAudit",
            id,
        })?;
        audit.batch_id = Some(batch_id);
        audit.updated_at = Utc::now();
        Ok(())
    }

    async fn add_failure(
        &self,
        audit_id: DbId,
        resource_id: DbId,
        reason: &str,
    ) -> StoreResult<()> {
        let mut state = lock(&self.state);
        let exists = state.failures.iter().any(|f| {
            f.audit_id == audit_id && f.resource_id == resource_id && f.reason == reason
        });
        if !exists {
            state.next_failure_id += 1;
            let failure = CheckFailure {
                id: state.next_failure_id,
                audit_id,
                resource_id,
                reason: reason.to_string(),
                created_at: Utc::now(),
            };
            state.failures.push(failure);
        }
        Ok(())
    }

    async fn failures(&self, audit_id: DbId) -> StoreResult<Vec<CheckFailure>> {
        let mut failures: Vec<CheckFailure> = lock(&self.state)
            .failures
            .iter()
            .filter(|f| f.audit_id == audit_id)
            .cloned()
            .collect();
        failures.sort_by_key(|f| (f.resource_id, f.id));
        Ok(failures)
    }

    async fn failing_ids(&self, audit_id: DbId) -> StoreResult<Vec<DbId>> {
        let ids: std::collections::BTreeSet<DbId> = lock(&self.state)
            .failures
            .iter()
            .filter(|f| f.audit_id == audit_id)
            .map(|f| f.resource_id)
            .collect();
        Ok(ids.into_iter().collect())
    }

    async fn transition(
        &self,
        id: DbId,
        from: &[AuditStatus],
        to: AuditStatus,
    ) -> StoreResult<bool> {
        let mut state = lock(&self.state);
        match state.audits.get_mut(&id) {
            Some(audit) if from.contains(&audit.status) => {
                audit.status = to;
                audit.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// ---------------------------------------------------------------------------
// Batch scheduler
// ---------------------------------------------------------------------------

/// Claims older than this are considered abandoned and may be re-claimed.
const STALE_CLAIM_SECS: i64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    Pending,
    Running,
    Retrying,
    Succeeded,
    Dead,
}

struct JobEntry {
    job: BatchJob,
    state: JobState,
    executed: bool,
    run_at: Timestamp,
    claimed_at: Option<Timestamp>,
    last_error: Option<String>,
}

struct BatchEntry {
    metadata: Value,
    fired: HashSet<BatchCallback>,
}

#[derive(Default)]
struct BatchState {
    next_batch_id: DbId,
    next_job_id: DbId,
    batches: BTreeMap<DbId, BatchEntry>,
    jobs: Vec<JobEntry>,
}

impl BatchState {
    fn progress(&self, batch_id: DbId) -> StoreResult<BatchProgress> {
        let batch = self.batches.get(&batch_id).ok_or(StoreError::NotFound {
            entity: "Batch",
            id: batch_id,
        })?;
        let jobs = self.jobs.iter().filter(|j| j.job.batch_id == batch_id);
        let mut progress = BatchProgress {
            batch_id,
            metadata: batch.metadata.clone(),
            total: 0,
            executed: 0,
            succeeded: 0,
            retrying: 0,
            dead: 0,
            retried: 0,
        };
        for job in jobs {
            progress.total += 1;
            progress.executed += i64::from(job.executed);
            progress.retried += i64::from(job.job.attempts > 1);
            match job.state {
                JobState::Succeeded => progress.succeeded += 1,
                JobState::Retrying => progress.retrying += 1,
                JobState::Dead => progress.dead += 1,
                JobState::Pending | JobState::Running => {}
            }
        }
        Ok(progress)
    }

    fn entry_mut(&mut self, job_id: DbId) -> StoreResult<&mut JobEntry> {
        self.jobs
            .iter_mut()
            .find(|j| j.job.id == job_id)
            .ok_or(StoreError::NotFound {
                entity: "BatchJob",
                id: job_id,
            })
    }
}

#[derive(Default)]
pub struct MemoryBatchScheduler {
    state: Mutex<BatchState>,
}

impl MemoryBatchScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every waiting retry runnable now.
    pub fn expire_backoffs(&self) {
        let now = Utc::now();
        for job in lock(&self.state).jobs.iter_mut() {
            if job.state == JobState::Retrying {
                job.run_at = now;
            }
        }
    }

    /// Last recorded error for a job.
    pub fn last_error(&self, job_id: DbId) -> Option<String> {
        lock(&self.state)
            .jobs
            .iter()
            .find(|j| j.job.id == job_id)
            .and_then(|j| j.last_error.clone())
    }
}

#[async_trait]
impl BatchScheduler for MemoryBatchScheduler {
    async fn create_batch(
        &self,
        _description: &str,
        metadata: &Value,
        payloads: &[Value],
    ) -> StoreResult<DbId> {
        let mut state = lock(&self.state);
        state.next_batch_id += 1;
        let batch_id = state.next_batch_id;
        state.batches.insert(
            batch_id,
            BatchEntry {
                metadata: metadata.clone(),
                fired: HashSet::new(),
            },
        );
        let now = Utc::now();
        for payload in payloads {
            state.next_job_id += 1;
            let id = state.next_job_id;
            state.jobs.push(JobEntry {
                job: BatchJob {
                    id,
                    batch_id,
                    payload: payload.clone(),
                    attempts: 0,
                },
                state: JobState::Pending,
                executed: false,
                run_at: now,
                claimed_at: None,
                last_error: None,
            });
        }
        Ok(batch_id)
    }

    async fn claim_next(&self) -> StoreResult<Option<BatchJob>> {
        let now = Utc::now();
        let stale_before = now - ChronoDuration::seconds(STALE_CLAIM_SECS);
        let mut state = lock(&self.state);
        let next = state
            .jobs
            .iter_mut()
            .filter(|j| match j.state {
                JobState::Pending | JobState::Retrying => j.run_at <= now,
                JobState::Running => j.claimed_at.is_some_and(|t| t < stale_before),
                JobState::Succeeded | JobState::Dead => false,
            })
            .min_by_key(|j| (j.run_at, j.job.id));
        Ok(next.map(|entry| {
            entry.state = JobState::Running;
            entry.claimed_at = Some(now);
            entry.job.attempts += 1;
            entry.job.clone()
        }))
    }

    async fn mark_succeeded(&self, job: &BatchJob) -> StoreResult<BatchProgress> {
        let mut state = lock(&self.state);
        let entry = state.entry_mut(job.id)?;
        entry.state = JobState::Succeeded;
        entry.executed = true;
        entry.claimed_at = None;
        state.progress(job.batch_id)
    }

    async fn mark_failed(
        &self,
        job: &BatchJob,
        error: &str,
        policy: &RetryPolicy,
    ) -> StoreResult<(FailureDisposition, BatchProgress)> {
        let disposition = policy.disposition(job.attempts);
        let mut state = lock(&self.state);
        let entry = state.entry_mut(job.id)?;
        entry.executed = true;
        entry.claimed_at = None;
        entry.last_error = Some(error.to_string());
        match disposition {
            FailureDisposition::Retry(delay) => {
                entry.state = JobState::Retrying;
                entry.run_at = Utc::now()
                    + ChronoDuration::from_std(delay).unwrap_or(ChronoDuration::zero());
            }
            FailureDisposition::Dead => entry.state = JobState::Dead,
        }
        Ok((disposition, state.progress(job.batch_id)?))
    }

    async fn fire(&self, batch_id: DbId, callback: BatchCallback) -> StoreResult<bool> {
        let mut state = lock(&self.state);
        let batch = state.batches.get_mut(&batch_id).ok_or(StoreError::NotFound {
            entity: "Batch",
            id: batch_id,
        })?;
        Ok(batch.fired.insert(callback))
    }

    async fn progress(&self, batch_id: DbId) -> StoreResult<BatchProgress> {
        lock(&self.state).progress(batch_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_core::hashing::Checksums;
    use ark_core::object::BinaryUse;
    use assert_matches::assert_matches;
    use std::time::Duration;

    fn node(location: &str) -> PreservedNode {
        PreservedNode {
            location: location.into(),
            checksums: Checksums::compute(location.as_bytes()),
            size: 1,
        }
    }

    #[tokio::test]
    async fn second_record_for_object_is_duplicate() {
        let store = MemoryPreservationStore::new();
        store.create(7).await.unwrap();
        assert_matches!(store.create(7).await, Err(StoreError::Duplicate(_)));
    }

    #[tokio::test]
    async fn upsert_keeps_node_id_stable() {
        let store = MemoryPreservationStore::new();
        let record = store.create(1).await.unwrap();
        let new_node = |loc: &str| NewBinaryNode {
            binary_use: BinaryUse::Original,
            source_binary_id: 10,
            source_checksum: "aa".into(),
            node: node(loc),
        };
        let first = store.upsert_binary_node(record.id, &new_node("mem://a")).await.unwrap();
        let second = store.upsert_binary_node(record.id, &new_node("mem://b")).await.unwrap();
        assert_eq!(first.id, second.id);
        let reread = store.find(record.id).await.unwrap().unwrap();
        assert_eq!(reread.binary_nodes.len(), 1);
        assert_eq!(reread.binary_nodes[0].node.location, "mem://b");
    }

    #[tokio::test]
    async fn current_event_follows_observation_time_not_arrival() {
        let store = MemoryFixityEventStore::new();
        let n = NodeRef::metadata(3);
        let now = Utc::now();
        let event = |status, at| NewFixityEvent {
            status,
            node: n,
            origin: EventOrigin::Verification,
            detail: None,
            observed_at: at,
        };
        store.record(&event(FixityStatus::Failure, now)).await.unwrap();
        store
            .record(&event(FixityStatus::Success, now - ChronoDuration::seconds(5)))
            .await
            .unwrap();
        let current = store.current(&n).await.unwrap().unwrap();
        assert_eq!(current.status, FixityStatus::Failure);
        assert_eq!(store.history(&n).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn begin_repair_claims_once() {
        let store = MemoryFixityEventStore::new();
        let n = NodeRef::binary(1, 2);
        let failure = store
            .record(&NewFixityEvent {
                status: FixityStatus::Failure,
                node: n,
                origin: EventOrigin::Verification,
                detail: None,
                observed_at: Utc::now(),
            })
            .await
            .unwrap();
        let claim = store.begin_repair(&n, failure.id).await.unwrap().unwrap();
        assert_eq!(claim.status, FixityStatus::Repairing);
        assert!(claim.created_at > failure.created_at);
        assert!(store.begin_repair(&n, failure.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn current_failures_lists_verification_failures_in_pages() {
        let store = MemoryFixityEventStore::new();
        let failure = |resource, origin| NewFixityEvent {
            status: FixityStatus::Failure,
            node: NodeRef::metadata(resource),
            origin,
            detail: None,
            observed_at: Utc::now(),
        };
        store.record(&failure(1, EventOrigin::Repair)).await.unwrap();
        let a = store.record(&failure(2, EventOrigin::Verification)).await.unwrap();
        let b = store.record(&failure(3, EventOrigin::Verification)).await.unwrap();

        let first = store.current_failures(0, 1).await.unwrap();
        assert_eq!(first.iter().map(|e| e.id).collect::<Vec<_>>(), vec![a.id]);
        let second = store.current_failures(a.id, 1).await.unwrap();
        assert_eq!(second.iter().map(|e| e.id).collect::<Vec<_>>(), vec![b.id]);
        assert!(store.current_failures(b.id, 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_for_resource_keeps_other_nodes_current() {
        let store = MemoryFixityEventStore::new();
        for resource in [1, 2] {
            store
                .record(&NewFixityEvent {
                    status: FixityStatus::Success,
                    node: NodeRef::metadata(resource),
                    origin: EventOrigin::Verification,
                    detail: None,
                    observed_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        assert_eq!(store.delete_for_resource(1).await.unwrap(), 1);
        assert!(store.current(&NodeRef::metadata(1)).await.unwrap().is_none());
        assert!(store.current(&NodeRef::metadata(2)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn audit_transition_requires_expected_status() {
        let store = MemoryAuditStore::new();
        let audit = store
            .create(&NewAudit::for_scope(ark_core::audit::AuditScope::Full, false, 2))
            .await
            .unwrap();
        assert!(!store
            .transition(audit.id, &[AuditStatus::Success], AuditStatus::Complete)
            .await
            .unwrap());
        assert!(store
            .transition(audit.id, &[AuditStatus::InProcess], AuditStatus::Failure)
            .await
            .unwrap());
        store.add_failure(audit.id, 9, "missing").await.unwrap();
        store.add_failure(audit.id, 9, "missing").await.unwrap();
        assert_eq!(store.failures(audit.id).await.unwrap().len(), 1);
        assert_eq!(store.failing_ids(audit.id).await.unwrap(), vec![9]);
    }

    #[tokio::test]
    async fn failed_job_retries_then_dies() {
        let scheduler = MemoryBatchScheduler::new();
        let policy = RetryPolicy {
            max_retries: 1,
            base_backoff: Duration::from_secs(60),
            ..RetryPolicy::default()
        };
        let batch = scheduler
            .create_batch("t", &Value::Null, &[serde_json::json!({"n": 1})])
            .await
            .unwrap();

        let job = scheduler.claim_next().await.unwrap().unwrap();
        let (disposition, progress) = scheduler.mark_failed(&job, "boom", &policy).await.unwrap();
        assert_matches!(disposition, FailureDisposition::Retry(_));
        assert_eq!(progress.retrying, 1);
        assert!(progress.all_executed());
        assert!(scheduler.claim_next().await.unwrap().is_none());

        scheduler.expire_backoffs();
        let job = scheduler.claim_next().await.unwrap().unwrap();
        assert_eq!(job.attempts, 2);
        let (disposition, progress) = scheduler.mark_failed(&job, "boom", &policy).await.unwrap();
        assert_eq!(disposition, FailureDisposition::Dead);
        assert_eq!(progress.dead, 1);
        assert_eq!(scheduler.last_error(job.id).as_deref(), Some("boom"));

        assert!(scheduler.fire(batch, BatchCallback::Death).await.unwrap());
        assert!(!scheduler.fire(batch, BatchCallback::Death).await.unwrap());
    }
}
