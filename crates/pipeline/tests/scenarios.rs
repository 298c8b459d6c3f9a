//! End-to-end behaviour of the preservation pipeline against in-memory ports.

mod common;

use ark_core::audit::{AuditScope, AuditStatus};
use ark_core::fixity::{EventOrigin, FixityStatus, NewFixityEvent, NodeRef};
use ark_core::notification::NotificationKind;
use ark_core::object::{BinaryUse, ObjectKind};
use ark_core::ports::{BatchScheduler, FixityEventStore, PreservationStore};
use ark_core::types::DbId;
use ark_core::version::LockToken;
use ark_pipeline::repair::{restored_path, RepairOutcome, SkipReason};
use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use common::{immediate_retries, Harness, Options};

/// Preserve a metadata-only object, corrupt its preserved metadata copy and
/// run one verification round.
async fn failing_metadata_node(h: &Harness, object_id: DbId) -> NodeRef {
    h.object(object_id, ObjectKind::Component);
    let record = h.preserver.preserve_object_id(object_id).await.unwrap();
    corrupt_and_verify(h, &record.metadata_node.unwrap().location, NodeRef::metadata(record.id)).await
}

async fn corrupt_and_verify(h: &Harness, location: &str, node: NodeRef) -> NodeRef {
    assert!(h.backup.corrupt(location, b"bit rot"));
    h.requestor.queue_node_check(node.resource_id, &node).await.unwrap();
    h.verify_queued().await;
    node
}

async fn current_status(h: &Harness, node: &NodeRef) -> FixityStatus {
    h.events.current(node).await.unwrap().unwrap().status
}

// ---------------------------------------------------------------------------
// Test: preserving an unchanged object twice uploads once
// ---------------------------------------------------------------------------

#[tokio::test]
async fn second_preserve_of_unchanged_object_uploads_nothing() {
    let h = Harness::new();
    h.object(1, ObjectKind::Component);
    h.attach(1, BinaryUse::Original, b"master bytes");
    let object = h.live_object(1).await;

    h.preserver.preserve(&object).await.unwrap();
    let uploads = h.backup.put_count();
    assert_eq!(uploads, 2, "metadata and one binary");

    h.preserver.preserve(&object).await.unwrap();
    assert_eq!(h.backup.put_count(), uploads);
}

// ---------------------------------------------------------------------------
// Test: concurrent first-time preserves converge on one record
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_first_preserves_create_one_record() {
    let h = Harness::with(Options {
        gated_lookups: 2,
        ..Options::default()
    });
    let object = h.object(2, ObjectKind::Component);

    let (a, b) = tokio::join!(h.preserver.preserve(&object), h.preserver.preserve(&object));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(h.gate.creates(), 2, "both callers found no record and tried to create one");
    assert_eq!(a.id, b.id);
    assert_eq!(h.records.count().await.unwrap(), 1);
    let record = h.records.find_by_object(2).await.unwrap().unwrap();
    assert!(record.metadata_node.is_some());
}

// ---------------------------------------------------------------------------
// Test: repair with a trustworthy local copy
// ---------------------------------------------------------------------------

/// A corrupted preserved copy whose local source still matches is
/// re-uploaded, and the follow-up verification succeeds.
#[tokio::test]
async fn corrupted_copy_with_good_local_file_is_reuploaded() {
    let h = Harness::new();
    h.object(3, ObjectKind::Component);
    h.attach(3, BinaryUse::PreservationMaster, b"pristine master");
    let record = h.preserver.preserve_object_id(3).await.unwrap();
    let binary = record.binary_node(BinaryUse::PreservationMaster).unwrap().clone();
    let node = NodeRef::binary(record.id, binary.id);

    assert!(h.backup.corrupt(&binary.node.location, b"bit rot"));
    assert_eq!(h.requestor.queue_resource_check(record.id).await.unwrap(), 2);
    h.verify_queued().await;

    let failure = h.events.current(&node).await.unwrap().unwrap();
    assert_eq!(failure.status, FixityStatus::Failure);
    assert!(failure.detail.as_deref().unwrap().contains("checksum mismatch"));
    let metadata = h.events.current(&NodeRef::metadata(record.id)).await.unwrap().unwrap();
    assert_eq!(metadata.status, FixityStatus::Success);

    let uploads = h.backup.put_count();
    assert_matches!(h.repair.repair(&failure).await.unwrap(), RepairOutcome::Reuploaded);
    assert_eq!(h.backup.put_count(), uploads + 1);
    assert_eq!(
        h.events.current(&node).await.unwrap().unwrap().status,
        FixityStatus::Repairing
    );

    h.verify_queued().await;
    let current = h.events.current(&node).await.unwrap().unwrap();
    assert_eq!(current.status, FixityStatus::Success);
    assert_eq!(current.origin, EventOrigin::Verification);
}

// ---------------------------------------------------------------------------
// Test: repair with a drifted local copy
// ---------------------------------------------------------------------------

/// When the local file no longer matches and the preserved copy is also
/// bad, nothing is uploaded and a terminal repair FAILURE is recorded.
#[tokio::test]
async fn drifted_local_file_is_never_reuploaded() {
    let h = Harness::new();
    h.object(4, ObjectKind::Component);
    let path = h.attach(4, BinaryUse::Original, b"original scan");
    let record = h.preserver.preserve_object_id(4).await.unwrap();
    let binary = record.binary_node(BinaryUse::Original).unwrap().clone();
    let node = NodeRef::binary(record.id, binary.id);

    h.backup.corrupt(&binary.node.location, b"bit rot");
    std::fs::write(&path, b"edited outside the pipeline").unwrap();
    h.requestor.queue_node_check(record.id, &node).await.unwrap();
    h.verify_queued().await;
    let failure = h.events.current(&node).await.unwrap().unwrap();

    let uploads = h.backup.put_count();
    assert_matches!(h.repair.repair(&failure).await.unwrap(), RepairOutcome::Unrecoverable);
    assert_eq!(h.backup.put_count(), uploads);

    let current = h.events.current(&node).await.unwrap().unwrap();
    assert_eq!(current.status, FixityStatus::Failure);
    assert_eq!(current.origin, EventOrigin::Repair);
    assert_ne!(current.id, failure.id);
    assert!(current.detail.as_deref().unwrap().starts_with("unrecoverable"));
}

/// A drifted local file with an intact preserved copy gets the verified copy
/// staged beside it; the live file itself is left alone.
#[tokio::test]
async fn drifted_local_file_gets_verified_copy_staged() {
    let h = Harness::new();
    h.object(5, ObjectKind::Component);
    let path = h.attach(5, BinaryUse::Original, b"original scan");
    let record = h.preserver.preserve_object_id(5).await.unwrap();
    let binary = record.binary_node(BinaryUse::Original).unwrap().clone();
    let node = NodeRef::binary(record.id, binary.id);

    std::fs::write(&path, b"truncated").unwrap();
    let failure = h
        .events
        .record(&NewFixityEvent {
            status: FixityStatus::Failure,
            node,
            origin: EventOrigin::Verification,
            detail: Some("reported by operator tooling".into()),
            observed_at: Utc::now(),
        })
        .await
        .unwrap();

    let uploads = h.backup.put_count();
    let outcome = h.repair.repair(&failure).await.unwrap();
    let staged = restored_path(&path);
    assert_eq!(outcome, RepairOutcome::RestoreStaged { path: staged.clone() });
    assert_eq!(h.backup.put_count(), uploads);
    assert_eq!(std::fs::read(&staged).unwrap(), b"original scan");
    assert_eq!(std::fs::read(&path).unwrap(), b"truncated");

    let current = h.events.current(&node).await.unwrap().unwrap();
    assert_eq!(current.status, FixityStatus::Failure);
    assert!(current
        .detail
        .as_deref()
        .unwrap()
        .starts_with("local file restore required"));

    // A terminal repair failure is not picked up again.
    assert_matches!(
        h.repair.repair(&current).await.unwrap(),
        RepairOutcome::Skipped(_)
    );
}

// ---------------------------------------------------------------------------
// Test: current status follows the latest observation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn current_status_is_latest_event() {
    let h = Harness::new();
    let node = NodeRef::metadata(9);
    let t0 = Utc::now() - Duration::minutes(10);

    for (offset, status) in [
        (0, FixityStatus::Success),
        (1, FixityStatus::Failure),
        (2, FixityStatus::Repairing),
    ] {
        h.events
            .record(&NewFixityEvent {
                status,
                node,
                origin: EventOrigin::Verification,
                detail: None,
                observed_at: t0 + Duration::minutes(offset),
            })
            .await
            .unwrap();
    }
    assert_eq!(
        h.events.current(&node).await.unwrap().unwrap().status,
        FixityStatus::Repairing
    );

    // A late-arriving older observation joins the history only.
    h.events
        .record(&NewFixityEvent {
            status: FixityStatus::Success,
            node,
            origin: EventOrigin::Verification,
            detail: None,
            observed_at: t0 - Duration::minutes(1),
        })
        .await
        .unwrap();
    assert_eq!(
        h.events.current(&node).await.unwrap().unwrap().status,
        FixityStatus::Repairing
    );
    assert_eq!(h.events.history(&node).await.unwrap().len(), 4);
}

// ---------------------------------------------------------------------------
// Test: deleting a live object removes its preserved state
// ---------------------------------------------------------------------------

#[tokio::test]
async fn delete_removes_record_blobs_and_history() {
    let h = Harness::new();
    h.object(6, ObjectKind::Component);
    h.attach(6, BinaryUse::Original, b"scan");
    h.object(7, ObjectKind::Component);
    let record = h.preserver.preserve_object_id(6).await.unwrap();
    h.preserver.preserve_object_id(7).await.unwrap();
    h.requestor.queue_resource_check(record.id).await.unwrap();
    h.verify_queued().await;
    assert_eq!(h.backup.len(), 3);

    assert!(h.preserver.on_delete(6).await.unwrap());

    let ids = h.records.list_ids().await.unwrap();
    assert!(!ids.contains(&record.id));
    assert_eq!(ids.len(), 1);
    assert_eq!(h.backup.len(), 1);
    assert!(h
        .events
        .history(&NodeRef::metadata(record.id))
        .await
        .unwrap()
        .is_empty());
}

// ---------------------------------------------------------------------------
// Test: audit aggregation and targeted rerun
// ---------------------------------------------------------------------------

#[tokio::test]
async fn audit_records_one_failure_and_rerun_targets_it() {
    let h = Harness::new();
    for id in 1..=3 {
        h.object(id, ObjectKind::Component);
        h.preserver.preserve_object_id(id).await.unwrap();
    }
    let broken = h.records.find_by_object(2).await.unwrap().unwrap();
    h.backup.remove(&broken.metadata_node.unwrap().location);

    let audit = h.audit.run(AuditScope::Full, false).await.unwrap();
    assert_eq!(audit.status, AuditStatus::InProcess);
    assert_eq!(audit.object_count, 3);
    assert_eq!(h.batches.drain().await.unwrap(), 3);

    let (audit, failures) = h.audit.summary(audit.id).await.unwrap();
    assert_eq!(audit.status, AuditStatus::Failure);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].resource_id, 2);
    assert_eq!(h.notifier.sent().len(), 1);

    let rerun = h.audit.run(AuditScope::IdsFrom(audit.id), false).await.unwrap();
    assert_eq!(rerun.object_count, 1);
    assert_eq!(rerun.ids_from, Some(audit.id));
    let progress = h.scheduler.progress(rerun.batch_id.unwrap()).await.unwrap();
    assert_eq!(progress.total, 1);
    assert_eq!(h.batches.drain().await.unwrap(), 1);
}

// ---------------------------------------------------------------------------
// Test: a metadata edit produces a new preserved version
// ---------------------------------------------------------------------------

#[tokio::test]
async fn metadata_edit_updates_version_and_checksum() {
    let h = Harness::new();
    h.object(8, ObjectKind::Item);
    let v1 = h.preserver.preserve_object_id(8).await.unwrap();
    assert_eq!(v1.metadata_version, Some(LockToken::from("v1")));

    h.live.update(8, |object| {
        object.metadata = json!({"title": "Object 8, corrected"});
        object.lock_token = LockToken::from("v2");
    });
    let v2 = h.preserver.preserve_object_id(8).await.unwrap();

    assert_eq!(v2.id, v1.id);
    assert_eq!(v2.metadata_version, Some(LockToken::from("v2")));
    assert_ne!(
        v2.metadata_node.unwrap().checksums.sha256,
        v1.metadata_node.unwrap().checksums.sha256
    );
}

// ---------------------------------------------------------------------------
// Test: metadata repair
// ---------------------------------------------------------------------------

/// The live store is authoritative for metadata: a corrupted copy is
/// rewritten even though the version token has not changed.
#[tokio::test]
async fn corrupted_metadata_copy_is_rewritten_from_live_store() {
    let h = Harness::new();
    let node = failing_metadata_node(&h, 10).await;
    let failure = h.events.current(&node).await.unwrap().unwrap();
    assert_eq!(failure.status, FixityStatus::Failure);

    let uploads = h.backup.put_count();
    assert_matches!(h.repair.repair(&failure).await.unwrap(), RepairOutcome::Reuploaded);
    assert_eq!(h.backup.put_count(), uploads + 1);
    let record = h.records.find(node.resource_id).await.unwrap().unwrap();
    assert_eq!(record.metadata_version, Some(LockToken::from("v1")));
    assert_eq!(current_status(&h, &node).await, FixityStatus::Repairing);

    h.verify_queued().await;
    assert_eq!(current_status(&h, &node).await, FixityStatus::Success);
}

// ---------------------------------------------------------------------------
// Test: repair cooldown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn second_failure_within_cooldown_is_left_for_operators() {
    let h = Harness::new();
    let node = failing_metadata_node(&h, 11).await;
    let failure = h.events.current(&node).await.unwrap().unwrap();
    assert_matches!(h.repair.repair(&failure).await.unwrap(), RepairOutcome::Reuploaded);
    h.verify_queued().await;
    assert_eq!(current_status(&h, &node).await, FixityStatus::Success);

    let record = h.records.find(node.resource_id).await.unwrap().unwrap();
    corrupt_and_verify(&h, &record.metadata_node.unwrap().location, node).await;
    let again = h.events.current(&node).await.unwrap().unwrap();
    assert_eq!(again.status, FixityStatus::Failure);

    let uploads = h.backup.put_count();
    assert_eq!(
        h.repair.repair(&again).await.unwrap(),
        RepairOutcome::Skipped(SkipReason::Cooldown)
    );
    assert_eq!(h.backup.put_count(), uploads);
    assert_eq!(h.events.current(&node).await.unwrap().unwrap().id, again.id);
}

// ---------------------------------------------------------------------------
// Test: reconciliation sweep
// ---------------------------------------------------------------------------

/// Terminal repair failures stay current forever; they must not crowd a
/// fresh verification failure out of the sweep.
#[tokio::test]
async fn sweep_reaches_new_failures_behind_terminal_ones() {
    let h = Harness::new();
    let long_ago = Utc::now() - Duration::days(30);
    for resource_id in 1_000..1_500 {
        h.events
            .record(&NewFixityEvent {
                status: FixityStatus::Failure,
                node: NodeRef::metadata(resource_id),
                origin: EventOrigin::Repair,
                detail: Some("unrecoverable".into()),
                observed_at: long_ago,
            })
            .await
            .unwrap();
    }
    let node = failing_metadata_node(&h, 12).await;

    assert_eq!(h.repair.sweep().await, 1);
    assert_eq!(current_status(&h, &node).await, FixityStatus::Repairing);
}

/// Failures skipped for cooldown do not stop the sweep from paging on to
/// newer ones.
#[tokio::test]
async fn sweep_pages_past_skipped_failures() {
    let h = Harness::with(Options {
        sweep_page: Some(1),
        ..Options::default()
    });
    let cooling = failing_metadata_node(&h, 13).await;
    let failure = h.events.current(&cooling).await.unwrap().unwrap();
    h.repair.repair(&failure).await.unwrap();
    h.verify_queued().await;
    let record = h.records.find(cooling.resource_id).await.unwrap().unwrap();
    corrupt_and_verify(&h, &record.metadata_node.unwrap().location, cooling).await;

    let fresh: Vec<NodeRef> = vec![
        failing_metadata_node(&h, 14).await,
        failing_metadata_node(&h, 15).await,
    ];

    assert_eq!(h.repair.sweep().await, 3);
    assert_eq!(current_status(&h, &cooling).await, FixityStatus::Failure);
    for node in &fresh {
        assert_eq!(current_status(&h, node).await, FixityStatus::Repairing);
    }
}

/// The running coordinator picks failures up from the event bus.
#[tokio::test]
async fn running_coordinator_repairs_published_failures() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    let receiver = h.bus.subscribe();
    let repair = h.repair.clone();
    let token = cancel.clone();
    let handle = tokio::spawn(async move { repair.run(receiver, token).await });

    let node = failing_metadata_node(&h, 16).await;

    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while current_status(&h, &node).await != FixityStatus::Repairing {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("failure was not repaired");

    cancel.cancel();
    handle.await.unwrap();
}

// ---------------------------------------------------------------------------
// Test: audit lifecycle with job failures
// ---------------------------------------------------------------------------

/// A job that fails once and then succeeds: the first pass is reported as a
/// failure (one object still unchecked), the retried pass as complete.
#[tokio::test]
async fn audit_with_retried_job_ends_complete() {
    let h = Harness::with(Options {
        retry: immediate_retries(3),
        failing_audit_writes: 1,
        ..Options::default()
    });
    h.object(30, ObjectKind::Component);

    let audit = h.audit.run(AuditScope::Full, false).await.unwrap();
    assert_eq!(h.batches.drain().await.unwrap(), 2);

    let (audit, failures) = h.audit.summary(audit.id).await.unwrap();
    assert_eq!(audit.status, AuditStatus::Complete);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].reason, "no preservation record");

    let sent = h.notifier.sent();
    let kinds: Vec<_> = sent.iter().map(|n| n.kind).collect();
    assert_eq!(kinds, vec![NotificationKind::AuditFinished, NotificationKind::AuditComplete]);
    assert!(sent[0].subject.ends_with("failure"), "{}", sent[0].subject);
    assert_eq!(sent[0].counts.retries_remaining, 1);
}

/// A dead-lettered job never lets the audit report success.
#[tokio::test]
async fn audit_with_dead_job_reports_failure_then_dead() {
    let h = Harness::with(Options {
        retry: immediate_retries(0),
        failing_audit_writes: usize::MAX,
        ..Options::default()
    });
    h.object(31, ObjectKind::Component);
    h.object(32, ObjectKind::Component);
    h.preserver.preserve_object_id(32).await.unwrap();

    let audit = h.audit.run(AuditScope::Full, false).await.unwrap();
    assert_eq!(h.batches.drain().await.unwrap(), 2);

    let (audit, failures) = h.audit.summary(audit.id).await.unwrap();
    assert_eq!(audit.status, AuditStatus::Dead);
    assert!(failures.is_empty());

    let sent = h.notifier.sent();
    let kinds: Vec<_> = sent.iter().map(|n| n.kind).collect();
    assert_eq!(kinds, vec![NotificationKind::AuditFinished, NotificationKind::AuditDead]);
    assert!(sent[0].subject.ends_with("failure"), "{}", sent[0].subject);
    assert_eq!(sent[1].counts.dead_jobs, 1);
}
