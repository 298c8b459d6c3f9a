//! Repair Coordinator: reacts to verification failures.
//!
//! Per failed node the coordinator first claims the node with a REPAIRING
//! event (compare-and-set against the failure still being current), then
//! decides which copy to trust:
//!
//! - metadata: the live store is authoritative, so the snapshot is
//!   re-uploaded unconditionally and re-verified;
//! - binary, local file still matches its checksum at preservation time:
//!   re-upload that one binary and re-verify;
//! - binary, local file changed or missing: fetch the preserved copy and,
//!   if it verifies, stage it beside the live file as `<path>.restored` for
//!   an operator, recording a repair FAILURE. If the preserved copy is bad
//!   too the loss is recorded as unrecoverable.
//!
//! A claimed node never stays REPAIRING: every path either queues a fresh
//! verification or records a terminal FAILURE.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ark_core::error::{CoreError, StoreError};
use ark_core::fixity::{
    ChildProperty, EventOrigin, FixityEvent, FixityStatus, NewFixityEvent, NodeRef,
};
use ark_core::hashing::{sha256_hex, Checksums};
use ark_core::live::{LiveBinary, LiveObject};
use ark_core::ports::{BackupStore, FixityEventStore, LiveRepository, PreservationStore};
use ark_core::preservation::{BinaryNode, PreservationRecord};
use ark_events::PreservationEvent;
use chrono::Utc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::error::PreservationError;
use crate::preserver::{PreserveOptions, PreserveScope, Preserver};
use crate::requestor::FixityRequestor;

/// Failures fetched per page during a reconciliation sweep.
const SWEEP_PAGE: i64 = 500;

/// Suffix of a staged local restore.
pub const RESTORED_SUFFIX: &str = "restored";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Not a verification FAILURE.
    NotRepairable,
    /// The node was repaired recently; left for an operator.
    Cooldown,
    /// Another actor claimed the failure, or a newer event superseded it.
    AlreadyClaimed,
    RecordGone,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairOutcome {
    Skipped(SkipReason),
    /// The preserved copy was rewritten and a fresh check queued.
    Reuploaded,
    /// A verified preserved copy was staged for an operator to restore.
    RestoreStaged { path: PathBuf },
    /// Neither the local file nor the preserved copy can be trusted.
    Unrecoverable,
    /// The repair itself errored; a terminal FAILURE was recorded.
    Failed(String),
}

pub struct RepairCoordinator {
    live: Arc<dyn LiveRepository>,
    records: Arc<dyn PreservationStore>,
    events: Arc<dyn FixityEventStore>,
    backup: Arc<dyn BackupStore>,
    preserver: Arc<Preserver>,
    requestor: Arc<FixityRequestor>,
    cooldown: Duration,
    sweep_page: i64,
}

impl RepairCoordinator {
    pub fn new(
        live: Arc<dyn LiveRepository>,
        records: Arc<dyn PreservationStore>,
        events: Arc<dyn FixityEventStore>,
        backup: Arc<dyn BackupStore>,
        preserver: Arc<Preserver>,
        requestor: Arc<FixityRequestor>,
        cooldown: Duration,
    ) -> Self {
        Self {
            live,
            records,
            events,
            backup,
            preserver,
            requestor,
            cooldown,
            sweep_page: SWEEP_PAGE,
        }
    }

    pub fn with_sweep_page(mut self, sweep_page: i64) -> Self {
        self.sweep_page = sweep_page.max(1);
        self
    }

    /// Attempt automated repair of one failed node.
    pub async fn repair(&self, failure: &FixityEvent) -> Result<RepairOutcome, StoreError> {
        if failure.status != FixityStatus::Failure || failure.origin != EventOrigin::Verification {
            return Ok(RepairOutcome::Skipped(SkipReason::NotRepairable));
        }
        let node = failure.node;

        if self.in_cooldown(&node).await? {
            tracing::warn!(node = %node, "Node repaired recently, leaving failure for operators");
            return Ok(RepairOutcome::Skipped(SkipReason::Cooldown));
        }

        let Some(claim) = self.events.begin_repair(&node, failure.id).await? else {
            tracing::debug!(node = %node, "Failure already claimed or superseded");
            return Ok(RepairOutcome::Skipped(SkipReason::AlreadyClaimed));
        };
        tracing::info!(node = %node, failure_id = failure.id, "Repair started");

        match self.attempt(&node, &claim).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                let message = e.to_string();
                tracing::error!(node = %node, error = %message, "Repair failed");
                self.record_failure(&claim, format!("repair failed: {message}"))
                    .await?;
                Ok(RepairOutcome::Failed(message))
            }
        }
    }

    async fn in_cooldown(&self, node: &NodeRef) -> Result<bool, StoreError> {
        if self.cooldown.is_zero() {
            return Ok(false);
        }
        // A window too large to represent covers all of history.
        let since = chrono::Duration::from_std(self.cooldown)
            .ok()
            .and_then(|window| Utc::now().checked_sub_signed(window));
        Ok(self.events.history(node).await?.iter().any(|e| {
            e.status == FixityStatus::Repairing && since.map_or(true, |s| e.created_at > s)
        }))
    }

    async fn attempt(
        &self,
        node: &NodeRef,
        claim: &FixityEvent,
    ) -> Result<RepairOutcome, PreservationError> {
        let Some(record) = self.records.find(node.resource_id).await? else {
            return Ok(RepairOutcome::Skipped(SkipReason::RecordGone));
        };
        let object = self
            .live
            .find(record.preserved_object_id)
            .await?
            .ok_or(PreservationError::LiveObjectNotFound(record.preserved_object_id))?;

        match node.child_property {
            ChildProperty::MetadataNode => {
                self.reupload(&record, &object, node, PreserveScope::MetadataOnly)
                    .await
            }
            ChildProperty::BinaryNodes => {
                let child_id = node.child_id.ok_or_else(|| {
                    CoreError::Validation(format!("Binary node reference without child id: {node}"))
                })?;
                let preserved = record
                    .binary_node_by_id(child_id)
                    .ok_or(CoreError::NotFound {
                        entity: "BinaryNode",
                        id: child_id,
                    })?
                    .clone();
                let binary = object
                    .binary(preserved.binary_use)
                    .ok_or(CoreError::NotFound {
                        entity: "LiveBinary",
                        id: preserved.source_binary_id,
                    })?
                    .clone();
                self.repair_binary(&record, &object, node, &preserved, &binary, claim)
                    .await
            }
        }
    }

    async fn reupload(
        &self,
        record: &PreservationRecord,
        object: &LiveObject,
        node: &NodeRef,
        scope: PreserveScope,
    ) -> Result<RepairOutcome, PreservationError> {
        let options = PreserveOptions {
            scope,
            force: true,
            cascade: false,
        };
        self.preserver.preserve_with(object, options).await?;
        self.requestor.queue_node_check(record.id, node).await?;
        tracing::info!(node = %node, "Preserved copy rewritten, re-verification queued");
        Ok(RepairOutcome::Reuploaded)
    }

    async fn repair_binary(
        &self,
        record: &PreservationRecord,
        object: &LiveObject,
        node: &NodeRef,
        preserved: &BinaryNode,
        binary: &LiveBinary,
        claim: &FixityEvent,
    ) -> Result<RepairOutcome, PreservationError> {
        let local = local_sha256(&binary.local_path).await?;
        let local_trusted = binary.checksum.is_some()
            && local
                .as_deref()
                .is_some_and(|sum| sum.eq_ignore_ascii_case(&preserved.source_checksum));

        if local_trusted {
            return self
                .reupload(record, object, node, PreserveScope::BinaryOnly(preserved.binary_use))
                .await;
        }

        let local_desc = local.as_deref().unwrap_or("missing");
        tracing::warn!(
            node = %node,
            path = %binary.local_path.display(),
            expected = %preserved.source_checksum,
            actual = local_desc,
            "Local file does not match preserved checksum, not re-uploading"
        );

        let remote = match self.backup.get(&preserved.node.location).await {
            Ok(bytes) => Some(bytes),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };
        let verified = remote.filter(|bytes| preserved.node.checksums.matches_sha256(&sha256_hex(bytes)));

        match verified {
            Some(bytes) => {
                let staged = restored_path(&binary.local_path);
                tokio::fs::write(&staged, &bytes)
                    .await
                    .map_err(|e| PreservationError::io(&staged, e))?;
                self.record_failure(
                    claim,
                    format!(
                        "local file restore required: {} has sha256 {local_desc}, expected {}; \
                         verified preserved copy staged at {}",
                        binary.local_path.display(),
                        preserved.source_checksum,
                        staged.display()
                    ),
                )
                .await?;
                tracing::info!(node = %node, staged = %staged.display(), "Preserved copy staged for local restore");
                Ok(RepairOutcome::RestoreStaged { path: staged })
            }
            None => {
                self.record_failure(
                    claim,
                    format!(
                        "unrecoverable: local file {} has sha256 {local_desc} and preserved copy {} \
                         fails verification, expected {}",
                        binary.local_path.display(),
                        preserved.node.location,
                        preserved.source_checksum
                    ),
                )
                .await?;
                tracing::error!(node = %node, "Both local and preserved copies are bad");
                Ok(RepairOutcome::Unrecoverable)
            }
        }
    }

    /// Record a terminal repair FAILURE that supersedes `claim`.
    async fn record_failure(&self, claim: &FixityEvent, detail: String) -> Result<FixityEvent, StoreError> {
        let observed_at = Utc::now().max(claim.created_at + chrono::Duration::microseconds(1));
        self.events
            .record(&NewFixityEvent {
                status: FixityStatus::Failure,
                node: claim.node,
                origin: EventOrigin::Repair,
                detail: Some(detail),
                observed_at,
            })
            .await
    }

    /// Repair every node whose current event is a verification FAILURE.
    ///
    /// Pages through the latest-event index by event id, so failures left in
    /// place (cooldown, claimed elsewhere) never hide newer ones.
    pub async fn sweep(&self) -> usize {
        let mut after_id = 0;
        let mut attempted = 0;
        loop {
            let page = match self.events.current_failures(after_id, self.sweep_page).await {
                Ok(page) => page,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to list current fixity failures");
                    break;
                }
            };
            let Some(last) = page.last() else {
                break;
            };
            after_id = last.id;
            for failure in &page {
                attempted += 1;
                self.handle(failure).await;
            }
            if (page.len() as i64) < self.sweep_page {
                break;
            }
        }
        if attempted > 0 {
            tracing::info!(attempted, "Repair sweep finished");
        }
        attempted
    }

    async fn handle(&self, failure: &FixityEvent) {
        match self.repair(failure).await {
            Ok(outcome) => tracing::debug!(node = %failure.node, ?outcome, "Repair outcome"),
            Err(e) => tracing::error!(node = %failure.node, error = %e, "Repair could not run"),
        }
    }

    /// React to failures on the event bus until cancelled.
    ///
    /// Runs a sweep at start and whenever the receiver lags, so failures
    /// dropped by the bus are still picked up from the latest-event index.
    pub async fn run(&self, mut receiver: broadcast::Receiver<PreservationEvent>, cancel: CancellationToken) {
        self.sweep().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Repair coordinator stopping");
                    break;
                }
                received = receiver.recv() => match received {
                    Ok(event) => {
                        if let Some(failure) = event.repair_candidate() {
                            self.handle(failure).await;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "Repair coordinator lagged, sweeping failures");
                        self.sweep().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("Event bus closed, repair coordinator shutting down");
                        break;
                    }
                },
            }
        }
    }
}

/// SHA-256 of a local file, or `None` when the file is gone.
async fn local_sha256(path: &Path) -> Result<Option<String>, PreservationError> {
    match Checksums::compute_file(path).await {
        Ok((checksums, _)) => Ok(Some(checksums.sha256)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(PreservationError::io(path, e)),
    }
}

/// `<path>.restored`, appended after any existing extension.
pub fn restored_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(RESTORED_SUFFIX);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restored_path_keeps_extension() {
        assert_eq!(
            restored_path(Path::new("/data/7/master.tif")),
            PathBuf::from("/data/7/master.tif.restored")
        );
    }
}
