//! Audit Runner: batch-tracked verification sweeps.
//!
//! [`AuditRunner::run`] creates the audit row, then dispatches one check job
//! per candidate object as a single batch. The runner is also the batch's
//! [`BatchJobHandler`]: jobs record check failures against the audit, and
//! the batch callbacks move the audit through its statuses, notifying
//! operators on every transition.
//!
//! ```text
//! in_process --complete--> success | failure --success (after retries)--> complete
//!      \________________________\_____________--death--> dead
//! ```
//!
//! A batch whose jobs all pass on their first attempt ends at `success` or
//! `failure`; `complete` marks a batch that needed retries and has now
//! worked through all of them. `success` requires both zero check failures
//! and no job that is dead or awaiting retry.

use std::sync::Arc;

use ark_core::audit::{AuditScope, AuditStatus, CheckFailure, NewAudit, PreservationAudit};
use ark_core::batch::{BatchJob, BatchProgress};
use ark_core::error::{CoreError, StoreError};
use ark_core::notification::{AuditCounts, Notification};
use ark_core::ports::{AuditStore, BatchScheduler, LiveRepository, Notifier};
use ark_core::types::DbId;
use ark_events::{EventBus, PreservationEvent};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::batch::BatchJobHandler;
use crate::error::PreservationError;
use crate::inspect::ObjectInspector;

/// Batch description used for audit batches.
pub const AUDIT_BATCH: &str = "preservation_audit";

/// Payload of one audit check job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditJob {
    pub audit_id: DbId,
    pub resource_id: DbId,
    pub skip_metadata_checksum: bool,
}

pub struct AuditRunner {
    inspector: Arc<ObjectInspector>,
    audits: Arc<dyn AuditStore>,
    live: Arc<dyn LiveRepository>,
    scheduler: Arc<dyn BatchScheduler>,
    notifier: Arc<dyn Notifier>,
    bus: Arc<EventBus>,
}

impl AuditRunner {
    pub fn new(
        inspector: Arc<ObjectInspector>,
        audits: Arc<dyn AuditStore>,
        live: Arc<dyn LiveRepository>,
        scheduler: Arc<dyn BatchScheduler>,
        notifier: Arc<dyn Notifier>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            inspector,
            audits,
            live,
            scheduler,
            notifier,
            bus,
        }
    }

    /// Start an audit. Jobs run later on the batch runner; the returned audit
    /// is `in_process` unless there was nothing to check.
    pub async fn run(
        &self,
        scope: AuditScope,
        skip_metadata_checksum: bool,
    ) -> Result<PreservationAudit, PreservationError> {
        let ids = match scope {
            AuditScope::Full => self.live.preservable_ids().await?,
            AuditScope::IdsFrom(previous) => {
                self.audits.find(previous).await?.ok_or(StoreError::NotFound {
                    entity: "PreservationAudit",
                    id: previous,
                })?;
                self.audits.failing_ids(previous).await?
            }
        };

        let new_audit = NewAudit::for_scope(scope, skip_metadata_checksum, ids.len() as i64);
        let audit = self.audits.create(&new_audit).await?;
        tracing::info!(
            audit_id = audit.id,
            extent = audit.extent.as_str(),
            objects = ids.len(),
            "Preservation audit started"
        );

        if ids.is_empty() {
            self.transition(
                &audit,
                &[AuditStatus::InProcess],
                AuditStatus::Success,
                AuditCounts::default(),
            )
            .await?;
            return self.load(audit.id).await;
        }

        let payloads = ids
            .iter()
            .map(|&resource_id| {
                serde_json::to_value(AuditJob {
                    audit_id: audit.id,
                    resource_id,
                    skip_metadata_checksum,
                })
            })
            .collect::<Result<Vec<Value>, _>>()?;
        let batch_id = self
            .scheduler
            .create_batch(AUDIT_BATCH, &json!({ "audit_id": audit.id }), &payloads)
            .await?;
        self.audits.attach_batch(audit.id, batch_id).await?;
        tracing::info!(audit_id = audit.id, batch_id, jobs = payloads.len(), "Audit jobs dispatched");

        self.load(audit.id).await
    }

    /// The audit with its recorded check failures.
    pub async fn summary(
        &self,
        audit_id: DbId,
    ) -> Result<(PreservationAudit, Vec<CheckFailure>), PreservationError> {
        let audit = self.load(audit_id).await?;
        let failures = self.audits.failures(audit_id).await?;
        Ok((audit, failures))
    }

    async fn load(&self, audit_id: DbId) -> Result<PreservationAudit, PreservationError> {
        Ok(self.audits.find(audit_id).await?.ok_or(StoreError::NotFound {
            entity: "PreservationAudit",
            id: audit_id,
        })?)
    }

    async fn counts(
        &self,
        audit: &PreservationAudit,
        progress: &BatchProgress,
    ) -> Result<AuditCounts, PreservationError> {
        let failures = self.audits.failures(audit.id).await?.len() as i64;
        Ok(AuditCounts {
            objects: audit.object_count,
            failures,
            retries_remaining: progress.retrying,
            dead_jobs: progress.dead,
        })
    }

    /// Move the audit to `to` if it is in one of `from`, then notify.
    /// Returns `false` when another transition got there first.
    async fn transition(
        &self,
        audit: &PreservationAudit,
        from: &[AuditStatus],
        to: AuditStatus,
        counts: AuditCounts,
    ) -> Result<bool, PreservationError> {
        if !self.audits.transition(audit.id, from, to).await? {
            tracing::debug!(audit_id = audit.id, to = %to, "Audit transition not applicable");
            return Ok(false);
        }
        tracing::info!(
            audit_id = audit.id,
            status = %to,
            failures = counts.failures,
            dead_jobs = counts.dead_jobs,
            "Audit status changed"
        );

        let notification = Notification::for_audit(audit, to, counts);
        if let Err(e) = self.notifier.notify(&notification).await {
            tracing::error!(audit_id = audit.id, error = %e, "Failed to send audit notification");
        }
        self.bus.publish(PreservationEvent::AuditTransitioned {
            audit_id: audit.id,
            status: to,
            at: Utc::now(),
        });
        Ok(true)
    }

    async fn audit_for(&self, progress: &BatchProgress) -> Result<PreservationAudit, PreservationError> {
        let audit_id = progress.metadata["audit_id"].as_i64().ok_or_else(|| {
            CoreError::Validation(format!("Batch {} has no audit_id", progress.batch_id))
        })?;
        self.load(audit_id).await
    }
}

#[async_trait]
impl BatchJobHandler for AuditRunner {
    async fn perform(&self, job: &BatchJob) -> Result<(), PreservationError> {
        let check: AuditJob = serde_json::from_value(job.payload.clone())?;
        let reasons = self
            .inspector
            .inspect(check.resource_id, check.skip_metadata_checksum)
            .await;
        for reason in &reasons {
            self.audits
                .add_failure(check.audit_id, check.resource_id, reason)
                .await?;
        }
        if !reasons.is_empty() {
            tracing::info!(
                audit_id = check.audit_id,
                resource_id = check.resource_id,
                failures = reasons.len(),
                "Audit check found problems"
            );
        }
        Ok(())
    }

    async fn on_complete(&self, progress: &BatchProgress) -> Result<(), PreservationError> {
        let audit = self.audit_for(progress).await?;
        let counts = self.counts(&audit, progress).await?;
        // A job that errored or is awaiting retry left an object unchecked.
        let to = if counts.failures == 0 && progress.dead == 0 && progress.retrying == 0 {
            AuditStatus::Success
        } else {
            AuditStatus::Failure
        };
        self.transition(&audit, &[AuditStatus::InProcess], to, counts)
            .await?;
        Ok(())
    }

    async fn on_success(&self, progress: &BatchProgress) -> Result<(), PreservationError> {
        if progress.retried == 0 {
            return Ok(());
        }
        let audit = self.audit_for(progress).await?;
        let counts = self.counts(&audit, progress).await?;
        self.transition(
            &audit,
            &[AuditStatus::Success, AuditStatus::Failure],
            AuditStatus::Complete,
            counts,
        )
        .await?;
        Ok(())
    }

    async fn on_death(&self, progress: &BatchProgress) -> Result<(), PreservationError> {
        let audit = self.audit_for(progress).await?;
        let counts = self.counts(&audit, progress).await?;
        self.transition(
            &audit,
            &[AuditStatus::InProcess, AuditStatus::Success, AuditStatus::Failure],
            AuditStatus::Dead,
            counts,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchRunner;
    use crate::memory::{MemoryAuditStore, MemoryBatchScheduler, MemoryLiveRepository, MemoryPreservationStore};
    use ark_cloud::memory::MemoryBackupStore;
    use ark_core::batch::RetryPolicy;
    use ark_core::notification::NotificationKind;
    use ark_events::MemoryNotifier;
    use assert_matches::assert_matches;

    struct Setup {
        audits: Arc<MemoryAuditStore>,
        notifier: Arc<MemoryNotifier>,
        runner: Arc<AuditRunner>,
        batches: BatchRunner,
    }

    fn setup() -> Setup {
        let live = Arc::new(MemoryLiveRepository::new());
        let records = Arc::new(MemoryPreservationStore::new());
        let backup = Arc::new(MemoryBackupStore::new(false));
        let audits = Arc::new(MemoryAuditStore::new());
        let scheduler = Arc::new(MemoryBatchScheduler::new());
        let notifier = Arc::new(MemoryNotifier::new());
        let inspector = Arc::new(ObjectInspector::new(live.clone(), records, backup));
        let runner = Arc::new(AuditRunner::new(
            inspector,
            audits.clone(),
            live,
            scheduler.clone(),
            notifier.clone(),
            Arc::new(EventBus::default()),
        ));
        let batches = BatchRunner::new(scheduler, runner.clone(), RetryPolicy::default(), 4);
        Setup {
            audits,
            notifier,
            runner,
            batches,
        }
    }

    #[tokio::test]
    async fn empty_audit_succeeds_immediately() {
        let s = setup();
        let audit = s.runner.run(AuditScope::Full, false).await.unwrap();
        assert_eq!(audit.status, AuditStatus::Success);
        assert_eq!(audit.batch_id, None);
        let kinds: Vec<_> = s.notifier.sent().iter().map(|n| n.kind).collect();
        assert_eq!(kinds, vec![NotificationKind::AuditFinished]);
        assert_eq!(s.batches.drain().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rerun_of_unknown_audit_fails() {
        let s = setup();
        assert_matches!(
            s.runner.run(AuditScope::IdsFrom(77), false).await,
            Err(PreservationError::Store(StoreError::NotFound { id: 77, .. }))
        );
        assert!(s.audits.find(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_job_payload_is_an_error() {
        let s = setup();
        let job = BatchJob {
            id: 1,
            batch_id: 1,
            payload: json!({"resource": 1}),
            attempts: 1,
        };
        assert_matches!(
            s.runner.perform(&job).await,
            Err(PreservationError::Serialization(_))
        );
    }
}
