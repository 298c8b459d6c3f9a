//! Batch runner: executes jobs from a [`BatchScheduler`] on a bounded pool
//! and fires the batch callbacks.
//!
//! After every job the runner inspects the batch progress and fires, each at
//! most once per batch:
//!
//! 1. `on_complete` when every job has executed at least once;
//! 2. `on_death` when a job has been dead-lettered, once every job has
//!    executed;
//! 3. `on_success` when every job has succeeded.
//!
//! The scheduler's `fire` guard decides which worker gets to run a callback,
//! so concurrent workers finishing the last jobs cannot both fire it.

use std::sync::Arc;
use std::time::Duration;

use ark_core::batch::{BatchCallback, BatchJob, BatchProgress, FailureDisposition, RetryPolicy};
use ark_core::ports::BatchScheduler;
use ark_core::types::DbId;
use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::backoff::pause;
use crate::error::PreservationError;

/// Work and callbacks for one kind of batch.
#[async_trait]
pub trait BatchJobHandler: Send + Sync {
    async fn perform(&self, job: &BatchJob) -> Result<(), PreservationError>;

    async fn on_complete(&self, _progress: &BatchProgress) -> Result<(), PreservationError> {
        Ok(())
    }

    async fn on_success(&self, _progress: &BatchProgress) -> Result<(), PreservationError> {
        Ok(())
    }

    async fn on_death(&self, _progress: &BatchProgress) -> Result<(), PreservationError> {
        Ok(())
    }
}

pub struct BatchRunner {
    scheduler: Arc<dyn BatchScheduler>,
    handler: Arc<dyn BatchJobHandler>,
    policy: RetryPolicy,
    concurrency: usize,
    poll_interval: Duration,
}

impl BatchRunner {
    pub fn new(
        scheduler: Arc<dyn BatchScheduler>,
        handler: Arc<dyn BatchJobHandler>,
        policy: RetryPolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            scheduler,
            handler,
            policy,
            concurrency: concurrency.max(1),
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Run jobs until none is runnable. Returns the number of jobs executed.
    pub async fn drain(&self) -> Result<usize, PreservationError> {
        self.drain_until(&CancellationToken::new()).await
    }

    /// Like [`drain`](Self::drain), but stops claiming new jobs once
    /// `cancel` fires. Jobs already running always finish.
    async fn drain_until(&self, cancel: &CancellationToken) -> Result<usize, PreservationError> {
        let mut set = JoinSet::new();
        let mut executed = 0usize;
        let mut claim_error = None;

        loop {
            while claim_error.is_none() && !cancel.is_cancelled() && set.len() < self.concurrency {
                match self.scheduler.claim_next().await {
                    Ok(Some(job)) => {
                        set.spawn(execute(
                            self.scheduler.clone(),
                            self.handler.clone(),
                            self.policy.clone(),
                            job,
                        ));
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to claim batch job");
                        claim_error = Some(e);
                    }
                }
            }

            let Some(joined) = set.join_next().await else {
                break;
            };
            executed += 1;
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "Batch job bookkeeping failed"),
                Err(e) => tracing::error!(error = %e, "Batch job task panicked"),
            }
        }

        match claim_error {
            Some(e) => Err(e.into()),
            None => Ok(executed),
        }
    }

    /// Execute jobs as they become runnable until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(concurrency = self.concurrency, "Batch runner started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let wait = match self.drain_until(&cancel).await {
                Ok(0) => self.poll_interval,
                Ok(executed) => {
                    tracing::debug!(executed, "Batch jobs drained");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Batch runner backing off");
                    self.poll_interval
                }
            };
            if !pause(wait, &cancel).await {
                break;
            }
        }
        tracing::info!("Batch runner stopped");
    }
}

async fn execute(
    scheduler: Arc<dyn BatchScheduler>,
    handler: Arc<dyn BatchJobHandler>,
    policy: RetryPolicy,
    job: BatchJob,
) -> Result<(), PreservationError> {
    let progress = match handler.perform(&job).await {
        Ok(()) => scheduler.mark_succeeded(&job).await?,
        Err(e) => {
            let message = e.to_string();
            let (disposition, progress) = scheduler.mark_failed(&job, &message, &policy).await?;
            match disposition {
                FailureDisposition::Retry(delay) => tracing::warn!(
                    job_id = job.id,
                    batch_id = job.batch_id,
                    attempts = job.attempts,
                    retry_in_secs = delay.as_secs(),
                    error = %message,
                    "Batch job failed, will retry"
                ),
                FailureDisposition::Dead => tracing::error!(
                    job_id = job.id,
                    batch_id = job.batch_id,
                    attempts = job.attempts,
                    error = %message,
                    "Batch job dead-lettered"
                ),
            }
            progress
        }
    };
    fire_callbacks(scheduler.as_ref(), handler.as_ref(), &progress).await
}

async fn fire_callbacks(
    scheduler: &dyn BatchScheduler,
    handler: &dyn BatchJobHandler,
    progress: &BatchProgress,
) -> Result<(), PreservationError> {
    let batch_id = progress.batch_id;
    if !progress.all_executed() {
        return Ok(());
    }

    if scheduler.fire(batch_id, BatchCallback::Complete).await? {
        log_callback(BatchCallback::Complete, batch_id, handler.on_complete(progress).await);
    }
    if progress.dead > 0 && scheduler.fire(batch_id, BatchCallback::Death).await? {
        log_callback(BatchCallback::Death, batch_id, handler.on_death(progress).await);
    }
    if progress.all_succeeded() && scheduler.fire(batch_id, BatchCallback::Success).await? {
        log_callback(BatchCallback::Success, batch_id, handler.on_success(progress).await);
    }
    Ok(())
}

fn log_callback(callback: BatchCallback, batch_id: DbId, result: Result<(), PreservationError>) {
    match result {
        Ok(()) => tracing::debug!(batch_id, callback = callback.as_str(), "Batch callback fired"),
        Err(e) => tracing::error!(
            batch_id,
            callback = callback.as_str(),
            error = %e,
            "Batch callback failed"
        ),
    }
}
