use ark_core::batch::{
    BatchCallback, BatchJob, BatchProgress, FailureDisposition, RetryPolicy,
};
use ark_core::error::StoreError;
use ark_core::ports::{BatchScheduler, StoreResult};
use ark_core::types::DbId;
use async_trait::async_trait;
use serde_json::Value;

use crate::repositories::BatchRepo;
use crate::{store_error, DbPool};

/// Durable batch scheduler over `job_batches` / `batch_jobs`.
#[derive(Clone)]
pub struct PgBatchScheduler {
    pool: DbPool,
}

impl PgBatchScheduler {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BatchScheduler for PgBatchScheduler {
    async fn create_batch(&self, description: &str, metadata: &Value, payloads: &[Value]) -> StoreResult<DbId> {
        BatchRepo::create_batch(&self.pool, description, metadata, payloads)
            .await
            .map_err(store_error)
    }

    async fn claim_next(&self) -> StoreResult<Option<BatchJob>> {
        Ok(BatchRepo::claim_next(&self.pool)
            .await
            .map_err(store_error)?
            .map(BatchJob::from))
    }

    async fn mark_succeeded(&self, job: &BatchJob) -> StoreResult<BatchProgress> {
        BatchRepo::mark_succeeded(&self.pool, job.id)
            .await
            .map_err(store_error)?;
        self.progress(job.batch_id).await
    }

    async fn mark_failed(
        &self,
        job: &BatchJob,
        error: &str,
        policy: &RetryPolicy,
    ) -> StoreResult<(FailureDisposition, BatchProgress)> {
        let disposition = policy.disposition(job.attempts);
        let updated = match disposition {
            FailureDisposition::Retry(delay) => {
                BatchRepo::mark_retrying(&self.pool, job.id, error, delay).await
            }
            FailureDisposition::Dead => BatchRepo::mark_dead(&self.pool, job.id, error).await,
        };
        updated.map_err(store_error)?;
        Ok((disposition, self.progress(job.batch_id).await?))
    }

    async fn fire(&self, batch_id: DbId, callback: BatchCallback) -> StoreResult<bool> {
        BatchRepo::fire(&self.pool, batch_id, callback)
            .await
            .map_err(store_error)
    }

    async fn progress(&self, batch_id: DbId) -> StoreResult<BatchProgress> {
        BatchRepo::progress(&self.pool, batch_id)
            .await
            .map_err(store_error)?
            .map(BatchProgress::from)
            .ok_or(StoreError::NotFound {
                entity: "job_batch",
                id: batch_id,
            })
    }
}
