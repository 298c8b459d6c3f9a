//! Repository for `job_batches` and `batch_jobs`.

use std::time::Duration;

use ark_core::batch::BatchCallback;
use ark_core::types::DbId;
use sqlx::PgPool;

use crate::models::batch::{BatchJobRow, BatchProgressRow};
use crate::models::status::BatchJobStatus;

/// Column list shared across job queries.
const COLUMNS: &str =
    "id, batch_id, payload, status_id, attempts, executed, run_at, claimed_at, last_error";

/// Running jobs whose claim is older than this are assumed orphaned by a
/// crashed runner and become claimable again.
pub const STALE_CLAIM_SECS: f64 = 3600.0;

pub struct BatchRepo;

impl BatchRepo {
    /// Create a batch and all of its jobs in one transaction.
    pub async fn create_batch(
        pool: &PgPool,
        description: &str,
        metadata: &serde_json::Value,
        payloads: &[serde_json::Value],
    ) -> Result<DbId, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let batch_id: DbId = sqlx::query_scalar(
            "INSERT INTO job_batches (description, metadata, total) \
             VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(description)
        .bind(metadata)
        .bind(payloads.len() as i64)
        .fetch_one(&mut *tx)
        .await?;

        if !payloads.is_empty() {
            sqlx::query(
                "INSERT INTO batch_jobs (batch_id, payload) \
                 SELECT $1, p FROM UNNEST($2::jsonb[]) AS p",
            )
            .bind(batch_id)
            .bind(payloads)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(batch_id)
    }

    /// Atomically claim the next runnable job.
    ///
    /// Uses `SELECT FOR UPDATE SKIP LOCKED` so concurrent runners never
    /// claim the same job.
    pub async fn claim_next(pool: &PgPool) -> Result<Option<BatchJobRow>, sqlx::Error> {
        let query = format!(
            "UPDATE batch_jobs \
             SET status_id = $1, attempts = attempts + 1, claimed_at = NOW(), updated_at = NOW() \
             WHERE id = ( \
                 SELECT id FROM batch_jobs \
                 WHERE (status_id IN ($2, $3) AND run_at <= NOW()) \
                    OR (status_id = $1 AND claimed_at < NOW() - make_interval(secs => $4)) \
                 ORDER BY run_at, id \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, BatchJobRow>(&query)
            .bind(BatchJobStatus::Running.id())
            .bind(BatchJobStatus::Pending.id())
            .bind(BatchJobStatus::Retrying.id())
            .bind(STALE_CLAIM_SECS)
            .fetch_optional(pool)
            .await
    }

    pub async fn mark_succeeded(pool: &PgPool, job_id: DbId) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE batch_jobs \
             SET status_id = $2, executed = TRUE, last_error = NULL, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(job_id)
        .bind(BatchJobStatus::Succeeded.id())
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Schedule another attempt after `delay`.
    pub async fn mark_retrying(
        pool: &PgPool,
        job_id: DbId,
        error: &str,
        delay: Duration,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE batch_jobs \
             SET status_id = $2, executed = TRUE, last_error = $3, \
                 run_at = NOW() + make_interval(secs => $4), updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(job_id)
        .bind(BatchJobStatus::Retrying.id())
        .bind(error)
        .bind(delay.as_secs_f64())
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn mark_dead(pool: &PgPool, job_id: DbId, error: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE batch_jobs \
             SET status_id = $2, executed = TRUE, last_error = $3, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(job_id)
        .bind(BatchJobStatus::Dead.id())
        .bind(error)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Stamp the callback's fired-at column if it is still unset. Returns
    /// `true` for the single caller that stamped it.
    pub async fn fire(pool: &PgPool, batch_id: DbId, callback: BatchCallback) -> Result<bool, sqlx::Error> {
        let column = match callback {
            BatchCallback::Complete => "complete_fired_at",
            BatchCallback::Success => "success_fired_at",
            BatchCallback::Death => "death_fired_at",
        };
        let query = format!(
            "UPDATE job_batches SET {column} = NOW() WHERE id = $1 AND {column} IS NULL"
        );
        let result = sqlx::query(&query).bind(batch_id).execute(pool).await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn progress(pool: &PgPool, batch_id: DbId) -> Result<Option<BatchProgressRow>, sqlx::Error> {
        sqlx::query_as::<_, BatchProgressRow>(
            "SELECT b.id AS batch_id, b.metadata, b.total, \
                    COUNT(j.id) FILTER (WHERE j.executed) AS executed, \
                    COUNT(j.id) FILTER (WHERE j.status_id = $2) AS succeeded, \
                    COUNT(j.id) FILTER (WHERE j.status_id = $3) AS retrying, \
                    COUNT(j.id) FILTER (WHERE j.status_id = $4) AS dead, \
                    COUNT(j.id) FILTER (WHERE j.attempts > 1) AS retried \
             FROM job_batches b \
             LEFT JOIN batch_jobs j ON j.batch_id = b.id \
             WHERE b.id = $1 \
             GROUP BY b.id",
        )
        .bind(batch_id)
        .bind(BatchJobStatus::Succeeded.id())
        .bind(BatchJobStatus::Retrying.id())
        .bind(BatchJobStatus::Dead.id())
        .fetch_optional(pool)
        .await
    }
}
