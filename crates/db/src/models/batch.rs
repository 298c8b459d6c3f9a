//! Models for `job_batches` and `batch_jobs`.

use ark_core::batch::{BatchJob, BatchProgress};
use ark_core::types::{DbId, Timestamp};
use sqlx::FromRow;

use super::status::StatusId;

/// A row from the `batch_jobs` table.
#[derive(Debug, Clone, FromRow)]
pub struct BatchJobRow {
    pub id: DbId,
    pub batch_id: DbId,
    pub payload: serde_json::Value,
    pub status_id: StatusId,
    pub attempts: i32,
    pub executed: bool,
    pub run_at: Timestamp,
    pub claimed_at: Option<Timestamp>,
    pub last_error: Option<String>,
}

impl From<BatchJobRow> for BatchJob {
    fn from(row: BatchJobRow) -> Self {
        Self {
            id: row.id,
            batch_id: row.batch_id,
            payload: row.payload,
            attempts: row.attempts,
        }
    }
}

/// Aggregate counters for one batch.
#[derive(Debug, Clone, FromRow)]
pub struct BatchProgressRow {
    pub batch_id: DbId,
    pub metadata: serde_json::Value,
    pub total: i64,
    pub executed: i64,
    pub succeeded: i64,
    pub retrying: i64,
    pub dead: i64,
    pub retried: i64,
}

impl From<BatchProgressRow> for BatchProgress {
    fn from(row: BatchProgressRow) -> Self {
        Self {
            batch_id: row.batch_id,
            metadata: row.metadata,
            total: row.total,
            executed: row.executed,
            succeeded: row.succeeded,
            retrying: row.retrying,
            dead: row.dead,
            retried: row.retried,
        }
    }
}
