//! Repository for `preservation_audits` and `preservation_check_failures`.

use ark_core::audit::NewAudit;
use ark_core::types::DbId;
use sqlx::PgPool;

use crate::models::audit::{CheckFailureRow, PreservationAuditRow};

/// Column list shared across audit queries.
const COLUMNS: &str = "id, status, extent, ids_from, batch_id, skip_metadata_checksum, \
    object_count, created_at, updated_at";

const FAILURE_COLUMNS: &str = "id, audit_id, resource_id, reason, created_at";

pub struct AuditRepo;

impl AuditRepo {
    pub async fn create(pool: &PgPool, input: &NewAudit) -> Result<PreservationAuditRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO preservation_audits \
                (extent, ids_from, skip_metadata_checksum, object_count) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, PreservationAuditRow>(&query)
            .bind(input.extent.as_str())
            .bind(input.ids_from)
            .bind(input.skip_metadata_checksum)
            .bind(input.object_count)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<PreservationAuditRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM preservation_audits WHERE id = $1");
        sqlx::query_as::<_, PreservationAuditRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn attach_batch(pool: &PgPool, id: DbId, batch_id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE preservation_audits SET batch_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(batch_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a failing object. Retried jobs may report the same failure
    /// again; duplicates are ignored.
    pub async fn add_failure(
        pool: &PgPool,
        audit_id: DbId,
        resource_id: DbId,
        reason: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO preservation_check_failures (audit_id, resource_id, reason) \
             VALUES ($1, $2, $3) \
             ON CONFLICT ON CONSTRAINT uq_check_failures_audit_resource_reason DO NOTHING",
        )
        .bind(audit_id)
        .bind(resource_id)
        .bind(reason)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn list_failures(pool: &PgPool, audit_id: DbId) -> Result<Vec<CheckFailureRow>, sqlx::Error> {
        let query = format!(
            "SELECT {FAILURE_COLUMNS} FROM preservation_check_failures \
             WHERE audit_id = $1 ORDER BY resource_id, id"
        );
        sqlx::query_as::<_, CheckFailureRow>(&query)
            .bind(audit_id)
            .fetch_all(pool)
            .await
    }

    pub async fn failing_ids(pool: &PgPool, audit_id: DbId) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT DISTINCT resource_id FROM preservation_check_failures \
             WHERE audit_id = $1 ORDER BY resource_id",
        )
        .bind(audit_id)
        .fetch_all(pool)
        .await
    }

    /// Conditional status change. Returns `false` if the audit was not in
    /// one of the `from` statuses.
    pub async fn transition(
        pool: &PgPool,
        id: DbId,
        from: &[String],
        to: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE preservation_audits SET status = $3, updated_at = NOW() \
             WHERE id = $1 AND status = ANY($2)",
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
