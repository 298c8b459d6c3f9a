//! Models for `preservation_audits` and `preservation_check_failures`.

use ark_core::audit::{CheckFailure, PreservationAudit};
use ark_core::error::StoreError;
use ark_core::types::{DbId, Timestamp};
use sqlx::FromRow;

use super::parse_column;

/// A row from the `preservation_audits` table.
#[derive(Debug, Clone, FromRow)]
pub struct PreservationAuditRow {
    pub id: DbId,
    pub status: String,
    pub extent: String,
    pub ids_from: Option<DbId>,
    pub batch_id: Option<DbId>,
    pub skip_metadata_checksum: bool,
    pub object_count: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl PreservationAuditRow {
    pub fn into_domain(self) -> Result<PreservationAudit, StoreError> {
        Ok(PreservationAudit {
            id: self.id,
            status: parse_column("status", &self.status)?,
            extent: parse_column("extent", &self.extent)?,
            ids_from: self.ids_from,
            batch_id: self.batch_id,
            skip_metadata_checksum: self.skip_metadata_checksum,
            object_count: self.object_count,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// A row from the `preservation_check_failures` table.
#[derive(Debug, Clone, FromRow)]
pub struct CheckFailureRow {
    pub id: DbId,
    pub audit_id: DbId,
    pub resource_id: DbId,
    pub reason: String,
    pub created_at: Timestamp,
}

impl From<CheckFailureRow> for CheckFailure {
    fn from(row: CheckFailureRow) -> Self {
        Self {
            id: row.id,
            audit_id: row.audit_id,
            resource_id: row.resource_id,
            reason: row.reason,
            created_at: row.created_at,
        }
    }
}
