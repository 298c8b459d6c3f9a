use ark_core::audit::{AuditStatus, CheckFailure, NewAudit, PreservationAudit};
use ark_core::error::StoreError;
use ark_core::ports::{AuditStore, StoreResult};
use ark_core::types::DbId;
use async_trait::async_trait;

use crate::repositories::AuditRepo;
use crate::{store_error, DbPool};

#[derive(Clone)]
pub struct PgAuditStore {
    pool: DbPool,
}

impl PgAuditStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn create(&self, audit: &NewAudit) -> StoreResult<PreservationAudit> {
        AuditRepo::create(&self.pool, audit)
            .await
            .map_err(store_error)?
            .into_domain()
    }

    async fn find(&self, id: DbId) -> StoreResult<Option<PreservationAudit>> {
        AuditRepo::find_by_id(&self.pool, id)
            .await
            .map_err(store_error)?
            .map(|row| row.into_domain())
            .transpose()
    }

    async fn attach_batch(&self, id: DbId, batch_id: DbId) -> StoreResult<()> {
        if AuditRepo::attach_batch(&self.pool, id, batch_id)
            .await
            .map_err(store_error)?
        {
            Ok(())
        } else {
            Err(StoreError::NotFound {
                entity: "preservation_audit",
                id,
            })
        }
    }

    async fn add_failure(&self, audit_id: DbId, resource_id: DbId, reason: &str) -> StoreResult<()> {
        AuditRepo::add_failure(&self.pool, audit_id, resource_id, reason)
            .await
            .map_err(store_error)
    }

    async fn failures(&self, audit_id: DbId) -> StoreResult<Vec<CheckFailure>> {
        let rows = AuditRepo::list_failures(&self.pool, audit_id)
            .await
            .map_err(store_error)?;
        Ok(rows.into_iter().map(CheckFailure::from).collect())
    }

    async fn failing_ids(&self, audit_id: DbId) -> StoreResult<Vec<DbId>> {
        AuditRepo::failing_ids(&self.pool, audit_id)
            .await
            .map_err(store_error)
    }

    async fn transition(&self, id: DbId, from: &[AuditStatus], to: AuditStatus) -> StoreResult<bool> {
        let from: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();
        AuditRepo::transition(&self.pool, id, &from, to.as_str())
            .await
            .map_err(store_error)
    }
}
