use ark_core::fixity::{FixityEvent, NewFixityEvent, NodeRef};
use ark_core::ports::{FixityEventStore, StoreResult};
use ark_core::types::DbId;
use async_trait::async_trait;

use crate::repositories::FixityEventRepo;
use crate::{store_error, DbPool};

#[derive(Clone)]
pub struct PgFixityEventStore {
    pool: DbPool,
}

impl PgFixityEventStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FixityEventStore for PgFixityEventStore {
    async fn record(&self, event: &NewFixityEvent) -> StoreResult<FixityEvent> {
        FixityEventRepo::record(&self.pool, event)
            .await
            .map_err(store_error)?
            .into_domain()
    }

    async fn current(&self, node: &NodeRef) -> StoreResult<Option<FixityEvent>> {
        FixityEventRepo::current(&self.pool, node)
            .await
            .map_err(store_error)?
            .map(|row| row.into_domain())
            .transpose()
    }

    async fn history(&self, node: &NodeRef) -> StoreResult<Vec<FixityEvent>> {
        FixityEventRepo::history(&self.pool, node)
            .await
            .map_err(store_error)?
            .into_iter()
            .map(|row| row.into_domain())
            .collect()
    }

    async fn current_failures(&self, after_id: DbId, limit: i64) -> StoreResult<Vec<FixityEvent>> {
        FixityEventRepo::current_failures(&self.pool, after_id, limit)
            .await
            .map_err(store_error)?
            .into_iter()
            .map(|row| row.into_domain())
            .collect()
    }

    async fn begin_repair(
        &self,
        node: &NodeRef,
        failure_event_id: DbId,
    ) -> StoreResult<Option<FixityEvent>> {
        FixityEventRepo::begin_repair(&self.pool, node, failure_event_id)
            .await
            .map_err(store_error)?
            .map(|row| row.into_domain())
            .transpose()
    }

    async fn delete_for_resource(&self, resource_id: DbId) -> StoreResult<u64> {
        FixityEventRepo::delete_for_resource(&self.pool, resource_id)
            .await
            .map_err(store_error)
    }
}
