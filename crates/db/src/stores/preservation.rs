use std::collections::HashMap;

use ark_core::error::StoreError;
use ark_core::ports::{PreservationStore, StoreResult};
use ark_core::preservation::{BinaryNode, NewBinaryNode, PreservationRecord, PreservedNode};
use ark_core::types::DbId;
use ark_core::version::LockToken;
use async_trait::async_trait;

use crate::models::preservation_record::{BinaryNodeRow, PreservationRecordRow};
use crate::repositories::PreservationRecordRepo;
use crate::{store_error, DbPool};

#[derive(Clone)]
pub struct PgPreservationStore {
    pool: DbPool,
}

impl PgPreservationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn hydrate(&self, row: PreservationRecordRow) -> StoreResult<PreservationRecord> {
        let nodes = PreservationRecordRepo::list_binary_nodes(&self.pool, row.id)
            .await
            .map_err(store_error)?;
        row.into_domain(nodes)
    }

    async fn hydrate_all(&self, rows: Vec<PreservationRecordRow>) -> StoreResult<Vec<PreservationRecord>> {
        let ids: Vec<DbId> = rows.iter().map(|r| r.id).collect();
        let mut by_record: HashMap<DbId, Vec<BinaryNodeRow>> = HashMap::new();
        for node in PreservationRecordRepo::list_binary_nodes_for(&self.pool, &ids)
            .await
            .map_err(store_error)?
        {
            by_record.entry(node.record_id).or_default().push(node);
        }
        rows.into_iter()
            .map(|row| {
                let nodes = by_record.remove(&row.id).unwrap_or_default();
                row.into_domain(nodes)
            })
            .collect()
    }
}

#[async_trait]
impl PreservationStore for PgPreservationStore {
    async fn find(&self, id: DbId) -> StoreResult<Option<PreservationRecord>> {
        match PreservationRecordRepo::find_by_id(&self.pool, id)
            .await
            .map_err(store_error)?
        {
            Some(row) => self.hydrate(row).await.map(Some),
            None => Ok(None),
        }
    }

    async fn find_by_object(&self, object_id: DbId) -> StoreResult<Option<PreservationRecord>> {
        match PreservationRecordRepo::find_by_object(&self.pool, object_id)
            .await
            .map_err(store_error)?
        {
            Some(row) => self.hydrate(row).await.map(Some),
            None => Ok(None),
        }
    }

    async fn create(&self, object_id: DbId) -> StoreResult<PreservationRecord> {
        let row = PreservationRecordRepo::create(&self.pool, object_id)
            .await
            .map_err(store_error)?;
        row.into_domain(Vec::new())
    }

    async fn set_metadata_node(
        &self,
        id: DbId,
        node: &PreservedNode,
        version: &LockToken,
    ) -> StoreResult<PreservationRecord> {
        let row = PreservationRecordRepo::set_metadata_node(&self.pool, id, node, version.as_str())
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => StoreError::NotFound {
                    entity: "preservation_record",
                    id,
                },
                other => store_error(other),
            })?;
        self.hydrate(row).await
    }

    async fn upsert_binary_node(&self, id: DbId, node: &NewBinaryNode) -> StoreResult<BinaryNode> {
        PreservationRecordRepo::upsert_binary_node(&self.pool, id, node)
            .await
            .map_err(store_error)?
            .into_domain()
    }

    async fn delete(&self, id: DbId) -> StoreResult<()> {
        PreservationRecordRepo::delete(&self.pool, id)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn count(&self) -> StoreResult<u64> {
        let n = PreservationRecordRepo::count(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(n.max(0) as u64)
    }

    async fn sample(&self, n: u64) -> StoreResult<Vec<PreservationRecord>> {
        let limit = i64::try_from(n).unwrap_or(i64::MAX);
        let rows = PreservationRecordRepo::sample(&self.pool, limit)
            .await
            .map_err(store_error)?;
        self.hydrate_all(rows).await
    }

    async fn list_ids(&self) -> StoreResult<Vec<DbId>> {
        PreservationRecordRepo::list_ids(&self.pool)
            .await
            .map_err(store_error)
    }
}
