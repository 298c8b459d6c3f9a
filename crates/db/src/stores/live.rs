use std::collections::HashMap;

use ark_core::live::LiveObject;
use ark_core::object::ALL_OBJECT_KINDS;
use ark_core::ports::{LiveRepository, StoreResult};
use ark_core::types::DbId;
use async_trait::async_trait;

use crate::models::live_object::LiveBinaryRow;
use crate::repositories::LiveObjectRepo;
use crate::{store_error, DbPool};

/// Reads the live store tables owned by the editing pipeline.
#[derive(Clone)]
pub struct PgLiveRepository {
    pool: DbPool,
}

impl PgLiveRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LiveRepository for PgLiveRepository {
    async fn find(&self, id: DbId) -> StoreResult<Option<LiveObject>> {
        let Some(row) = LiveObjectRepo::find_by_id(&self.pool, id)
            .await
            .map_err(store_error)?
        else {
            return Ok(None);
        };
        let binaries = LiveObjectRepo::list_binaries(&self.pool, id)
            .await
            .map_err(store_error)?;
        row.into_domain(binaries).map(Some)
    }

    async fn preservable_ids(&self) -> StoreResult<Vec<DbId>> {
        let kinds: Vec<String> = ALL_OBJECT_KINDS
            .iter()
            .map(|k| k.as_str().to_string())
            .collect();
        LiveObjectRepo::list_ids_by_kind(&self.pool, &kinds)
            .await
            .map_err(store_error)
    }

    async fn committed_children(&self, id: DbId) -> StoreResult<Vec<LiveObject>> {
        let rows = LiveObjectRepo::list_committed_children(&self.pool, id)
            .await
            .map_err(store_error)?;
        let ids: Vec<DbId> = rows.iter().map(|r| r.id).collect();
        let mut by_object: HashMap<DbId, Vec<LiveBinaryRow>> = HashMap::new();
        for binary in LiveObjectRepo::list_binaries_for(&self.pool, &ids)
            .await
            .map_err(store_error)?
        {
            by_object.entry(binary.object_id).or_default().push(binary);
        }
        rows.into_iter()
            .map(|row| {
                let binaries = by_object.remove(&row.id).unwrap_or_default();
                row.into_domain(binaries)
            })
            .collect()
    }
}
