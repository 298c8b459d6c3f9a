//! Repository for the `live_objects` and `live_binaries` tables.

use ark_core::types::DbId;
use sqlx::PgPool;

use crate::models::live_object::{
    CreateLiveBinary, CreateLiveObject, LiveBinaryRow, LiveObjectRow,
};

/// Column list shared across object queries.
const COLUMNS: &str =
    "id, kind, parent_id, lock_token, metadata, committed, created_at, updated_at";

/// Column list shared across binary queries.
const BINARY_COLUMNS: &str = "id, object_id, binary_use, local_path, checksum, size";

pub struct LiveObjectRepo;

impl LiveObjectRepo {
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<LiveObjectRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM live_objects WHERE id = $1");
        sqlx::query_as::<_, LiveObjectRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Binaries for one object, ordered by use.
    pub async fn list_binaries(
        pool: &PgPool,
        object_id: DbId,
    ) -> Result<Vec<LiveBinaryRow>, sqlx::Error> {
        let query = format!(
            "SELECT {BINARY_COLUMNS} FROM live_binaries WHERE object_id = $1 ORDER BY binary_use"
        );
        sqlx::query_as::<_, LiveBinaryRow>(&query)
            .bind(object_id)
            .fetch_all(pool)
            .await
    }

    /// Binaries for many objects at once.
    pub async fn list_binaries_for(
        pool: &PgPool,
        object_ids: &[DbId],
    ) -> Result<Vec<LiveBinaryRow>, sqlx::Error> {
        let query = format!(
            "SELECT {BINARY_COLUMNS} FROM live_binaries \
             WHERE object_id = ANY($1) ORDER BY object_id, binary_use"
        );
        sqlx::query_as::<_, LiveBinaryRow>(&query)
            .bind(object_ids)
            .fetch_all(pool)
            .await
    }

    /// Ids of committed objects whose kind is in `kinds`, ascending.
    pub async fn list_ids_by_kind(pool: &PgPool, kinds: &[String]) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT id FROM live_objects WHERE committed AND kind = ANY($1) ORDER BY id",
        )
        .bind(kinds)
        .fetch_all(pool)
        .await
    }

    pub async fn list_committed_children(
        pool: &PgPool,
        parent_id: DbId,
    ) -> Result<Vec<LiveObjectRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM live_objects WHERE parent_id = $1 AND committed ORDER BY id"
        );
        sqlx::query_as::<_, LiveObjectRow>(&query)
            .bind(parent_id)
            .fetch_all(pool)
            .await
    }

    pub async fn create(pool: &PgPool, body: &CreateLiveObject) -> Result<LiveObjectRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO live_objects (kind, parent_id, lock_token, metadata) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, LiveObjectRow>(&query)
            .bind(&body.kind)
            .bind(body.parent_id)
            .bind(&body.lock_token)
            .bind(&body.metadata)
            .fetch_one(pool)
            .await
    }

    pub async fn add_binary(
        pool: &PgPool,
        object_id: DbId,
        body: &CreateLiveBinary,
    ) -> Result<LiveBinaryRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO live_binaries (object_id, binary_use, local_path, checksum, size) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {BINARY_COLUMNS}"
        );
        sqlx::query_as::<_, LiveBinaryRow>(&query)
            .bind(object_id)
            .bind(&body.binary_use)
            .bind(&body.local_path)
            .bind(&body.checksum)
            .bind(body.size)
            .fetch_one(pool)
            .await
    }

    /// Replace an object's metadata and lock token.
    pub async fn update_metadata(
        pool: &PgPool,
        id: DbId,
        lock_token: &str,
        metadata: &serde_json::Value,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE live_objects SET lock_token = $2, metadata = $3, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(lock_token)
        .bind(metadata)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
