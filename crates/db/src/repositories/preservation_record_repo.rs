//! Repository for the `preservation_records` and `binary_nodes` tables.

use ark_core::preservation::{NewBinaryNode, PreservedNode};
use ark_core::types::DbId;
use sqlx::PgPool;

use crate::models::preservation_record::{BinaryNodeRow, PreservationRecordRow};

/// Column list for `preservation_records` queries.
const COLUMNS: &str = "id, preserved_object_id, metadata_location, metadata_sha1, \
    metadata_sha256, metadata_sha512, metadata_size, metadata_version, created_at, updated_at";

/// Column list for `binary_nodes` queries.
const NODE_COLUMNS: &str = "id, record_id, binary_use, source_binary_id, source_checksum, \
    location, sha1, sha256, sha512, size";

pub struct PreservationRecordRepo;

impl PreservationRecordRepo {
    pub async fn find_by_id(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<PreservationRecordRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM preservation_records WHERE id = $1");
        sqlx::query_as::<_, PreservationRecordRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_object(
        pool: &PgPool,
        object_id: DbId,
    ) -> Result<Option<PreservationRecordRow>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM preservation_records WHERE preserved_object_id = $1");
        sqlx::query_as::<_, PreservationRecordRow>(&query)
            .bind(object_id)
            .fetch_optional(pool)
            .await
    }

    /// Insert an empty record. A concurrent insert for the same object
    /// fails on `uq_preservation_records_object`.
    pub async fn create(pool: &PgPool, object_id: DbId) -> Result<PreservationRecordRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO preservation_records (preserved_object_id) VALUES ($1) RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, PreservationRecordRow>(&query)
            .bind(object_id)
            .fetch_one(pool)
            .await
    }

    pub async fn set_metadata_node(
        pool: &PgPool,
        id: DbId,
        node: &PreservedNode,
        version: &str,
    ) -> Result<PreservationRecordRow, sqlx::Error> {
        let query = format!(
            "UPDATE preservation_records \
             SET metadata_location = $2, metadata_sha1 = $3, metadata_sha256 = $4, \
                 metadata_sha512 = $5, metadata_size = $6, metadata_version = $7, \
                 updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, PreservationRecordRow>(&query)
            .bind(id)
            .bind(&node.location)
            .bind(&node.checksums.sha1)
            .bind(&node.checksums.sha256)
            .bind(&node.checksums.sha512)
            .bind(node.size)
            .bind(version)
            .fetch_one(pool)
            .await
    }

    /// Insert or replace the node for a binary use. The row (and its id)
    /// survives replacement so fixity history stays attached.
    pub async fn upsert_binary_node(
        pool: &PgPool,
        record_id: DbId,
        node: &NewBinaryNode,
    ) -> Result<BinaryNodeRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO binary_nodes \
                (record_id, binary_use, source_binary_id, source_checksum, \
                 location, sha1, sha256, sha512, size) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT ON CONSTRAINT uq_binary_nodes_record_use DO UPDATE \
             SET source_binary_id = EXCLUDED.source_binary_id, \
                 source_checksum = EXCLUDED.source_checksum, \
                 location = EXCLUDED.location, \
                 sha1 = EXCLUDED.sha1, sha256 = EXCLUDED.sha256, sha512 = EXCLUDED.sha512, \
                 size = EXCLUDED.size, updated_at = NOW() \
             RETURNING {NODE_COLUMNS}"
        );
        let row = sqlx::query_as::<_, BinaryNodeRow>(&query)
            .bind(record_id)
            .bind(node.binary_use.as_str())
            .bind(node.source_binary_id)
            .bind(&node.source_checksum)
            .bind(&node.node.location)
            .bind(&node.node.checksums.sha1)
            .bind(&node.node.checksums.sha256)
            .bind(&node.node.checksums.sha512)
            .bind(node.node.size)
            .fetch_one(pool)
            .await?;

        sqlx::query("UPDATE preservation_records SET updated_at = NOW() WHERE id = $1")
            .bind(record_id)
            .execute(pool)
            .await?;

        Ok(row)
    }

    pub async fn list_binary_nodes(
        pool: &PgPool,
        record_id: DbId,
    ) -> Result<Vec<BinaryNodeRow>, sqlx::Error> {
        let query = format!(
            "SELECT {NODE_COLUMNS} FROM binary_nodes WHERE record_id = $1 ORDER BY binary_use"
        );
        sqlx::query_as::<_, BinaryNodeRow>(&query)
            .bind(record_id)
            .fetch_all(pool)
            .await
    }

    pub async fn list_binary_nodes_for(
        pool: &PgPool,
        record_ids: &[DbId],
    ) -> Result<Vec<BinaryNodeRow>, sqlx::Error> {
        let query = format!(
            "SELECT {NODE_COLUMNS} FROM binary_nodes \
             WHERE record_id = ANY($1) ORDER BY record_id, binary_use"
        );
        sqlx::query_as::<_, BinaryNodeRow>(&query)
            .bind(record_ids)
            .fetch_all(pool)
            .await
    }

    /// Delete a record; its binary nodes cascade.
    pub async fn delete(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM preservation_records WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count(pool: &PgPool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM preservation_records")
            .fetch_one(pool)
            .await
    }

    /// Pick up to `limit` records uniformly at random.
    pub async fn sample(pool: &PgPool, limit: i64) -> Result<Vec<PreservationRecordRow>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM preservation_records ORDER BY random() LIMIT $1");
        sqlx::query_as::<_, PreservationRecordRow>(&query)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    pub async fn list_ids(pool: &PgPool) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar("SELECT id FROM preservation_records ORDER BY id")
            .fetch_all(pool)
            .await
    }
}
