//! Repository for `fixity_events` and the `fixity_latest` pointer table.
//!
//! Events are append-only. `fixity_latest` holds one row per node pointing
//! at the newest event, ordered by `(created_at, id)`, so an event that
//! arrives late never displaces a newer one.

use ark_core::fixity::{EventOrigin, FixityStatus, NewFixityEvent, NodeRef};
use ark_core::types::DbId;
use sqlx::{PgConnection, PgPool};

use crate::models::fixity_event::{child_key, FixityEventRow};

/// Column list shared across event queries.
const COLUMNS: &str =
    "id, status, resource_id, child_id, child_property, origin, detail, created_at";

/// Same columns, qualified for joins against `fixity_latest`.
const JOINED_COLUMNS: &str = "e.id, e.status, e.resource_id, e.child_id, e.child_property, \
    e.origin, e.detail, e.created_at";

pub struct FixityEventRepo;

impl FixityEventRepo {
    /// Append an event and advance the node's latest pointer if newer.
    pub async fn record(pool: &PgPool, event: &NewFixityEvent) -> Result<FixityEventRow, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "INSERT INTO fixity_events \
                (status, resource_id, child_id, child_property, origin, detail, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, FixityEventRow>(&query)
            .bind(event.status.as_str())
            .bind(event.node.resource_id)
            .bind(event.node.child_id)
            .bind(event.node.child_property.as_str())
            .bind(event.origin.as_str())
            .bind(&event.detail)
            .bind(event.observed_at)
            .fetch_one(&mut *tx)
            .await?;

        Self::advance_latest(&mut tx, &event.node, &row).await?;

        tx.commit().await?;
        Ok(row)
    }

    async fn advance_latest(
        conn: &mut PgConnection,
        node: &NodeRef,
        row: &FixityEventRow,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO fixity_latest \
                (resource_id, child_property, child_key, event_id, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (resource_id, child_property, child_key) DO UPDATE \
             SET event_id = EXCLUDED.event_id, \
                 status = EXCLUDED.status, \
                 created_at = EXCLUDED.created_at \
             WHERE (fixity_latest.created_at, fixity_latest.event_id) \
                 < (EXCLUDED.created_at, EXCLUDED.event_id)",
        )
        .bind(node.resource_id)
        .bind(node.child_property.as_str())
        .bind(child_key(node))
        .bind(row.id)
        .bind(&row.status)
        .bind(row.created_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// The node's current event.
    pub async fn current(pool: &PgPool, node: &NodeRef) -> Result<Option<FixityEventRow>, sqlx::Error> {
        let query = format!(
            "SELECT {JOINED_COLUMNS} FROM fixity_latest l \
             JOIN fixity_events e ON e.id = l.event_id \
             WHERE l.resource_id = $1 AND l.child_property = $2 AND l.child_key = $3"
        );
        sqlx::query_as::<_, FixityEventRow>(&query)
            .bind(node.resource_id)
            .bind(node.child_property.as_str())
            .bind(child_key(node))
            .fetch_optional(pool)
            .await
    }

    /// All events for a node, oldest first.
    pub async fn history(pool: &PgPool, node: &NodeRef) -> Result<Vec<FixityEventRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM fixity_events \
             WHERE resource_id = $1 AND child_property = $2 \
               AND child_id IS NOT DISTINCT FROM $3 \
             ORDER BY created_at, id"
        );
        sqlx::query_as::<_, FixityEventRow>(&query)
            .bind(node.resource_id)
            .bind(node.child_property.as_str())
            .bind(node.child_id)
            .fetch_all(pool)
            .await
    }

    /// Nodes whose current event is a verification FAILURE, keyset-paged
    /// by event id.
    pub async fn current_failures(
        pool: &PgPool,
        after_id: DbId,
        limit: i64,
    ) -> Result<Vec<FixityEventRow>, sqlx::Error> {
        let query = format!(
            "SELECT {JOINED_COLUMNS} FROM fixity_latest l \
             JOIN fixity_events e ON e.id = l.event_id \
             WHERE l.status = $1 AND e.origin = $2 AND l.event_id > $3 \
             ORDER BY l.event_id \
             LIMIT $4"
        );
        sqlx::query_as::<_, FixityEventRow>(&query)
            .bind(FixityStatus::Failure.as_str())
            .bind(EventOrigin::Verification.as_str())
            .bind(after_id)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Compare-and-set a REPAIRING event over `failure_event_id`.
    ///
    /// Locks the node's latest row so two coordinators racing on the same
    /// failure serialize; the loser sees a different current event and
    /// gets `None`. The REPAIRING timestamp is forced past the failure's so
    /// a skewed failure timestamp cannot outrank it.
    pub async fn begin_repair(
        pool: &PgPool,
        node: &NodeRef,
        failure_event_id: DbId,
    ) -> Result<Option<FixityEventRow>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let latest: Option<(DbId, String)> = sqlx::query_as(
            "SELECT event_id, status FROM fixity_latest \
             WHERE resource_id = $1 AND child_property = $2 AND child_key = $3 \
             FOR UPDATE",
        )
        .bind(node.resource_id)
        .bind(node.child_property.as_str())
        .bind(child_key(node))
        .fetch_optional(&mut *tx)
        .await?;

        let still_current = matches!(
            &latest,
            Some((event_id, status))
                if *event_id == failure_event_id && status == FixityStatus::Failure.as_str()
        );
        if !still_current {
            tx.rollback().await?;
            return Ok(None);
        }

        let query = format!(
            "INSERT INTO fixity_events \
                (status, resource_id, child_id, child_property, origin, detail, created_at) \
             SELECT $1, $2, $3, $4, 'repair', NULL, \
                    GREATEST(NOW(), f.created_at + INTERVAL '1 microsecond') \
             FROM fixity_events f WHERE f.id = $5 \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, FixityEventRow>(&query)
            .bind(FixityStatus::Repairing.as_str())
            .bind(node.resource_id)
            .bind(node.child_id)
            .bind(node.child_property.as_str())
            .bind(failure_event_id)
            .fetch_one(&mut *tx)
            .await?;

        Self::advance_latest(&mut tx, node, &row).await?;

        tx.commit().await?;
        Ok(Some(row))
    }

    /// Drop every event recorded against a resource.
    pub async fn delete_for_resource(pool: &PgPool, resource_id: DbId) -> Result<u64, sqlx::Error> {
        let mut tx = pool.begin().await?;
        sqlx::query("DELETE FROM fixity_latest WHERE resource_id = $1")
            .bind(resource_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM fixity_events WHERE resource_id = $1")
            .bind(resource_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }
}
