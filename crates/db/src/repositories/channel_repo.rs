//! Repository for the `channel_messages` table.
//!
//! A message is leased on pull and deleted on acknowledgement. A lease that
//! expires without an ack makes the message visible to the next pull.

use ark_core::types::DbId;
use sqlx::PgPool;

use crate::models::channel_message::ChannelMessage;

const COLUMNS: &str = "id, topic, payload, attempts, leased_until, created_at";

pub struct ChannelRepo;

impl ChannelRepo {
    pub async fn publish(pool: &PgPool, topic: &str, payload: &[u8]) -> Result<DbId, sqlx::Error> {
        sqlx::query_scalar(
            "INSERT INTO channel_messages (topic, payload) VALUES ($1, $2) RETURNING id",
        )
        .bind(topic)
        .bind(payload)
        .fetch_one(pool)
        .await
    }

    /// Lease up to `limit` visible messages for `lease_secs` seconds.
    pub async fn lease(
        pool: &PgPool,
        topic: &str,
        limit: i64,
        lease_secs: f64,
    ) -> Result<Vec<ChannelMessage>, sqlx::Error> {
        let query = format!(
            "UPDATE channel_messages \
             SET leased_until = NOW() + make_interval(secs => $3), attempts = attempts + 1 \
             WHERE id IN ( \
                 SELECT id FROM channel_messages \
                 WHERE topic = $1 AND (leased_until IS NULL OR leased_until <= NOW()) \
                 ORDER BY id \
                 LIMIT $2 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        let mut rows = sqlx::query_as::<_, ChannelMessage>(&query)
            .bind(topic)
            .bind(limit)
            .bind(lease_secs)
            .fetch_all(pool)
            .await?;
        rows.sort_by_key(|m| m.id);
        Ok(rows)
    }

    pub async fn ack(pool: &PgPool, topic: &str, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM channel_messages WHERE id = $1 AND topic = $2")
            .bind(id)
            .bind(topic)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Messages waiting on a topic, leased or not.
    pub async fn depth(pool: &PgPool, topic: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM channel_messages WHERE topic = $1")
            .bind(topic)
            .fetch_one(pool)
            .await
    }
}
