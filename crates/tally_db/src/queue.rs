//! Durable message queue table.
//!
//! Receiving a message hides it for a visibility timeout instead of deleting
//! it. A consumer that dies before acking lets the message reappear, which is
//! what gives at-least-once delivery.

use crate::error::Result;
use crate::TallyDb;
use sqlx::Row;
use tracing::debug;

/// Claim attempts before giving up on a contended receive.
const MAX_CLAIM_ATTEMPTS: usize = 5;

/// A received message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRow {
    pub id: i64,
    pub payload: String,
    /// Deliveries so far, including this one.
    pub receive_count: i64,
}

impl TallyDb {
    pub async fn queue_push(&self, payload: &str) -> Result<i64> {
        let now = Self::now_millis();
        let result = sqlx::query(
            "INSERT INTO queue_messages (payload, visible_at, receive_count, enqueued_at) VALUES (?, ?, 0, ?)",
        )
        .bind(payload)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Claim the oldest visible message and hide it for `visibility_timeout_ms`.
    pub async fn queue_receive(&self, visibility_timeout_ms: i64) -> Result<Option<QueueRow>> {
        for _ in 0..MAX_CLAIM_ATTEMPTS {
            let now = Self::now_millis();
            let row = sqlx::query(
                r#"
                SELECT id, payload, visible_at, receive_count FROM queue_messages
                WHERE visible_at <= ?
                ORDER BY visible_at ASC, id ASC
                LIMIT 1
                "#,
            )
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

            let Some(row) = row else {
                return Ok(None);
            };
            let id: i64 = row.try_get("id")?;
            let seen_visible_at: i64 = row.try_get("visible_at")?;

            // Claim only if nobody else moved it since we looked.
            let claimed = sqlx::query(
                r#"
                UPDATE queue_messages SET visible_at = ?, receive_count = receive_count + 1
                WHERE id = ? AND visible_at = ?
                "#,
            )
            .bind(now + visibility_timeout_ms.max(0))
            .bind(id)
            .bind(seen_visible_at)
            .execute(&self.pool)
            .await?;

            if claimed.rows_affected() == 1 {
                return Ok(Some(QueueRow {
                    id,
                    payload: row.try_get("payload")?,
                    receive_count: row.try_get::<i64, _>("receive_count")? + 1,
                }));
            }
            debug!(message_id = id, "Lost queue claim race, retrying");
        }
        Ok(None)
    }

    /// Delete a received message. Acking an unknown id is a no-op.
    pub async fn queue_ack(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM queue_messages WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Messages not yet acked, visible or not.
    pub async fn queue_depth(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS depth FROM queue_messages")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("depth")?)
    }
}
