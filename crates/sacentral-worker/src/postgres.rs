//! PostgreSQL-backed broker
//!
//! Messages live in `queue_messages`. Claims use `FOR UPDATE SKIP LOCKED` so
//! concurrent consumers never receive the same row, and every publish fires a
//! NOTIFY on [`QUEUE_NOTIFY_CHANNEL`] so idle consumers wake without waiting
//! for the next poll.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

use sacentral_core::QueueName;

use crate::broker::{Broker, Delivery};

/// Channel name for PostgreSQL LISTEN/NOTIFY when a message is published.
pub const QUEUE_NOTIFY_CHANNEL: &str = "sacentral_queue";

pub struct PgBroker {
    pool: PgPool,
    notify: Arc<Notify>,
}

impl PgBroker {
    /// Create the broker and spawn its LISTEN task. Must be called inside a tokio runtime.
    pub fn new(pool: PgPool) -> Self {
        let notify = Arc::new(Notify::new());
        let listener_pool = pool.clone();
        let listener_notify = notify.clone();
        tokio::spawn(async move {
            loop {
                match sqlx::postgres::PgListener::connect_with(&listener_pool).await {
                    Ok(mut listener) => {
                        if let Err(e) = listener.listen(QUEUE_NOTIFY_CHANNEL).await {
                            tracing::warn!(error = %e, "LISTEN failed, will retry");
                            tokio::time::sleep(Duration::from_secs(5)).await;
                            continue;
                        }
                        while listener.recv().await.is_ok() {
                            listener_notify.notify_one();
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "PgListener connect failed, will retry");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });
        Self { pool, notify }
    }
}

#[async_trait]
impl Broker for PgBroker {
    async fn publish(&self, queue: QueueName, payload: serde_json::Value) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO queue_messages (id, queue, payload, status, attempts, created_at)
            VALUES ($1, $2, $3, 'ready', 0, NOW())
            "#,
        )
        .bind(id)
        .bind(queue.as_str())
        .bind(&payload)
        .execute(&self.pool)
        .await
        .context("Failed to enqueue message")?;

        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(QUEUE_NOTIFY_CHANNEL)
            .bind(queue.as_str())
            .execute(&self.pool)
            .await
            .context("Failed to notify queue listeners")?;

        Ok(id)
    }

    async fn claim(&self, queues: &[QueueName]) -> Result<Option<Delivery>> {
        let names: Vec<&str> = queues.iter().map(|q| q.as_str()).collect();
        let row = sqlx::query(
            r#"
            UPDATE queue_messages
            SET status = 'claimed', claimed_at = NOW(), attempts = attempts + 1
            WHERE id = (
                SELECT id FROM queue_messages
                WHERE status = 'ready' AND queue = ANY($1)
                ORDER BY created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, queue, payload, attempts
            "#,
        )
        .bind(&names)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to claim message")?;

        let Some(row) = row else {
            return Ok(None);
        };
        let queue: String = row.try_get("queue")?;
        let attempts: i32 = row.try_get("attempts")?;
        Ok(Some(Delivery {
            id: row.try_get("id")?,
            queue: queue.parse()?,
            payload: row.try_get("payload")?,
            attempts: attempts.max(0) as u32,
        }))
    }

    async fn ack(&self, delivery_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM queue_messages WHERE id = $1 AND status = 'claimed'")
            .bind(delivery_id)
            .execute(&self.pool)
            .await
            .context("Failed to ack message")?;
        Ok(())
    }

    async fn nack(&self, delivery_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE queue_messages
            SET status = 'ready', claimed_at = NULL
            WHERE id = $1 AND status = 'claimed'
            "#,
        )
        .bind(delivery_id)
        .execute(&self.pool)
        .await
        .context("Failed to nack message")?;
        Ok(())
    }

    async fn requeue_stale(&self, older_than: Duration, max_attempts: u32) -> Result<u64> {
        let dropped = sqlx::query(
            r#"
            DELETE FROM queue_messages
            WHERE status = 'claimed'
              AND claimed_at < NOW() - make_interval(secs => $1)
              AND attempts >= $2
            "#,
        )
        .bind(older_than.as_secs_f64())
        .bind(max_attempts as i32)
        .execute(&self.pool)
        .await
        .context("Failed to drop exhausted messages")?;
        if dropped.rows_affected() > 0 {
            tracing::warn!(
                count = dropped.rows_affected(),
                max_attempts,
                "Dropped stale messages after max attempts"
            );
        }

        let result = sqlx::query(
            r#"
            UPDATE queue_messages
            SET status = 'ready', claimed_at = NULL
            WHERE status = 'claimed'
              AND claimed_at < NOW() - make_interval(secs => $1)
            "#,
        )
        .bind(older_than.as_secs_f64())
        .execute(&self.pool)
        .await
        .context("Failed to requeue stale messages")?;

        let count = result.rows_affected();
        if count > 0 {
            tracing::warn!(count, "Requeued stale claimed messages");
        }
        Ok(count)
    }

    async fn notified(&self) {
        self.notify.notified().await
    }
}
