//! Broker seam

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

use sacentral_core::{AppError, EngineRequest, QueueName};

/// A message claimed from a queue. It stays invisible to other consumers
/// until it is acked, nacked, or the visibility timeout expires.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: Uuid,
    pub queue: QueueName,
    pub payload: serde_json::Value,
    /// Number of times this message has been claimed, including this one.
    pub attempts: u32,
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Enqueue a payload. Fire-and-forget: nothing waits for a reply.
    async fn publish(&self, queue: QueueName, payload: serde_json::Value) -> Result<Uuid>;

    /// Claim the oldest ready message from any of `queues`.
    async fn claim(&self, queues: &[QueueName]) -> Result<Option<Delivery>>;

    /// Remove a claimed message for good.
    async fn ack(&self, delivery_id: Uuid) -> Result<()>;

    /// Make a claimed message ready again.
    async fn nack(&self, delivery_id: Uuid) -> Result<()>;

    /// Return messages claimed longer than `older_than` ago to the ready state.
    ///
    /// Stale messages that were already claimed `max_attempts` times are
    /// removed instead. Returns the number of requeued messages.
    async fn requeue_stale(&self, older_than: Duration, max_attempts: u32) -> Result<u64>;

    /// Resolves when a message may have become available.
    ///
    /// Brokers without a wake-up mechanism never resolve and rely on polling.
    async fn notified(&self) {
        std::future::pending::<()>().await
    }
}

/// Typed publishing of engine requests.
#[async_trait]
pub trait BrokerExt {
    async fn send_request(&self, request: &EngineRequest) -> Result<Uuid, AppError>;
}

#[async_trait]
impl<B> BrokerExt for B
where
    B: Broker + ?Sized,
{
    async fn send_request(&self, request: &EngineRequest) -> Result<Uuid, AppError> {
        let queue = request.queue();
        let payload = request.to_json()?;
        let id = self
            .publish(queue, payload)
            .await
            .map_err(|e| AppError::Broker(format!("Failed to publish to {}: {:#}", queue, e)))?;
        tracing::debug!(queue = %queue, message_id = %id, "Engine request published");
        Ok(id)
    }
}
