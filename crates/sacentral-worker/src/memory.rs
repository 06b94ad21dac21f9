//! In-memory broker

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use sacentral_core::QueueName;

use crate::broker::{Broker, Delivery};

#[derive(Default)]
struct Queues {
    ready: VecDeque<Delivery>,
    claimed: HashMap<Uuid, (Delivery, Instant)>,
}

#[derive(Default)]
pub struct InMemoryBroker {
    queues: Mutex<Queues>,
    notify: Notify,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return every ready payload of `queue`, oldest first.
    pub async fn drain(&self, queue: QueueName) -> Vec<serde_json::Value> {
        let mut queues = self.queues.lock().await;
        let (taken, kept): (VecDeque<_>, VecDeque<_>) =
            queues.ready.drain(..).partition(|d| d.queue == queue);
        queues.ready = kept;
        taken.into_iter().map(|d| d.payload).collect()
    }

    /// Number of ready messages on `queue`.
    pub async fn len(&self, queue: QueueName) -> usize {
        self.queues
            .lock()
            .await
            .ready
            .iter()
            .filter(|d| d.queue == queue)
            .count()
    }

    pub async fn in_flight(&self) -> usize {
        self.queues.lock().await.claimed.len()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, queue: QueueName, payload: serde_json::Value) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.queues.lock().await.ready.push_back(Delivery {
            id,
            queue,
            payload,
            attempts: 0,
        });
        self.notify.notify_one();
        Ok(id)
    }

    async fn claim(&self, queues: &[QueueName]) -> Result<Option<Delivery>> {
        let mut state = self.queues.lock().await;
        let Some(position) = state.ready.iter().position(|d| queues.contains(&d.queue)) else {
            return Ok(None);
        };
        let Some(mut delivery) = state.ready.remove(position) else {
            return Ok(None);
        };
        delivery.attempts += 1;
        state
            .claimed
            .insert(delivery.id, (delivery.clone(), Instant::now()));
        Ok(Some(delivery))
    }

    async fn ack(&self, delivery_id: Uuid) -> Result<()> {
        if self.queues.lock().await.claimed.remove(&delivery_id).is_none() {
            bail!("Delivery {} is not claimed", delivery_id);
        }
        Ok(())
    }

    async fn nack(&self, delivery_id: Uuid) -> Result<()> {
        let mut state = self.queues.lock().await;
        let Some((delivery, _)) = state.claimed.remove(&delivery_id) else {
            bail!("Delivery {} is not claimed", delivery_id);
        };
        state.ready.push_back(delivery);
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    async fn requeue_stale(&self, older_than: Duration, max_attempts: u32) -> Result<u64> {
        let mut state = self.queues.lock().await;
        let stale: Vec<Uuid> = state
            .claimed
            .iter()
            .filter(|(_, (_, claimed_at))| claimed_at.elapsed() >= older_than)
            .map(|(id, _)| *id)
            .collect();
        let mut requeued = 0;
        for id in &stale {
            let Some((delivery, _)) = state.claimed.remove(id) else {
                continue;
            };
            if delivery.attempts >= max_attempts {
                tracing::warn!(
                    message.id = %delivery.id,
                    queue = %delivery.queue,
                    attempts = delivery.attempts,
                    "Dropping stale message after max attempts"
                );
                continue;
            }
            state.ready.push_back(delivery);
            requeued += 1;
        }
        Ok(requeued)
    }

    async fn notified(&self) {
        self.notify.notified().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_claim_only_from_requested_queues() {
        let broker = InMemoryBroker::new();
        broker.publish(QueueName::SaEngine, json!({"n": 1})).await.unwrap();
        broker.publish(QueueName::SaFinish, json!({"n": 2})).await.unwrap();

        let delivery = broker
            .claim(&QueueName::COMPLETION)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.queue, QueueName::SaFinish);
        assert_eq!(delivery.attempts, 1);
        assert!(broker.claim(&QueueName::COMPLETION).await.unwrap().is_none());
        assert_eq!(broker.len(QueueName::SaEngine).await, 1);
    }

    #[tokio::test]
    async fn test_nack_makes_message_visible_again() {
        let broker = InMemoryBroker::new();
        broker.publish(QueueName::MlFinish, json!({})).await.unwrap();

        let first = broker.claim(&[QueueName::MlFinish]).await.unwrap().unwrap();
        broker.nack(first.id).await.unwrap();
        let second = broker.claim(&[QueueName::MlFinish]).await.unwrap().unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.attempts, 2);
        broker.ack(second.id).await.unwrap();
        assert_eq!(broker.in_flight().await, 0);
        assert!(broker.ack(second.id).await.is_err());
    }

    #[tokio::test]
    async fn test_requeue_stale_claims() {
        let broker = InMemoryBroker::new();
        broker.publish(QueueName::CompileFinish, json!({})).await.unwrap();
        broker.claim(&[QueueName::CompileFinish]).await.unwrap().unwrap();

        assert_eq!(broker.requeue_stale(Duration::from_secs(60), 3).await.unwrap(), 0);
        assert_eq!(broker.requeue_stale(Duration::ZERO, 3).await.unwrap(), 1);
        assert_eq!(broker.len(QueueName::CompileFinish).await, 1);
    }

    #[tokio::test]
    async fn test_requeue_stale_drops_exhausted_messages() {
        let broker = InMemoryBroker::new();
        broker.publish(QueueName::SaFinish, json!({})).await.unwrap();

        broker.claim(&[QueueName::SaFinish]).await.unwrap().unwrap();
        assert_eq!(broker.requeue_stale(Duration::ZERO, 2).await.unwrap(), 1);
        let last = broker.claim(&[QueueName::SaFinish]).await.unwrap().unwrap();
        assert_eq!(last.attempts, 2);

        assert_eq!(broker.requeue_stale(Duration::ZERO, 2).await.unwrap(), 0);
        assert_eq!(broker.len(QueueName::SaFinish).await, 0);
        assert_eq!(broker.in_flight().await, 0);
    }

    #[tokio::test]
    async fn test_drain_preserves_other_queues() {
        let broker = InMemoryBroker::new();
        broker.publish(QueueName::SaEngine, json!({"a": 1})).await.unwrap();
        broker.publish(QueueName::MlEngine, json!({"b": 2})).await.unwrap();
        broker.publish(QueueName::SaEngine, json!({"a": 3})).await.unwrap();

        let drained = broker.drain(QueueName::SaEngine).await;
        assert_eq!(drained, vec![json!({"a": 1}), json!({"a": 3})]);
        assert_eq!(broker.len(QueueName::MlEngine).await, 1);
    }
}
