//! Completion consumer: bounded worker pool draining the completion queues.
//!
//! The pool wakes on broker notifications or on the poll interval, claims one
//! message per wake-up while a worker slot is free, validates it and hands it
//! to the [`CompletionHandler`]. Messages that fail validation are acked and
//! dropped. Recoverable handler failures are nacked so the broker redelivers
//! them, up to [`ConsumerConfig::max_attempts`]. A handler that outlives
//! `handler_timeout_secs` is cancelled and treated as a recoverable failure,
//! so handlers must leave state that a redelivery can resume from.
//!
//! Shutdown: [`CompletionConsumer::shutdown`] stops claiming; it does not wait
//! for in-flight messages. Unacked messages become visible again after the
//! visibility timeout.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::sleep;

use sacentral_core::{AppError, CompletionMessage, Config, ErrorMetadata, QueueName};

use crate::broker::{Broker, Delivery};

/// Receives validated completion messages.
///
/// Implemented by the orchestration services. Handlers must tolerate
/// duplicate delivery of the same message.
#[async_trait]
pub trait CompletionHandler: Send + Sync {
    async fn handle_completion(&self, message: CompletionMessage) -> Result<(), AppError>;
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub max_workers: usize,
    pub poll_interval_ms: u64,
    /// Claimed messages not acked within this window are handed out again.
    pub visibility_timeout_secs: u64,
    /// Interval in seconds between runs of the stale claim reaper. 0 disables it.
    pub reap_interval_secs: u64,
    pub max_attempts: u32,
    pub handler_timeout_secs: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            poll_interval_ms: 500,
            visibility_timeout_secs: 300,
            reap_interval_secs: 60,
            max_attempts: 3,
            handler_timeout_secs: 120,
        }
    }
}

impl From<&Config> for ConsumerConfig {
    fn from(config: &Config) -> Self {
        Self {
            max_workers: config.consumer_max_workers(),
            poll_interval_ms: config.consumer_poll_interval_ms(),
            visibility_timeout_secs: config.queue_visibility_timeout_secs(),
            ..Self::default()
        }
    }
}

/// What to do with a delivery once the handler returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Settlement {
    Ack,
    Nack,
}

pub(crate) fn settle(result: &Result<(), AppError>, attempts: u32, max_attempts: u32) -> Settlement {
    match result {
        Ok(()) => Settlement::Ack,
        Err(e) if e.is_recoverable() && attempts < max_attempts => Settlement::Nack,
        Err(_) => Settlement::Ack,
    }
}

pub struct CompletionConsumer {
    shutdown_tx: mpsc::Sender<()>,
}

impl CompletionConsumer {
    /// Spawn the worker pool. Must be called inside a tokio runtime.
    pub fn start(
        broker: Arc<dyn Broker>,
        handler: Arc<dyn CompletionHandler>,
        config: ConsumerConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        tokio::spawn(async move {
            Self::worker_pool(broker, handler, config, shutdown_rx).await;
        });
        Self { shutdown_tx }
    }

    async fn worker_pool(
        broker: Arc<dyn Broker>,
        handler: Arc<dyn CompletionHandler>,
        config: ConsumerConfig,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::info!(
            max_workers = config.max_workers,
            poll_interval_ms = config.poll_interval_ms,
            "Completion consumer pool started"
        );

        let semaphore = Arc::new(Semaphore::new(config.max_workers.max(1)));
        let poll_interval = Duration::from_millis(config.poll_interval_ms);

        let (reaper_shutdown_tx, mut reaper_shutdown_rx) = mpsc::channel::<()>(1);
        if config.reap_interval_secs > 0 {
            let reaper_broker = broker.clone();
            let reap_interval = Duration::from_secs(config.reap_interval_secs);
            let visibility = Duration::from_secs(config.visibility_timeout_secs);
            let max_attempts = config.max_attempts;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(reap_interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            if let Err(e) = reaper_broker.requeue_stale(visibility, max_attempts).await {
                                tracing::error!(error = %e, "Stale claim reaper failed");
                            }
                        }
                        _ = reaper_shutdown_rx.recv() => break,
                    }
                }
            });
        }

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Completion consumer pool shutting down");
                    let _ = reaper_shutdown_tx.send(()).await;
                    break;
                }
                _ = broker.notified() => {
                    Self::claim_and_dispatch_one(&broker, &handler, &semaphore, &config).await;
                }
                _ = sleep(poll_interval) => {
                    Self::claim_and_dispatch_one(&broker, &handler, &semaphore, &config).await;
                }
            }
        }

        tracing::info!("Completion consumer pool stopped");
    }

    async fn claim_and_dispatch_one(
        broker: &Arc<dyn Broker>,
        handler: &Arc<dyn CompletionHandler>,
        semaphore: &Arc<Semaphore>,
        config: &ConsumerConfig,
    ) {
        let permit = match semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::debug!("No workers available, skipping claim");
                return;
            }
        };

        match broker.claim(&QueueName::COMPLETION).await {
            Ok(Some(delivery)) => {
                let broker = broker.clone();
                let handler = handler.clone();
                let config = config.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    Self::process_delivery(delivery, broker, handler, config).await;
                });
            }
            Ok(None) => {
                drop(permit);
                tracing::trace!("No completion messages available");
            }
            Err(e) => {
                drop(permit);
                tracing::error!(error = %e, "Failed to claim completion message");
            }
        }
    }

    #[tracing::instrument(
        skip(broker, handler, config, delivery),
        fields(message.id = %delivery.id, queue = %delivery.queue, attempts = delivery.attempts)
    )]
    async fn process_delivery(
        delivery: Delivery,
        broker: Arc<dyn Broker>,
        handler: Arc<dyn CompletionHandler>,
        config: ConsumerConfig,
    ) {
        let message = match CompletionMessage::parse(delivery.queue, &delivery.payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping invalid completion message");
                if let Err(e) = broker.ack(delivery.id).await {
                    tracing::error!(error = %e, "Failed to ack invalid message");
                }
                return;
            }
        };

        let workflow_id = message.workflow_id();
        let timeout = Duration::from_secs(config.handler_timeout_secs);
        let result = match tokio::time::timeout(timeout, handler.handle_completion(message)).await
        {
            Ok(result) => result,
            Err(_) => Err(AppError::Internal(format!(
                "Completion handler timed out after {}s",
                config.handler_timeout_secs
            ))),
        };

        if let Err(ref e) = result {
            tracing::error!(
                workflow_id = %workflow_id,
                error = %e,
                recoverable = e.is_recoverable(),
                "Completion handling failed"
            );
        }

        let settled = match settle(&result, delivery.attempts, config.max_attempts) {
            Settlement::Ack => broker.ack(delivery.id).await,
            Settlement::Nack => {
                tracing::info!(workflow_id = %workflow_id, "Returning message for redelivery");
                broker.nack(delivery.id).await
            }
        };
        if let Err(e) = settled {
            tracing::error!(error = %e, "Failed to settle completion message");
        }
    }

    /// Signals the pool to stop claiming. Returns without waiting for in-flight messages.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating completion consumer shutdown");
        let _ = self.shutdown_tx.send(()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBroker;
    use serde_json::json;
    use tokio::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingHandler {
        seen: Mutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl CompletionHandler for RecordingHandler {
        async fn handle_completion(&self, message: CompletionMessage) -> Result<(), AppError> {
            self.seen.lock().await.push(message.workflow_id());
            Ok(())
        }
    }

    #[test]
    fn settle_acks_success_and_permanent_failures() {
        assert_eq!(settle(&Ok(()), 1, 3), Settlement::Ack);
        let invalid = Err(AppError::InvalidMessage("bad".to_string()));
        assert_eq!(settle(&invalid, 1, 3), Settlement::Ack);
    }

    #[test]
    fn settle_nacks_recoverable_until_attempts_exhausted() {
        let broker_down = Err(AppError::Broker("down".to_string()));
        assert_eq!(settle(&broker_down, 1, 3), Settlement::Nack);
        assert_eq!(settle(&broker_down, 2, 3), Settlement::Nack);
        assert_eq!(settle(&broker_down, 3, 3), Settlement::Ack);
    }

    #[tokio::test]
    async fn consumer_delivers_valid_and_drops_invalid_messages() {
        let broker = Arc::new(InMemoryBroker::new());
        let handler = Arc::new(RecordingHandler::default());
        let workflow_id = Uuid::new_v4();

        broker
            .publish(QueueName::CompileFinish, json!({"workflowId": "not-a-uuid"}))
            .await
            .unwrap();
        broker
            .publish(
                QueueName::CompileFinish,
                json!({"workflowId": workflow_id, "success": false}),
            )
            .await
            .unwrap();

        let consumer = CompletionConsumer::start(
            broker.clone(),
            handler.clone(),
            ConsumerConfig {
                poll_interval_ms: 10,
                reap_interval_secs: 0,
                ..ConsumerConfig::default()
            },
        );

        for _ in 0..100 {
            if broker.len(QueueName::CompileFinish).await == 0 && broker.in_flight().await == 0 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        consumer.shutdown().await;

        assert_eq!(*handler.seen.lock().await, vec![workflow_id]);
        assert_eq!(broker.in_flight().await, 0);
    }
}
