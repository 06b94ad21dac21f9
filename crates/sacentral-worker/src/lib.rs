//! Broker and completion consumer infrastructure
//!
//! Engines are reached only through named queues. [`Broker`] is the seam;
//! [`InMemoryBroker`] serves tests and single-process runs, [`PgBroker`] keeps
//! messages in PostgreSQL. [`CompletionConsumer`] drains the completion queues
//! and hands each validated message to a [`CompletionHandler`].

pub mod broker;
pub mod consumer;
pub mod memory;
pub mod postgres;

pub use broker::{Broker, BrokerExt, Delivery};
pub use consumer::{CompletionConsumer, CompletionHandler, ConsumerConfig};
pub use memory::InMemoryBroker;
pub use postgres::{PgBroker, QUEUE_NOTIFY_CHANNEL};
