//! sacentral persistence layer
//!
//! The orchestration core talks to storage through the async traits in
//! [`store`]. Two implementations are provided: [`InMemoryStore`] for tests
//! and single-process deployments, and [`PgStore`] backed by PostgreSQL.
//!
//! Every operation that arbitrates between concurrent completion processors
//! (`advance_workflow`, `finish_workflow`, `transition_sa`, `transition_ml`,
//! `claim_merge`, `bind_analysis`) is a single conditional write.

pub mod memory;
pub mod postgres;
pub mod store;
pub mod transaction;

pub use memory::InMemoryStore;
pub use postgres::PgStore;
pub use store::{
    AnalysisBinding, AnalysisStore, FileRepository, ResultStore, RuleCatalog, TaskStore,
    WorkflowStore,
};
pub use transaction::TransactionGuard;
