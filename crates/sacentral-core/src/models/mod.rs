//! Data models for the orchestration core
//!
//! Each sub-module represents one entity family: workflows, tasks, the rule
//! catalog and its snapshots, engine findings, and stored files.

mod file;
mod result;
mod rule;
mod task;
mod workflow;

pub use file::*;
pub use result::*;
pub use rule::*;
pub use task::*;
pub use workflow::*;
