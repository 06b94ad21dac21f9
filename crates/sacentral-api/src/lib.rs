//! sacentral API library
//!
//! This crate provides the HTTP handlers and the process wiring: configuration,
//! telemetry, store and broker selection, and the completion consumer.

pub mod constants;
pub mod error;
mod handlers;
pub mod setup;
pub mod state;
mod telemetry;

pub use error::{ErrorResponse, HttpAppError};
pub use state::AppState;
