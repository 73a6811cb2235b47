//! Library crate for trivia-sync, exposing modules for binaries and integration tests.

/// Layered runtime configuration.
pub mod config;
mod dto;
mod error;
/// HTTP, SSE and WebSocket route trees.
pub mod routes;
/// Handlers' business logic and the long-running contexts.
pub mod services;
/// Shared application state.
pub mod state;
/// Synchronisation protocol core.
pub mod sync;

pub use error::{AppError, ServiceError};
