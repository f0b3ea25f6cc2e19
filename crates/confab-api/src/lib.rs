//! Confab API crate - axum HTTP server exposing the conversation
//! orchestrator to presentation layers.
//!
//! Provides read-only state views, the orchestrator operations, profile and
//! model management, data export and an SSE stream of chat events.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
