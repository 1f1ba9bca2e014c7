//! HTTP surface for the Atelier orchestration engine.
//!
//! Exposes `POST /api/orchestrate`, `GET /api/agents` and `GET /api/health`
//! over axum, with optional API-key auth and per-client rate limiting on
//! the orchestration route.

/// Error responses.
pub mod error;
/// Auth and rate-limit middleware.
pub mod middleware;
/// Per-client token buckets.
pub mod rate_limit;
/// Router construction and handlers.
pub mod server;

pub use error::ApiError;
pub use middleware::AuthConfig;
pub use rate_limit::RateLimiter;
pub use server::{AppState, AtelierServer};
