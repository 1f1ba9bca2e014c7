//! Model gateway for the Atelier orchestration engine.
//!
//! One call interface over four backend kinds: the standard reasoning model
//! used by every agent, the premium synthesis model, the image generator and
//! the vision analyzer. The gateway normalizes request and response shapes,
//! enforces the caller's timeout, classifies failures as transient or
//! permanent, and wraps every call in a trace span.
//!
//! # Main types
//!
//! - [`ModelGateway`]: Routes calls to registered [`ModelBackend`]s.
//! - [`GatewayConfig`] / [`BackendConfig`]: Immutable endpoint configuration.
//! - [`ModelRequest`] / [`ModelResponse`]: Normalized payloads.
//! - [`GatewayError`]: Transient or permanent backend failure.
//! - [`RetryPolicy`]: Exponential backoff with jitter for transient failures.

pub mod backends;
pub mod config;
pub mod error;
pub mod gateway;
pub mod payload;
pub mod retry;

pub use backends::ModelBackend;
pub use config::{AuthScheme, BackendConfig, BackendKind, GatewayConfig};
pub use error::GatewayError;
pub use gateway::ModelGateway;
pub use payload::{extract_confidence, ImageSource, ModelRequest, ModelResponse};
pub use retry::{retry_transient, RetryOutcome, RetryPolicy};
