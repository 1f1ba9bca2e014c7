use thiserror::Error;

/// A convenience `Result` alias using [`AtelierError`].
pub type AtelierResult<T> = Result<T, AtelierError>;

/// Top-level error type for configuration and plumbing failures.
///
/// Domain failures of the orchestration pipeline have their own typed errors
/// (`GatewayError`, `OrchestrationError`); this enum covers everything around
/// them.
#[derive(Error, Debug)]
pub enum AtelierError {
    /// Invalid or missing configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// An outbound HTTP request failed outside of a backend call.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The model gateway could not be assembled.
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// The orchestrator could not be assembled or run.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// A span sink could not be created or written.
    #[error("Trace error: {0}")]
    Trace(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
