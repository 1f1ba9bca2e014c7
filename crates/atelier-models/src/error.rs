use crate::config::BackendKind;
use std::time::Duration;
use thiserror::Error;

const MAX_REASON_CHARS: usize = 500;

/// A failed backend call, classified for retry decisions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Worth retrying: timeouts, rate limits, 5xx, connection failures.
    #[error("{backend} transient failure: {reason}")]
    Transient {
        backend: BackendKind,
        reason: String,
        status: Option<u16>,
        timed_out: bool,
    },
    /// Retrying cannot help: bad request, auth, malformed payloads.
    #[error("{backend} permanent failure: {reason}")]
    Permanent {
        backend: BackendKind,
        reason: String,
        status: Option<u16>,
    },
}

impl GatewayError {
    pub fn transient(backend: BackendKind, reason: impl Into<String>) -> Self {
        GatewayError::Transient {
            backend,
            reason: reason.into(),
            status: None,
            timed_out: false,
        }
    }

    pub fn permanent(backend: BackendKind, reason: impl Into<String>) -> Self {
        GatewayError::Permanent {
            backend,
            reason: reason.into(),
            status: None,
        }
    }

    pub fn timeout(backend: BackendKind, after: Duration) -> Self {
        GatewayError::Transient {
            backend,
            reason: format!("timed out after {}ms", after.as_millis()),
            status: None,
            timed_out: true,
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(backend: BackendKind, status: u16, body: &str) -> Self {
        let reason = format!("HTTP {status}: {}", truncate(body.trim()));
        match status {
            408 | 429 | 500..=599 => GatewayError::Transient {
                backend,
                reason,
                status: Some(status),
                timed_out: status == 408,
            },
            _ => GatewayError::Permanent {
                backend,
                reason,
                status: Some(status),
            },
        }
    }

    /// Classify a transport-level failure.
    pub fn from_reqwest(backend: BackendKind, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return GatewayError::Transient {
                backend,
                reason: err.to_string(),
                status: None,
                timed_out: true,
            };
        }
        if let Some(status) = err.status() {
            return Self::from_status(backend, status.as_u16(), &err.to_string());
        }
        if err.is_connect() || err.is_request() || err.is_body() {
            return GatewayError::transient(backend, err.to_string());
        }
        GatewayError::permanent(backend, err.to_string())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transient { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, GatewayError::Transient { timed_out: true, .. })
    }

    pub fn backend(&self) -> BackendKind {
        match self {
            GatewayError::Transient { backend, .. } | GatewayError::Permanent { backend, .. } => {
                *backend
            }
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            GatewayError::Transient { reason, .. } | GatewayError::Permanent { reason, .. } => {
                reason
            }
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::Transient { status, .. } | GatewayError::Permanent { status, .. } => {
                *status
            }
        }
    }

    /// Outcome label used on spans and logs.
    pub fn outcome(&self) -> &'static str {
        match self {
            GatewayError::Transient { timed_out: true, .. } => "timeout",
            GatewayError::Transient { .. } => "transient",
            GatewayError::Permanent { .. } => "permanent",
        }
    }
}

fn truncate(s: &str) -> String {
    if s.chars().count() <= MAX_REASON_CHARS {
        return s.to_string();
    }
    let mut out: String = s.chars().take(MAX_REASON_CHARS).collect();
    out.push_str("...");
    out
}
