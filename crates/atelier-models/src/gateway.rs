use crate::backends::{ChatBackend, ImageBackend, ModelBackend};
use crate::config::{BackendKind, GatewayConfig};
use crate::error::GatewayError;
use crate::payload::{ModelRequest, ModelResponse};
use crate::retry::{retry_transient, RetryOutcome, RetryPolicy};
use atelier_core::{AtelierError, AtelierResult, SpanGuard};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Routes model calls to the configured backends.
///
/// Every call opens a `gateway.call` span under the caller's span, enforces
/// the caller's timeout, and reports latency and outcome. The gateway is
/// immutable after construction and shared across requests behind an `Arc`.
pub struct ModelGateway {
    backends: HashMap<BackendKind, Arc<dyn ModelBackend>>,
    timeouts: HashMap<BackendKind, Duration>,
    retry: RetryPolicy,
}

impl ModelGateway {
    /// A gateway with no backends registered.
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            timeouts: HashMap::new(),
            retry: RetryPolicy::gateway_default(),
        }
    }

    /// Build HTTP backends for every configured slot, sharing one connection
    /// pool.
    pub fn from_config(config: &GatewayConfig) -> AtelierResult<Self> {
        config.validate()?;

        let http = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| AtelierError::Http(e.to_string()))?;

        let mut gateway = Self::new().with_retry_policy(config.retry.clone());

        for kind in BackendKind::ALL {
            let Some(backend_config) = config.backend(kind) else {
                continue;
            };
            let timeout = backend_config.timeout(kind);
            let backend: Arc<dyn ModelBackend> = match kind {
                BackendKind::ImageGeneration => {
                    Arc::new(ImageBackend::new(backend_config.clone(), http.clone())?)
                }
                _ => Arc::new(ChatBackend::new(kind, backend_config.clone(), http.clone())?),
            };
            gateway = gateway.with_backend(backend).with_timeout(kind, timeout);
        }

        Ok(gateway)
    }

    /// Register (or replace) the backend for its kind.
    pub fn with_backend(mut self, backend: Arc<dyn ModelBackend>) -> Self {
        self.backends.insert(backend.kind(), backend);
        self
    }

    pub fn with_timeout(mut self, kind: BackendKind, timeout: Duration) -> Self {
        self.timeouts.insert(kind, timeout);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn has_backend(&self, kind: BackendKind) -> bool {
        self.backends.contains_key(&kind)
    }

    /// Configured per-call timeout for a backend kind.
    pub fn backend_timeout(&self, kind: BackendKind) -> Duration {
        self.timeouts
            .get(&kind)
            .copied()
            .unwrap_or_else(|| kind.default_timeout())
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// One attempt against `kind`, bounded by `timeout`.
    pub async fn call(
        &self,
        kind: BackendKind,
        request: &ModelRequest,
        timeout: Duration,
        parent: &SpanGuard,
    ) -> Result<ModelResponse, GatewayError> {
        let mut span = parent.child("gateway.call");
        span.set_attribute("backend", kind.to_string());
        span.set_attribute("operation", request.operation());
        span.set_attribute("timeout_ms", timeout.as_millis() as u64);

        let Some(backend) = self.backends.get(&kind) else {
            let err = GatewayError::permanent(kind, "backend not configured");
            span.set_attribute("outcome", err.outcome());
            span.fail(&err);
            return Err(err);
        };
        span.set_attribute("model", backend.model_id());

        let started = Instant::now();
        let result = if timeout.is_zero() {
            Err(GatewayError::timeout(kind, timeout))
        } else {
            match tokio::time::timeout(timeout, backend.invoke(request)).await {
                Ok(result) => result,
                Err(_) => Err(GatewayError::timeout(kind, timeout)),
            }
        };
        let latency_ms = started.elapsed().as_millis() as u64;
        span.set_attribute("latency_ms", latency_ms);

        match &result {
            Ok(_) => {
                debug!(
                    trace_id = %parent.trace_id(),
                    backend = %kind,
                    latency_ms,
                    "Model call succeeded"
                );
                span.set_attribute("outcome", "success");
                span.ok();
            }
            Err(e) => {
                warn!(
                    trace_id = %parent.trace_id(),
                    backend = %kind,
                    latency_ms,
                    outcome = e.outcome(),
                    error = %e,
                    "Model call failed"
                );
                span.set_attribute("outcome", e.outcome());
                span.fail(e);
            }
        }

        result
    }

    /// [`call`](Self::call) under the gateway's retry policy. Each attempt is
    /// bounded by the backend timeout and by what is left until `deadline`.
    pub async fn call_with_retry(
        &self,
        kind: BackendKind,
        request: &ModelRequest,
        deadline: Instant,
        parent: &SpanGuard,
    ) -> RetryOutcome<ModelResponse> {
        let per_call = self.backend_timeout(kind);
        retry_transient(&self.retry, deadline, move |_| {
            let timeout = deadline
                .saturating_duration_since(Instant::now())
                .min(per_call);
            self.call(kind, request, timeout, parent)
        })
        .await
    }
}

impl Default for ModelGateway {
    fn default() -> Self {
        Self::new()
    }
}
