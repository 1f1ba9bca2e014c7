use crate::error::ApiError;
use crate::middleware::{auth_middleware, rate_limit_middleware, AuthConfig, MiddlewareState};
use crate::rate_limit::RateLimiter;
use atelier_orchestrator::{
    roster, tier_table, OrchestrationRequest, OrchestrationResult, Orchestrator, ValidationError,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    middleware as axum_mw,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state.
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

/// Builds the HTTP router.
pub struct AtelierServer;

impl AtelierServer {
    /// Router without auth or rate limiting.
    pub fn build(orchestrator: Arc<Orchestrator>) -> Router {
        Self::build_with_middleware(orchestrator, None, AuthConfig::default())
    }

    /// Router with optional auth and rate limiting on `/api/orchestrate`.
    /// Health and agent listing stay open.
    pub fn build_with_middleware(
        orchestrator: Arc<Orchestrator>,
        rate_limiter: Option<Arc<RateLimiter>>,
        auth: AuthConfig,
    ) -> Router {
        let state = Arc::new(AppState { orchestrator });

        let mut protected = Router::new().route("/api/orchestrate", post(orchestrate_handler));
        if rate_limiter.is_some() || auth.is_enabled() {
            let mw_state = Arc::new(MiddlewareState { rate_limiter, auth });
            protected = protected
                .route_layer(axum_mw::from_fn_with_state(
                    mw_state.clone(),
                    rate_limit_middleware,
                ))
                .route_layer(axum_mw::from_fn_with_state(mw_state, auth_middleware));
        }

        Router::new()
            .route("/api/health", get(health_handler))
            .route("/api/agents", get(agents_handler))
            .merge(protected)
            .with_state(state)
    }
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok", "service": "atelier"}))
}

async fn agents_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let monitor = state.orchestrator.monitor();
    Json(serde_json::json!({
        "agents": roster(),
        "tiers": tier_table(),
        "monitor": monitor.to_json().await,
    }))
}

/// Dropping this future (client disconnect) drops the in-flight
/// orchestration; its open spans close as cancelled.
async fn orchestrate_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<OrchestrationRequest>, JsonRejection>,
) -> Result<Json<OrchestrationResult>, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        warn!(error = %rejection.body_text(), "Rejected malformed request body");
        ApiError::from(ValidationError::Malformed(rejection.body_text()))
    })?;

    let result = state.orchestrator.orchestrate(request).await?;
    info!(
        trace_id = %result.trace_id,
        degraded = result.degraded,
        latency_ms = result.duration_total_ms,
        "Request served"
    );
    Ok(Json(result))
}
