use crate::error::ApiError;
use crate::rate_limit::RateLimiter;
use axum::{
    extract::{Query, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::warn;

/// API keys accepted on protected routes. Empty disables auth.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub api_keys: Vec<String>,
}

impl AuthConfig {
    pub fn new(api_keys: Vec<String>) -> Self {
        Self { api_keys }
    }

    pub fn is_enabled(&self) -> bool {
        !self.api_keys.is_empty()
    }
}

/// State shared by the auth and rate-limit layers.
#[derive(Clone)]
pub struct MiddlewareState {
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub auth: AuthConfig,
}

#[derive(serde::Deserialize, Default)]
pub struct AuthQuery {
    pub api_key: Option<String>,
}

/// `Authorization: Bearer <key>` first, then `?api_key=<key>`.
fn presented_key(headers: &HeaderMap, query: &AuthQuery) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.trim().to_string())
        .or_else(|| query.api_key.clone())
}

/// Identity used for rate limiting: the API key when one is presented,
/// else the first `x-forwarded-for` hop, else a shared anonymous bucket.
fn client_id(headers: &HeaderMap, query: &AuthQuery) -> String {
    if let Some(key) = presented_key(headers, query) {
        return format!("key:{key}");
    }
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|ip| format!("ip:{}", ip.trim()))
        .unwrap_or_else(|| "anonymous".to_string())
}

pub async fn auth_middleware(
    State(state): State<Arc<MiddlewareState>>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    request: Request,
    next: Next,
) -> Response {
    if !state.auth.is_enabled() {
        return next.run(request).await;
    }

    match presented_key(&headers, &query) {
        Some(key) if state.auth.api_keys.contains(&key) => next.run(request).await,
        Some(_) => {
            warn!(path = %request.uri().path(), "Rejected request: invalid API key");
            ApiError::Unauthorized("invalid API key").into_response()
        }
        None => {
            warn!(path = %request.uri().path(), "Rejected request: missing API key");
            ApiError::Unauthorized("API key required").into_response()
        }
    }
}

pub async fn rate_limit_middleware(
    State(state): State<Arc<MiddlewareState>>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    request: Request,
    next: Next,
) -> Response {
    let Some(limiter) = &state.rate_limiter else {
        return next.run(request).await;
    };

    let client = client_id(&headers, &query);
    if !limiter.check(&client) {
        warn!(client = %client, "Rate limited request");
        return ApiError::RateLimited.into_response();
    }

    next.run(request).await
}
