pub mod chat;
pub mod image;

pub use chat::ChatBackend;
pub use image::ImageBackend;

use crate::config::{AuthScheme, BackendConfig, BackendKind};
use crate::error::GatewayError;
use crate::payload::{ModelRequest, ModelResponse};
use async_trait::async_trait;

/// A model provider reachable through the gateway.
///
/// Implementations translate a [`ModelRequest`] into one HTTP call (or an
/// in-process stand-in) and classify any failure. Timeouts and retries are
/// applied by [`crate::ModelGateway`], not here.
///
/// To add a provider:
/// 1. Create a module in `backends/`
/// 2. Implement `ModelBackend` for your struct
/// 3. Register it in `ModelGateway::from_config()` or via `with_backend()`
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// The slot this backend serves.
    fn kind(&self) -> BackendKind;

    /// Model identifier, recorded on gateway spans.
    fn model_id(&self) -> &str;

    /// Perform one call.
    async fn invoke(&self, request: &ModelRequest) -> Result<ModelResponse, GatewayError>;
}

/// Shared HTTP plumbing for OpenAI-compatible backends.
pub(crate) struct HttpTarget {
    pub kind: BackendKind,
    pub config: BackendConfig,
    pub api_key: String,
    pub http: reqwest::Client,
}

impl HttpTarget {
    pub(crate) fn new(
        kind: BackendKind,
        config: BackendConfig,
        http: reqwest::Client,
    ) -> atelier_core::AtelierResult<Self> {
        let api_key = config.resolved_api_key()?;
        Ok(Self {
            kind,
            config,
            api_key,
            http,
        })
    }

    fn add_auth_headers(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header("Content-Type", "application/json");
        if self.api_key.is_empty() {
            return request;
        }
        match self.config.auth {
            AuthScheme::Bearer => request.header("Authorization", format!("Bearer {}", self.api_key)),
            AuthScheme::ApiKey => request.header("api-key", &self.api_key),
        }
    }

    /// POST `body` and return the parsed JSON response, classifying
    /// transport errors, non-success statuses and malformed bodies.
    pub(crate) async fn post_json(
        &self,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, GatewayError> {
        let url = self.config.url(self.kind);
        let resp = self
            .add_auth_headers(self.http.post(&url))
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::from_reqwest(self.kind, &e))?;

        let status = resp.status();
        if !status.is_success() {
            let error_body = resp
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(GatewayError::from_status(
                self.kind,
                status.as_u16(),
                &error_body,
            ));
        }

        let text = resp
            .text()
            .await
            .map_err(|e| GatewayError::from_reqwest(self.kind, &e))?;
        serde_json::from_str(&text).map_err(|e| {
            GatewayError::permanent(self.kind, format!("malformed response body: {e}"))
        })
    }
}
