use crate::retry::RetryPolicy;
use atelier_core::{AtelierError, AtelierResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The four backend kinds the gateway can reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Standard reasoning model, one call per agent.
    Reasoning,
    /// Premium synthesis model, one call per request.
    Premium,
    /// Image generator used by visual augmentation.
    ImageGeneration,
    /// Vision analyzer for reference images.
    Vision,
}

impl BackendKind {
    pub const ALL: [BackendKind; 4] = [
        BackendKind::Reasoning,
        BackendKind::Premium,
        BackendKind::ImageGeneration,
        BackendKind::Vision,
    ];

    /// Default per-call timeout when the configuration does not set one.
    pub fn default_timeout(&self) -> Duration {
        match self {
            BackendKind::Reasoning => Duration::from_secs(60),
            BackendKind::Premium => Duration::from_secs(120),
            BackendKind::ImageGeneration => Duration::from_secs(90),
            BackendKind::Vision => Duration::from_secs(60),
        }
    }

    fn default_path(&self) -> &'static str {
        match self {
            BackendKind::ImageGeneration => "/v1/images/generations",
            _ => "/v1/chat/completions",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Reasoning => write!(f, "reasoning"),
            BackendKind::Premium => write!(f, "premium"),
            BackendKind::ImageGeneration => write!(f, "image_generation"),
            BackendKind::Vision => write!(f, "vision"),
        }
    }
}

/// How the API key is presented to the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>`
    #[default]
    Bearer,
    /// `api-key: <key>` (Azure OpenAI style)
    ApiKey,
}

/// Endpoint and model settings for one backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL, e.g. `https://api.openai.com`.
    pub endpoint: String,
    /// Request path appended to `endpoint`; defaults per backend kind.
    #[serde(default)]
    pub path: Option<String>,
    pub model_id: String,
    #[serde(default)]
    pub api_key: String,
    /// Environment variable holding the key, read when `api_key` is empty.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub auth: AuthScheme,
    /// Sent as the `api-version` query parameter when set.
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_image_size")]
    pub image_size: String,
}

fn default_max_tokens() -> u32 {
    1500
}

fn default_temperature() -> f32 {
    0.7
}

fn default_image_size() -> String {
    "1024x1024".to_string()
}

impl BackendConfig {
    pub fn new(endpoint: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            path: None,
            model_id: model_id.into(),
            api_key: String::new(),
            api_key_env: None,
            auth: AuthScheme::default(),
            api_version: None,
            timeout_secs: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            image_size: default_image_size(),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = key.into();
        self
    }

    /// Full request URL for the given backend kind.
    pub fn url(&self, kind: BackendKind) -> String {
        let base = self.endpoint.trim_end_matches('/');
        let path = self.path.as_deref().unwrap_or(kind.default_path());
        match &self.api_version {
            Some(version) => format!("{base}{path}?api-version={version}"),
            None => format!("{base}{path}"),
        }
    }

    pub fn timeout(&self, kind: BackendKind) -> Duration {
        self.timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| kind.default_timeout())
    }

    /// The inline key, or the value of `api_key_env`. Empty when neither is
    /// configured (local, unauthenticated endpoints).
    pub fn resolved_api_key(&self) -> AtelierResult<String> {
        if !self.api_key.is_empty() {
            return Ok(self.api_key.clone());
        }
        match &self.api_key_env {
            Some(var) => std::env::var(var).map_err(|_| {
                AtelierError::Config(format!("environment variable '{var}' is not set"))
            }),
            None => Ok(String::new()),
        }
    }

    fn validate(&self, kind: BackendKind) -> AtelierResult<()> {
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(AtelierError::Config(format!(
                "{kind} endpoint must be an http(s) URL, got '{}'",
                self.endpoint
            )));
        }
        if self.model_id.trim().is_empty() {
            return Err(AtelierError::Config(format!("{kind} model_id is empty")));
        }
        Ok(())
    }
}

/// Configuration for every backend the gateway talks to.
///
/// Built once at startup and injected into [`crate::ModelGateway`]; nothing
/// reads endpoints or credentials from ambient state during a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub reasoning: BackendConfig,
    pub premium: BackendConfig,
    #[serde(default)]
    pub image: Option<BackendConfig>,
    #[serde(default)]
    pub vision: Option<BackendConfig>,
    /// Transient-failure policy applied by `call_with_retry`.
    #[serde(default = "RetryPolicy::gateway_default")]
    pub retry: RetryPolicy,
}

impl GatewayConfig {
    pub fn backend(&self, kind: BackendKind) -> Option<&BackendConfig> {
        match kind {
            BackendKind::Reasoning => Some(&self.reasoning),
            BackendKind::Premium => Some(&self.premium),
            BackendKind::ImageGeneration => self.image.as_ref(),
            BackendKind::Vision => self.vision.as_ref(),
        }
    }

    pub fn validate(&self) -> AtelierResult<()> {
        for kind in BackendKind::ALL {
            if let Some(backend) = self.backend(kind) {
                backend.validate(kind)?;
            }
        }
        Ok(())
    }
}
