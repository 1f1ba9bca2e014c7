use atelier_core::{AtelierError, AtelierResult};
use atelier_models::{GatewayConfig, RetryPolicy};
use atelier_orchestrator::OrchestratorConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Contents of `atelier.toml`.
#[derive(Debug, Deserialize)]
pub struct AtelierConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub tracing: TracingConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
    /// Required by `serve` and `run`.
    #[serde(default)]
    pub gateway: Option<GatewayConfig>,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SecurityConfig {
    /// Empty disables auth.
    #[serde(default)]
    pub api_keys: Vec<String>,
    /// `0` disables rate limiting.
    #[serde(default = "default_rps")]
    pub max_requests_per_second: f64,
    #[serde(default = "default_burst")]
    pub max_burst: f64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            max_requests_per_second: default_rps(),
            max_burst: default_burst(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Default, Deserialize)]
pub struct TracingConfig {
    #[serde(default)]
    pub log_format: LogFormat,
    /// Append closed spans to this JSONL file.
    #[serde(default)]
    pub spans_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct OrchestratorSection {
    #[serde(default = "default_request_deadline_secs")]
    pub request_deadline_secs: u64,
    #[serde(default = "default_dispatch_budget_ratio")]
    pub dispatch_budget_ratio: f64,
    #[serde(default = "default_per_agent_timeout_secs")]
    pub per_agent_timeout_secs: u64,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default = "default_confidence")]
    pub default_confidence: f64,
    #[serde(default = "default_max_description_chars")]
    pub max_description_chars: usize,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            request_deadline_secs: default_request_deadline_secs(),
            dispatch_budget_ratio: default_dispatch_budget_ratio(),
            per_agent_timeout_secs: default_per_agent_timeout_secs(),
            max_in_flight: default_max_in_flight(),
            default_confidence: default_confidence(),
            max_description_chars: default_max_description_chars(),
            retry: RetryPolicy::default(),
        }
    }
}

impl OrchestratorSection {
    pub fn to_orchestrator_config(&self) -> OrchestratorConfig {
        let mut config = OrchestratorConfig::default()
            .with_request_deadline(Duration::from_secs(self.request_deadline_secs))
            .with_dispatch_budget_ratio(self.dispatch_budget_ratio)
            .with_per_agent_timeout(Duration::from_secs(self.per_agent_timeout_secs))
            .with_max_in_flight(self.max_in_flight)
            .with_default_confidence(self.default_confidence)
            .with_retry(self.retry.clone());
        config.max_description_chars = self.max_description_chars;
        config
    }

    fn validate(&self) -> AtelierResult<()> {
        if self.request_deadline_secs == 0 {
            return Err(AtelierError::Config(
                "orchestrator.request_deadline_secs must be positive".into(),
            ));
        }
        if !(self.dispatch_budget_ratio > 0.0 && self.dispatch_budget_ratio <= 1.0) {
            return Err(AtelierError::Config(format!(
                "orchestrator.dispatch_budget_ratio must be in (0, 1], got {}",
                self.dispatch_budget_ratio
            )));
        }
        if self.max_in_flight == 0 {
            return Err(AtelierError::Config(
                "orchestrator.max_in_flight must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.default_confidence) {
            return Err(AtelierError::Config(format!(
                "orchestrator.default_confidence must be in [0, 1], got {}",
                self.default_confidence
            )));
        }
        Ok(())
    }
}

impl AtelierConfig {
    pub fn load(path: &Path) -> AtelierResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AtelierError::Config(format!("failed to read config file '{}': {e}", path.display()))
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> AtelierResult<Self> {
        let config: AtelierConfig =
            toml::from_str(raw).map_err(|e| AtelierError::Config(e.to_string()))?;
        config.orchestrator.validate()?;
        Ok(config)
    }

    /// The `[gateway]` section, validated.
    pub fn gateway(&self) -> AtelierResult<&GatewayConfig> {
        let gateway = self
            .gateway
            .as_ref()
            .ok_or_else(|| AtelierError::Config("missing [gateway] section".into()))?;
        gateway.validate()?;
        Ok(gateway)
    }

    pub fn rate_limit_enabled(&self) -> bool {
        self.security.max_requests_per_second > 0.0
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_rps() -> f64 {
    2.0
}
fn default_burst() -> f64 {
    10.0
}
fn default_request_deadline_secs() -> u64 {
    180
}
fn default_dispatch_budget_ratio() -> f64 {
    0.7
}
fn default_per_agent_timeout_secs() -> u64 {
    60
}
fn default_max_in_flight() -> usize {
    4
}
fn default_confidence() -> f64 {
    atelier_models::payload::DEFAULT_CONFIDENCE
}
fn default_max_description_chars() -> usize {
    20_000
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use atelier_models::AuthScheme;

    const FULL: &str = r#"
[server]
port = 9090

[security]
api_keys = ["studio-key"]
max_requests_per_second = 0.0

[tracing]
log_format = "pretty"
spans_path = "data/spans.jsonl"

[orchestrator]
request_deadline_secs = 90
max_in_flight = 2

[orchestrator.retry]
max_retries = 3
backoff_base_ms = 100

[gateway.reasoning]
endpoint = "https://api.reasoning.test"
model_id = "reasoner-large"
api_key_env = "REASONING_API_KEY"

[gateway.premium]
endpoint = "https://studio.openai.azure.test"
path = "/openai/deployments/premium/chat/completions"
model_id = "premium"
api_key = "inline"
auth = "api_key"
api_version = "2024-06-01"
timeout_secs = 150

[gateway.retry]
max_retries = 0
"#;

    #[test]
    fn test_defaults_from_empty_file() {
        let config = AtelierConfig::parse("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.tracing.log_format, LogFormat::Json);
        assert!(config.security.api_keys.is_empty());
        assert!(config.rate_limit_enabled());
        assert!(config.gateway.is_none());
        assert!(config.gateway().is_err());

        let orch = config.orchestrator.to_orchestrator_config();
        assert_eq!(orch.request_deadline, Duration::from_secs(180));
        assert_eq!(orch.max_in_flight, 4);
        assert_eq!(orch.retry.max_retries, 2);
    }

    #[test]
    fn test_full_file() {
        let config = AtelierConfig::parse(FULL).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "0.0.0.0");
        assert!(!config.rate_limit_enabled());
        assert_eq!(config.tracing.log_format, LogFormat::Pretty);
        assert_eq!(config.tracing.spans_path, Some(PathBuf::from("data/spans.jsonl")));

        let orch = config.orchestrator.to_orchestrator_config();
        assert_eq!(orch.request_deadline, Duration::from_secs(90));
        assert_eq!(orch.max_in_flight, 2);
        assert_eq!(orch.retry.max_retries, 3);
        assert_eq!(orch.retry.backoff_base_ms, 100);
        assert_eq!(orch.retry.backoff_max_ms, 4_000);

        let gateway = config.gateway.as_ref().unwrap();
        assert_eq!(gateway.premium.auth, AuthScheme::ApiKey);
        assert_eq!(gateway.premium.timeout_secs, Some(150));
        assert_eq!(gateway.retry.max_retries, 0);
        assert!(gateway.image.is_none());
    }

    #[test]
    fn test_invalid_ratio_rejected() {
        let err = AtelierConfig::parse("[orchestrator]\ndispatch_budget_ratio = 1.5\n").unwrap_err();
        assert!(err.to_string().contains("dispatch_budget_ratio"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = AtelierConfig::load(Path::new("/nonexistent/atelier.toml")).unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("atelier.toml");
        std::fs::write(&path, "[server]\nhost = \"127.0.0.1\"\n").unwrap();
        let config = AtelierConfig::load(&path).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
    }
}
