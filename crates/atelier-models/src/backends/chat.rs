use super::{HttpTarget, ModelBackend};
use crate::config::{BackendConfig, BackendKind};
use crate::error::GatewayError;
use crate::payload::{extract_confidence, ImageSource, ModelRequest, ModelResponse};
use async_trait::async_trait;
use atelier_core::AtelierResult;

const VISION_USER_TEXT: &str = "Analyze this reference image.";

/// OpenAI-compatible chat completions backend.
///
/// Serves the reasoning and premium slots with plain chat requests, and the
/// vision slot with `image_url` content parts. Works with OpenAI, Azure
/// OpenAI (`auth = "api_key"` plus `api_version`), OpenRouter, Groq, Ollama
/// and anything else speaking the same API.
pub struct ChatBackend {
    target: HttpTarget,
}

impl ChatBackend {
    pub fn new(
        kind: BackendKind,
        config: BackendConfig,
        http: reqwest::Client,
    ) -> AtelierResult<Self> {
        Ok(Self {
            target: HttpTarget::new(kind, config, http)?,
        })
    }

    fn chat_body(&self, system_prompt: &str, user_prompt: &str, max_tokens: Option<u32>) -> serde_json::Value {
        let config = &self.target.config;
        serde_json::json!({
            "model": config.model_id,
            "max_tokens": max_tokens.unwrap_or(config.max_tokens),
            "temperature": config.temperature,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_prompt },
            ],
        })
    }

    fn vision_body(&self, image: &ImageSource, instructions: &str) -> serde_json::Value {
        let config = &self.target.config;
        serde_json::json!({
            "model": config.model_id,
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
            "messages": [
                { "role": "system", "content": instructions },
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": VISION_USER_TEXT },
                        { "type": "image_url", "image_url": { "url": image.as_data_url() } },
                    ],
                },
            ],
        })
    }
}

#[async_trait]
impl ModelBackend for ChatBackend {
    fn kind(&self) -> BackendKind {
        self.target.kind
    }

    fn model_id(&self) -> &str {
        &self.target.config.model_id
    }

    async fn invoke(&self, request: &ModelRequest) -> Result<ModelResponse, GatewayError> {
        match request {
            ModelRequest::Chat {
                system_prompt,
                user_prompt,
                max_tokens,
            } => {
                let body = self.chat_body(system_prompt, user_prompt, *max_tokens);
                let resp = self.target.post_json(&body).await?;
                let (content, tokens_used) = parse_chat_response(self.target.kind, &resp)?;
                Ok(ModelResponse::Text {
                    confidence: extract_confidence(&content),
                    content,
                    tokens_used,
                })
            }
            ModelRequest::AnalyzeImage {
                image,
                instructions,
            } => {
                let body = self.vision_body(image, instructions);
                let resp = self.target.post_json(&body).await?;
                let (summary, _) = parse_chat_response(self.target.kind, &resp)?;
                let details = serde_json::from_str::<serde_json::Value>(summary.trim())
                    .ok()
                    .filter(serde_json::Value::is_object)
                    .unwrap_or_else(|| serde_json::json!({}));
                Ok(ModelResponse::Analysis { summary, details })
            }
            ModelRequest::GenerateImage { .. } => Err(GatewayError::permanent(
                self.target.kind,
                "chat backend cannot generate images",
            )),
        }
    }
}

/// Extract `choices[0].message.content` and `usage.total_tokens`.
pub fn parse_chat_response(
    kind: BackendKind,
    body: &serde_json::Value,
) -> Result<(String, Option<u64>), GatewayError> {
    let content = body["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| {
            GatewayError::permanent(kind, "malformed response: missing choices[0].message.content")
        })?
        .to_string();
    let tokens_used = body["usage"]["total_tokens"].as_u64();
    Ok((content, tokens_used))
}
