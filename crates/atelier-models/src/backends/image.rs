use super::{HttpTarget, ModelBackend};
use crate::config::{BackendConfig, BackendKind};
use crate::error::GatewayError;
use crate::payload::{ModelRequest, ModelResponse};
use async_trait::async_trait;
use atelier_core::AtelierResult;

/// OpenAI-compatible `images/generations` backend.
///
/// Sends `{prompt, size, n: 1, model}` and returns the first image as a URL,
/// or as a `data:` URL when the provider answers with `b64_json`.
pub struct ImageBackend {
    target: HttpTarget,
}

impl ImageBackend {
    pub fn new(config: BackendConfig, http: reqwest::Client) -> AtelierResult<Self> {
        Ok(Self {
            target: HttpTarget::new(BackendKind::ImageGeneration, config, http)?,
        })
    }

    fn body(&self, prompt: &str, reference: Option<&crate::ImageSource>) -> serde_json::Value {
        let config = &self.target.config;
        let mut body = serde_json::json!({
            "prompt": prompt,
            "size": config.image_size,
            "n": 1,
            "model": config.model_id,
        });
        if let Some(image) = reference {
            body["image"] = serde_json::json!(image.as_data_url());
        }
        body
    }
}

#[async_trait]
impl ModelBackend for ImageBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::ImageGeneration
    }

    fn model_id(&self) -> &str {
        &self.target.config.model_id
    }

    async fn invoke(&self, request: &ModelRequest) -> Result<ModelResponse, GatewayError> {
        let ModelRequest::GenerateImage {
            prompt,
            reference_image,
        } = request
        else {
            return Err(GatewayError::permanent(
                BackendKind::ImageGeneration,
                format!("image backend cannot handle '{}'", request.operation()),
            ));
        };

        let body = self.body(prompt, reference_image.as_ref());
        let resp = self.target.post_json(&body).await?;
        parse_image_response(&resp).map(|url| ModelResponse::Image { url })
    }
}

/// Extract `data[0].url`, falling back to `data[0].b64_json`.
pub fn parse_image_response(body: &serde_json::Value) -> Result<String, GatewayError> {
    let first = &body["data"][0];
    if let Some(url) = first["url"].as_str().filter(|u| !u.is_empty()) {
        return Ok(url.to_string());
    }
    if let Some(b64) = first["b64_json"].as_str().filter(|b| !b.is_empty()) {
        return Ok(format!("data:image/png;base64,{b64}"));
    }
    Err(GatewayError::permanent(
        BackendKind::ImageGeneration,
        "malformed response: no image in data[0]",
    ))
}
