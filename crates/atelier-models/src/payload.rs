use serde::{Deserialize, Serialize};

/// Confidence reported when a model response carries none.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// A reference image, either remote or inline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSource {
    /// Publicly reachable http(s) URL.
    Url(String),
    /// Base64-encoded image bytes, with or without a `data:` prefix.
    Base64(String),
}

impl ImageSource {
    /// URL form accepted by OpenAI-compatible `image_url` content parts.
    pub fn as_data_url(&self) -> String {
        match self {
            ImageSource::Url(url) => url.clone(),
            ImageSource::Base64(data) if data.starts_with("data:") => data.clone(),
            ImageSource::Base64(data) => format!("data:image/png;base64,{data}"),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ImageSource::Url(s) | ImageSource::Base64(s) => s.trim().is_empty(),
        }
    }
}

/// A normalized request to one backend.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelRequest {
    /// Text completion with a system and user prompt.
    Chat {
        system_prompt: String,
        user_prompt: String,
        /// Overrides the backend's configured `max_tokens`.
        max_tokens: Option<u32>,
    },
    /// Image generation from a text prompt.
    GenerateImage {
        prompt: String,
        reference_image: Option<ImageSource>,
    },
    /// Vision analysis of a reference image.
    AnalyzeImage {
        image: ImageSource,
        instructions: String,
    },
}

impl ModelRequest {
    pub fn chat(system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        ModelRequest::Chat {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            max_tokens: None,
        }
    }

    /// Set the token limit on a chat request. No-op for other variants.
    pub fn with_max_tokens(mut self, limit: u32) -> Self {
        if let ModelRequest::Chat { max_tokens, .. } = &mut self {
            *max_tokens = Some(limit);
        }
        self
    }

    /// Short operation name recorded on gateway spans.
    pub fn operation(&self) -> &'static str {
        match self {
            ModelRequest::Chat { .. } => "chat",
            ModelRequest::GenerateImage { .. } => "generate_image",
            ModelRequest::AnalyzeImage { .. } => "analyze_image",
        }
    }
}

/// A normalized backend response.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelResponse {
    Text {
        content: String,
        /// Self-reported confidence in `[0, 1]`, when the model gave one.
        confidence: Option<f64>,
        tokens_used: Option<u64>,
    },
    Image {
        url: String,
    },
    Analysis {
        summary: String,
        details: serde_json::Value,
    },
}

impl ModelResponse {
    /// Text response with confidence extracted from the content.
    pub fn text(content: impl Into<String>) -> Self {
        let content = content.into();
        let confidence = extract_confidence(&content);
        ModelResponse::Text {
            content,
            confidence,
            tokens_used: None,
        }
    }

    /// The textual payload of any variant: content, URL or summary.
    pub fn into_text(self) -> String {
        match self {
            ModelResponse::Text { content, .. } => content,
            ModelResponse::Image { url } => url,
            ModelResponse::Analysis { summary, .. } => summary,
        }
    }
}

/// Read a self-reported confidence from model output.
///
/// Accepts a JSON object with a numeric `confidence` field (optionally inside
/// a fenced code block) or a trailing line such as `Confidence: 0.8`.
/// Percentages in `(1, 100]` are scaled down. The result is clamped to
/// `[0, 1]`; anything unparseable yields `None`.
pub fn extract_confidence(content: &str) -> Option<f64> {
    let body = strip_code_fence(content.trim());
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(value) = map.get("confidence").and_then(confidence_value) {
            return Some(normalize(value));
        }
    }

    content
        .lines()
        .rev()
        .map(|line| line.trim().trim_start_matches(['*', '-', '#', ' ']))
        .filter(|line| !line.is_empty())
        .take(3)
        .find_map(|line| {
            let lower = line.to_ascii_lowercase();
            let rest = lower.strip_prefix("confidence")?;
            let rest = rest.trim_start_matches(['*', ' ']).strip_prefix(':')?;
            let number: String = rest
                .trim_start_matches(['*', ' '])
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            number.parse::<f64>().ok().map(normalize)
        })
}

fn confidence_value(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().trim_end_matches('%').parse().ok(),
        _ => None,
    }
}

fn normalize(value: f64) -> f64 {
    if !value.is_finite() {
        return DEFAULT_CONFIDENCE;
    }
    let scaled = if value > 1.0 && value <= 100.0 {
        value / 100.0
    } else {
        value
    };
    scaled.clamp(0.0, 1.0)
}

fn strip_code_fence(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_from_json_body() {
        let content = r#"{"summary": "Open plan", "confidence": 0.82}"#;
        assert_eq!(extract_confidence(content), Some(0.82));
    }

    #[test]
    fn test_confidence_from_fenced_json() {
        let content = "```json\n{\"confidence\": \"90%\", \"notes\": []}\n```";
        assert_eq!(extract_confidence(content), Some(0.9));
    }

    #[test]
    fn test_confidence_from_trailing_line() {
        let content = "Use cross-laminated timber for the upper floors.\n\n**Confidence:** 0.7";
        assert_eq!(extract_confidence(content), Some(0.7));
    }

    #[test]
    fn test_confidence_is_clamped() {
        assert_eq!(extract_confidence(r#"{"confidence": 250}"#), Some(1.0));
        assert_eq!(extract_confidence(r#"{"confidence": -3}"#), Some(0.0));
        assert_eq!(extract_confidence("confidence: 85"), Some(0.85));
    }

    #[test]
    fn test_confidence_absent() {
        assert_eq!(extract_confidence("A plain narrative with no score."), None);
        assert_eq!(extract_confidence(r#"{"confidence": null}"#), None);
    }

    #[test]
    fn test_image_source_data_url() {
        assert_eq!(
            ImageSource::Base64("AAAA".to_string()).as_data_url(),
            "data:image/png;base64,AAAA"
        );
        assert_eq!(
            ImageSource::Base64("data:image/jpeg;base64,BBBB".to_string()).as_data_url(),
            "data:image/jpeg;base64,BBBB"
        );
        assert_eq!(
            ImageSource::Url("https://img.example.com/a.png".to_string()).as_data_url(),
            "https://img.example.com/a.png"
        );
    }

    #[test]
    fn test_image_source_serialization() {
        let json = serde_json::to_value(ImageSource::Url("https://x/y.png".to_string())).unwrap();
        assert_eq!(json, serde_json::json!({"url": "https://x/y.png"}));
        assert!(ImageSource::Base64("  ".to_string()).is_empty());
    }

    #[test]
    fn test_with_max_tokens_only_touches_chat() {
        let req = ModelRequest::chat("sys", "user").with_max_tokens(800);
        assert!(matches!(req, ModelRequest::Chat { max_tokens: Some(800), .. }));
        assert_eq!(req.operation(), "chat");

        let img = ModelRequest::GenerateImage {
            prompt: "p".to_string(),
            reference_image: None,
        }
        .with_max_tokens(800);
        assert_eq!(img.operation(), "generate_image");
    }
}
