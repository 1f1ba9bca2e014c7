use crate::types::{GeneratedImage, OrchestrationRequest, VisionAnalysis};
use atelier_core::SpanGuard;
use atelier_models::{BackendKind, GatewayError, ImageSource, ModelGateway, ModelRequest, ModelResponse};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

/// Longest image prompt sent to the generator.
pub const MAX_IMAGE_PROMPT_CHARS: usize = 1_000;

const VISION_INSTRUCTIONS: &str = "You are an architectural vision analyst. Describe the reference image: \
architectural style, massing, materials, color palette, lighting and notable features. \
Respond with a JSON object with keys style, materials, palette, features and summary.";

const DEADLINE_SPENT: &str = "request deadline spent before the call";

/// Failure of an optional visual sub-stage. Masked: reported as a warning.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AugmentationError {
    #[error("image generation failed: {0}")]
    ImageGeneration(String),
    #[error("vision analysis failed: {0}")]
    VisionAnalysis(String),
}

/// What the visual stage produced.
#[derive(Debug, Default)]
pub struct AugmentationOutcome {
    pub image: Option<GeneratedImage>,
    pub vision_analysis: Option<VisionAnalysis>,
    pub errors: Vec<AugmentationError>,
}

/// Optional image generation and reference-image analysis.
pub struct VisualAugmenter {
    gateway: Arc<ModelGateway>,
}

impl VisualAugmenter {
    pub fn new(gateway: Arc<ModelGateway>) -> Self {
        Self { gateway }
    }

    /// Whether `request` enables any sub-stage.
    pub fn is_enabled_for(request: &OrchestrationRequest) -> bool {
        request.generate_images || request.wants_vision()
    }

    /// Run the enabled sub-stages concurrently. Disabled sub-stages open no
    /// span and make no call.
    pub async fn augment(
        &self,
        narrative: &str,
        request: &OrchestrationRequest,
        deadline: Instant,
        parent: &SpanGuard,
    ) -> AugmentationOutcome {
        let image = async {
            if request.generate_images {
                Some(self.generate_image(narrative, request, deadline, parent).await)
            } else {
                None
            }
        };
        let vision = async {
            match &request.reference_image {
                Some(reference) if request.analyze_reference => {
                    Some(self.analyze_reference(reference, deadline, parent).await)
                }
                _ => None,
            }
        };

        let (image, vision) = tokio::join!(image, vision);

        let mut outcome = AugmentationOutcome::default();
        match image {
            Some(Ok(generated)) => outcome.image = Some(generated),
            Some(Err(e)) => outcome.errors.push(e),
            None => {}
        }
        match vision {
            Some(Ok(analysis)) => outcome.vision_analysis = Some(analysis),
            Some(Err(e)) => outcome.errors.push(e),
            None => {}
        }
        outcome
    }

    async fn generate_image(
        &self,
        narrative: &str,
        request: &OrchestrationRequest,
        deadline: Instant,
        parent: &SpanGuard,
    ) -> Result<GeneratedImage, AugmentationError> {
        let mut span = parent.child("augment.image");
        if Instant::now() >= deadline {
            span.cancel(DEADLINE_SPENT);
            return Err(AugmentationError::ImageGeneration(DEADLINE_SPENT.to_string()));
        }
        let prompt = image_prompt(narrative, request);
        span.set_attribute("prompt_chars", prompt.chars().count());
        span.set_attribute("has_reference", request.reference_image.is_some());

        let model_request = ModelRequest::GenerateImage {
            prompt,
            reference_image: request.reference_image.clone(),
        };
        let outcome = self
            .gateway
            .call_with_retry(BackendKind::ImageGeneration, &model_request, deadline, &span)
            .await;

        let result = outcome.result.and_then(|response| match response {
            ModelResponse::Image { url } => Ok(GeneratedImage { url }),
            other => Err(GatewayError::permanent(
                BackendKind::ImageGeneration,
                format!("unexpected response: {other:?}"),
            )),
        });

        match result {
            Ok(image) => {
                info!(trace_id = %span.trace_id(), stage = "augmenting", "Image generated");
                span.ok();
                Ok(image)
            }
            Err(e) => {
                warn!(trace_id = %span.trace_id(), stage = "augmenting", error = %e, "Image generation failed");
                span.fail(&e);
                Err(AugmentationError::ImageGeneration(e.to_string()))
            }
        }
    }

    async fn analyze_reference(
        &self,
        reference: &ImageSource,
        deadline: Instant,
        parent: &SpanGuard,
    ) -> Result<VisionAnalysis, AugmentationError> {
        let mut span = parent.child("augment.vision");
        if Instant::now() >= deadline {
            span.cancel(DEADLINE_SPENT);
            return Err(AugmentationError::VisionAnalysis(DEADLINE_SPENT.to_string()));
        }
        span.set_attribute(
            "source",
            match reference {
                ImageSource::Url(_) => "url",
                ImageSource::Base64(_) => "base64",
            },
        );

        let model_request = ModelRequest::AnalyzeImage {
            image: reference.clone(),
            instructions: VISION_INSTRUCTIONS.to_string(),
        };
        let outcome = self
            .gateway
            .call_with_retry(BackendKind::Vision, &model_request, deadline, &span)
            .await;

        let result = outcome.result.map(|response| match response {
            ModelResponse::Analysis { summary, details } => VisionAnalysis { summary, details },
            other => VisionAnalysis {
                summary: other.into_text(),
                details: serde_json::json!({}),
            },
        });

        match result {
            Ok(analysis) => {
                info!(trace_id = %span.trace_id(), stage = "augmenting", "Reference image analyzed");
                span.ok();
                Ok(analysis)
            }
            Err(e) => {
                warn!(trace_id = %span.trace_id(), stage = "augmenting", error = %e, "Vision analysis failed");
                span.fail(&e);
                Err(AugmentationError::VisionAnalysis(e.to_string()))
            }
        }
    }
}

/// The explicit `imagePrompt`, or one derived from the description and
/// narrative. Always at most [`MAX_IMAGE_PROMPT_CHARS`] characters.
pub fn image_prompt(narrative: &str, request: &OrchestrationRequest) -> String {
    let prompt = match request.image_prompt.as_deref().map(str::trim) {
        Some(explicit) if !explicit.is_empty() => explicit.to_string(),
        _ => format!(
            "Photorealistic architectural visualization. {}. Design intent: {}",
            request.description.trim().trim_end_matches('.'),
            narrative.split_whitespace().collect::<Vec<_>>().join(" ")
        ),
    };
    prompt.chars().take(MAX_IMAGE_PROMPT_CHARS).collect()
}
