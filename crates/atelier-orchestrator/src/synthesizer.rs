use crate::types::{AggregatedContext, OrchestrationRequest};
use atelier_core::SpanGuard;
use atelier_models::{BackendKind, GatewayError, ModelGateway, ModelRequest};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

const SYNTHESIS_PROMPT: &str = r#"You are the lead design partner of a multidisciplinary studio. Several specialists have analyzed the same client request. Compose their contributions into one coherent design response.

- Reconcile conflicts explicitly and say which recommendation you adopt.
- Keep the specialists' concrete figures, materials and constraints.
- Do not invent input from specialists who failed to report.
- Close with prioritized next steps."#;

/// Composes the final narrative with the premium backend.
pub struct Synthesizer {
    gateway: Arc<ModelGateway>,
}

impl Synthesizer {
    pub fn new(gateway: Arc<ModelGateway>) -> Self {
        Self { gateway }
    }

    /// One logical premium call, retried by the gateway's own policy.
    /// An empty narrative is a permanent failure.
    pub async fn synthesize(
        &self,
        context: &AggregatedContext,
        request: &OrchestrationRequest,
        deadline: Instant,
        parent: &SpanGuard,
    ) -> Result<String, GatewayError> {
        let mut span = parent.child("synthesize");
        span.set_attribute("agents_succeeded", context.succeeded());
        span.set_attribute("overall_confidence", context.overall_confidence);

        let model_request = ModelRequest::chat(SYNTHESIS_PROMPT, synthesis_prompt(context, request));
        let outcome = self
            .gateway
            .call_with_retry(BackendKind::Premium, &model_request, deadline, &span)
            .await;
        span.set_attribute("attempts", outcome.attempts);

        let result = outcome.result.and_then(|response| {
            let narrative = response.into_text().trim().to_string();
            if narrative.is_empty() {
                Err(GatewayError::permanent(BackendKind::Premium, "empty narrative"))
            } else {
                Ok(narrative)
            }
        });

        match &result {
            Ok(narrative) => {
                info!(
                    trace_id = %span.trace_id(),
                    stage = "synthesizing",
                    attempts = outcome.attempts,
                    chars = narrative.len(),
                    "Synthesis completed"
                );
                span.set_attribute("narrative_chars", narrative.len());
                span.ok();
            }
            Err(e) => {
                warn!(
                    trace_id = %span.trace_id(),
                    stage = "synthesizing",
                    attempts = outcome.attempts,
                    error = %e,
                    "Synthesis failed"
                );
                span.fail(e);
            }
        }
        result
    }
}

fn synthesis_prompt(context: &AggregatedContext, request: &OrchestrationRequest) -> String {
    let mut prompt = format!(
        "Client request ({}, {} complexity):\n{}\n",
        request.request_type.label(),
        request.complexity,
        request.description.trim()
    );
    if !request.context.is_empty() {
        let context_json = serde_json::to_string(&request.context).unwrap_or_default();
        prompt.push_str(&format!("Project context: {context_json}\n"));
    }
    prompt.push_str("\nSpecialist contributions:\n\n");
    prompt.push_str(&context.render());
    prompt
}
