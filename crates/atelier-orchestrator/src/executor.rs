use crate::types::{AgentResult, AgentTask};
use atelier_core::SpanGuard;
use atelier_models::{retry_transient, BackendKind, ModelGateway, ModelRequest, ModelResponse, RetryPolicy};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

const RESPONSE_FORMAT: &str = r#"Respond with a single JSON object:
{"analysis": "<your findings>", "recommendations": ["<item>", ...], "confidence": <number between 0 and 1>}"#;

/// Runs one agent against the reasoning backend.
pub struct AgentExecutor {
    gateway: Arc<ModelGateway>,
    retry: RetryPolicy,
    default_confidence: f64,
}

impl AgentExecutor {
    pub fn new(gateway: Arc<ModelGateway>, retry: RetryPolicy, default_confidence: f64) -> Self {
        Self {
            gateway,
            retry,
            default_confidence: default_confidence.clamp(0.0, 1.0),
        }
    }

    /// Execute `task`, closing `span` with the outcome.
    ///
    /// Never fails: every outcome is folded into the returned [`AgentResult`].
    /// If the future is dropped mid-call the span closes as cancelled.
    /// `attempts` holds the number of calls started so far, so a caller that
    /// abandons the future can still report it.
    pub async fn execute(&self, task: &AgentTask, mut span: SpanGuard, attempts: &AtomicU32) -> AgentResult {
        let profile = task.role.profile();
        span.set_attribute("agent", task.role.to_string());
        span.set_attribute("index", task.index);
        span.set_attribute("token_budget", task.token_budget);

        let request = ModelRequest::chat(system_prompt(task), user_prompt(task))
            .with_max_tokens(task.token_budget);

        let started = Instant::now();
        let outcome = {
            let gateway = &self.gateway;
            let request = &request;
            let span = &span;
            let per_call = gateway.backend_timeout(BackendKind::Reasoning);
            let deadline = task.deadline;
            retry_transient(&self.retry, deadline, move |attempt| {
                attempts.store(attempt + 1, Ordering::SeqCst);
                let timeout = deadline
                    .saturating_duration_since(Instant::now())
                    .min(per_call);
                gateway.call(BackendKind::Reasoning, request, timeout, span)
            })
            .await
        };
        let latency_ms = started.elapsed().as_millis() as u64;
        let attempts = outcome.attempts;
        span.set_attribute("latency_ms", latency_ms);
        span.set_attribute("attempts", attempts);

        match outcome.result {
            Ok(response) => {
                let (content, confidence) = match response {
                    ModelResponse::Text {
                        content,
                        confidence,
                        ..
                    } => (content, confidence),
                    other => (other.into_text(), None),
                };
                let confidence = confidence.unwrap_or(self.default_confidence);
                let result = AgentResult::success(task.role, content, confidence, latency_ms, attempts);

                info!(
                    trace_id = %task.trace_id,
                    agent = %task.role,
                    latency_ms,
                    attempts,
                    confidence = result.confidence,
                    "Agent completed"
                );
                span.set_attribute("status", "success");
                span.set_attribute("confidence", result.confidence);
                span.ok();
                result
            }
            Err(e) => {
                let result = if e.is_timeout() {
                    AgentResult::timed_out(task.role, e.to_string(), latency_ms, attempts)
                } else {
                    AgentResult::failed(task.role, e.to_string(), latency_ms, attempts)
                };

                warn!(
                    trace_id = %task.trace_id,
                    agent = %task.role,
                    name = profile.name,
                    latency_ms,
                    attempts,
                    status = %result.status,
                    error = %e,
                    "Agent did not succeed"
                );
                span.set_attribute("status", result.status.to_string());
                span.fail(&e);
                result
            }
        }
    }
}

fn system_prompt(task: &AgentTask) -> String {
    format!("{}\n\n{RESPONSE_FORMAT}", task.role.profile().system_prompt)
}

/// The user message: role line, request type and complexity, description,
/// then the context map in key order.
pub fn user_prompt(task: &AgentTask) -> String {
    let profile = task.role.profile();
    let request = &task.request;
    let mut prompt = format!(
        "You are contributing as the {} ({}).\nRequest type: {}\nComplexity: {}\n\nDescription:\n{}\n",
        profile.name,
        task.role,
        request.request_type.label(),
        request.complexity,
        request.description.trim(),
    );

    if !request.context.is_empty() {
        prompt.push_str("\nContext:\n");
        for (key, value) in &request.context {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let _ = writeln!(prompt, "- {key}: {value}");
        }
    }

    if request.reference_image.is_some() {
        prompt.push_str("\nA reference image was supplied and is analyzed separately.\n");
    }

    prompt
}
