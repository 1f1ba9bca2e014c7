use crate::aggregator::aggregate;
use crate::dispatcher::Dispatcher;
use crate::error::{OrchestrationError, ValidationError};
use crate::executor::AgentExecutor;
use crate::monitor::AgentMonitor;
use crate::profiles::select_agents;
use crate::synthesizer::Synthesizer;
use crate::types::{OrchestrationRequest, OrchestrationResult, Stage};
use crate::visual::VisualAugmenter;
use atelier_core::{SpanGuard, TraceId, TraceRecorder};
use atelier_models::payload::DEFAULT_CONFIDENCE;
use atelier_models::{ImageSource, ModelGateway, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Limits and policies for one [`Orchestrator`].
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Hard cap on a whole request.
    pub request_deadline: Duration,
    /// Share of `request_deadline` given to agent dispatch.
    pub dispatch_budget_ratio: f64,
    pub per_agent_timeout: Duration,
    pub max_in_flight: usize,
    /// Confidence for agents that do not report one.
    pub default_confidence: f64,
    pub max_description_chars: usize,
    /// Agent-level retry policy.
    pub retry: RetryPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            request_deadline: Duration::from_secs(180),
            dispatch_budget_ratio: 0.7,
            per_agent_timeout: Duration::from_secs(60),
            max_in_flight: 4,
            default_confidence: DEFAULT_CONFIDENCE,
            max_description_chars: 20_000,
            retry: RetryPolicy::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_request_deadline(mut self, deadline: Duration) -> Self {
        self.request_deadline = deadline;
        self
    }

    pub fn with_dispatch_budget_ratio(mut self, ratio: f64) -> Self {
        self.dispatch_budget_ratio = ratio;
        self
    }

    pub fn with_per_agent_timeout(mut self, timeout: Duration) -> Self {
        self.per_agent_timeout = timeout;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    pub fn with_default_confidence(mut self, confidence: f64) -> Self {
        self.default_confidence = confidence;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Time budget for the dispatch stage. The ratio is clamped into [0, 1].
    pub fn dispatch_budget(&self) -> Duration {
        let ratio = if self.dispatch_budget_ratio.is_finite() {
            self.dispatch_budget_ratio.clamp(0.0, 1.0)
        } else {
            1.0
        };
        self.request_deadline.mul_f64(ratio)
    }
}

/// Sequences one design request through dispatch, aggregation, synthesis
/// and visual augmentation.
///
/// All state is immutable after construction except the agent monitor
/// counters, so one instance serves concurrent requests.
pub struct Orchestrator {
    config: OrchestratorConfig,
    dispatcher: Dispatcher,
    synthesizer: Synthesizer,
    augmenter: VisualAugmenter,
    monitor: Arc<AgentMonitor>,
    recorder: TraceRecorder,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, gateway: Arc<ModelGateway>, recorder: TraceRecorder) -> Self {
        let executor = Arc::new(AgentExecutor::new(
            gateway.clone(),
            config.retry.clone(),
            config.default_confidence,
        ));
        let dispatcher = Dispatcher::new(executor, config.max_in_flight, config.per_agent_timeout);
        Self {
            dispatcher,
            synthesizer: Synthesizer::new(gateway.clone()),
            augmenter: VisualAugmenter::new(gateway),
            monitor: Arc::new(AgentMonitor::new()),
            recorder,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Per-role outcome counters across all requests served.
    pub fn monitor(&self) -> Arc<AgentMonitor> {
        self.monitor.clone()
    }

    pub fn recorder(&self) -> &TraceRecorder {
        &self.recorder
    }

    /// Intake checks. Unknown `type` values never get this far: they fail
    /// at decode time.
    pub fn validate(&self, request: &OrchestrationRequest) -> Result<(), ValidationError> {
        let description = request.description.trim();
        if description.is_empty() {
            return Err(ValidationError::EmptyDescription);
        }
        let len = description.chars().count();
        if len > self.config.max_description_chars {
            return Err(ValidationError::DescriptionTooLong {
                len,
                max: self.config.max_description_chars,
            });
        }
        match &request.reference_image {
            Some(ImageSource::Url(url)) => {
                let url = url.trim();
                let scheme_ok = url.starts_with("http://") || url.starts_with("https://");
                let has_host = url.split("://").nth(1).is_some_and(|rest| !rest.is_empty());
                if !scheme_ok || !has_host {
                    return Err(ValidationError::InvalidReferenceUrl(url.to_string()));
                }
            }
            Some(ImageSource::Base64(data)) if data.trim().is_empty() => {
                return Err(ValidationError::EmptyReferenceImage);
            }
            _ => {}
        }
        Ok(())
    }

    pub async fn orchestrate(
        &self,
        request: OrchestrationRequest,
    ) -> Result<OrchestrationResult, OrchestrationError> {
        self.orchestrate_with_cancel(request, CancellationToken::new()).await
    }

    /// Like [`Orchestrator::orchestrate`]; cancelling `cancel` ends dispatch
    /// early exactly as the dispatch deadline would.
    pub async fn orchestrate_with_cancel(
        &self,
        request: OrchestrationRequest,
        cancel: CancellationToken,
    ) -> Result<OrchestrationResult, OrchestrationError> {
        let started = Instant::now();
        let hard_deadline = started + self.config.request_deadline;
        let dispatch_deadline = started + self.config.dispatch_budget();

        if let Err(e) = self.validate(&request) {
            warn!(stage = "intake", error = %e, "Request rejected");
            return Err(e.into());
        }

        let trace_id = TraceId::new();
        let mut stages = vec![Stage::Intake];
        let mut root = self
            .recorder
            .start("orchestrate", trace_id)
            .with_attribute("request_type", request.request_type.to_string())
            .with_attribute("complexity", request.complexity.to_string())
            .with_attribute("generate_images", request.generate_images);

        let roles = select_agents(request.request_type, request.complexity);
        info!(
            trace_id = %trace_id,
            stage = "intake",
            request_type = %request.request_type,
            complexity = %request.complexity,
            agents = roles.len(),
            "Orchestrator: starting pipeline"
        );

        if Instant::now() >= dispatch_deadline || cancel.is_cancelled() {
            error!(trace_id = %trace_id, stage = "dispatching", "Deadline spent before any agent started");
            stages.push(Stage::Failed);
            record_trail(&mut root, Stage::Dispatching, &stages);
            root.fail("deadline exceeded before dispatch");
            return Err(OrchestrationError::DeadlineExceeded {
                stage: Stage::Dispatching,
                agent_results: Vec::new(),
                trace_id,
            });
        }

        // Dispatching
        stages.push(Stage::Dispatching);
        let request = Arc::new(request);
        let results = self
            .dispatcher
            .dispatch(&roles, request.clone(), dispatch_deadline, &root, &cancel)
            .await;
        self.monitor.record_results(&results).await;

        // Aggregating
        stages.push(Stage::Aggregating);
        let mut aggregate_span = root.child("aggregate");
        let context = aggregate(results);
        aggregate_span.set_attribute("overall_confidence", context.overall_confidence);
        aggregate_span.set_attribute("succeeded", context.succeeded());
        aggregate_span.ok();

        // Synthesizing
        stages.push(Stage::Synthesizing);
        let narrative = match self
            .synthesizer
            .synthesize(&context, &request, hard_deadline, &root)
            .await
        {
            Ok(narrative) => narrative,
            Err(e) => {
                let deadline_spent = Instant::now() >= hard_deadline;
                error!(
                    trace_id = %trace_id,
                    stage = "synthesizing",
                    error = %e,
                    deadline_spent,
                    "Orchestration failed"
                );
                stages.push(Stage::Failed);
                record_trail(&mut root, Stage::Synthesizing, &stages);
                root.fail(&e);
                return Err(if deadline_spent {
                    OrchestrationError::DeadlineExceeded {
                        stage: Stage::Synthesizing,
                        agent_results: context.results,
                        trace_id,
                    }
                } else {
                    OrchestrationError::SynthesisFailed {
                        reason: e.to_string(),
                        agent_results: context.results,
                        trace_id,
                    }
                });
            }
        };

        // Augmenting
        let mut warnings = Vec::new();
        let mut image = None;
        let mut vision_analysis = None;
        if VisualAugmenter::is_enabled_for(&request) {
            stages.push(Stage::Augmenting);
            let outcome = self
                .augmenter
                .augment(&narrative, &request, hard_deadline, &root)
                .await;
            image = outcome.image;
            vision_analysis = outcome.vision_analysis;
            warnings.extend(outcome.errors.iter().map(ToString::to_string));
        }

        stages.push(Stage::Completed);
        let degraded = context.has_failures() || !warnings.is_empty();
        let duration_total_ms = started.elapsed().as_millis() as u64;

        record_trail(&mut root, Stage::Completed, &stages);
        root.set_attribute("degraded", degraded);
        root.set_attribute("overall_confidence", context.overall_confidence);
        root.set_attribute("duration_ms", duration_total_ms);
        root.ok();

        info!(
            trace_id = %trace_id,
            stage = "completed",
            degraded,
            overall_confidence = context.overall_confidence,
            latency_ms = duration_total_ms,
            "Orchestrator: pipeline completed"
        );

        Ok(OrchestrationResult {
            narrative,
            agent_results: context,
            image,
            vision_analysis,
            trace_id,
            duration_total_ms,
            degraded,
            warnings,
            stages,
        })
    }
}

/// Stamp the root span with the last stage reached, the terminal state and
/// the full stage trail.
fn record_trail(root: &mut SpanGuard, stage: Stage, stages: &[Stage]) {
    let state = stages.last().copied().unwrap_or(Stage::Intake);
    root.set_attribute("stage", stage.to_string());
    root.set_attribute("state", state.to_string());
    root.set_attribute(
        "stages",
        stages.iter().map(ToString::to_string).collect::<Vec<_>>(),
    );
}
