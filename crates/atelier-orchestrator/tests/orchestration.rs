#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use atelier_core::{MemorySink, SpanStatus, TraceRecorder};
use atelier_models::{BackendKind, GatewayError, ImageSource, ModelBackend, ModelGateway, ModelRequest, ModelResponse, RetryPolicy};
use atelier_orchestrator::{
    select_agents, AgentRole, AgentStatus, Complexity, OrchestrationError, OrchestrationRequest,
    Orchestrator, OrchestratorConfig, RequestType, Stage,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
struct Step {
    delay: Duration,
    result: Result<ModelResponse, GatewayError>,
}

impl Step {
    fn ok(response: ModelResponse) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Ok(response),
        }
    }

    fn err(error: GatewayError) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Err(error),
        }
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// In-process backend with a per-role script. Agents are told apart by the
/// "(role)" marker in their user prompt.
struct ScriptedBackend {
    kind: BackendKind,
    default: Step,
    per_role: HashMap<AgentRole, Step>,
    calls: AtomicU32,
    role_calls: Mutex<HashMap<AgentRole, u32>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedBackend {
    fn new(kind: BackendKind, default: Step) -> Self {
        Self {
            kind,
            default,
            per_role: HashMap::new(),
            calls: AtomicU32::new(0),
            role_calls: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn reasoning() -> Self {
        Self::new(
            BackendKind::Reasoning,
            Step::ok(ModelResponse::text("Specialist analysis.\nconfidence: 0.8")),
        )
    }

    fn premium() -> Self {
        Self::new(
            BackendKind::Premium,
            Step::ok(ModelResponse::text("A unified design narrative.")),
        )
    }

    fn with_role(mut self, role: AgentRole, step: Step) -> Self {
        self.per_role.insert(role, step);
        self
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn role_calls(&self, role: AgentRole) -> u32 {
        self.role_calls.lock().get(&role).copied().unwrap_or(0)
    }

    fn role_of(request: &ModelRequest) -> Option<AgentRole> {
        let ModelRequest::Chat { user_prompt, .. } = request else {
            return None;
        };
        AgentRole::ALL
            .into_iter()
            .find(|role| user_prompt.contains(&format!("({role})")))
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn model_id(&self) -> &str {
        "scripted"
    }

    async fn invoke(&self, request: &ModelRequest) -> Result<ModelResponse, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let role = Self::role_of(request);
        if let Some(role) = role {
            *self.role_calls.lock().entry(role).or_default() += 1;
        }
        let step = role
            .and_then(|r| self.per_role.get(&r))
            .unwrap_or(&self.default)
            .clone();

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(step.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        step.result
    }
}

struct Harness {
    orchestrator: Orchestrator,
    sink: Arc<MemorySink>,
    reasoning: Arc<ScriptedBackend>,
    premium: Arc<ScriptedBackend>,
}

fn harness_with(
    config: OrchestratorConfig,
    reasoning: ScriptedBackend,
    premium: ScriptedBackend,
    extra: Vec<Arc<dyn ModelBackend>>,
) -> Harness {
    let reasoning = Arc::new(reasoning);
    let premium = Arc::new(premium);
    let mut gateway = ModelGateway::new()
        .with_backend(reasoning.clone())
        .with_backend(premium.clone())
        .with_retry_policy(RetryPolicy::immediate(1));
    for backend in extra {
        gateway = gateway.with_backend(backend);
    }
    let sink = Arc::new(MemorySink::new());
    let orchestrator = Orchestrator::new(
        config,
        Arc::new(gateway),
        TraceRecorder::new(sink.clone()),
    );
    Harness {
        orchestrator,
        sink,
        reasoning,
        premium,
    }
}

fn harness(reasoning: ScriptedBackend) -> Harness {
    harness_with(
        OrchestratorConfig::default().with_retry(RetryPolicy::immediate(2)),
        reasoning,
        ScriptedBackend::premium(),
        Vec::new(),
    )
}

fn request(complexity: Complexity) -> OrchestrationRequest {
    OrchestrationRequest::new(
        RequestType::ArchitecturalDesign,
        complexity,
        "A two-storey community library with a reading garden",
    )
    .with_context("site", "corner lot, south-facing")
}

#[tokio::test]
async fn test_one_result_per_agent_in_tier() {
    for complexity in Complexity::ALL {
        let h = harness(ScriptedBackend::reasoning());
        let result = h.orchestrator.orchestrate(request(complexity)).await.unwrap();
        assert_eq!(result.agent_results.results.len(), complexity.agent_count());
    }
}

#[tokio::test]
async fn test_happy_path_shape_and_spans() {
    let h = harness(ScriptedBackend::reasoning());
    let result = h.orchestrator.orchestrate(request(Complexity::Medium)).await.unwrap();

    assert_eq!(result.narrative, "A unified design narrative.");
    assert!(!result.degraded);
    assert!(result.warnings.is_empty());
    assert!(result.image.is_none());
    assert!((result.agent_results.overall_confidence - 0.8).abs() < 1e-9);
    assert_eq!(
        result.stages,
        vec![
            Stage::Intake,
            Stage::Dispatching,
            Stage::Aggregating,
            Stage::Synthesizing,
            Stage::Completed
        ]
    );

    let spans = h.sink.for_trace(result.trace_id);
    assert_eq!(spans.len(), h.sink.len());
    let orchestrate = &h.sink.named("orchestrate")[0];
    assert_eq!(orchestrate.status, SpanStatus::Ok);
    assert!(orchestrate.parent_id.is_none());
    assert_eq!(orchestrate.attribute("state"), Some(&serde_json::json!("completed")));
    assert_eq!(h.sink.named("dispatch").len(), 1);
    assert_eq!(h.sink.named("agent.execute").len(), 4);
    assert_eq!(h.sink.named("aggregate").len(), 1);
    assert_eq!(h.sink.named("synthesize").len(), 1);
    assert_eq!(h.sink.named("gateway.call").len(), 5);
    assert!(h.sink.named("augment.image").is_empty());

    assert_eq!(h.reasoning.calls(), 4);
    assert_eq!(h.premium.calls(), 1);
}

#[tokio::test]
async fn test_order_matches_dispatch_when_first_agent_finishes_last() {
    let reasoning = ScriptedBackend::reasoning().with_role(
        AgentRole::Architect,
        Step::ok(ModelResponse::text("Slow architect.\nconfidence: 0.9")).delayed(Duration::from_millis(200)),
    );
    let h = harness(reasoning);
    let result = h.orchestrator.orchestrate(request(Complexity::High)).await.unwrap();

    let roles: Vec<AgentRole> = result.agent_results.results.iter().map(|r| r.role).collect();
    assert_eq!(roles, select_agents(RequestType::ArchitecturalDesign, Complexity::High));
    assert_eq!(result.agent_results.results[0].content, "Slow architect.\nconfidence: 0.9");
}

#[tokio::test]
async fn test_always_transient_agent_is_called_one_plus_retry_bound() {
    let reasoning = ScriptedBackend::reasoning().with_role(
        AgentRole::Designer,
        Step::err(GatewayError::from_status(BackendKind::Reasoning, 503, "overloaded")),
    );
    let h = harness(reasoning);
    let result = h.orchestrator.orchestrate(request(Complexity::Low)).await.unwrap();

    assert_eq!(h.reasoning.role_calls(AgentRole::Designer), 3);
    assert_eq!(h.reasoning.role_calls(AgentRole::Architect), 1);

    let designer = &result.agent_results.results[1];
    assert_eq!(designer.status, AgentStatus::Failed);
    assert_eq!(designer.attempts, 3);
    assert!(result.degraded);
    assert!(!result.narrative.is_empty());
}

#[tokio::test]
async fn test_deadline_shorter_than_agent_latency_degrades() {
    let reasoning = ScriptedBackend::reasoning().with_role(
        AgentRole::Designer,
        Step::ok(ModelResponse::text("never arrives")).delayed(Duration::from_secs(10)),
    );
    let h = harness_with(
        OrchestratorConfig::default()
            .with_request_deadline(Duration::from_secs(2))
            .with_dispatch_budget_ratio(0.25)
            .with_retry(RetryPolicy::immediate(2)),
        reasoning,
        ScriptedBackend::premium(),
        Vec::new(),
    );

    let started = Instant::now();
    let result = h.orchestrator.orchestrate(request(Complexity::Low)).await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(450), "returned early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1_500), "returned late: {elapsed:?}");
    assert_eq!(result.agent_results.results.len(), 2);
    assert_eq!(result.agent_results.results[0].status, AgentStatus::Success);
    assert_eq!(result.agent_results.results[1].status, AgentStatus::TimedOut);
    assert!(result.degraded);
    assert_eq!(result.narrative, "A unified design narrative.");
}

#[tokio::test]
async fn test_agents_still_queued_at_deadline_are_timed_out_in_order() {
    let reasoning = ScriptedBackend::new(
        BackendKind::Reasoning,
        Step::ok(ModelResponse::text("never arrives")).delayed(Duration::from_secs(10)),
    );
    let h = harness_with(
        OrchestratorConfig::default()
            .with_request_deadline(Duration::from_secs(2))
            .with_dispatch_budget_ratio(0.25)
            .with_max_in_flight(1)
            .with_retry(RetryPolicy::immediate(2)),
        reasoning,
        ScriptedBackend::premium(),
        Vec::new(),
    );

    let result = h.orchestrator.orchestrate(request(Complexity::High)).await.unwrap();
    let results = &result.agent_results.results;
    assert_eq!(results.len(), 6);

    let roles: Vec<AgentRole> = results.iter().map(|r| r.role).collect();
    assert_eq!(roles, select_agents(RequestType::ArchitecturalDesign, Complexity::High));

    // The only agent holding a permit ran until the deadline.
    let first = &results[0];
    assert_eq!(first.status, AgentStatus::TimedOut);
    assert_eq!(first.attempts, 1);
    assert!(first.latency_ms >= 400, "first agent latency {}", first.latency_ms);
    let reason = first.error.as_deref().unwrap();
    assert!(
        reason == "deadline elapsed" || reason.contains("timed out"),
        "unexpected reason: {reason}"
    );

    for queued in &results[1..] {
        assert_eq!(queued.status, AgentStatus::TimedOut);
        assert_eq!(queued.attempts, 0);
        assert_eq!(queued.latency_ms, 0);
        assert_eq!(queued.error.as_deref(), Some("deadline elapsed while queued"));
    }

    assert_eq!(h.reasoning.calls(), 1);
    assert!(result.degraded);
    assert_eq!(result.agent_results.overall_confidence, 0.0);
    assert_eq!(result.narrative, "A unified design narrative.");

    let cancelled = h
        .sink
        .named("agent.execute")
        .into_iter()
        .filter(|s| s.status == SpanStatus::Cancelled)
        .count();
    assert!(cancelled >= 5, "queued agent spans cancelled: {cancelled}");
}

#[tokio::test]
async fn test_concurrency_ceiling_is_respected() {
    let reasoning = Arc::new(ScriptedBackend::new(
        BackendKind::Reasoning,
        Step::ok(ModelResponse::text("ok\nconfidence: 0.6")).delayed(Duration::from_millis(50)),
    ));
    let gateway = ModelGateway::new()
        .with_backend(reasoning.clone())
        .with_backend(Arc::new(ScriptedBackend::premium()));
    let orchestrator = Orchestrator::new(
        OrchestratorConfig::default().with_max_in_flight(2),
        Arc::new(gateway),
        TraceRecorder::disabled(),
    );

    let result = orchestrator.orchestrate(request(Complexity::High)).await.unwrap();
    assert_eq!(result.agent_results.succeeded(), 6);
    assert!(reasoning.max_in_flight.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_all_agents_failing_still_synthesizes() {
    let reasoning = ScriptedBackend::new(
        BackendKind::Reasoning,
        Step::err(GatewayError::from_status(BackendKind::Reasoning, 401, "bad key")),
    );
    let h = harness(reasoning);
    let result = h.orchestrator.orchestrate(request(Complexity::Medium)).await.unwrap();

    assert_eq!(result.agent_results.overall_confidence, 0.0);
    assert!(result.agent_results.results.iter().all(|r| r.status == AgentStatus::Failed));
    assert!(result.degraded);
    assert_eq!(h.reasoning.calls(), 4);
}

#[tokio::test]
async fn test_synthesis_failure_surfaces_agent_results() {
    let premium = ScriptedBackend::new(
        BackendKind::Premium,
        Step::err(GatewayError::from_status(BackendKind::Premium, 401, "invalid key")),
    );
    let h = harness_with(
        OrchestratorConfig::default(),
        ScriptedBackend::reasoning(),
        premium,
        Vec::new(),
    );

    let err = h.orchestrator.orchestrate(request(Complexity::Low)).await.unwrap_err();
    assert_eq!(err.kind(), "synthesis_failed");
    assert_eq!(err.stage(), Stage::Synthesizing);
    assert_eq!(err.agent_results().len(), 2);
    assert!(err.to_string().contains("401"));
    assert_eq!(h.premium.calls(), 1);

    let orchestrate = &h.sink.named("orchestrate")[0];
    assert_eq!(orchestrate.status, SpanStatus::Error);
    assert_eq!(Some(orchestrate.trace_id), err.trace_id());
    assert_eq!(orchestrate.attribute("stage"), Some(&serde_json::json!("synthesizing")));
    assert_eq!(orchestrate.attribute("state"), Some(&serde_json::json!("failed")));
    assert_eq!(
        orchestrate.attribute("stages"),
        Some(&serde_json::json!(["intake", "dispatching", "aggregating", "synthesizing", "failed"]))
    );
}

#[tokio::test]
async fn test_empty_narrative_is_a_synthesis_failure() {
    let premium = ScriptedBackend::new(BackendKind::Premium, Step::ok(ModelResponse::text("  \n")));
    let h = harness_with(
        OrchestratorConfig::default(),
        ScriptedBackend::reasoning(),
        premium,
        Vec::new(),
    );
    let err = h.orchestrator.orchestrate(request(Complexity::Low)).await.unwrap_err();
    assert!(matches!(err, OrchestrationError::SynthesisFailed { .. }));
    assert!(err.to_string().contains("empty narrative"));
}

#[tokio::test]
async fn test_validation_failure_opens_no_trace() {
    let h = harness(ScriptedBackend::reasoning());
    let blank = OrchestrationRequest::new(RequestType::General, Complexity::Low, "   ");
    let err = h.orchestrator.orchestrate(blank).await.unwrap_err();

    assert_eq!(err.kind(), "validation_error");
    assert!(err.trace_id().is_none());
    assert!(h.sink.is_empty());
    assert_eq!(h.reasoning.calls(), 0);
}

#[tokio::test]
async fn test_image_and_vision_augmentation() {
    let image = Arc::new(ScriptedBackend::new(
        BackendKind::ImageGeneration,
        Step::ok(ModelResponse::Image {
            url: "https://images.test/render.png".to_string(),
        }),
    ));
    let vision = Arc::new(ScriptedBackend::new(
        BackendKind::Vision,
        Step::ok(ModelResponse::Analysis {
            summary: "Brick warehouse".to_string(),
            details: serde_json::json!({"style": "industrial"}),
        }),
    ));
    let h = harness_with(
        OrchestratorConfig::default(),
        ScriptedBackend::reasoning(),
        ScriptedBackend::premium(),
        vec![image.clone(), vision.clone()],
    );

    let req = request(Complexity::Low)
        .with_images(true)
        .with_reference_image(ImageSource::Url("https://images.test/ref.jpg".to_string()));
    let result = h.orchestrator.orchestrate(req).await.unwrap();

    assert_eq!(result.image.unwrap().url, "https://images.test/render.png");
    let analysis = result.vision_analysis.unwrap();
    assert_eq!(analysis.summary, "Brick warehouse");
    assert_eq!(analysis.details["style"], "industrial");
    assert!(!result.degraded);
    assert!(result.stages.contains(&Stage::Augmenting));
    assert_eq!(h.sink.named("augment.image")[0].status, SpanStatus::Ok);
    assert_eq!(h.sink.named("augment.vision")[0].status, SpanStatus::Ok);
    assert_eq!(image.calls(), 1);
    assert_eq!(vision.calls(), 1);
}

#[tokio::test]
async fn test_visual_failures_are_masked_as_warnings() {
    let image = Arc::new(ScriptedBackend::new(
        BackendKind::ImageGeneration,
        Step::err(GatewayError::from_status(BackendKind::ImageGeneration, 500, "boom")),
    ));
    // No vision backend configured at all.
    let h = harness_with(
        OrchestratorConfig::default(),
        ScriptedBackend::reasoning(),
        ScriptedBackend::premium(),
        vec![image.clone()],
    );

    let req = request(Complexity::Low)
        .with_images(true)
        .with_reference_image(ImageSource::Base64("iVBORw0KGgo=".to_string()));
    let result = h.orchestrator.orchestrate(req).await.unwrap();

    assert!(result.image.is_none());
    assert!(result.vision_analysis.is_none());
    assert!(result.degraded);
    assert_eq!(result.warnings.len(), 2);
    assert!(result.warnings.iter().any(|w| w.starts_with("image generation failed")));
    assert!(result.warnings.iter().any(|w| w.starts_with("vision analysis failed")));
    assert_eq!(result.narrative, "A unified design narrative.");
    // one retry under the gateway policy
    assert_eq!(image.calls(), 2);
    assert_eq!(h.sink.named("augment.image")[0].status, SpanStatus::Error);
}

#[tokio::test]
async fn test_cancellation_masks_unfinished_agents() {
    let reasoning = ScriptedBackend::new(
        BackendKind::Reasoning,
        Step::ok(ModelResponse::text("slow")).delayed(Duration::from_secs(10)),
    );
    let h = harness(reasoning);
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let result = h
        .orchestrator
        .orchestrate_with_cancel(request(Complexity::Low), token)
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(result.degraded);
    for agent in &result.agent_results.results {
        assert_eq!(agent.status, AgentStatus::TimedOut);
        assert_eq!(agent.error.as_deref(), Some("request cancelled"));
    }
    let cancelled = h
        .sink
        .named("agent.execute")
        .into_iter()
        .filter(|s| s.status == SpanStatus::Cancelled)
        .count();
    assert_eq!(cancelled, 2);
}

#[tokio::test]
async fn test_precancelled_request_fails_before_dispatch() {
    let h = harness(ScriptedBackend::reasoning());
    let token = CancellationToken::new();
    token.cancel();

    let err = h
        .orchestrator
        .orchestrate_with_cancel(request(Complexity::Low), token)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestrationError::DeadlineExceeded {
            stage: Stage::Dispatching,
            ..
        }
    ));
    assert_eq!(h.reasoning.calls(), 0);

    let orchestrate = &h.sink.named("orchestrate")[0];
    assert_eq!(orchestrate.attribute("state"), Some(&serde_json::json!("failed")));
    assert_eq!(orchestrate.attribute("stages"), Some(&serde_json::json!(["intake", "failed"])));
}

#[tokio::test]
async fn test_monitor_counts_across_requests() {
    let reasoning = ScriptedBackend::reasoning().with_role(
        AgentRole::Designer,
        Step::err(GatewayError::from_status(BackendKind::Reasoning, 400, "bad request")),
    );
    let h = harness(reasoning);
    h.orchestrator.orchestrate(request(Complexity::Low)).await.unwrap();
    h.orchestrator.orchestrate(request(Complexity::Low)).await.unwrap();

    let monitor = h.orchestrator.monitor();
    let architect = monitor.get(AgentRole::Architect).await;
    assert_eq!(architect.dispatched, 2);
    assert_eq!(architect.succeeded, 2);
    let designer = monitor.get(AgentRole::Designer).await;
    assert_eq!(designer.failed, 2);
    assert_eq!(monitor.aggregate_metrics().await.dispatched, 4);
}
