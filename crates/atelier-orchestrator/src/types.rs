use atelier_core::TraceId;
use atelier_models::ImageSource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;

/// Kind of design work requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    ArchitecturalDesign,
    StructuralAnalysis,
    MaterialSelection,
    SmartBuilding,
    ProjectPlanning,
    General,
}

impl RequestType {
    pub const ALL: [RequestType; 6] = [
        RequestType::ArchitecturalDesign,
        RequestType::StructuralAnalysis,
        RequestType::MaterialSelection,
        RequestType::SmartBuilding,
        RequestType::ProjectPlanning,
        RequestType::General,
    ];

    /// Human-readable label used in prompts.
    pub fn label(&self) -> &'static str {
        match self {
            RequestType::ArchitecturalDesign => "architectural design",
            RequestType::StructuralAnalysis => "structural analysis",
            RequestType::MaterialSelection => "material selection",
            RequestType::SmartBuilding => "smart building",
            RequestType::ProjectPlanning => "project planning",
            RequestType::General => "general consultation",
        }
    }
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestType::ArchitecturalDesign => write!(f, "architectural_design"),
            RequestType::StructuralAnalysis => write!(f, "structural_analysis"),
            RequestType::MaterialSelection => write!(f, "material_selection"),
            RequestType::SmartBuilding => write!(f, "smart_building"),
            RequestType::ProjectPlanning => write!(f, "project_planning"),
            RequestType::General => write!(f, "general"),
        }
    }
}

/// Complexity tier: selects how many agents run and their token budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl Complexity {
    pub const ALL: [Complexity; 3] = [Complexity::Low, Complexity::Medium, Complexity::High];

    /// Completion token limit for each agent call.
    pub fn token_budget(&self) -> u32 {
        match self {
            Complexity::Low => 800,
            Complexity::Medium => 1500,
            Complexity::High => 3000,
        }
    }

    /// Number of agents dispatched for this tier.
    pub fn agent_count(&self) -> usize {
        match self {
            Complexity::Low => 2,
            Complexity::Medium => 4,
            Complexity::High => 6,
        }
    }
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Complexity::Low => write!(f, "low"),
            Complexity::Medium => write!(f, "medium"),
            Complexity::High => write!(f, "high"),
        }
    }
}

/// The fixed set of specialist agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Architect,
    Designer,
    StructuralEngineer,
    MaterialExpert,
    CodeGenerator,
    ProjectManager,
}

impl AgentRole {
    pub const ALL: [AgentRole; 6] = [
        AgentRole::Architect,
        AgentRole::Designer,
        AgentRole::StructuralEngineer,
        AgentRole::MaterialExpert,
        AgentRole::CodeGenerator,
        AgentRole::ProjectManager,
    ];
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentRole::Architect => write!(f, "architect"),
            AgentRole::Designer => write!(f, "designer"),
            AgentRole::StructuralEngineer => write!(f, "structural_engineer"),
            AgentRole::MaterialExpert => write!(f, "material_expert"),
            AgentRole::CodeGenerator => write!(f, "code_generator"),
            AgentRole::ProjectManager => write!(f, "project_manager"),
        }
    }
}

fn default_true() -> bool {
    true
}

/// An accepted design request. Shared read-only across all stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationRequest {
    #[serde(rename = "type")]
    pub request_type: RequestType,
    pub complexity: Complexity,
    pub description: String,
    #[serde(default)]
    pub generate_images: bool,
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_image: Option<ImageSource>,
    /// Explicit image prompt; derived from the narrative when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_prompt: Option<String>,
    /// Analyze `reference_image` with the vision backend.
    #[serde(default = "default_true")]
    pub analyze_reference: bool,
}

impl OrchestrationRequest {
    pub fn new(
        request_type: RequestType,
        complexity: Complexity,
        description: impl Into<String>,
    ) -> Self {
        Self {
            request_type,
            complexity,
            description: description.into(),
            generate_images: false,
            context: BTreeMap::new(),
            reference_image: None,
            image_prompt: None,
            analyze_reference: true,
        }
    }

    pub fn with_images(mut self, generate: bool) -> Self {
        self.generate_images = generate;
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_reference_image(mut self, image: ImageSource) -> Self {
        self.reference_image = Some(image);
        self
    }

    /// Whether the vision sub-stage will run.
    pub fn wants_vision(&self) -> bool {
        self.analyze_reference && self.reference_image.is_some()
    }
}

/// One unit of agent work, created by the dispatcher.
#[derive(Debug, Clone)]
pub struct AgentTask {
    pub role: AgentRole,
    /// Position in dispatch order.
    pub index: usize,
    pub request: Arc<OrchestrationRequest>,
    pub deadline: Instant,
    pub trace_id: TraceId,
    pub token_budget: u32,
}

/// Terminal status of one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentStatus {
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "timed-out")]
    TimedOut,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Success => write!(f, "success"),
            AgentStatus::Failed => write!(f, "failed"),
            AgentStatus::TimedOut => write!(f, "timed-out"),
        }
    }
}

/// Outcome of one agent invocation. Exactly one per dispatched agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResult {
    pub agent_name: String,
    pub role: AgentRole,
    pub status: AgentStatus,
    pub content: String,
    pub confidence: f64,
    pub latency_ms: u64,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentResult {
    pub fn success(
        role: AgentRole,
        content: impl Into<String>,
        confidence: f64,
        latency_ms: u64,
        attempts: u32,
    ) -> Self {
        Self {
            agent_name: role.profile().name.to_string(),
            role,
            status: AgentStatus::Success,
            content: content.into(),
            confidence: confidence.clamp(0.0, 1.0),
            latency_ms,
            attempts,
            error: None,
        }
    }

    pub fn failed(role: AgentRole, reason: impl Into<String>, latency_ms: u64, attempts: u32) -> Self {
        Self::unsuccessful(role, AgentStatus::Failed, reason.into(), latency_ms, attempts)
    }

    pub fn timed_out(role: AgentRole, reason: impl Into<String>, latency_ms: u64, attempts: u32) -> Self {
        Self::unsuccessful(role, AgentStatus::TimedOut, reason.into(), latency_ms, attempts)
    }

    fn unsuccessful(
        role: AgentRole,
        status: AgentStatus,
        reason: String,
        latency_ms: u64,
        attempts: u32,
    ) -> Self {
        Self {
            agent_name: role.profile().name.to_string(),
            role,
            status,
            content: String::new(),
            confidence: 0.0,
            latency_ms,
            attempts,
            error: Some(reason),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == AgentStatus::Success
    }
}

/// All agent results in dispatch order, plus the weighted confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedContext {
    pub results: Vec<AgentResult>,
    pub overall_confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionAnalysis {
    pub summary: String,
    pub details: serde_json::Value,
}

/// Lifecycle stage of one orchestration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Intake,
    Dispatching,
    Aggregating,
    Synthesizing,
    Augmenting,
    Completed,
    Failed,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Intake => write!(f, "intake"),
            Stage::Dispatching => write!(f, "dispatching"),
            Stage::Aggregating => write!(f, "aggregating"),
            Stage::Synthesizing => write!(f, "synthesizing"),
            Stage::Augmenting => write!(f, "augmenting"),
            Stage::Completed => write!(f, "completed"),
            Stage::Failed => write!(f, "failed"),
        }
    }
}

/// The composed response for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationResult {
    pub narrative: String,
    pub agent_results: AggregatedContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<GeneratedImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vision_analysis: Option<VisionAnalysis>,
    pub trace_id: TraceId,
    pub duration_total_ms: u64,
    pub degraded: bool,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub stages: Vec<Stage>,
}
