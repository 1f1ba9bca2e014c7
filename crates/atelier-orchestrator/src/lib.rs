//! Multi-agent orchestration engine for design requests.
//!
//! A request is fanned out to a complexity-sized set of specialist agents,
//! their results are merged with a weighted confidence, a premium model
//! composes the final narrative, and optional image generation and
//! reference-image analysis run last. Agent and visual failures degrade the
//! result instead of failing it.
//!
//! # Main types
//!
//! - [`Orchestrator`]: Stage controller owning the request deadline.
//! - [`Dispatcher`]: Bounded concurrent fan-out with ordered fan-in.
//! - [`AgentExecutor`]: Runs one agent against the reasoning backend with retries.
//! - [`Synthesizer`]: Premium narrative composition.
//! - [`VisualAugmenter`]: Image generation and vision analysis.
//! - [`AgentMonitor`]: Per-role outcome counters.

/// Weighted confidence and synthesis context.
pub mod aggregator;
/// Concurrent agent fan-out.
pub mod dispatcher;
/// Orchestration controller and its configuration.
pub mod engine;
/// Validation and orchestration errors.
pub mod error;
/// Single-agent execution.
pub mod executor;
/// Per-role outcome counters.
pub mod monitor;
/// Agent roster, prompts and selection table.
pub mod profiles;
/// Premium synthesis stage.
pub mod synthesizer;
/// Request, result and agent types.
pub mod types;
/// Optional visual stage.
pub mod visual;

pub use aggregator::aggregate;
pub use dispatcher::Dispatcher;
pub use engine::{Orchestrator, OrchestratorConfig};
pub use error::{OrchestrationError, ValidationError};
pub use executor::AgentExecutor;
pub use monitor::{AgentMetrics, AgentMonitor};
pub use profiles::{ranked_roles, roster, select_agents, tier_table, AgentProfile, TierInfo};
pub use synthesizer::Synthesizer;
pub use types::{
    AgentResult, AgentRole, AgentStatus, AgentTask, AggregatedContext, Complexity, GeneratedImage,
    OrchestrationRequest, OrchestrationResult, RequestType, Stage, VisionAnalysis,
};
pub use visual::{AugmentationError, AugmentationOutcome, VisualAugmenter};
