use crate::types::{AgentResult, Stage};
use atelier_core::TraceId;
use thiserror::Error;

/// Why a request was rejected at intake.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("description must not be empty")]
    EmptyDescription,
    #[error("description is {len} characters, limit is {max}")]
    DescriptionTooLong { len: usize, max: usize },
    #[error("reference image URL must use http or https: '{0}'")]
    InvalidReferenceUrl(String),
    #[error("reference image payload is empty")]
    EmptyReferenceImage,
    /// The body could not be decoded (bad JSON, unknown `type`, ...).
    #[error("malformed request: {0}")]
    Malformed(String),
}

/// Surfaced orchestration failure.
///
/// Agent and visual-stage failures never appear here; they are masked into
/// the result as `degraded` with per-agent status and warnings.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("synthesis failed: {reason}")]
    SynthesisFailed {
        reason: String,
        agent_results: Vec<AgentResult>,
        trace_id: TraceId,
    },

    #[error("deadline exceeded during {stage}")]
    DeadlineExceeded {
        stage: Stage,
        agent_results: Vec<AgentResult>,
        trace_id: TraceId,
    },
}

impl OrchestrationError {
    /// Machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestrationError::Validation(_) => "validation_error",
            OrchestrationError::SynthesisFailed { .. } => "synthesis_failed",
            OrchestrationError::DeadlineExceeded { .. } => "deadline_exceeded",
        }
    }

    /// Stage in which the request failed.
    pub fn stage(&self) -> Stage {
        match self {
            OrchestrationError::Validation(_) => Stage::Intake,
            OrchestrationError::SynthesisFailed { .. } => Stage::Synthesizing,
            OrchestrationError::DeadlineExceeded { stage, .. } => *stage,
        }
    }

    /// `None` for validation errors, which never open a trace.
    pub fn trace_id(&self) -> Option<TraceId> {
        match self {
            OrchestrationError::Validation(_) => None,
            OrchestrationError::SynthesisFailed { trace_id, .. }
            | OrchestrationError::DeadlineExceeded { trace_id, .. } => Some(*trace_id),
        }
    }

    /// Agent results collected before the failure.
    pub fn agent_results(&self) -> &[AgentResult] {
        match self {
            OrchestrationError::Validation(_) => &[],
            OrchestrationError::SynthesisFailed { agent_results, .. }
            | OrchestrationError::DeadlineExceeded { agent_results, .. } => agent_results,
        }
    }
}
