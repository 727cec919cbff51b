//! Reasoning port - the opaque per-agent reasoning call.
//!
//! The conductor never looks inside an agent. It hands each agent a
//! [`DisruptionPayload`] plus an [`InvocationContext`] and gets back either an
//! [`AgentResponse`] or a [`ReasoningError`]. Latency is unknown and unbounded;
//! deadlines are enforced by the dispatch wrapper, not by implementations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared_types::{AgentId, DisruptionPayload, PhaseKind, PhaseResult};
use std::sync::Arc;

pub type SharedReasoningPort = Arc<dyn ReasoningPort>;

/// Generation parameters forwarded to the reasoning backend.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InvocationParams {
    pub max_output_tokens: u32,
    pub temperature: f32,
}

impl Default for InvocationParams {
    fn default() -> Self {
        Self {
            max_output_tokens: 4096,
            temperature: 0.2,
        }
    }
}

/// Everything an agent may see besides the payload itself.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationContext {
    pub run_id: String,
    pub phase: PhaseKind,
    pub params: InvocationParams,
    /// Constraints emitted by safety agents earlier in the run.
    pub binding_constraints: Vec<String>,
    /// Completed phases of the run; populated for arbitration only.
    pub prior_phases: Vec<PhaseResult>,
}

/// Raw answer from a reasoning call, before schema validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub recommendation: String,
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default)]
    pub binding_constraints: Vec<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ReasoningError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("malformed output: {0}")]
    MalformedOutput(String),
    #[error("agent refused: {0}")]
    Refused(String),
}

impl ReasoningError {
    /// Short class name recorded in synthesised error opinions.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "Transport",
            Self::MalformedOutput(_) => "MalformedOutput",
            Self::Refused(_) => "Refused",
        }
    }
}

#[async_trait]
pub trait ReasoningPort: Send + Sync {
    async fn invoke(
        &self,
        agent: &AgentId,
        payload: &DisruptionPayload,
        context: &InvocationContext,
    ) -> Result<AgentResponse, ReasoningError>;
}
