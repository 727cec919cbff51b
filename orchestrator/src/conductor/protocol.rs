//! Conductor error protocol
//!
//! Every way a run can end without a decision is a variant here. Halt
//! variants carry the terminal [`RunState`] so callers can inspect what was
//! collected before the run stopped.

use shared_types::{AgentId, OpinionStatus, RunPhase, RunState, SchemaViolation};

use crate::checkpoint::CheckpointError;

#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    /// A safety agent timed out or failed; no later phase was dispatched.
    #[error("run {run_id} halted: safety agent failure ({})", join_agents(failed_agents))]
    SafetyHalt {
        run_id: String,
        failed_agents: Vec<AgentId>,
        state: Box<RunState>,
    },

    /// The arbitrator did not produce a decision.
    #[error("run {run_id} halted: arbitrator {agent} returned {status}")]
    ArbitrationFailed {
        run_id: String,
        agent: AgentId,
        status: OpinionStatus,
        state: Box<RunState>,
    },

    #[error("schema violation: {0}")]
    SchemaViolation(#[from] SchemaViolation),

    #[error("checkpoint store failed: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("run {run_id} already ended in phase {phase}")]
    AlreadyTerminal { run_id: String, phase: RunPhase },

    #[error("run {run_id} internal error: {message}")]
    Internal { run_id: String, message: String },
}

impl OrchestrationError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::SafetyHalt { .. } => "SAFETY_HALT",
            Self::ArbitrationFailed { .. } => "ARBITRATION_FAILED",
            Self::SchemaViolation(_) => "SCHEMA_VIOLATION",
            Self::Checkpoint(_) => "CHECKPOINT_FAILED",
            Self::RunNotFound(_) => "RUN_NOT_FOUND",
            Self::AlreadyTerminal { .. } => "ALREADY_TERMINAL",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Terminal state recorded for halts, if any.
    pub fn halted_state(&self) -> Option<&RunState> {
        match self {
            Self::SafetyHalt { state, .. } | Self::ArbitrationFailed { state, .. } => {
                Some(state.as_ref())
            }
            _ => None,
        }
    }

    pub fn is_safety_halt(&self) -> bool {
        matches!(self, Self::SafetyHalt { .. })
    }
}

fn join_agents(agents: &[AgentId]) -> String {
    agents
        .iter()
        .map(AgentId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
