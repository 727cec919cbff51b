//! Phase runner - concurrent fan-out of one phase and the safety-halt check.
//!
//! All agents of a phase are dispatched together and the runner waits for
//! every one of them. Because each dispatch is bounded by its own deadline,
//! the phase takes as long as its slowest agent and never longer than the
//! largest effective timeout (plus retries).

use chrono::Utc;
use futures_util::future::join_all;
use shared_types::{AgentClass, AgentId, DisruptionPayload, PhaseKind, PhaseResult};
use std::sync::Arc;
use tokio::time::Instant;

use crate::checkpoint::SharedCheckpointStore;
use crate::conductor::dispatch::{AgentDispatcher, DispatchRequest};
use crate::conductor::protocol::OrchestrationError;
use crate::reasoning::InvocationContext;
use crate::registry::{AgentEntry, AgentRegistry, PolicyTable};

/// One agent of a phase and the payload it will receive.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub agent: AgentEntry,
    pub payload: DisruptionPayload,
}

/// Everything needed to run one phase.
#[derive(Debug, Clone)]
pub struct PhasePlan {
    pub run_id: String,
    pub kind: PhaseKind,
    pub assignments: Vec<Assignment>,
    pub binding_constraints: Vec<String>,
    pub prior_phases: Vec<PhaseResult>,
}

impl PhasePlan {
    pub fn new(run_id: impl Into<String>, kind: PhaseKind) -> Self {
        Self {
            run_id: run_id.into(),
            kind,
            assignments: Vec::new(),
            binding_constraints: Vec::new(),
            prior_phases: Vec::new(),
        }
    }

    pub fn assign(mut self, agent: AgentEntry, payload: DisruptionPayload) -> Self {
        self.assignments.push(Assignment { agent, payload });
        self
    }

    pub fn with_constraints(mut self, constraints: Vec<String>) -> Self {
        self.binding_constraints = constraints;
        self
    }

    pub fn with_prior_phases(mut self, prior: Vec<PhaseResult>) -> Self {
        self.prior_phases = prior;
        self
    }
}

/// What the coordinator should do after a phase.
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseOutcome {
    Proceed(PhaseResult),
    /// At least one agent whose policy fails closed did not succeed.
    Halt {
        result: PhaseResult,
        failed_agents: Vec<AgentId>,
    },
}

impl PhaseOutcome {
    pub fn result(&self) -> &PhaseResult {
        match self {
            Self::Proceed(result) | Self::Halt { result, .. } => result,
        }
    }

    pub fn into_result(self) -> PhaseResult {
        match self {
            Self::Proceed(result) | Self::Halt { result, .. } => result,
        }
    }

    pub fn is_halt(&self) -> bool {
        matches!(self, Self::Halt { .. })
    }
}

/// Halt when any non-arbitrator agent whose class policy fails closed timed
/// out or errored. Arbitration failure is handled by the coordinator.
pub fn apply_safety_halt(result: PhaseResult, policies: &PolicyTable) -> PhaseOutcome {
    let failed_agents: Vec<AgentId> = result
        .failed()
        .filter(|o| o.agent_class() != AgentClass::Arbitrator)
        .filter(|o| policies.for_class(o.agent_class()).halts_on_failure)
        .map(|o| o.agent_name().clone())
        .collect();

    if failed_agents.is_empty() {
        PhaseOutcome::Proceed(result)
    } else {
        PhaseOutcome::Halt {
            result,
            failed_agents,
        }
    }
}

#[derive(Clone)]
pub struct PhaseRunner {
    registry: Arc<AgentRegistry>,
    dispatcher: AgentDispatcher,
}

impl PhaseRunner {
    pub fn new(registry: Arc<AgentRegistry>, checkpoints: SharedCheckpointStore) -> Self {
        Self {
            dispatcher: AgentDispatcher::new(registry.clone(), checkpoints),
            registry,
        }
    }

    pub async fn run(&self, plan: PhasePlan) -> Result<PhaseOutcome, OrchestrationError> {
        let PhasePlan {
            run_id,
            kind,
            assignments,
            binding_constraints,
            prior_phases,
        } = plan;
        if assignments.is_empty() {
            return Err(shared_types::SchemaViolation::EmptyPhaseResult(kind).into());
        }

        let policies = self.registry.policies();
        let started = Instant::now();
        tracing::info!(
            run_id = %run_id,
            phase = %kind,
            agents = assignments.len(),
            "Phase dispatch started"
        );

        let calls = assignments.into_iter().map(|Assignment { agent, payload }| {
            let policy = policies.for_class(agent.class);
            let timeout = policies.timeout_for(agent.class, payload.phase());
            let context = InvocationContext {
                run_id: run_id.clone(),
                phase: kind,
                params: policy.params,
                binding_constraints: binding_constraints.clone(),
                prior_phases: prior_phases.clone(),
            };
            self.dispatcher.dispatch(DispatchRequest {
                run_id: run_id.clone(),
                phase: kind,
                agent,
                payload,
                context,
                timeout,
                max_retries: policy.max_retries,
                retry_backoff: policy.retry_backoff,
            })
        });
        let opinions = join_all(calls)
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;

        let result = PhaseResult::from_opinions(
            kind,
            opinions,
            Utc::now(),
            started.elapsed().as_secs_f64(),
        )?;
        tracing::info!(
            run_id = %run_id,
            phase = %kind,
            duration_ms = started.elapsed().as_millis() as u64,
            succeeded = result.successful().count(),
            failed = result.failed().count(),
            "Phase dispatch completed"
        );

        let outcome = apply_safety_halt(result, policies);
        if let PhaseOutcome::Halt { failed_agents, .. } = &outcome {
            tracing::error!(
                run_id = %run_id,
                phase = %kind,
                failed_agents = ?failed_agents,
                "Fail-closed agent did not succeed, halting run"
            );
        }
        Ok(outcome)
    }
}
