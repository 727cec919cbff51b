//! Run coordinator - drives one disruption through its phases.
//!
//! Each step consumes the current [`RunState`] and yields the next one; the
//! coordinator snapshots every state it is handed back. Halts and internal
//! faults end the run with a terminal snapshot before the error reaches the
//! caller.

use futures_util::FutureExt;
use shared_types::{
    AgentClass, AgentId, AgentOpinion, CheckpointRecord, DisruptionPayload, HaltReason, PhaseKind,
    PhaseResult, RunPhase, RunState,
};
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::checkpoint::{
    append_isolated, panic_message, run_state_record, SharedCheckpointStore,
};
use crate::conductor::output::FinalDecision;
use crate::conductor::phase::{PhaseOutcome, PhasePlan, PhaseRunner};
use crate::conductor::protocol::OrchestrationError;
use crate::registry::AgentRegistry;

enum Transition {
    Next(RunState),
    Completed(FinalDecision),
    Halted(RunState, OrchestrationError),
}

#[derive(Clone)]
pub struct RunCoordinator {
    registry: Arc<AgentRegistry>,
    checkpoints: SharedCheckpointStore,
    runner: PhaseRunner,
}

impl RunCoordinator {
    pub fn new(registry: Arc<AgentRegistry>, checkpoints: SharedCheckpointStore) -> Self {
        let runner = PhaseRunner::new(registry.clone(), checkpoints.clone());
        Self {
            registry,
            checkpoints,
            runner,
        }
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Run a new disruption end to end.
    ///
    /// The description is validated before a run exists; a rejected
    /// description leaves no trace in the checkpoint store.
    pub async fn run_disruption(
        &self,
        disruption: &str,
        enable_revision: bool,
    ) -> Result<FinalDecision, OrchestrationError> {
        let payload = DisruptionPayload::initial(disruption)?;
        let run_id = uuid::Uuid::new_v4().to_string();
        let state = RunState::start(run_id.as_str(), disruption, enable_revision);

        tracing::info!(run_id = %run_id, enable_revision, "Disruption run started");
        self.checkpoint(&state).await;
        self.drive(state, payload).await
    }

    /// Continue a run from its latest snapshot.
    ///
    /// A completed run returns its decision again; a halted run cannot be
    /// resumed.
    pub async fn resume_run(&self, run_id: &str) -> Result<FinalDecision, OrchestrationError> {
        let state = self
            .inspect_run(run_id)
            .await?
            .ok_or_else(|| OrchestrationError::RunNotFound(run_id.to_string()))?;

        match state.phase() {
            RunPhase::Complete => return FinalDecision::from_state(state),
            RunPhase::Halted => {
                return Err(OrchestrationError::AlreadyTerminal {
                    run_id: run_id.to_string(),
                    phase: state.phase(),
                })
            }
            _ => {}
        }

        // The snapshot may predate a registry change.
        for opinion in state.history().iter().flat_map(|r| r.responses().values()) {
            opinion.verify_member(self.registry.roster())?;
        }

        let payload = DisruptionPayload::initial(state.disruption())?;
        tracing::info!(run_id = %run_id, phase = %state.phase(), "Resuming disruption run");
        self.drive(state, payload).await
    }

    /// Latest snapshot of a run, if the store has one.
    pub async fn inspect_run(&self, run_id: &str) -> Result<Option<RunState>, OrchestrationError> {
        Ok(self.checkpoints.latest(run_id).await?)
    }

    /// Full checkpoint trail of a run.
    pub async fn history(&self, run_id: &str) -> Result<Vec<CheckpointRecord>, OrchestrationError> {
        Ok(self.checkpoints.history(run_id).await?)
    }

    async fn drive(
        &self,
        mut state: RunState,
        payload: DisruptionPayload,
    ) -> Result<FinalDecision, OrchestrationError> {
        loop {
            let snapshot = state.clone();
            let step = match AssertUnwindSafe(self.step(state, &payload))
                .catch_unwind()
                .await
            {
                Ok(step) => step,
                Err(panic) => Err(OrchestrationError::Internal {
                    run_id: snapshot.run_id().to_string(),
                    message: format!("panic: {}", panic_message(panic.as_ref())),
                }),
            };

            match step {
                Ok(Transition::Next(next)) => {
                    tracing::info!(run_id = %next.run_id(), phase = %next.phase(), "Run advanced");
                    self.checkpoint(&next).await;
                    state = next;
                }
                Ok(Transition::Completed(decision)) => {
                    self.checkpoint(&decision.state).await;
                    tracing::info!(
                        run_id = %decision.run_id,
                        revised = decision.revised(),
                        constraints = decision.binding_constraints().len(),
                        "Disruption run completed"
                    );
                    return Ok(decision);
                }
                Ok(Transition::Halted(halted, error)) => {
                    self.checkpoint(&halted).await;
                    tracing::error!(
                        run_id = %halted.run_id(),
                        code = error.code(),
                        error = %error,
                        "Disruption run halted"
                    );
                    return Err(error);
                }
                Err(error) => {
                    self.record_internal_error(snapshot, &error).await;
                    return Err(error);
                }
            }
        }
    }

    async fn step(
        &self,
        state: RunState,
        payload: &DisruptionPayload,
    ) -> Result<Transition, OrchestrationError> {
        match state.phase() {
            RunPhase::InitialPhase => self.safety_assessment(state, payload).await,
            RunPhase::BusinessPhase => {
                if state.latest_result(PhaseKind::BusinessInitial).is_none() {
                    self.business_initial(state, payload).await
                } else {
                    self.business_revision(state).await
                }
            }
            RunPhase::ArbitrationPhase => self.arbitration(state, payload).await,
            RunPhase::Complete | RunPhase::Halted => Err(OrchestrationError::AlreadyTerminal {
                run_id: state.run_id().to_string(),
                phase: state.phase(),
            }),
        }
    }

    async fn safety_assessment(
        &self,
        state: RunState,
        payload: &DisruptionPayload,
    ) -> Result<Transition, OrchestrationError> {
        let plan = self
            .registry
            .agents_of(AgentClass::Safety)
            .fold(
                PhasePlan::new(state.run_id(), PhaseKind::SafetyAssessment),
                |plan, agent| plan.assign(agent.clone(), payload.clone()),
            );

        match self.runner.run(plan).await? {
            PhaseOutcome::Proceed(result) => Ok(Transition::Next(
                state.record_phase(result, RunPhase::BusinessPhase)?,
            )),
            PhaseOutcome::Halt {
                result,
                failed_agents,
            } => halt_on_failures(state, result, failed_agents),
        }
    }

    async fn business_initial(
        &self,
        state: RunState,
        payload: &DisruptionPayload,
    ) -> Result<Transition, OrchestrationError> {
        let plan = self
            .registry
            .agents_of(AgentClass::Business)
            .fold(
                PhasePlan::new(state.run_id(), PhaseKind::BusinessInitial),
                |plan, agent| plan.assign(agent.clone(), payload.clone()),
            )
            .with_constraints(safety_constraints(&state));

        match self.runner.run(plan).await? {
            PhaseOutcome::Proceed(result) => {
                let next = if state.enable_revision() {
                    RunPhase::BusinessPhase
                } else {
                    RunPhase::ArbitrationPhase
                };
                Ok(Transition::Next(state.record_phase(result, next)?))
            }
            PhaseOutcome::Halt {
                result,
                failed_agents,
            } => halt_on_failures(state, result, failed_agents),
        }
    }

    /// Second business pass: every agent sees all first-round opinions except
    /// its own, under the extended deadline.
    async fn business_revision(&self, state: RunState) -> Result<Transition, OrchestrationError> {
        if !state.enable_revision() || state.latest_result(PhaseKind::BusinessRevision).is_some() {
            return Ok(Transition::Next(state.advance(RunPhase::ArbitrationPhase)?));
        }

        let first_round: BTreeMap<AgentId, AgentOpinion> = {
            let safety = state
                .latest_result(PhaseKind::SafetyAssessment)
                .ok_or_else(|| missing_result(&state, PhaseKind::SafetyAssessment))?;
            let business = state
                .latest_result(PhaseKind::BusinessInitial)
                .ok_or_else(|| missing_result(&state, PhaseKind::BusinessInitial))?;
            safety
                .responses()
                .iter()
                .chain(business.responses())
                .map(|(id, opinion)| (id.clone(), opinion.clone()))
                .collect()
        };

        let mut plan = PhasePlan::new(state.run_id(), PhaseKind::BusinessRevision)
            .with_constraints(safety_constraints(&state));
        for agent in self.registry.agents_of(AgentClass::Business) {
            let mut others = first_round.clone();
            others.remove(&agent.id);
            plan = plan.assign(
                agent.clone(),
                DisruptionPayload::revision(state.disruption(), others)?,
            );
        }

        match self.runner.run(plan).await? {
            PhaseOutcome::Proceed(result) => Ok(Transition::Next(
                state.record_phase(result, RunPhase::ArbitrationPhase)?,
            )),
            PhaseOutcome::Halt {
                result,
                failed_agents,
            } => halt_on_failures(state, result, failed_agents),
        }
    }

    async fn arbitration(
        &self,
        state: RunState,
        payload: &DisruptionPayload,
    ) -> Result<Transition, OrchestrationError> {
        let arbitrator = self
            .registry
            .arbitrator()
            .cloned()
            .ok_or_else(|| OrchestrationError::Internal {
                run_id: state.run_id().to_string(),
                message: "registry has no arbitrator".to_string(),
            })?;

        let plan = PhasePlan::new(state.run_id(), PhaseKind::Arbitration)
            .assign(arbitrator.clone(), payload.clone())
            .with_constraints(safety_constraints(&state))
            .with_prior_phases(state.history().to_vec());
        let result = self.runner.run(plan).await?.into_result();

        let (status, reasoning) = match result.get(arbitrator.id.as_str()) {
            Some(opinion) => (opinion.status(), opinion.reasoning().to_string()),
            None => return Err(missing_result(&state, PhaseKind::Arbitration)),
        };
        if status.is_failure() {
            let run_id = state.run_id().to_string();
            let halted = state
                .record_phase(result, RunPhase::ArbitrationPhase)?
                .halt(
                    HaltReason::ArbitrationFailure,
                    vec![arbitrator.id.clone()],
                    format!("arbitrator {} returned {status}: {reasoning}", arbitrator.id),
                )?;
            let error = OrchestrationError::ArbitrationFailed {
                run_id,
                agent: arbitrator.id,
                status,
                state: Box::new(halted.clone()),
            };
            return Ok(Transition::Halted(halted, error));
        }

        let complete = state.record_phase(result, RunPhase::Complete)?;
        Ok(Transition::Completed(FinalDecision::from_state(complete)?))
    }

    async fn checkpoint(&self, state: &RunState) {
        let record = match run_state_record(state) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(
                    run_id = %state.run_id(),
                    error = %e,
                    "Failed to build run-state checkpoint"
                );
                return;
            }
        };
        if let Err(e) = append_isolated(self.checkpoints.as_ref(), record).await {
            tracing::warn!(
                run_id = %state.run_id(),
                phase = %state.phase(),
                error = %e,
                "Failed to write run-state checkpoint"
            );
        }
    }

    async fn record_internal_error(&self, snapshot: RunState, error: &OrchestrationError) {
        tracing::error!(
            run_id = %snapshot.run_id(),
            phase = %snapshot.phase(),
            code = error.code(),
            error = %error,
            "Disruption run failed"
        );
        match snapshot.halt(HaltReason::InternalError, Vec::new(), error.to_string()) {
            Ok(halted) => self.checkpoint(&halted).await,
            Err(e) => {
                tracing::warn!(error = %e, "Could not record internal error on run state");
            }
        }
    }
}

/// End the run because fail-closed agents did not succeed. The registry only
/// admits safety policies that fail closed.
fn halt_on_failures(
    state: RunState,
    result: PhaseResult,
    failed_agents: Vec<AgentId>,
) -> Result<Transition, OrchestrationError> {
    let detail = failed_agents
        .iter()
        .map(|agent| match result.get(agent.as_str()) {
            Some(opinion) => format!("{agent}: {} ({})", opinion.status(), opinion.reasoning()),
            None => agent.to_string(),
        })
        .collect::<Vec<_>>()
        .join("; ");
    let run_id = state.run_id().to_string();
    let phase = state.phase();
    let halted = state
        .record_phase(result, phase)?
        .halt(HaltReason::SafetyAgentFailure, failed_agents.clone(), detail)?;
    let error = OrchestrationError::SafetyHalt {
        run_id,
        failed_agents,
        state: Box::new(halted.clone()),
    };
    Ok(Transition::Halted(halted, error))
}

fn safety_constraints(state: &RunState) -> Vec<String> {
    state
        .latest_result(PhaseKind::SafetyAssessment)
        .map(PhaseResult::binding_constraints)
        .unwrap_or_default()
}

fn missing_result(state: &RunState, kind: PhaseKind) -> OrchestrationError {
    OrchestrationError::Internal {
        run_id: state.run_id().to_string(),
        message: format!("run history has no {kind} result"),
    }
}
