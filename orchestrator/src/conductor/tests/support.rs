use async_trait::async_trait;
use shared_types::{
    AgentClass, AgentId, AppendCheckpoint, CheckpointRecord, DisruptionPayload, PhaseKind,
    RunState,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::checkpoint::{CheckpointError, CheckpointStore, InMemoryCheckpointStore};
use crate::reasoning::{
    AgentResponse, InvocationContext, ReasoningError, ReasoningPort, SharedReasoningPort,
};
use crate::registry::{AgentPolicy, AgentRegistry, PolicyTable};

pub(crate) const DISRUPTION: &str = "A320 AOG at LHR: hydraulic leak found on pre-flight walkaround";

pub(crate) const SAFETY: &[&str] = &["crew_compliance", "maintenance", "regulatory"];
pub(crate) const BUSINESS: &[&str] = &["network", "guest_experience", "cargo", "finance"];

#[derive(Debug, Clone)]
pub(crate) enum Outcome {
    Answer,
    Constraints(Vec<String>),
    Fail(ReasoningError),
    Panic,
    /// Fail the first `n` calls, then answer.
    FailFirst(usize),
}

#[derive(Debug, Clone)]
pub(crate) struct Behaviour {
    pub latency: Duration,
    pub outcome: Outcome,
}

impl Behaviour {
    pub fn answer() -> Self {
        Self {
            latency: Duration::ZERO,
            outcome: Outcome::Answer,
        }
    }

    pub fn outcome(outcome: Outcome) -> Self {
        Self {
            latency: Duration::ZERO,
            outcome,
        }
    }

    pub fn after(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub agent: AgentId,
    pub phase: PhaseKind,
    pub payload: DisruptionPayload,
    pub binding_constraints: Vec<String>,
}

/// Reasoning port driven by per-agent scripts. Records every call it sees
/// and counts the calls that ran to completion.
#[derive(Default)]
pub(crate) struct ScriptedPort {
    scripts: HashMap<String, Behaviour>,
    calls: Mutex<Vec<RecordedCall>>,
    completed: AtomicUsize,
}

impl ScriptedPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, agent: &str, behaviour: Behaviour) -> Self {
        self.scripts.insert(agent.to_string(), behaviour);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, agent: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.agent.as_str() == agent)
            .count()
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    fn behaviour_for(&self, agent: &AgentId) -> Behaviour {
        self.scripts
            .get(agent.as_str())
            .cloned()
            .unwrap_or_else(Behaviour::answer)
    }
}

#[async_trait]
impl ReasoningPort for ScriptedPort {
    async fn invoke(
        &self,
        agent: &AgentId,
        payload: &DisruptionPayload,
        context: &InvocationContext,
    ) -> Result<AgentResponse, ReasoningError> {
        let seen = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(RecordedCall {
                agent: agent.clone(),
                phase: context.phase,
                payload: payload.clone(),
                binding_constraints: context.binding_constraints.clone(),
            });
            calls.iter().filter(|c| &c.agent == agent).count()
        };

        let behaviour = self.behaviour_for(agent);
        tokio::time::sleep(behaviour.latency).await;
        self.completed.fetch_add(1, Ordering::SeqCst);

        let answer = |constraints: Vec<String>| AgentResponse {
            recommendation: format!("{agent}: proceed with recovery option A"),
            confidence: 0.8,
            reasoning: format!("{agent} assessed {}", context.phase),
            binding_constraints: constraints,
        };
        match behaviour.outcome {
            Outcome::Answer => Ok(answer(Vec::new())),
            Outcome::Constraints(constraints) => Ok(answer(constraints)),
            Outcome::Fail(error) => Err(error),
            Outcome::Panic => panic!("scripted panic in {agent}"),
            Outcome::FailFirst(n) if seen <= n => {
                Err(ReasoningError::Transport(format!("attempt {seen} dropped")))
            }
            Outcome::FailFirst(_) => Ok(answer(Vec::new())),
        }
    }
}

/// Store whose every operation fails.
pub(crate) struct FailingCheckpointStore;

#[async_trait]
impl CheckpointStore for FailingCheckpointStore {
    async fn append(&self, _record: AppendCheckpoint) -> Result<(), CheckpointError> {
        Err(CheckpointError::Unavailable("disk full".to_string()))
    }

    async fn latest(&self, _run_id: &str) -> Result<Option<RunState>, CheckpointError> {
        Err(CheckpointError::Unavailable("disk full".to_string()))
    }

    async fn history(&self, _run_id: &str) -> Result<Vec<CheckpointRecord>, CheckpointError> {
        Err(CheckpointError::Unavailable("disk full".to_string()))
    }
}

/// Store that panics on every append.
pub(crate) struct PanickingCheckpointStore;

#[async_trait]
impl CheckpointStore for PanickingCheckpointStore {
    async fn append(&self, _record: AppendCheckpoint) -> Result<(), CheckpointError> {
        panic!("checkpoint writer poisoned");
    }

    async fn latest(&self, _run_id: &str) -> Result<Option<RunState>, CheckpointError> {
        Ok(None)
    }

    async fn history(&self, _run_id: &str) -> Result<Vec<CheckpointRecord>, CheckpointError> {
        Ok(Vec::new())
    }
}

pub(crate) fn memory_store() -> Arc<InMemoryCheckpointStore> {
    Arc::new(InMemoryCheckpointStore::new())
}

/// Every class gets `timeout`; safety fails closed, the arbitrator does not
/// get the revision extension.
pub(crate) fn test_policies(timeout: Duration, extension: Duration) -> PolicyTable {
    let mut arbitrator = AgentPolicy::new(timeout);
    arbitrator.extend_on_revision = false;
    PolicyTable {
        safety: AgentPolicy::new(timeout).halting(),
        business: AgentPolicy::new(timeout),
        arbitrator,
        revision_extension: extension,
    }
}

pub(crate) fn test_registry(port: SharedReasoningPort, policies: PolicyTable) -> Arc<AgentRegistry> {
    let builder = SAFETY
        .iter()
        .map(|id| (*id, AgentClass::Safety))
        .chain(BUSINESS.iter().map(|id| (*id, AgentClass::Business)))
        .chain(std::iter::once(("arbitrator", AgentClass::Arbitrator)))
        .fold(AgentRegistry::builder(policies), |builder, (id, class)| {
            builder.agent(id, class, port.clone())
        });
    Arc::new(builder.build().unwrap())
}
