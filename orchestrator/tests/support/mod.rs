#![allow(dead_code)]

use async_trait::async_trait;
use orchestrator::checkpoint::{
    ActorCheckpointStore, CheckpointError, CheckpointStore, CheckpointStoreArguments,
};
use orchestrator::reasoning::{
    AgentResponse, InvocationContext, ReasoningError, ReasoningPort, SharedReasoningPort,
};
use orchestrator::registry::{AgentPolicy, AgentRegistry, PolicyTable};
use shared_types::{
    AgentClass, AgentId, AppendCheckpoint, CheckpointRecord, DisruptionPayload, PayloadPhase,
    PhaseKind, RunState,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const DISRUPTION: &str =
    "EY123 AUH-LHR: captain exceeded duty limit after 3h ground delay, spare crew 90 min away";

pub const SAFETY: &[&str] = &["crew_compliance", "maintenance", "regulatory"];
pub const BUSINESS: &[&str] = &["network", "guest_experience", "cargo", "finance"];

#[derive(Debug, Clone)]
pub enum Script {
    Answer { latency: Duration },
    Constraint { constraint: String },
    Fail(ReasoningError),
    Panic,
}

impl Script {
    pub fn slow(latency: Duration) -> Self {
        Self::Answer { latency }
    }
}

#[derive(Debug, Clone)]
pub struct Call {
    pub agent: AgentId,
    pub phase: PhaseKind,
    pub payload: DisruptionPayload,
    pub binding_constraints: Vec<String>,
    pub prior_phases: Vec<PhaseKind>,
}

/// Scripted reasoning port that doubles as a dispatch spy.
#[derive(Default)]
pub struct SpyPort {
    scripts: HashMap<(String, Option<PayloadPhase>), Script>,
    calls: Mutex<Vec<Call>>,
}

impl SpyPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, agent: &str, script: Script) -> Self {
        self.scripts.insert((agent.to_string(), None), script);
        self
    }

    pub fn on_phase(mut self, agent: &str, phase: PayloadPhase, script: Script) -> Self {
        self.scripts.insert((agent.to_string(), Some(phase)), script);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn dispatched(&self, agent: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.agent.as_str() == agent)
            .count()
    }

    pub fn dispatched_in(&self, phase: PhaseKind) -> Vec<AgentId> {
        let mut agents: Vec<AgentId> = self
            .calls()
            .into_iter()
            .filter(|c| c.phase == phase)
            .map(|c| c.agent)
            .collect();
        agents.sort();
        agents
    }

    pub fn dispatched_class(&self, class: AgentClass) -> usize {
        let ids: &[&str] = match class {
            AgentClass::Safety => SAFETY,
            AgentClass::Business => BUSINESS,
            AgentClass::Arbitrator => &["arbitrator"],
        };
        ids.iter().map(|id| self.dispatched(id)).sum()
    }
}

#[async_trait]
impl ReasoningPort for SpyPort {
    async fn invoke(
        &self,
        agent: &AgentId,
        payload: &DisruptionPayload,
        context: &InvocationContext,
    ) -> Result<AgentResponse, ReasoningError> {
        self.calls.lock().unwrap().push(Call {
            agent: agent.clone(),
            phase: context.phase,
            payload: payload.clone(),
            binding_constraints: context.binding_constraints.clone(),
            prior_phases: context.prior_phases.iter().map(|p| p.phase()).collect(),
        });

        let script = self
            .scripts
            .get(&(agent.to_string(), Some(payload.phase())))
            .or_else(|| self.scripts.get(&(agent.to_string(), None)))
            .cloned()
            .unwrap_or(Script::Answer {
                latency: Duration::ZERO,
            });

        let peers = payload
            .other_recommendations()
            .map(|others| others.len())
            .unwrap_or(0);
        let mut response = AgentResponse {
            recommendation: format!("{agent} recommends option B: delay 4h with fresh crew"),
            confidence: 0.75,
            reasoning: format!("{agent} reviewed {} with {peers} peer opinions", context.phase),
            binding_constraints: Vec::new(),
        };
        match script {
            Script::Answer { latency } => {
                tokio::time::sleep(latency).await;
                Ok(response)
            }
            Script::Constraint { constraint } => {
                response.binding_constraints.push(constraint);
                Ok(response)
            }
            Script::Fail(error) => Err(error),
            Script::Panic => panic!("{agent} crashed"),
        }
    }
}

/// Store whose writes always fail; reads report nothing.
pub struct BrokenStore;

#[async_trait]
impl CheckpointStore for BrokenStore {
    async fn append(&self, _record: AppendCheckpoint) -> Result<(), CheckpointError> {
        Err(CheckpointError::Database("database is locked".to_string()))
    }

    async fn latest(&self, _run_id: &str) -> Result<Option<RunState>, CheckpointError> {
        Ok(None)
    }

    async fn history(&self, _run_id: &str) -> Result<Vec<CheckpointRecord>, CheckpointError> {
        Ok(Vec::new())
    }
}

/// Store whose writes panic inside the store task itself.
pub struct PanickingStore;

#[async_trait]
impl CheckpointStore for PanickingStore {
    async fn append(&self, record: AppendCheckpoint) -> Result<(), CheckpointError> {
        panic!("checkpoint index corrupted while writing {}", record.kind);
    }

    async fn latest(&self, _run_id: &str) -> Result<Option<RunState>, CheckpointError> {
        Ok(None)
    }

    async fn history(&self, _run_id: &str) -> Result<Vec<CheckpointRecord>, CheckpointError> {
        Ok(Vec::new())
    }
}

pub fn policies(timeout: Duration, extension: Duration) -> PolicyTable {
    let mut arbitrator = AgentPolicy::new(timeout);
    arbitrator.extend_on_revision = false;
    PolicyTable {
        safety: AgentPolicy::new(timeout).halting(),
        business: AgentPolicy::new(timeout),
        arbitrator,
        revision_extension: extension,
    }
}

pub fn registry_with(
    port: SharedReasoningPort,
    policies: PolicyTable,
    safety: &[&str],
    business: &[&str],
) -> Arc<AgentRegistry> {
    let mut builder = AgentRegistry::builder(policies);
    for id in safety {
        builder = builder.agent(*id, AgentClass::Safety, port.clone());
    }
    for id in business {
        builder = builder.agent(*id, AgentClass::Business, port.clone());
    }
    builder = builder.agent("arbitrator", AgentClass::Arbitrator, port);
    Arc::new(builder.build().expect("test registry"))
}

pub fn registry(port: SharedReasoningPort, timeout: Duration) -> Arc<AgentRegistry> {
    registry_with(
        port,
        policies(timeout, Duration::from_millis(500)),
        SAFETY,
        BUSINESS,
    )
}

pub async fn actor_store() -> Arc<ActorCheckpointStore> {
    let (store, _handle) = ActorCheckpointStore::spawn(CheckpointStoreArguments::InMemory)
        .await
        .expect("checkpoint actor");
    Arc::new(store)
}
