//! Checkpoint store - append-only audit log of run progress.
//!
//! The conductor writes two kinds of records:
//! - [`CHECKPOINT_AGENT_OUTCOME`]: one per agent call, written by the dispatch
//!   wrapper before it returns
//! - [`CHECKPOINT_RUN_STATE`]: a full [`RunState`] snapshot after every phase
//!   transition, halt, or completion
//!
//! Appends are fire-and-forget. The engine never waits for a record to reach
//! disk, and a failing store degrades observability without aborting a run.
//!
//! [`ActorCheckpointStore`] is the production implementation: a handle to a
//! [`CheckpointStoreActor`] whose mailbox serialises concurrent appends from
//! every agent of a phase. [`InMemoryCheckpointStore`] keeps records in
//! process only.

mod actor;
mod memory;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::FutureExt;
use ractor::{Actor, ActorRef};
use shared_types::{
    AgentOpinion, AppendCheckpoint, CheckpointRecord, RunState, CHECKPOINT_AGENT_OUTCOME,
    CHECKPOINT_RUN_STATE,
};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

pub use actor::{CheckpointStoreActor, CheckpointStoreArguments, CheckpointStoreMsg};
pub use memory::InMemoryCheckpointStore;

pub type SharedCheckpointStore = Arc<dyn CheckpointStore>;

/// Errors that can occur while writing or reading checkpoints
#[derive(Debug, thiserror::Error, Clone)]
pub enum CheckpointError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid timestamp format: {0}")]
    InvalidTimestamp(String),

    #[error("Checkpoint store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for CheckpointError {
    fn from(e: sqlx::Error) -> Self {
        CheckpointError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for CheckpointError {
    fn from(e: serde_json::Error) -> Self {
        CheckpointError::Serialization(e.to_string())
    }
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Enqueue a record. Returns once the record is accepted, not persisted.
    async fn append(&self, record: AppendCheckpoint) -> Result<(), CheckpointError>;

    /// Most recent run-state snapshot for a run.
    async fn latest(&self, run_id: &str) -> Result<Option<RunState>, CheckpointError>;

    /// Every record of a run in append order.
    async fn history(&self, run_id: &str) -> Result<Vec<CheckpointRecord>, CheckpointError>;
}

/// Append through `store`, reporting a panic inside the store as
/// [`CheckpointError::Unavailable`] instead of unwinding into the caller.
pub async fn append_isolated(
    store: &dyn CheckpointStore,
    record: AppendCheckpoint,
) -> Result<(), CheckpointError> {
    match AssertUnwindSafe(store.append(record)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(CheckpointError::Unavailable(format!(
            "store panicked: {}",
            panic_message(panic.as_ref())
        ))),
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Build the per-agent outcome record written by the dispatch wrapper.
pub fn agent_outcome_record(
    run_id: &str,
    phase: &str,
    opinion: &AgentOpinion,
    elapsed: Duration,
    attempts: u32,
) -> Result<AppendCheckpoint, CheckpointError> {
    Ok(AppendCheckpoint {
        run_id: run_id.to_string(),
        phase: phase.to_string(),
        agent_id: Some(opinion.agent_name().clone()),
        kind: CHECKPOINT_AGENT_OUTCOME.to_string(),
        payload: serde_json::json!({
            "outcome": opinion.status(),
            "elapsed_seconds": elapsed.as_secs_f64(),
            "attempts": attempts,
            "opinion": serde_json::to_value(opinion)?,
        }),
        recorded_at: Utc::now(),
    })
}

/// Build a run-state snapshot record.
pub fn run_state_record(state: &RunState) -> Result<AppendCheckpoint, CheckpointError> {
    Ok(AppendCheckpoint {
        run_id: state.run_id().to_string(),
        phase: state.phase().to_string(),
        agent_id: None,
        kind: CHECKPOINT_RUN_STATE.to_string(),
        payload: serde_json::to_value(state)?,
        recorded_at: Utc::now(),
    })
}

// ============================================================================
// Actor-backed store
// ============================================================================

/// [`CheckpointStore`] handle over a running [`CheckpointStoreActor`].
#[derive(Debug, Clone)]
pub struct ActorCheckpointStore {
    actor: ActorRef<CheckpointStoreMsg>,
}

impl ActorCheckpointStore {
    pub fn new(actor: ActorRef<CheckpointStoreMsg>) -> Self {
        Self { actor }
    }

    /// Spawn a store actor and wrap it.
    pub async fn spawn(
        args: CheckpointStoreArguments,
    ) -> Result<(Self, tokio::task::JoinHandle<()>), CheckpointError> {
        let (actor, handle) = Actor::spawn(None, CheckpointStoreActor, args)
            .await
            .map_err(|e| CheckpointError::Unavailable(format!("spawn failed: {e}")))?;
        Ok((Self::new(actor), handle))
    }

    pub fn actor(&self) -> &ActorRef<CheckpointStoreMsg> {
        &self.actor
    }

    /// Append and wait for the stored record, including its sequence number.
    pub async fn append_confirmed(
        &self,
        record: AppendCheckpoint,
    ) -> Result<CheckpointRecord, CheckpointError> {
        ractor::call!(self.actor, |reply| CheckpointStoreMsg::Append { record, reply })
            .map_err(|e| CheckpointError::Unavailable(e.to_string()))?
    }

    pub fn stop(&self) {
        self.actor.stop(None);
    }

    /// Stop the actor once every queued record has been written.
    pub fn drain(&self) -> Result<(), CheckpointError> {
        self.actor
            .drain()
            .map_err(|e| CheckpointError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl CheckpointStore for ActorCheckpointStore {
    async fn append(&self, record: AppendCheckpoint) -> Result<(), CheckpointError> {
        self.actor
            .send_message(CheckpointStoreMsg::AppendAsync { record })
            .map_err(|e| CheckpointError::Unavailable(e.to_string()))
    }

    async fn latest(&self, run_id: &str) -> Result<Option<RunState>, CheckpointError> {
        let run_id = run_id.to_string();
        ractor::call!(self.actor, |reply| CheckpointStoreMsg::LatestRunState {
            run_id,
            reply
        })
        .map_err(|e| CheckpointError::Unavailable(e.to_string()))?
    }

    async fn history(&self, run_id: &str) -> Result<Vec<CheckpointRecord>, CheckpointError> {
        let run_id = run_id.to_string();
        ractor::call!(self.actor, |reply| CheckpointStoreMsg::GetRunHistory {
            run_id,
            reply
        })
        .map_err(|e| CheckpointError::Unavailable(e.to_string()))?
    }
}
