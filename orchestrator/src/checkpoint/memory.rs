//! In-process checkpoint store.
//!
//! Same contract as the actor-backed store, without SQLite. Records live as
//! long as the value does.

use async_trait::async_trait;
use shared_types::{AppendCheckpoint, CheckpointRecord, RunState, CHECKPOINT_RUN_STATE};
use tokio::sync::RwLock;

use super::{CheckpointError, CheckpointStore};

#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    records: RwLock<Vec<CheckpointRecord>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record across all runs, in append order.
    pub async fn all(&self) -> Vec<CheckpointRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn append(&self, record: AppendCheckpoint) -> Result<(), CheckpointError> {
        let mut records = self.records.write().await;
        let seq = records.last().map(|r| r.seq + 1).unwrap_or(1);
        records.push(CheckpointRecord {
            seq,
            record_id: ulid::Ulid::new().to_string(),
            run_id: record.run_id,
            phase: record.phase,
            agent_id: record.agent_id,
            kind: record.kind,
            payload: record.payload,
            recorded_at: record.recorded_at,
        });
        Ok(())
    }

    async fn latest(&self, run_id: &str) -> Result<Option<RunState>, CheckpointError> {
        let records = self.records.read().await;
        records
            .iter()
            .rev()
            .find(|r| r.run_id == run_id && r.kind == CHECKPOINT_RUN_STATE)
            .map(|r| serde_json::from_value(r.payload.clone()))
            .transpose()
            .map_err(CheckpointError::from)
    }

    async fn history(&self, run_id: &str) -> Result<Vec<CheckpointRecord>, CheckpointError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| r.run_id == run_id)
            .cloned()
            .collect())
    }
}
