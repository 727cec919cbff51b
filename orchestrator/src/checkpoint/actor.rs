//! CheckpointStoreActor - append-only checkpoint log using ractor
//!
//! Persists checkpoint records to SQLite through sqlx. Supports both
//! file-based and in-memory databases.
//!
//! # Architecture
//!
//! - One actor owns the connection pool; its mailbox orders every append
//! - `AppendAsync` is the fire-and-forget path used by the conductor
//! - Records are immutable and ordered by sequence number
//!
//! # Example
//!
//! ```rust,ignore
//! use ractor::{Actor, call};
//!
//! let (store_ref, _handle) = Actor::spawn(
//!     None,
//!     CheckpointStoreActor,
//!     CheckpointStoreArguments::File("/var/lib/orchestrator/checkpoints.db".to_string()),
//! ).await?;
//!
//! store_ref.send_message(CheckpointStoreMsg::AppendAsync { record })?;
//! let latest = call!(store_ref, |reply| CheckpointStoreMsg::LatestRunState {
//!     run_id: "run-1".to_string(),
//!     reply,
//! })?;
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use shared_types::{AgentId, AppendCheckpoint, CheckpointRecord, RunState, CHECKPOINT_RUN_STATE};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;

use super::CheckpointError;

/// Actor that manages the append-only checkpoint log
#[derive(Debug, Default)]
pub struct CheckpointStoreActor;

/// Arguments for spawning CheckpointStoreActor
#[derive(Debug, Clone)]
pub enum CheckpointStoreArguments {
    /// File-based database path
    File(String),
    /// In-memory database (for testing)
    InMemory,
}

/// State for CheckpointStoreActor
pub struct CheckpointStoreState {
    pool: SqlitePool,
}

// ============================================================================
// Messages
// ============================================================================

/// Messages handled by CheckpointStoreActor
#[derive(Debug)]
pub enum CheckpointStoreMsg {
    /// Append a record and reply with the stored row
    Append {
        record: AppendCheckpoint,
        reply: RpcReplyPort<Result<CheckpointRecord, CheckpointError>>,
    },
    /// Append a record without waiting; failures are logged
    AppendAsync { record: AppendCheckpoint },
    /// Latest run-state snapshot for a run
    LatestRunState {
        run_id: String,
        reply: RpcReplyPort<Result<Option<RunState>, CheckpointError>>,
    },
    /// Every record of a run in append order
    GetRunHistory {
        run_id: String,
        reply: RpcReplyPort<Result<Vec<CheckpointRecord>, CheckpointError>>,
    },
}

impl CheckpointStoreActor {
    async fn open_pool(args: &CheckpointStoreArguments) -> Result<SqlitePool, sqlx::Error> {
        let options = match args {
            CheckpointStoreArguments::File(path) => {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    std::fs::create_dir_all(parent).ok();
                }
                SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
            }
            CheckpointStoreArguments::InMemory => SqliteConnectOptions::from_str("sqlite::memory:")?,
        };

        // Single connection: the actor already serialises access, and an
        // in-memory database lives only as long as its connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<std::time::Duration>)
            .max_lifetime(None::<std::time::Duration>)
            .connect_with(options)
            .await?;

        Self::run_migrations(&pool).await?;
        Ok(pool)
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                record_id TEXT UNIQUE NOT NULL,
                run_id TEXT NOT NULL,
                phase TEXT NOT NULL,
                agent_id TEXT,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_checkpoints_run ON checkpoints(run_id, seq)")
            .execute(pool)
            .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_checkpoints_run_kind ON checkpoints(run_id, kind)",
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl Actor for CheckpointStoreActor {
    type Msg = CheckpointStoreMsg;
    type State = CheckpointStoreState;
    type Arguments = CheckpointStoreArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            actor_id = %myself.get_id(),
            "CheckpointStoreActor starting"
        );

        let pool = match &args {
            CheckpointStoreArguments::File(path) => {
                tracing::info!(database_path = %path, "Opening file-based checkpoint database");
                Self::open_pool(&args).await.map_err(|e| {
                    ActorProcessingErr::from(format!("Failed to open database: {e}"))
                })?
            }
            CheckpointStoreArguments::InMemory => {
                tracing::info!("Opening in-memory checkpoint database");
                Self::open_pool(&args).await.map_err(|e| {
                    ActorProcessingErr::from(format!("Failed to open in-memory database: {e}"))
                })?
            }
        };

        Ok(CheckpointStoreState { pool })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            CheckpointStoreMsg::Append { record, reply } => {
                let result = self.handle_append(record, state).await;
                let _ = reply.send(result);
            }
            CheckpointStoreMsg::AppendAsync { record } => {
                let run_id = record.run_id.clone();
                let kind = record.kind.clone();
                if let Err(e) = self.handle_append(record, state).await {
                    tracing::warn!(
                        run_id = %run_id,
                        kind = %kind,
                        error = %e,
                        "Dropped checkpoint record"
                    );
                }
            }
            CheckpointStoreMsg::LatestRunState { run_id, reply } => {
                let result = self.handle_latest_run_state(&run_id, state).await;
                let _ = reply.send(result);
            }
            CheckpointStoreMsg::GetRunHistory { run_id, reply } => {
                let result = self.handle_get_run_history(&run_id, state).await;
                let _ = reply.send(result);
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.pool.close().await;
        tracing::info!(
            actor_id = %myself.get_id(),
            "CheckpointStoreActor stopped"
        );
        Ok(())
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl CheckpointStoreActor {
    async fn handle_append(
        &self,
        record: AppendCheckpoint,
        state: &mut CheckpointStoreState,
    ) -> Result<CheckpointRecord, CheckpointError> {
        let record_id = ulid::Ulid::new().to_string();
        let payload_json = serde_json::to_string(&record.payload)?;

        let row = sqlx::query(
            r#"
            INSERT INTO checkpoints (record_id, run_id, phase, agent_id, kind, payload, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            RETURNING seq
            "#,
        )
        .bind(&record_id)
        .bind(&record.run_id)
        .bind(&record.phase)
        .bind(record.agent_id.as_ref().map(|a| a.as_str()))
        .bind(&record.kind)
        .bind(&payload_json)
        .bind(record.recorded_at.to_rfc3339())
        .fetch_one(&state.pool)
        .await?;

        Ok(CheckpointRecord {
            seq: row.try_get("seq")?,
            record_id,
            run_id: record.run_id,
            phase: record.phase,
            agent_id: record.agent_id,
            kind: record.kind,
            payload: record.payload,
            recorded_at: record.recorded_at,
        })
    }

    async fn handle_latest_run_state(
        &self,
        run_id: &str,
        state: &mut CheckpointStoreState,
    ) -> Result<Option<RunState>, CheckpointError> {
        let row = sqlx::query(
            r#"
            SELECT payload
            FROM checkpoints
            WHERE run_id = ?1 AND kind = ?2
            ORDER BY seq DESC
            LIMIT 1
            "#,
        )
        .bind(run_id)
        .bind(CHECKPOINT_RUN_STATE)
        .fetch_optional(&state.pool)
        .await?;

        match row {
            Some(row) => {
                let payload: String = row.try_get("payload")?;
                Ok(Some(serde_json::from_str(&payload)?))
            }
            None => Ok(None),
        }
    }

    async fn handle_get_run_history(
        &self,
        run_id: &str,
        state: &mut CheckpointStoreState,
    ) -> Result<Vec<CheckpointRecord>, CheckpointError> {
        let rows = sqlx::query(
            r#"
            SELECT seq, record_id, run_id, phase, agent_id, kind, payload, recorded_at
            FROM checkpoints
            WHERE run_id = ?1
            ORDER BY seq ASC
            "#,
        )
        .bind(run_id)
        .fetch_all(&state.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }
}

fn record_from_row(row: &SqliteRow) -> Result<CheckpointRecord, CheckpointError> {
    let recorded_at: String = row.try_get("recorded_at")?;
    let recorded_at = DateTime::parse_from_rfc3339(&recorded_at)
        .map_err(|e| CheckpointError::InvalidTimestamp(e.to_string()))?
        .with_timezone(&Utc);
    let payload: String = row.try_get("payload")?;
    let agent_id: Option<String> = row.try_get("agent_id")?;

    Ok(CheckpointRecord {
        seq: row.try_get("seq")?,
        record_id: row.try_get("record_id")?,
        run_id: row.try_get("run_id")?,
        phase: row.try_get("phase")?,
        agent_id: agent_id.map(AgentId),
        kind: row.try_get("kind")?,
        payload: serde_json::from_str(&payload)?,
        recorded_at,
    })
}

// ============================================================================
// Tests
// ============================================================================
