//! Conductor - phased orchestration of one disruption run
//!
//! The conductor owns the run lifecycle:
//! - Fans each phase out to its agents concurrently via the dispatch wrapper
//! - Bounds every agent call with a class deadline (extended on revision)
//! - Halts the run when a safety agent times out or fails
//! - Snapshots the run state after every transition
//!
//! ## State Machine
//!
//! ```text
//! InitialPhase ──(safety ok)──→ BusinessPhase ──(first pass)──┬──→ ArbitrationPhase → Complete
//!      │                          │      ↑                     │          │
//!      │                          │      └──(revision on)──────┘          │
//!      │                          │  (second pass, then arbitration)     │
//!      └──(safety failure)──→ Halted ←──(internal error)──────────(arbitrator failure)
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use orchestrator::checkpoint::InMemoryCheckpointStore;
//! use orchestrator::conductor::RunCoordinator;
//!
//! let coordinator = RunCoordinator::new(Arc::new(registry), Arc::new(InMemoryCheckpointStore::new()));
//! let decision = coordinator
//!     .run_disruption("A320 AOG at LHR, hydraulic leak found on walkaround", true)
//!     .await?;
//! ```

pub mod coordinator;
pub mod dispatch;
pub mod output;
pub mod phase;
pub mod protocol;

#[cfg(test)]
mod tests;

pub use coordinator::RunCoordinator;
pub use dispatch::{AgentDispatcher, DispatchRequest};
pub use output::FinalDecision;
pub use phase::{apply_safety_halt, Assignment, PhaseOutcome, PhasePlan, PhaseRunner};
pub use protocol::OrchestrationError;
