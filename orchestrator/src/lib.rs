//! Disruption Orchestrator - phased multi-agent decision core
//!
//! This crate runs a fixed roster of reasoning agents over one operational
//! disruption in three gated phases: safety assessment, business assessment
//! (with an optional revision pass), and arbitration. Safety agents fail
//! closed: if any of them times out or errors, the run halts before business
//! or arbitration agents are consulted.
//!
//! Agent reasoning is behind [`reasoning::ReasoningPort`]; durable progress
//! goes through [`checkpoint::CheckpointStore`].

pub mod bootstrap;
pub mod checkpoint;
pub mod conductor;
pub mod config;
pub mod observability;
pub mod reasoning;
pub mod registry;

pub use bootstrap::{Orchestrator, StartupError};
pub use conductor::{FinalDecision, OrchestrationError, RunCoordinator};
pub use config::OrchestratorConfig;
