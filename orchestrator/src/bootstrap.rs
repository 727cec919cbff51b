//! Startup wiring: config → registry → checkpoint actor → coordinator.

use std::sync::Arc;
use std::time::Duration;

use crate::checkpoint::{ActorCheckpointStore, CheckpointError};
use crate::conductor::{FinalDecision, OrchestrationError, RunCoordinator};
use crate::config::OrchestratorConfig;
use crate::reasoning::SharedReasoningPort;
use crate::registry::{AgentRegistry, RegistryCatalog, RegistryError};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("registry: {0}")]
    Registry(#[from] RegistryError),
    #[error("checkpoint store: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("revision extension {0:?} does not fit in u64 milliseconds")]
    RevisionExtension(Duration),
}

/// A running orchestrator: one registry, one checkpoint actor, one
/// coordinator shared by every run.
pub struct Orchestrator {
    config: OrchestratorConfig,
    coordinator: RunCoordinator,
    store: ActorCheckpointStore,
    store_handle: tokio::task::JoinHandle<()>,
}

impl Orchestrator {
    pub async fn start(
        config: OrchestratorConfig,
        port: SharedReasoningPort,
    ) -> Result<Self, StartupError> {
        let mut catalog = RegistryCatalog::load(config.registry_path.as_deref())?;
        if let Some(extension) = config.revision_extension {
            catalog.revision_extension_ms = u64::try_from(extension.as_millis())
                .map_err(|_| StartupError::RevisionExtension(extension))?;
        }
        let registry = Arc::new(AgentRegistry::from_catalog(&catalog, port)?);

        let (store, store_handle) =
            ActorCheckpointStore::spawn(config.checkpoint_arguments()).await?;
        tracing::info!(
            agents = registry.len(),
            database_url = %config.database_url,
            enable_revision = config.enable_revision,
            "Orchestrator started"
        );

        let coordinator = RunCoordinator::new(registry, Arc::new(store.clone()));
        Ok(Self {
            config,
            coordinator,
            store,
            store_handle,
        })
    }

    /// Run a disruption with the configured revision default.
    pub async fn run(&self, disruption: &str) -> Result<FinalDecision, OrchestrationError> {
        self.coordinator
            .run_disruption(disruption, self.config.enable_revision)
            .await
    }

    pub fn coordinator(&self) -> &RunCoordinator {
        &self.coordinator
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Stop the checkpoint actor once its mailbox has drained.
    pub async fn shutdown(self) {
        if let Err(e) = self.store.drain() {
            tracing::warn!(error = %e, "Checkpoint store already stopped");
        }
        if let Err(e) = self.store_handle.await {
            tracing::warn!(error = %e, "Checkpoint store did not stop cleanly");
        }
    }
}
