mod support;

use orchestrator::config::LogFormat;
use orchestrator::observability::init_tracing;
use orchestrator::{Orchestrator, OrchestratorConfig, StartupError};
use shared_types::{AgentClass, RunPhase};
use std::sync::Arc;
use std::time::Duration;

use support::{Script, SpyPort, DISRUPTION};

const SMALL_REGISTRY: &str = r#"
revision_extension_ms = 100

[policies.safety]
timeout_ms = 300
halts_on_failure = true
extend_on_revision = true

[policies.business]
timeout_ms = 300
extend_on_revision = true

[policies.arbitrator]
timeout_ms = 300

[[agents]]
id = "crew_compliance"
class = "safety"

[[agents]]
id = "maintenance"
class = "safety"

[[agents]]
id = "network"
class = "business"

[[agents]]
id = "cargo"
class = "business"

[[agents]]
id = "arbitrator"
class = "arbitrator"
"#;

fn file_config(dir: &tempfile::TempDir) -> anyhow::Result<OrchestratorConfig> {
    let registry_path = dir.path().join("agent-registry.toml");
    std::fs::write(&registry_path, SMALL_REGISTRY)?;
    Ok(OrchestratorConfig {
        database_url: format!("sqlite://{}", dir.path().join("checkpoints.db").display()),
        registry_path: Some(registry_path),
        enable_revision: true,
        ..OrchestratorConfig::default()
    })
}

#[tokio::test]
async fn test_builtin_catalog_runs_in_memory() -> anyhow::Result<()> {
    init_tracing(LogFormat::Pretty);
    let port = Arc::new(SpyPort::new());
    let orchestrator = Orchestrator::start(OrchestratorConfig::default(), port.clone()).await?;

    assert_eq!(orchestrator.coordinator().registry().len(), 8);
    let decision = orchestrator.run(DISRUPTION).await?;

    assert_eq!(decision.state.phase(), RunPhase::Complete);
    assert!(!decision.revised());
    assert_eq!(port.dispatched_class(AgentClass::Safety), 3);
    orchestrator.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_file_store_keeps_runs_across_restart() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = file_config(&dir)?;

    let port = Arc::new(SpyPort::new());
    let orchestrator = Orchestrator::start(config.clone(), port.clone()).await?;
    assert_eq!(orchestrator.coordinator().registry().len(), 5);
    let decision = orchestrator.run(DISRUPTION).await?;
    assert!(decision.revised());
    assert_eq!(port.dispatched("network"), 2);
    orchestrator.shutdown().await;

    let port = Arc::new(SpyPort::new());
    let orchestrator = Orchestrator::start(config, port.clone()).await?;
    let again = orchestrator.coordinator().resume_run(&decision.run_id).await?;

    assert_eq!(again.collation, decision.collation);
    assert!(port.calls().is_empty());
    let history = orchestrator.coordinator().history(&decision.run_id).await?;
    assert!(history.len() > 4);
    orchestrator.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_revision_extension_override_applies() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = OrchestratorConfig {
        revision_extension: Some(Duration::from_millis(400)),
        ..file_config(&dir)?
    };
    // 450ms misses the 300ms base but fits base + 400ms.
    let port = Arc::new(SpyPort::new().on("cargo", Script::slow(Duration::from_millis(450))));
    let orchestrator = Orchestrator::start(config, port).await?;

    let decision = orchestrator.run(DISRUPTION).await?;
    assert!(decision.collation.business().get("cargo").unwrap().is_success());
    orchestrator.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_missing_registry_file_fails_startup() {
    let config = OrchestratorConfig {
        registry_path: Some("/nonexistent/agent-registry.toml".into()),
        ..OrchestratorConfig::default()
    };

    let result = Orchestrator::start(config, Arc::new(SpyPort::new())).await;
    assert!(matches!(result, Err(StartupError::Registry(_))));
}

#[tokio::test]
async fn test_oversized_revision_extension_fails_startup() {
    let config = OrchestratorConfig {
        revision_extension: Some(Duration::MAX),
        ..OrchestratorConfig::default()
    };

    let result = Orchestrator::start(config, Arc::new(SpyPort::new())).await;
    assert!(matches!(
        result,
        Err(StartupError::RevisionExtension(extension)) if extension == Duration::MAX
    ));
}
