use shared_types::{
    AgentClass, AgentId, AgentOpinion, DisruptionPayload, OpinionStatus, PayloadPhase, PhaseKind,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::conductor::phase::{apply_safety_halt, PhaseOutcome, PhasePlan, PhaseRunner};
use crate::reasoning::ReasoningError;
use crate::registry::AgentRegistry;

use super::support::{
    memory_store, test_policies, test_registry, Behaviour, Outcome, ScriptedPort, BUSINESS,
    DISRUPTION, SAFETY,
};

fn plan_for(registry: &AgentRegistry, kind: PhaseKind, class: AgentClass) -> PhasePlan {
    let payload = DisruptionPayload::initial(DISRUPTION).unwrap();
    registry
        .agents_of(class)
        .fold(PhasePlan::new("run-phase", kind), |plan, agent| {
            plan.assign(agent.clone(), payload.clone())
        })
}

#[tokio::test]
async fn test_phase_collects_every_agent() {
    let port = Arc::new(
        ScriptedPort::new()
            .script("network", Behaviour::answer().after(Duration::from_millis(10)))
            .script("guest_experience", Behaviour::answer().after(Duration::from_millis(60)))
            .script("cargo", Behaviour::answer().after(Duration::from_millis(500)))
            .script(
                "finance",
                Behaviour::outcome(Outcome::Fail(ReasoningError::Refused("no data".into()))),
            ),
    );
    let registry = test_registry(
        port.clone(),
        test_policies(Duration::from_millis(150), Duration::ZERO),
    );
    let runner = PhaseRunner::new(registry.clone(), memory_store());

    let outcome = runner
        .run(plan_for(&registry, PhaseKind::BusinessInitial, AgentClass::Business))
        .await
        .unwrap();

    // Business failures never halt.
    let PhaseOutcome::Proceed(result) = outcome else {
        panic!("business phase must proceed");
    };
    assert_eq!(result.agent_count(), BUSINESS.len());
    for agent in BUSINESS {
        assert_eq!(result.get(agent).unwrap().agent_name().as_str(), *agent);
    }
    assert_eq!(result.get("cargo").unwrap().status(), OpinionStatus::Timeout);
    assert_eq!(result.get("finance").unwrap().status(), OpinionStatus::Error);
    assert_eq!(result.successful().count(), 2);
}

#[tokio::test]
async fn test_agents_run_concurrently() {
    let slow = Behaviour::answer().after(Duration::from_millis(150));
    let port = Arc::new(
        SAFETY
            .iter()
            .fold(ScriptedPort::new(), |port, agent| port.script(agent, slow.clone())),
    );
    let registry = test_registry(
        port.clone(),
        test_policies(Duration::from_secs(2), Duration::ZERO),
    );
    let runner = PhaseRunner::new(registry.clone(), memory_store());

    let started = Instant::now();
    let outcome = runner
        .run(plan_for(&registry, PhaseKind::SafetyAssessment, AgentClass::Safety))
        .await
        .unwrap();

    assert!(!outcome.is_halt());
    assert!(started.elapsed() < Duration::from_millis(400));
    assert!(outcome.result().duration_seconds() >= 0.15);
}

#[tokio::test]
async fn test_safety_failure_halts() {
    let port = Arc::new(
        ScriptedPort::new()
            .script(
                "maintenance",
                Behaviour::outcome(Outcome::Fail(ReasoningError::MalformedOutput(
                    "truncated JSON".into(),
                ))),
            )
            .script("regulatory", Behaviour::answer().after(Duration::from_millis(400))),
    );
    let registry = test_registry(
        port.clone(),
        test_policies(Duration::from_millis(100), Duration::ZERO),
    );
    let runner = PhaseRunner::new(registry.clone(), memory_store());

    let outcome = runner
        .run(plan_for(&registry, PhaseKind::SafetyAssessment, AgentClass::Safety))
        .await
        .unwrap();

    match outcome {
        PhaseOutcome::Halt {
            result,
            failed_agents,
        } => {
            assert_eq!(
                failed_agents,
                vec![AgentId::from("maintenance"), AgentId::from("regulatory")]
            );
            assert_eq!(result.agent_count(), SAFETY.len());
            assert!(result.get("crew_compliance").unwrap().is_success());
        }
        PhaseOutcome::Proceed(_) => panic!("safety failure must halt"),
    }
}

#[tokio::test]
async fn test_revision_pass_gets_extended_deadline() {
    // 250ms exceeds the 150ms base but fits base + 200ms extension.
    let port = Arc::new(ScriptedPort::new().script(
        "network",
        Behaviour::answer().after(Duration::from_millis(250)),
    ));
    let registry = test_registry(
        port.clone(),
        test_policies(Duration::from_millis(150), Duration::from_millis(200)),
    );
    let runner = PhaseRunner::new(registry.clone(), memory_store());
    let network = registry.get("network").unwrap().clone();

    let initial = runner
        .run(
            PhasePlan::new("run-phase", PhaseKind::BusinessInitial)
                .assign(network.clone(), DisruptionPayload::initial(DISRUPTION).unwrap()),
        )
        .await
        .unwrap()
        .into_result();
    assert_eq!(
        initial.get("network").unwrap().status(),
        OpinionStatus::Timeout
    );

    // Peers' first-round opinions, never the recipient's own.
    let others: BTreeMap<AgentId, AgentOpinion> = std::iter::once((
        AgentId::from("cargo"),
        AgentOpinion::failure(
            "cargo".into(),
            AgentClass::Business,
            OpinionStatus::Error,
            "Refused: no manifest".to_string(),
            0.1,
        )
        .unwrap(),
    ))
    .collect();
    let revision_payload = DisruptionPayload::revision(DISRUPTION, others).unwrap();
    assert_eq!(revision_payload.phase(), PayloadPhase::Revision);

    let revised = runner
        .run(
            PhasePlan::new("run-phase", PhaseKind::BusinessRevision)
                .assign(network, revision_payload),
        )
        .await
        .unwrap()
        .into_result();
    assert_eq!(revised.get("network").unwrap().status(), OpinionStatus::Success);
}

#[tokio::test]
async fn test_plan_context_reaches_every_agent() {
    let port = Arc::new(ScriptedPort::new());
    let registry = test_registry(
        port.clone(),
        test_policies(Duration::from_secs(1), Duration::ZERO),
    );
    let runner = PhaseRunner::new(registry.clone(), memory_store());

    let plan = plan_for(&registry, PhaseKind::BusinessInitial, AgentClass::Business)
        .with_constraints(vec!["No departure before 06:00Z curfew lift".to_string()]);
    runner.run(plan).await.unwrap();

    let calls = port.calls();
    assert_eq!(calls.len(), BUSINESS.len());
    for call in calls {
        assert_eq!(call.phase, PhaseKind::BusinessInitial);
        assert_eq!(call.payload.phase(), PayloadPhase::Initial);
        assert_eq!(
            call.binding_constraints,
            vec!["No departure before 06:00Z curfew lift"]
        );
    }
}

#[tokio::test]
async fn test_empty_plan_is_rejected() {
    let port = Arc::new(ScriptedPort::new());
    let registry = test_registry(port, test_policies(Duration::from_secs(1), Duration::ZERO));
    let runner = PhaseRunner::new(registry, memory_store());

    let err = runner
        .run(PhasePlan::new("run-phase", PhaseKind::Arbitration))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "SCHEMA_VIOLATION");
}

#[test]
fn test_arbitrator_failure_is_not_a_safety_halt() {
    let policies = test_policies(Duration::from_secs(1), Duration::ZERO);
    let mut policies_halting = policies.clone();
    policies_halting.arbitrator.halts_on_failure = true;

    let failed = AgentOpinion::failure(
        "arbitrator".into(),
        AgentClass::Arbitrator,
        OpinionStatus::Timeout,
        "Timed out".to_string(),
        1.0,
    )
    .unwrap();
    let result = shared_types::PhaseResult::from_opinions(
        PhaseKind::Arbitration,
        vec![failed],
        chrono::Utc::now(),
        1.0,
    )
    .unwrap();

    assert!(!apply_safety_halt(result.clone(), &policies).is_halt());
    assert!(!apply_safety_halt(result, &policies_halting).is_halt());
}
