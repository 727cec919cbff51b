//! Dispatch wrapper - one bounded call to one agent.
//!
//! Every dispatch yields an [`AgentOpinion`]. Timeouts, port errors, answers
//! that fail validation, and panics inside the port all become
//! zero-confidence opinions, so a phase always collects one opinion per agent.
//!
//! The port call runs in its own task. On deadline the task is aborted and
//! the wrapper returns immediately; a late answer is never observed.

use chrono::Utc;
use shared_types::{
    AgentOpinion, DisruptionPayload, OpinionDraft, OpinionStatus, PhaseKind, SchemaViolation,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::checkpoint::{agent_outcome_record, append_isolated, SharedCheckpointStore};
use crate::reasoning::{AgentResponse, InvocationContext};
use crate::registry::{AgentEntry, AgentRegistry};

/// One agent call, fully resolved.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub run_id: String,
    pub phase: PhaseKind,
    pub agent: AgentEntry,
    pub payload: DisruptionPayload,
    pub context: InvocationContext,
    /// Effective deadline, revision extension already applied.
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

enum Attempt {
    Answered(AgentResponse),
    TimedOut(Duration),
    Failed { kind: &'static str, message: String },
}

#[derive(Clone)]
pub struct AgentDispatcher {
    registry: Arc<AgentRegistry>,
    checkpoints: SharedCheckpointStore,
}

impl AgentDispatcher {
    pub fn new(registry: Arc<AgentRegistry>, checkpoints: SharedCheckpointStore) -> Self {
        Self {
            registry,
            checkpoints,
        }
    }

    /// Run one agent call under its deadline and record the outcome.
    ///
    /// Only a failure to build the stand-in opinion itself is returned as an
    /// error; every agent-side failure is folded into the opinion.
    pub async fn dispatch(
        &self,
        request: DispatchRequest,
    ) -> Result<AgentOpinion, SchemaViolation> {
        let DispatchRequest {
            run_id,
            phase,
            agent,
            payload,
            context,
            timeout,
            max_retries,
            retry_backoff,
        } = request;
        let payload = Arc::new(payload);
        let context = Arc::new(context);

        let started = Instant::now();
        let mut attempts: u32 = 0;
        let opinion = loop {
            attempts += 1;
            let (kind, message) = match attempt(&agent, &payload, &context, timeout).await {
                Attempt::Answered(response) => {
                    match self.answered_opinion(&agent, response, started.elapsed()) {
                        Ok(opinion) => break opinion,
                        Err(violation) => ("SchemaViolation", violation.to_string()),
                    }
                }
                Attempt::TimedOut(elapsed) => {
                    break AgentOpinion::failure(
                        agent.id.clone(),
                        agent.class,
                        OpinionStatus::Timeout,
                        format!(
                            "Timed out: elapsed {:.2}s exceeded the allotted {:.2}s",
                            elapsed.as_secs_f64(),
                            timeout.as_secs_f64()
                        ),
                        timeout.as_secs_f64(),
                    )?;
                }
                Attempt::Failed { kind, message } => (kind, message),
            };

            if attempts <= max_retries {
                tracing::warn!(
                    run_id = %run_id,
                    agent_id = %agent.id,
                    phase = %phase,
                    attempt = attempts,
                    error_kind = kind,
                    error = %message,
                    "Agent call failed, retrying"
                );
                tokio::time::sleep(retry_backoff).await;
                continue;
            }

            break AgentOpinion::failure(
                agent.id.clone(),
                agent.class,
                OpinionStatus::Error,
                format!("{kind}: {message}"),
                started.elapsed().as_secs_f64(),
            )?;
        };

        let elapsed = started.elapsed();
        if opinion.is_success() {
            tracing::info!(
                run_id = %run_id,
                agent_id = %agent.id,
                phase = %phase,
                status = %opinion.status(),
                elapsed_ms = elapsed.as_millis() as u64,
                attempts,
                "Agent dispatch completed"
            );
        } else {
            tracing::warn!(
                run_id = %run_id,
                agent_id = %agent.id,
                phase = %phase,
                status = %opinion.status(),
                elapsed_ms = elapsed.as_millis() as u64,
                attempts,
                reasoning = %opinion.reasoning(),
                "Agent dispatch did not succeed"
            );
        }

        self.record_outcome(&run_id, phase, &opinion, elapsed, attempts).await;
        Ok(opinion)
    }

    /// Validate an answer as an opinion of a roster member. The recorded
    /// class is the roster's, not the caller's.
    fn answered_opinion(
        &self,
        agent: &AgentEntry,
        response: AgentResponse,
        elapsed: Duration,
    ) -> Result<AgentOpinion, SchemaViolation> {
        AgentOpinion::for_member(
            self.registry.roster(),
            agent.id.clone(),
            answered_opinion_draft(response, elapsed),
        )
    }

    async fn record_outcome(
        &self,
        run_id: &str,
        phase: PhaseKind,
        opinion: &AgentOpinion,
        elapsed: Duration,
        attempts: u32,
    ) {
        let phase = phase.to_string();
        let record = match agent_outcome_record(run_id, &phase, opinion, elapsed, attempts) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(
                    run_id = %run_id,
                    agent_id = %opinion.agent_name(),
                    error = %e,
                    "Failed to build outcome checkpoint"
                );
                return;
            }
        };
        if let Err(e) = append_isolated(self.checkpoints.as_ref(), record).await {
            tracing::warn!(
                run_id = %run_id,
                agent_id = %opinion.agent_name(),
                error = %e,
                "Failed to write outcome checkpoint"
            );
        }
    }
}

async fn attempt(
    agent: &AgentEntry,
    payload: &Arc<DisruptionPayload>,
    context: &Arc<InvocationContext>,
    timeout: Duration,
) -> Attempt {
    let invoker = agent.invoker.clone();
    let agent_id = agent.id.clone();
    let payload = Arc::clone(payload);
    let context = Arc::clone(context);

    let started = Instant::now();
    let mut call =
        tokio::spawn(async move { invoker.invoke(&agent_id, &payload, &context).await });

    match tokio::time::timeout(timeout, &mut call).await {
        Ok(Ok(Ok(response))) => Attempt::Answered(response),
        Ok(Ok(Err(error))) => Attempt::Failed {
            kind: error.kind(),
            message: error.to_string(),
        },
        Ok(Err(join_error)) => Attempt::Failed {
            kind: if join_error.is_panic() {
                "Panic"
            } else {
                "Cancelled"
            },
            message: join_error.to_string(),
        },
        Err(_) => {
            call.abort();
            Attempt::TimedOut(started.elapsed())
        }
    }
}

fn answered_opinion_draft(response: AgentResponse, elapsed: Duration) -> OpinionDraft {
    OpinionDraft {
        recommendation: response.recommendation,
        confidence: response.confidence,
        reasoning: response.reasoning,
        binding_constraints: response.binding_constraints,
        status: OpinionStatus::Success,
        duration_seconds: elapsed.as_secs_f64(),
        timestamp: Utc::now(),
    }
}
