//! Output shaping for completed runs.

use serde::{Deserialize, Serialize};
use shared_types::{AgentOpinion, Collation, PhaseKind, RunPhase, RunState};

use crate::conductor::protocol::OrchestrationError;

/// The result handed to the human approver: the collated cross-phase view
/// plus the terminal run state it was built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalDecision {
    pub run_id: String,
    pub collation: Collation,
    pub state: RunState,
}

impl FinalDecision {
    /// Collate a completed run.
    ///
    /// The business slot holds the revision pass when one ran.
    pub fn from_state(state: RunState) -> Result<Self, OrchestrationError> {
        if state.phase() != RunPhase::Complete {
            return Err(OrchestrationError::Internal {
                run_id: state.run_id().to_string(),
                message: format!("cannot collate a run in phase {}", state.phase()),
            });
        }
        let missing = |what: &str| OrchestrationError::Internal {
            run_id: state.run_id().to_string(),
            message: format!("completed run has no {what} result"),
        };
        let safety = state
            .latest_result(PhaseKind::SafetyAssessment)
            .cloned()
            .ok_or_else(|| missing("safety"))?;
        let business = state
            .final_business_result()
            .cloned()
            .ok_or_else(|| missing("business"))?;
        let arbitration = state
            .latest_result(PhaseKind::Arbitration)
            .cloned()
            .ok_or_else(|| missing("arbitration"))?;

        let collation = Collation::new(safety, business, arbitration)?;
        Ok(Self {
            run_id: state.run_id().to_string(),
            collation,
            state,
        })
    }

    /// The arbitrator's opinion.
    pub fn decision(&self) -> Option<&AgentOpinion> {
        self.collation.decision()
    }

    pub fn binding_constraints(&self) -> &[String] {
        self.collation.binding_constraints()
    }

    pub fn revised(&self) -> bool {
        self.collation.business().phase() == PhaseKind::BusinessRevision
    }
}
