//! Shared types between the orchestration core and its callers
//!
//! These types are used by both:
//! - the conductor engine (dispatch, phases, coordinator)
//! - checkpoint readers that replay a run for audit
//!
//! Every constructor validates its invariants. Deserialisation goes through
//! the same checks, so a snapshot read back from the checkpoint log can never
//! produce an object the engine would have refused to build.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Minimum number of non-whitespace characters in a disruption description.
pub const MIN_DESCRIPTION_CHARS: usize = 10;

// ============================================================================
// Core Types
// ============================================================================

/// Identity of a reasoning agent (e.g. "crew_compliance").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for AgentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::borrow::Borrow<str> for AgentId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Agent class. Determines execution policy and which invariants apply.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AgentClass {
    Safety,
    Business,
    Arbitrator,
}

/// Marker telling an agent whether it is seeing the disruption for the first
/// time or revising against peer opinions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PayloadPhase {
    Initial,
    Revision,
}

/// Outcome of one agent call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OpinionStatus {
    Success,
    Timeout,
    Error,
}

impl OpinionStatus {
    pub fn is_failure(self) -> bool {
        !matches!(self, Self::Success)
    }
}

/// Label of one entry in a run's phase history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PhaseKind {
    SafetyAssessment,
    BusinessInitial,
    BusinessRevision,
    Arbitration,
}

impl PhaseKind {
    pub fn payload_phase(self) -> PayloadPhase {
        match self {
            Self::BusinessRevision => PayloadPhase::Revision,
            _ => PayloadPhase::Initial,
        }
    }
}

/// State machine position of a run.
///
/// ```text
/// InitialPhase → BusinessPhase → ArbitrationPhase → Complete
///       |              |                |
///       └──────────────┴────────────────┴──→ Halted
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunPhase {
    InitialPhase,
    BusinessPhase,
    ArbitrationPhase,
    Complete,
    Halted,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Halted)
    }
}

/// Why a run stopped before `Complete`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HaltReason {
    SafetyAgentFailure,
    ArbitrationFailure,
    InternalError,
}

// ============================================================================
// Errors
// ============================================================================

/// A data object failed one of its construction-time invariants.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaViolation {
    #[error("disruption description has {found} meaningful characters, need at least {minimum}")]
    DescriptionTooShort { found: usize, minimum: usize },

    #[error("revision payload requires other_recommendations")]
    MissingRecommendations,

    #[error("initial payload must not carry other_recommendations")]
    UnexpectedRecommendations,

    #[error("unknown agent: {0}")]
    UnknownAgent(AgentId),

    #[error("agent {agent} registered as {expected}, opinion claims {found}")]
    ClassMismatch {
        agent: AgentId,
        expected: AgentClass,
        found: AgentClass,
    },

    #[error("agent {agent}: field `{field}` must not be empty")]
    EmptyField { agent: AgentId, field: &'static str },

    #[error("agent {agent}: confidence {value} outside [0, 1]")]
    ConfidenceOutOfRange { agent: AgentId, value: f64 },

    #[error("{context}: duration {value} must be a non-negative number of seconds")]
    InvalidDuration { context: String, value: f64 },

    #[error("agent {agent} of class {class} may not emit binding constraints")]
    ConstraintsNotPermitted { agent: AgentId, class: AgentClass },

    #[error("invalid ISO-8601 timestamp {value:?}: {reason}")]
    InvalidTimestamp { value: String, reason: String },

    #[error("phase result key {key} does not match agent_name {agent_name}")]
    KeyMismatch { key: AgentId, agent_name: AgentId },

    #[error("duplicate opinion for agent {0}")]
    DuplicateAgent(AgentId),

    #[error("phase result for {0} contains no opinions")]
    EmptyPhaseResult(PhaseKind),

    #[error("collation slot `{slot}` cannot hold a {found} phase result")]
    CollationSlotMismatch { slot: &'static str, found: PhaseKind },

    #[error("arbitration result must hold exactly one arbitrator opinion, found {0}")]
    ArbitratorCount(usize),

    #[error("run {0} is terminal and cannot be modified")]
    TerminalRun(String),

    #[error("run {run_id}: phase {phase} does not agree with its halt record")]
    HaltRecordMismatch { run_id: String, phase: RunPhase },
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, SchemaViolation> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SchemaViolation::InvalidTimestamp {
            value: raw.to_string(),
            reason: e.to_string(),
        })
}

fn check_duration(context: impl fmt::Display, value: f64) -> Result<(), SchemaViolation> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(SchemaViolation::InvalidDuration {
            context: context.to_string(),
            value,
        })
    }
}

// ============================================================================
// Agent Roster
// ============================================================================

/// The known agent set: identity → class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentRoster {
    classes: BTreeMap<AgentId, AgentClass>,
}

impl AgentRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, agent: AgentId, class: AgentClass) -> Option<AgentClass> {
        self.classes.insert(agent, class)
    }

    pub fn class_of(&self, agent: &str) -> Option<AgentClass> {
        self.classes.get(agent).copied()
    }

    pub fn contains(&self, agent: &str) -> bool {
        self.classes.contains_key(agent)
    }

    pub fn agents_of(&self, class: AgentClass) -> impl Iterator<Item = &AgentId> {
        self.classes
            .iter()
            .filter(move |(_, c)| **c == class)
            .map(|(id, _)| id)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl FromIterator<(AgentId, AgentClass)> for AgentRoster {
    fn from_iter<T: IntoIterator<Item = (AgentId, AgentClass)>>(iter: T) -> Self {
        Self {
            classes: iter.into_iter().collect(),
        }
    }
}

// ============================================================================
// Agent Opinion
// ============================================================================

/// Unvalidated fields of an opinion, as produced by a reasoning call or
/// synthesised by the dispatch wrapper.
#[derive(Debug, Clone, PartialEq)]
pub struct OpinionDraft {
    pub recommendation: String,
    pub confidence: f64,
    pub reasoning: String,
    pub binding_constraints: Vec<String>,
    pub status: OpinionStatus,
    pub duration_seconds: f64,
    pub timestamp: DateTime<Utc>,
}

/// Output of one agent for one phase. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "AgentOpinionRecord")]
pub struct AgentOpinion {
    agent_name: AgentId,
    agent_class: AgentClass,
    recommendation: String,
    confidence: f64,
    reasoning: String,
    timestamp: DateTime<Utc>,
    status: OpinionStatus,
    duration_seconds: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    binding_constraints: Vec<String>,
}

#[derive(Deserialize)]
struct AgentOpinionRecord {
    agent_name: AgentId,
    agent_class: AgentClass,
    recommendation: String,
    confidence: f64,
    reasoning: String,
    timestamp: String,
    status: OpinionStatus,
    duration_seconds: f64,
    #[serde(default)]
    binding_constraints: Vec<String>,
}

impl TryFrom<AgentOpinionRecord> for AgentOpinion {
    type Error = SchemaViolation;

    fn try_from(record: AgentOpinionRecord) -> Result<Self, Self::Error> {
        let timestamp = parse_timestamp(&record.timestamp)?;
        AgentOpinion::new(
            record.agent_name,
            record.agent_class,
            OpinionDraft {
                recommendation: record.recommendation,
                confidence: record.confidence,
                reasoning: record.reasoning,
                binding_constraints: record.binding_constraints,
                status: record.status,
                duration_seconds: record.duration_seconds,
                timestamp,
            },
        )
    }
}

impl AgentOpinion {
    /// Build an opinion, enforcing every self-contained invariant.
    pub fn new(
        agent_name: AgentId,
        agent_class: AgentClass,
        draft: OpinionDraft,
    ) -> Result<Self, SchemaViolation> {
        if draft.recommendation.trim().is_empty() {
            return Err(SchemaViolation::EmptyField {
                agent: agent_name,
                field: "recommendation",
            });
        }
        if draft.reasoning.trim().is_empty() {
            return Err(SchemaViolation::EmptyField {
                agent: agent_name,
                field: "reasoning",
            });
        }
        if !(0.0..=1.0).contains(&draft.confidence) {
            return Err(SchemaViolation::ConfidenceOutOfRange {
                agent: agent_name,
                value: draft.confidence,
            });
        }
        check_duration(&agent_name, draft.duration_seconds)?;

        let binding_constraints: Vec<String> = draft
            .binding_constraints
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        if !binding_constraints.is_empty() && agent_class != AgentClass::Safety {
            return Err(SchemaViolation::ConstraintsNotPermitted {
                agent: agent_name,
                class: agent_class,
            });
        }

        Ok(Self {
            agent_name,
            agent_class,
            recommendation: draft.recommendation,
            confidence: draft.confidence,
            reasoning: draft.reasoning,
            timestamp: draft.timestamp,
            status: draft.status,
            duration_seconds: draft.duration_seconds,
            binding_constraints,
        })
    }

    /// Build an opinion for a roster member; the class comes from the roster.
    pub fn for_member(
        roster: &AgentRoster,
        agent_name: AgentId,
        draft: OpinionDraft,
    ) -> Result<Self, SchemaViolation> {
        let class = roster
            .class_of(agent_name.as_str())
            .ok_or_else(|| SchemaViolation::UnknownAgent(agent_name.clone()))?;
        Self::new(agent_name, class, draft)
    }

    /// Check that this opinion's author is on the roster under the class it
    /// claims. Used when re-reading persisted history.
    pub fn verify_member(&self, roster: &AgentRoster) -> Result<(), SchemaViolation> {
        let expected = roster
            .class_of(self.agent_name.as_str())
            .ok_or_else(|| SchemaViolation::UnknownAgent(self.agent_name.clone()))?;
        if expected != self.agent_class {
            return Err(SchemaViolation::ClassMismatch {
                agent: self.agent_name.clone(),
                expected,
                found: self.agent_class,
            });
        }
        Ok(())
    }

    /// Zero-confidence opinion standing in for a call that did not succeed.
    pub fn failure(
        agent_name: AgentId,
        agent_class: AgentClass,
        status: OpinionStatus,
        reasoning: String,
        duration_seconds: f64,
    ) -> Result<Self, SchemaViolation> {
        let recommendation = match status {
            OpinionStatus::Timeout => "no recommendation: agent timed out",
            OpinionStatus::Error | OpinionStatus::Success => "no recommendation: agent failed",
        };
        Self::new(
            agent_name,
            agent_class,
            OpinionDraft {
                recommendation: recommendation.to_string(),
                confidence: 0.0,
                reasoning,
                binding_constraints: Vec::new(),
                status,
                duration_seconds,
                timestamp: Utc::now(),
            },
        )
    }

    pub fn agent_name(&self) -> &AgentId {
        &self.agent_name
    }

    pub fn agent_class(&self) -> AgentClass {
        self.agent_class
    }

    pub fn recommendation(&self) -> &str {
        &self.recommendation
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn status(&self) -> OpinionStatus {
        self.status
    }

    pub fn duration_seconds(&self) -> f64 {
        self.duration_seconds
    }

    pub fn binding_constraints(&self) -> &[String] {
        &self.binding_constraints
    }

    pub fn is_success(&self) -> bool {
        self.status == OpinionStatus::Success
    }
}

// ============================================================================
// Disruption Payload
// ============================================================================

/// Input to one phase invocation of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DisruptionPayloadRecord")]
pub struct DisruptionPayload {
    description: String,
    phase: PayloadPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    other_recommendations: Option<BTreeMap<AgentId, AgentOpinion>>,
}

#[derive(Deserialize)]
struct DisruptionPayloadRecord {
    description: String,
    phase: PayloadPhase,
    #[serde(default)]
    other_recommendations: Option<BTreeMap<AgentId, AgentOpinion>>,
}

impl TryFrom<DisruptionPayloadRecord> for DisruptionPayload {
    type Error = SchemaViolation;

    fn try_from(record: DisruptionPayloadRecord) -> Result<Self, Self::Error> {
        match record.phase {
            PayloadPhase::Initial => {
                if record.other_recommendations.is_some() {
                    return Err(SchemaViolation::UnexpectedRecommendations);
                }
                Self::initial(record.description)
            }
            PayloadPhase::Revision => Self::revision(
                record.description,
                record.other_recommendations.unwrap_or_default(),
            ),
        }
    }
}

impl DisruptionPayload {
    pub fn initial(description: impl Into<String>) -> Result<Self, SchemaViolation> {
        let description = description.into();
        validate_description(&description)?;
        Ok(Self {
            description,
            phase: PayloadPhase::Initial,
            other_recommendations: None,
        })
    }

    pub fn revision(
        description: impl Into<String>,
        other_recommendations: BTreeMap<AgentId, AgentOpinion>,
    ) -> Result<Self, SchemaViolation> {
        let description = description.into();
        validate_description(&description)?;
        if other_recommendations.is_empty() {
            return Err(SchemaViolation::MissingRecommendations);
        }
        for (key, opinion) in &other_recommendations {
            if key != opinion.agent_name() {
                return Err(SchemaViolation::KeyMismatch {
                    key: key.clone(),
                    agent_name: opinion.agent_name().clone(),
                });
            }
        }
        Ok(Self {
            description,
            phase: PayloadPhase::Revision,
            other_recommendations: Some(other_recommendations),
        })
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn phase(&self) -> PayloadPhase {
        self.phase
    }

    pub fn other_recommendations(&self) -> Option<&BTreeMap<AgentId, AgentOpinion>> {
        self.other_recommendations.as_ref()
    }
}

fn validate_description(description: &str) -> Result<(), SchemaViolation> {
    let found = description.chars().filter(|c| !c.is_whitespace()).count();
    if found < MIN_DESCRIPTION_CHARS {
        return Err(SchemaViolation::DescriptionTooShort {
            found,
            minimum: MIN_DESCRIPTION_CHARS,
        });
    }
    Ok(())
}

// ============================================================================
// Phase Result
// ============================================================================

/// Aggregate of every opinion collected in one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PhaseResultRecord")]
pub struct PhaseResult {
    phase: PhaseKind,
    responses: BTreeMap<AgentId, AgentOpinion>,
    timestamp: DateTime<Utc>,
    duration_seconds: f64,
}

#[derive(Deserialize)]
struct PhaseResultRecord {
    phase: PhaseKind,
    responses: BTreeMap<AgentId, AgentOpinion>,
    timestamp: String,
    duration_seconds: f64,
}

impl TryFrom<PhaseResultRecord> for PhaseResult {
    type Error = SchemaViolation;

    fn try_from(record: PhaseResultRecord) -> Result<Self, Self::Error> {
        let timestamp = parse_timestamp(&record.timestamp)?;
        PhaseResult::new(
            record.phase,
            record.responses,
            timestamp,
            record.duration_seconds,
        )
    }
}

impl PhaseResult {
    pub fn new(
        phase: PhaseKind,
        responses: BTreeMap<AgentId, AgentOpinion>,
        timestamp: DateTime<Utc>,
        duration_seconds: f64,
    ) -> Result<Self, SchemaViolation> {
        if responses.is_empty() {
            return Err(SchemaViolation::EmptyPhaseResult(phase));
        }
        for (key, opinion) in &responses {
            if key != opinion.agent_name() {
                return Err(SchemaViolation::KeyMismatch {
                    key: key.clone(),
                    agent_name: opinion.agent_name().clone(),
                });
            }
        }
        check_duration(phase, duration_seconds)?;
        Ok(Self {
            phase,
            responses,
            timestamp,
            duration_seconds,
        })
    }

    /// Key a list of opinions by their own agent names.
    pub fn from_opinions(
        phase: PhaseKind,
        opinions: Vec<AgentOpinion>,
        timestamp: DateTime<Utc>,
        duration_seconds: f64,
    ) -> Result<Self, SchemaViolation> {
        let mut responses = BTreeMap::new();
        for opinion in opinions {
            let key = opinion.agent_name().clone();
            if responses.contains_key(&key) {
                return Err(SchemaViolation::DuplicateAgent(key));
            }
            responses.insert(key, opinion);
        }
        Self::new(phase, responses, timestamp, duration_seconds)
    }

    pub fn phase(&self) -> PhaseKind {
        self.phase
    }

    pub fn responses(&self) -> &BTreeMap<AgentId, AgentOpinion> {
        &self.responses
    }

    pub fn get(&self, agent: &str) -> Option<&AgentOpinion> {
        self.responses.get(agent)
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn duration_seconds(&self) -> f64 {
        self.duration_seconds
    }

    pub fn agent_count(&self) -> usize {
        self.responses.len()
    }

    pub fn successful(&self) -> impl Iterator<Item = &AgentOpinion> {
        self.responses.values().filter(|o| o.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &AgentOpinion> {
        self.responses.values().filter(|o| o.status().is_failure())
    }

    pub fn with_status(&self, status: OpinionStatus) -> impl Iterator<Item = &AgentOpinion> {
        self.responses.values().filter(move |o| o.status() == status)
    }

    /// Constraints emitted by successful opinions, deduplicated, in agent order.
    pub fn binding_constraints(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for constraint in self
            .successful()
            .flat_map(|o| o.binding_constraints().iter())
        {
            if !out.contains(constraint) {
                out.push(constraint.clone());
            }
        }
        out
    }

    pub fn into_responses(self) -> BTreeMap<AgentId, AgentOpinion> {
        self.responses
    }
}

// ============================================================================
// Run State
// ============================================================================

/// Terminal failure details of a halted run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HaltRecord {
    pub reason: HaltReason,
    pub failed_agents: Vec<AgentId>,
    pub detail: String,
    pub halted_at: DateTime<Utc>,
}

/// The evolving, checkpointed record of one disruption run.
///
/// Transitions consume `self` and return the next state, so a phase can only
/// extend the history it was handed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RunStateRecord")]
pub struct RunState {
    run_id: String,
    disruption: String,
    enable_revision: bool,
    phase: RunPhase,
    history: Vec<PhaseResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    halt: Option<HaltRecord>,
    started_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RunStateRecord {
    run_id: String,
    disruption: String,
    enable_revision: bool,
    phase: RunPhase,
    history: Vec<PhaseResult>,
    #[serde(default)]
    halt: Option<HaltRecord>,
    started_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RunStateRecord> for RunState {
    type Error = SchemaViolation;

    /// A snapshot carries a halt record exactly when it is halted.
    fn try_from(record: RunStateRecord) -> Result<Self, Self::Error> {
        if record.halt.is_some() != (record.phase == RunPhase::Halted) {
            return Err(SchemaViolation::HaltRecordMismatch {
                run_id: record.run_id,
                phase: record.phase,
            });
        }
        Ok(Self {
            run_id: record.run_id,
            disruption: record.disruption,
            enable_revision: record.enable_revision,
            phase: record.phase,
            history: record.history,
            halt: record.halt,
            started_at: record.started_at,
            updated_at: record.updated_at,
        })
    }
}

impl RunState {
    pub fn start(
        run_id: impl Into<String>,
        disruption: impl Into<String>,
        enable_revision: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            disruption: disruption.into(),
            enable_revision,
            phase: RunPhase::InitialPhase,
            history: Vec::new(),
            halt: None,
            started_at: now,
            updated_at: now,
        }
    }

    /// Append a completed phase and move to `next`.
    pub fn record_phase(
        mut self,
        result: PhaseResult,
        next: RunPhase,
    ) -> Result<Self, SchemaViolation> {
        self.ensure_open()?;
        self.history.push(result);
        self.phase = next;
        self.updated_at = Utc::now();
        Ok(self)
    }

    pub fn advance(mut self, next: RunPhase) -> Result<Self, SchemaViolation> {
        self.ensure_open()?;
        self.phase = next;
        self.updated_at = Utc::now();
        Ok(self)
    }

    pub fn halt(
        mut self,
        reason: HaltReason,
        failed_agents: Vec<AgentId>,
        detail: impl Into<String>,
    ) -> Result<Self, SchemaViolation> {
        self.ensure_open()?;
        let now = Utc::now();
        self.phase = RunPhase::Halted;
        self.halt = Some(HaltRecord {
            reason,
            failed_agents,
            detail: detail.into(),
            halted_at: now,
        });
        self.updated_at = now;
        Ok(self)
    }

    fn ensure_open(&self) -> Result<(), SchemaViolation> {
        if self.phase.is_terminal() {
            return Err(SchemaViolation::TerminalRun(self.run_id.clone()));
        }
        Ok(())
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn disruption(&self) -> &str {
        &self.disruption
    }

    pub fn enable_revision(&self) -> bool {
        self.enable_revision
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn history(&self) -> &[PhaseResult] {
        &self.history
    }

    pub fn halt_record(&self) -> Option<&HaltRecord> {
        self.halt.as_ref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Most recent history entry of the given kind.
    pub fn latest_result(&self, kind: PhaseKind) -> Option<&PhaseResult> {
        self.history.iter().rev().find(|r| r.phase() == kind)
    }

    /// Business result the arbitrator should see: the revision pass if one
    /// ran, otherwise the first pass.
    pub fn final_business_result(&self) -> Option<&PhaseResult> {
        self.latest_result(PhaseKind::BusinessRevision)
            .or_else(|| self.latest_result(PhaseKind::BusinessInitial))
    }
}

// ============================================================================
// Collation
// ============================================================================

/// Cross-phase result handed to the human approver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CollationRecord")]
pub struct Collation {
    safety: PhaseResult,
    business: PhaseResult,
    arbitration: PhaseResult,
    binding_constraints: Vec<String>,
}

#[derive(Deserialize)]
struct CollationRecord {
    safety: PhaseResult,
    business: PhaseResult,
    arbitration: PhaseResult,
}

impl TryFrom<CollationRecord> for Collation {
    type Error = SchemaViolation;

    fn try_from(record: CollationRecord) -> Result<Self, Self::Error> {
        Collation::new(record.safety, record.business, record.arbitration)
    }
}

impl Collation {
    pub fn new(
        safety: PhaseResult,
        business: PhaseResult,
        arbitration: PhaseResult,
    ) -> Result<Self, SchemaViolation> {
        if safety.phase() != PhaseKind::SafetyAssessment {
            return Err(SchemaViolation::CollationSlotMismatch {
                slot: "safety",
                found: safety.phase(),
            });
        }
        if !matches!(
            business.phase(),
            PhaseKind::BusinessInitial | PhaseKind::BusinessRevision
        ) {
            return Err(SchemaViolation::CollationSlotMismatch {
                slot: "business",
                found: business.phase(),
            });
        }
        if arbitration.phase() != PhaseKind::Arbitration {
            return Err(SchemaViolation::CollationSlotMismatch {
                slot: "arbitration",
                found: arbitration.phase(),
            });
        }
        let arbitrators = arbitration
            .responses()
            .values()
            .filter(|o| o.agent_class() == AgentClass::Arbitrator)
            .count();
        if arbitrators != 1 || arbitration.agent_count() != 1 {
            return Err(SchemaViolation::ArbitratorCount(arbitration.agent_count()));
        }
        let binding_constraints = safety.binding_constraints();
        Ok(Self {
            safety,
            business,
            arbitration,
            binding_constraints,
        })
    }

    pub fn safety(&self) -> &PhaseResult {
        &self.safety
    }

    pub fn business(&self) -> &PhaseResult {
        &self.business
    }

    pub fn arbitration(&self) -> &PhaseResult {
        &self.arbitration
    }

    pub fn binding_constraints(&self) -> &[String] {
        &self.binding_constraints
    }

    /// The arbitrator's opinion: the ranked decision itself.
    pub fn decision(&self) -> Option<&AgentOpinion> {
        self.arbitration.responses().values().next()
    }
}

// ============================================================================
// Checkpoint Records
// ============================================================================

/// A persisted checkpoint log entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointRecord {
    /// Store-assigned sequence number (strictly increasing)
    pub seq: i64,
    /// Unique record ID (ULID)
    pub record_id: String,
    pub run_id: String,
    pub phase: String,
    pub agent_id: Option<AgentId>,
    /// One of the `CHECKPOINT_*` kinds
    pub kind: String,
    pub payload: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

/// Request to append a checkpoint record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppendCheckpoint {
    pub run_id: String,
    pub phase: String,
    pub agent_id: Option<AgentId>,
    pub kind: String,
    pub payload: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

pub const CHECKPOINT_AGENT_OUTCOME: &str = "agent.outcome";
pub const CHECKPOINT_RUN_STATE: &str = "run.state";

// ============================================================================
// Tests
// ============================================================================
