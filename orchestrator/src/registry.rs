//! Agent registry: identity → class → execution policy.
//!
//! The registry is a fixed table resolved once at startup. Each entry binds an
//! agent identity to its class and to the reasoning port that serves it, so
//! dispatch is a table lookup rather than string-keyed branching.
//!
//! The catalog (classes and policies) comes from TOML. A built-in catalog is
//! compiled in; `ORCHESTRATOR_REGISTRY_PATH` points at an override file.

use serde::{Deserialize, Serialize};
use shared_types::{AgentClass, AgentId, AgentRoster, PayloadPhase};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::reasoning::{InvocationParams, SharedReasoningPort};

const BUILTIN_REGISTRY_TOML: &str = include_str!("../config/agent-registry.toml");

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("duplicate agent id: {0}")]
    DuplicateAgent(AgentId),
    #[error("no agents registered for class {0}")]
    MissingClass(AgentClass),
    #[error("exactly one arbitrator required, found {0}")]
    ArbitratorCount(usize),
    #[error("safety policy must halt on failure")]
    SafetyPolicyMustHalt,
    #[error("business policy must not halt on failure")]
    BusinessPolicyMustNotHalt,
    #[error("invalid {class} policy: {reason}")]
    InvalidPolicy { class: AgentClass, reason: String },
    #[error("failed to read registry catalog {path}: {reason}")]
    Io { path: String, reason: String },
    #[error("failed to parse registry catalog: {0}")]
    Parse(String),
}

// ============================================================================
// Policies
// ============================================================================

/// Execution policy for one agent class.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentPolicy {
    pub timeout: Duration,
    pub halts_on_failure: bool,
    pub extend_on_revision: bool,
    /// Extra attempts after an `error` outcome. Timeouts are never retried.
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub params: InvocationParams,
}

impl AgentPolicy {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            halts_on_failure: false,
            extend_on_revision: true,
            max_retries: 0,
            retry_backoff: Duration::ZERO,
            params: InvocationParams::default(),
        }
    }

    pub fn halting(mut self) -> Self {
        self.halts_on_failure = true;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff = backoff;
        self
    }
}

/// Per-class policies plus the fixed revision extension.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyTable {
    pub safety: AgentPolicy,
    pub business: AgentPolicy,
    pub arbitrator: AgentPolicy,
    pub revision_extension: Duration,
}

impl PolicyTable {
    pub fn for_class(&self, class: AgentClass) -> &AgentPolicy {
        match class {
            AgentClass::Safety => &self.safety,
            AgentClass::Business => &self.business,
            AgentClass::Arbitrator => &self.arbitrator,
        }
    }

    /// Deadline for one call: base timeout, extended on revision passes when
    /// the class opts in.
    pub fn timeout_for(&self, class: AgentClass, phase: PayloadPhase) -> Duration {
        let policy = self.for_class(class);
        match phase {
            PayloadPhase::Revision if policy.extend_on_revision => {
                policy.timeout + self.revision_extension
            }
            _ => policy.timeout,
        }
    }

    fn validate(&self) -> Result<(), RegistryError> {
        if !self.safety.halts_on_failure {
            return Err(RegistryError::SafetyPolicyMustHalt);
        }
        if self.business.halts_on_failure {
            return Err(RegistryError::BusinessPolicyMustNotHalt);
        }
        for class in [
            AgentClass::Safety,
            AgentClass::Business,
            AgentClass::Arbitrator,
        ] {
            let policy = self.for_class(class);
            if policy.timeout.is_zero() {
                return Err(RegistryError::InvalidPolicy {
                    class,
                    reason: "timeout must be greater than zero".to_string(),
                });
            }
            if !(0.0..=2.0).contains(&policy.params.temperature) {
                return Err(RegistryError::InvalidPolicy {
                    class,
                    reason: format!("temperature {} outside [0, 2]", policy.params.temperature),
                });
            }
        }
        Ok(())
    }
}

// ============================================================================
// Catalog (TOML)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistryCatalog {
    #[serde(default)]
    pub revision_extension_ms: u64,
    pub policies: PolicyCatalog,
    #[serde(default)]
    pub agents: Vec<AgentCatalogEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyCatalog {
    pub safety: PolicyCatalogEntry,
    pub business: PolicyCatalogEntry,
    pub arbitrator: PolicyCatalogEntry,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyCatalogEntry {
    pub timeout_ms: u64,
    #[serde(default)]
    pub halts_on_failure: bool,
    #[serde(default)]
    pub extend_on_revision: bool,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub retry_backoff_ms: u64,
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentCatalogEntry {
    pub id: String,
    pub class: AgentClass,
    pub description: Option<String>,
}

impl PolicyCatalogEntry {
    fn to_policy(&self) -> AgentPolicy {
        let defaults = InvocationParams::default();
        AgentPolicy {
            timeout: Duration::from_millis(self.timeout_ms),
            halts_on_failure: self.halts_on_failure,
            extend_on_revision: self.extend_on_revision,
            max_retries: self.max_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            params: InvocationParams {
                max_output_tokens: self.max_output_tokens.unwrap_or(defaults.max_output_tokens),
                temperature: self.temperature.unwrap_or(defaults.temperature),
            },
        }
    }
}

impl RegistryCatalog {
    pub fn builtin() -> Result<Self, RegistryError> {
        Self::parse(BUILTIN_REGISTRY_TOML)
    }

    pub fn parse(raw: &str) -> Result<Self, RegistryError> {
        toml::from_str(raw).map_err(|e| RegistryError::Parse(e.to_string()))
    }

    pub fn from_path(path: &Path) -> Result<Self, RegistryError> {
        let raw = std::fs::read_to_string(path).map_err(|e| RegistryError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::parse(&raw)
    }

    /// Load the override file when given, otherwise the built-in catalog.
    pub fn load(path: Option<&Path>) -> Result<Self, RegistryError> {
        match path {
            Some(path) => {
                tracing::info!(path = %path.display(), "Loading agent registry catalog");
                Self::from_path(path)
            }
            None => Self::builtin(),
        }
    }

    pub fn policy_table(&self) -> PolicyTable {
        PolicyTable {
            safety: self.policies.safety.to_policy(),
            business: self.policies.business.to_policy(),
            arbitrator: self.policies.arbitrator.to_policy(),
            revision_extension: Duration::from_millis(self.revision_extension_ms),
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// One registered agent and the port that answers for it.
#[derive(Clone)]
pub struct AgentEntry {
    pub id: AgentId,
    pub class: AgentClass,
    pub invoker: SharedReasoningPort,
}

impl std::fmt::Debug for AgentEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentEntry")
            .field("id", &self.id)
            .field("class", &self.class)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct AgentRegistry {
    entries: Vec<AgentEntry>,
    roster: AgentRoster,
    policies: PolicyTable,
}

pub struct AgentRegistryBuilder {
    entries: Vec<AgentEntry>,
    policies: PolicyTable,
}

impl AgentRegistryBuilder {
    pub fn agent(
        mut self,
        id: impl Into<AgentId>,
        class: AgentClass,
        invoker: SharedReasoningPort,
    ) -> Self {
        self.entries.push(AgentEntry {
            id: id.into(),
            class,
            invoker,
        });
        self
    }

    pub fn build(self) -> Result<AgentRegistry, RegistryError> {
        self.policies.validate()?;

        let mut seen = HashSet::new();
        for entry in &self.entries {
            if !seen.insert(entry.id.clone()) {
                return Err(RegistryError::DuplicateAgent(entry.id.clone()));
            }
        }

        let count = |class: AgentClass| self.entries.iter().filter(|e| e.class == class).count();
        if count(AgentClass::Safety) == 0 {
            return Err(RegistryError::MissingClass(AgentClass::Safety));
        }
        if count(AgentClass::Business) == 0 {
            return Err(RegistryError::MissingClass(AgentClass::Business));
        }
        let arbitrators = count(AgentClass::Arbitrator);
        if arbitrators != 1 {
            return Err(RegistryError::ArbitratorCount(arbitrators));
        }

        let roster = self
            .entries
            .iter()
            .map(|e| (e.id.clone(), e.class))
            .collect();

        Ok(AgentRegistry {
            entries: self.entries,
            roster,
            policies: self.policies,
        })
    }
}

impl AgentRegistry {
    pub fn builder(policies: PolicyTable) -> AgentRegistryBuilder {
        AgentRegistryBuilder {
            entries: Vec::new(),
            policies,
        }
    }

    /// Bind every catalog agent to the same reasoning port.
    pub fn from_catalog(
        catalog: &RegistryCatalog,
        port: SharedReasoningPort,
    ) -> Result<Self, RegistryError> {
        catalog
            .agents
            .iter()
            .fold(Self::builder(catalog.policy_table()), |builder, agent| {
                builder.agent(agent.id.as_str(), agent.class, port.clone())
            })
            .build()
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    pub fn policy_for(&self, class: AgentClass) -> &AgentPolicy {
        self.policies.for_class(class)
    }

    pub fn roster(&self) -> &AgentRoster {
        &self.roster
    }

    pub fn get(&self, agent: &str) -> Option<&AgentEntry> {
        self.entries.iter().find(|e| e.id.as_str() == agent)
    }

    /// Agents of one class, in registration order.
    pub fn agents_of(&self, class: AgentClass) -> impl Iterator<Item = &AgentEntry> {
        self.entries.iter().filter(move |e| e.class == class)
    }

    pub fn arbitrator(&self) -> Option<&AgentEntry> {
        self.agents_of(AgentClass::Arbitrator).next()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
