use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use vettor_core::{
    AgentContext, AgentHealth, AgentRequest, AgentResponse, AgentType, VettorResult,
};

/// The capability contract an agent declares at registration time.
///
/// `dependencies` names the agents that must complete before this one may
/// run; cycles across registered capabilities are rejected by validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    /// Capability name, e.g. `market-sizing`.
    pub name: String,
    /// Semver-ish version string.
    pub version: String,
    /// Agents that must complete first.
    #[serde(default)]
    pub dependencies: Vec<AgentType>,
    /// Capability names this agent offers to others.
    #[serde(default)]
    pub provides: Vec<String>,
    /// Data the agent needs from the evaluation request.
    #[serde(default)]
    pub requires: Vec<String>,
}

impl Capability {
    /// Creates a capability with no dependencies.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            dependencies: Vec::new(),
            provides: Vec::new(),
            requires: Vec::new(),
        }
    }

    /// Sets the upstream agents this one depends on.
    pub fn with_dependencies(mut self, deps: Vec<AgentType>) -> Self {
        self.dependencies = deps;
        self
    }

    /// Sets the capability names this agent provides.
    pub fn with_provides(mut self, provides: Vec<String>) -> Self {
        self.provides = provides;
        self
    }

    /// Sets the data needs of this agent.
    pub fn with_requires(mut self, requires: Vec<String>) -> Self {
        self.requires = requires;
        self
    }
}

/// A pluggable analysis unit.
///
/// The orchestration core drives agents exclusively through this trait: it
/// reads the declared capability to schedule, calls `initialize`/`cleanup`
/// around registration, health-checks periodically, and invokes `execute`
/// once per workflow level slot. Scoring internals stay behind the trait.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable identity used for registration and dependency edges.
    fn agent_type(&self) -> AgentType;

    /// The declared capability contract.
    fn capabilities(&self) -> Capability;

    /// One-time setup; a failure here aborts registration.
    async fn initialize(&self) -> VettorResult<()> {
        Ok(())
    }

    /// Resource teardown, called on unregistration.
    async fn cleanup(&self) -> VettorResult<()> {
        Ok(())
    }

    /// Liveness/readiness report.
    async fn health_check(&self) -> AgentHealth {
        AgentHealth::healthy()
    }

    /// Whether this agent can serve the given request.
    fn can_handle(&self, request: &AgentRequest) -> bool {
        request.analysis_type == self.agent_type()
    }

    /// Runs the analysis.
    async fn execute(
        &self,
        request: &AgentRequest,
        ctx: &AgentContext,
    ) -> VettorResult<AgentResponse>;
}
