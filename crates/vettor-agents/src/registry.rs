use crate::agent::{Agent, Capability};
use crate::graph::{self, DependencyGraph};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};
use vettor_core::{AgentHealth, AgentType, HealthStatus, VettorError, VettorResult};

/// Lifecycle state of a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Registered and fit to receive work.
    Active,
    /// Registered but administratively taken out of rotation.
    Inactive,
    /// Last health check reported unhealthy.
    Error,
}

/// Serializable view of a registration, without the agent handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMetadata {
    /// The agent's identity.
    pub agent_type: AgentType,
    /// Declared capability contract.
    pub capability: Capability,
    /// Registration time.
    pub registered_at: DateTime<Utc>,
    /// Last health check or execution observed.
    pub last_activity_at: DateTime<Utc>,
    /// Lifecycle state.
    pub status: AgentStatus,
    /// Most recent health report.
    pub health: AgentHealth,
}

struct AgentRegistration {
    agent: Arc<dyn Agent>,
    metadata: AgentMetadata,
}

/// Outcome of dependency validation across all registered agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyValidation {
    /// True when no issues were found.
    pub valid: bool,
    /// Human-readable descriptions of every problem found.
    pub issues: Vec<String>,
}

/// Registry lifecycle notifications.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// An agent completed registration.
    AgentRegistered {
        /// The registered agent.
        agent_type: AgentType,
    },
    /// An agent was removed.
    AgentUnregistered {
        /// The removed agent.
        agent_type: AgentType,
    },
    /// A health-check pass finished.
    HealthCheckCompleted {
        /// Per-agent reports from the pass.
        results: HashMap<AgentType, AgentHealth>,
    },
}

/// Tracks which agents exist and derives their dependency graph.
///
/// One logical registry per process, injected by constructor wherever it is
/// needed; all mutation happens behind an async lock.
pub struct AgentRegistry {
    agents: RwLock<HashMap<AgentType, AgentRegistration>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl AgentRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            agents: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Subscribes to registry lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Registers an agent, running its `initialize` hook first.
    ///
    /// Fails when the agent type is already registered or initialization
    /// fails.
    pub async fn register_agent(&self, agent: Arc<dyn Agent>) -> VettorResult<()> {
        let agent_type = agent.agent_type();
        {
            let agents = self.agents.read().await;
            if agents.contains_key(&agent_type) {
                return Err(VettorError::Registry(format!(
                    "agent {agent_type} is already registered"
                )));
            }
        }

        agent.initialize().await.map_err(|e| {
            VettorError::Registry(format!("initialization failed for {agent_type}: {e}"))
        })?;

        let capability = agent.capabilities();
        let now = Utc::now();
        let registration = AgentRegistration {
            agent,
            metadata: AgentMetadata {
                agent_type,
                capability,
                registered_at: now,
                last_activity_at: now,
                status: AgentStatus::Active,
                health: AgentHealth::healthy(),
            },
        };

        {
            let mut agents = self.agents.write().await;
            if agents.contains_key(&agent_type) {
                return Err(VettorError::Registry(format!(
                    "agent {agent_type} is already registered"
                )));
            }
            agents.insert(agent_type, registration);
        }

        info!(agent = %agent_type, "Agent registered");
        let _ = self.events.send(RegistryEvent::AgentRegistered { agent_type });
        Ok(())
    }

    /// Removes an agent, running its `cleanup` hook best-effort.
    pub async fn unregister_agent(&self, agent_type: AgentType) -> bool {
        let removed = self.agents.write().await.remove(&agent_type);
        match removed {
            Some(registration) => {
                if let Err(e) = registration.agent.cleanup().await {
                    warn!(agent = %agent_type, error = %e, "Agent cleanup failed");
                }
                info!(agent = %agent_type, "Agent unregistered");
                let _ = self
                    .events
                    .send(RegistryEvent::AgentUnregistered { agent_type });
                true
            }
            None => false,
        }
    }

    /// Returns the agent handle for a type.
    pub async fn get_agent(&self, agent_type: AgentType) -> Option<Arc<dyn Agent>> {
        self.agents
            .read()
            .await
            .get(&agent_type)
            .map(|r| Arc::clone(&r.agent))
    }

    /// Returns the metadata view for a type.
    pub async fn get_agent_metadata(&self, agent_type: AgentType) -> Option<AgentMetadata> {
        self.agents
            .read()
            .await
            .get(&agent_type)
            .map(|r| r.metadata.clone())
    }

    /// All registered agent types, sorted.
    pub async fn all_registered(&self) -> Vec<AgentType> {
        let mut types: Vec<AgentType> = self.agents.read().await.keys().copied().collect();
        types.sort();
        types
    }

    /// Registered agents currently in the `Active` state, sorted.
    pub async fn active_agents(&self) -> Vec<AgentType> {
        let agents = self.agents.read().await;
        let mut types: Vec<AgentType> = agents
            .values()
            .filter(|r| r.metadata.status == AgentStatus::Active)
            .map(|r| r.metadata.agent_type)
            .collect();
        types.sort();
        types
    }

    /// Agents whose capability `provides` the given name, sorted.
    pub async fn find_agents_by_capability(&self, name: &str) -> Vec<AgentType> {
        let agents = self.agents.read().await;
        let mut types: Vec<AgentType> = agents
            .values()
            .filter(|r| r.metadata.capability.provides.iter().any(|p| p == name))
            .map(|r| r.metadata.agent_type)
            .collect();
        types.sort();
        types
    }

    /// A snapshot of every registered capability, keyed by agent type.
    pub async fn capabilities(&self) -> HashMap<AgentType, Capability> {
        self.agents
            .read()
            .await
            .iter()
            .map(|(&t, r)| (t, r.metadata.capability.clone()))
            .collect()
    }

    /// Checks every declared dependency across the registry.
    ///
    /// Reports dependencies on unregistered agents and circular declarations;
    /// an empty registry is trivially valid.
    pub async fn validate_dependencies(&self) -> DependencyValidation {
        let caps = self.capabilities().await;
        let mut issues: Vec<String> = Vec::new();
        for (agent, dep) in graph::missing_dependencies(&caps) {
            issues.push(format!("agent {agent} depends on unregistered agent {dep}"));
        }
        if let Some(cycle) = graph::find_cycle(&caps) {
            let names: Vec<String> = cycle.iter().map(ToString::to_string).collect();
            issues.push(format!("circular dependency: {}", names.join(" -> ")));
        }
        DependencyValidation {
            valid: issues.is_empty(),
            issues,
        }
    }

    /// Derives the dependency graph over all registered agents.
    pub async fn dependency_graph(&self) -> VettorResult<DependencyGraph> {
        graph::build_graph(&self.capabilities().await)
    }

    /// Flattened topological execution order.
    pub async fn execution_order(&self) -> VettorResult<Vec<AgentType>> {
        Ok(self.dependency_graph().await?.execution_order())
    }

    /// Execution levels; all agents in a level may run in parallel.
    pub async fn parallel_execution_groups(&self) -> VettorResult<Vec<Vec<AgentType>>> {
        Ok(self.dependency_graph().await?.levels)
    }

    /// Whether an agent is registered, not yet completed, and has all of its
    /// dependencies in the completed set.
    pub async fn can_agent_execute(
        &self,
        agent_type: AgentType,
        completed: &HashSet<AgentType>,
    ) -> bool {
        if completed.contains(&agent_type) {
            return false;
        }
        let agents = self.agents.read().await;
        match agents.get(&agent_type) {
            Some(registration) => registration
                .metadata
                .capability
                .dependencies
                .iter()
                .all(|dep| completed.contains(dep)),
            None => false,
        }
    }

    /// Runs a health check against every registered agent, updating each
    /// registration's health, status, and activity timestamp.
    pub async fn perform_health_check(&self) -> HashMap<AgentType, AgentHealth> {
        let handles: Vec<(AgentType, Arc<dyn Agent>)> = {
            let agents = self.agents.read().await;
            agents
                .iter()
                .map(|(&t, r)| (t, Arc::clone(&r.agent)))
                .collect()
        };

        let mut results: HashMap<AgentType, AgentHealth> = HashMap::new();
        for (agent_type, agent) in handles {
            let health = agent.health_check().await;
            results.insert(agent_type, health);
        }

        {
            let mut agents = self.agents.write().await;
            for (agent_type, health) in &results {
                if let Some(registration) = agents.get_mut(agent_type) {
                    registration.metadata.health = health.clone();
                    registration.metadata.last_activity_at = Utc::now();
                    registration.metadata.status = match health.status {
                        HealthStatus::Unhealthy => AgentStatus::Error,
                        _ => AgentStatus::Active,
                    };
                }
            }
        }

        let _ = self.events.send(RegistryEvent::HealthCheckCompleted {
            results: results.clone(),
        });
        results
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
