//! Core types and error definitions for the Vettor evaluation engine.
//!
//! This crate provides the foundational types shared across all Vettor
//! crates: error handling, the agent identity enum, and the request/response
//! contract the orchestration core uses to talk to analysis agents.
//!
//! # Main types
//!
//! - [`VettorError`] — Unified error enum for all Vettor subsystems.
//! - [`VettorResult`] — Convenience alias for `Result<T, VettorError>`.
//! - [`AgentType`] — Identity of one pluggable analysis unit.
//! - [`BusinessIdea`] — The shared unit of work an evaluation runs against.
//! - [`AgentRequest`] / [`AgentResponse`] — The execute contract.
//! - [`AgentHealth`] — Health-check report returned by agents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

// --- Error types ---

/// Top-level error type for the Vettor engine.
///
/// Each variant corresponds to a subsystem that can produce errors.
#[derive(Debug, thiserror::Error)]
pub enum VettorError {
    /// An error from the job queue (unknown job, duplicate processor, ...).
    #[error("Queue error: {0}")]
    Queue(String),

    /// An error from the agent registry (duplicate registration, lookup miss).
    #[error("Registry error: {0}")]
    Registry(String),

    /// An error raised by an analysis agent during execution.
    #[error("Agent error: {0}")]
    Agent(String),

    /// An error from the workflow orchestrator.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// A dependency-graph or input validation failure.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An error from the result repository.
    #[error("Repository error: {0}")]
    Repository(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`VettorError`].
pub type VettorResult<T> = Result<T, VettorError>;

// --- Agent identity ---

/// Identity of one pluggable analysis unit.
///
/// The set of variants is the closed universe of agents the engine knows how
/// to schedule; which of them are actually available is decided at runtime by
/// what gets registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentType {
    /// Estimates total addressable market for the idea.
    MarketSizing,
    /// Scores competitive difficulty of the space.
    Competition,
    /// Recommends a pricing model and price point.
    Pricing,
    /// Estimates customer willingness to pay.
    WillingnessToPay,
    /// Assesses execution and market risk.
    RiskProfile,
    /// Synthesizes per-agent results into an overall verdict.
    Synthesis,
}

impl AgentType {
    /// All known agent types, in graph-stable order.
    pub const ALL: [AgentType; 6] = [
        AgentType::MarketSizing,
        AgentType::Competition,
        AgentType::Pricing,
        AgentType::WillingnessToPay,
        AgentType::RiskProfile,
        AgentType::Synthesis,
    ];
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentType::MarketSizing => write!(f, "market-sizing"),
            AgentType::Competition => write!(f, "competition"),
            AgentType::Pricing => write!(f, "pricing"),
            AgentType::WillingnessToPay => write!(f, "willingness-to-pay"),
            AgentType::RiskProfile => write!(f, "risk-profile"),
            AgentType::Synthesis => write!(f, "synthesis"),
        }
    }
}

impl std::str::FromStr for AgentType {
    type Err = VettorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "market-sizing" => Ok(AgentType::MarketSizing),
            "competition" => Ok(AgentType::Competition),
            "pricing" => Ok(AgentType::Pricing),
            "willingness-to-pay" => Ok(AgentType::WillingnessToPay),
            "risk-profile" => Ok(AgentType::RiskProfile),
            "synthesis" => Ok(AgentType::Synthesis),
            other => Err(VettorError::Validation(format!(
                "unknown agent type: {other}"
            ))),
        }
    }
}

// --- The unit of work ---

/// A business idea under evaluation — the shared unit of work every agent in
/// a workflow analyzes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessIdea {
    /// Unique identifier for this idea.
    pub id: Uuid,
    /// Short title.
    pub title: String,
    /// Free-form description the analysis agents mine for signals.
    pub description: String,
    /// Optional target market descriptor.
    pub target_market: Option<String>,
    /// UTC timestamp of when the idea was submitted.
    pub submitted_at: DateTime<Utc>,
    /// Arbitrary key-value metadata attached to the idea.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl BusinessIdea {
    /// Creates a new idea with the given title and description.
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: description.into(),
            target_market: None,
            submitted_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Sets the target market descriptor.
    pub fn with_target_market(mut self, market: impl Into<String>) -> Self {
        self.target_market = Some(market.into());
        self
    }
}

// --- Agent execute contract ---

/// A request handed to an agent's `execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    /// The evaluation this request belongs to.
    pub evaluation_id: Uuid,
    /// The idea to analyze.
    pub business_idea: BusinessIdea,
    /// The kind of analysis being requested (the target agent's type).
    pub analysis_type: AgentType,
    /// Correlation id threaded through logs and events.
    pub correlation_id: Option<Uuid>,
}

/// Execution context supplied alongside an [`AgentRequest`].
///
/// Carries workflow identity and the scores already produced by upstream
/// dependencies, so dependent agents can condition on them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentContext {
    /// The workflow this execution is part of.
    pub workflow_id: Option<Uuid>,
    /// User on whose behalf the evaluation runs, if any.
    pub user_id: Option<String>,
    /// Scores from agents that completed earlier in the same workflow.
    #[serde(default)]
    pub prior_scores: HashMap<AgentType, f64>,
}

/// The result an agent returns from `execute`.
///
/// The orchestration core reads `agent_type`, `score`, and `confidence`;
/// `raw_data` is opaque to it and passed through to persistence untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    /// Which agent produced this result.
    pub agent_type: AgentType,
    /// Normalized score in `0.0..=100.0`.
    pub score: f64,
    /// Human-readable findings.
    pub insights: Vec<String>,
    /// Confidence in the score, `0.0..=1.0`.
    pub confidence: f64,
    /// Structured metadata about the analysis.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Agent-internal data; never inspected by the core.
    #[serde(default)]
    pub raw_data: serde_json::Value,
}

// --- Health ---

/// Coarse health classification reported by an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Fully operational.
    Healthy,
    /// Operational but impaired.
    Degraded,
    /// Not fit to receive work.
    Unhealthy,
}

/// Resource usage snapshot included in a health report.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Resident memory in megabytes.
    pub memory_mb: f64,
    /// CPU utilization percentage.
    pub cpu_percent: f64,
}

/// A health-check report returned by an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHealth {
    /// Coarse health classification.
    pub status: HealthStatus,
    /// Resource usage at check time.
    pub resource_usage: ResourceUsage,
    /// When the check ran.
    pub checked_at: DateTime<Utc>,
}

impl AgentHealth {
    /// A healthy report with zeroed resource usage.
    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            resource_usage: ResourceUsage::default(),
            checked_at: Utc::now(),
        }
    }

    /// An unhealthy report with zeroed resource usage.
    pub fn unhealthy() -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            resource_usage: ResourceUsage::default(),
            checked_at: Utc::now(),
        }
    }
}
