//! Multi-agent workflow orchestration and health monitoring.
//!
//! The [`Orchestrator`] is the top-level coordinator: given a required agent
//! set it validates the dependency graph, submits one workflow job to the
//! queue, and the workflow handler dispatches agents level by level — all
//! agents in a level concurrently, with a barrier before the next level.
//! Agent failures route through the error handler for retry/backoff/circuit
//! decisions, and queue-level completion re-emerges as workflow events.
//!
//! # Main types
//!
//! - [`Orchestrator`] — Workflow submission, tracking, and cancellation.
//! - [`HealthMonitor`] — Periodic agent health checks with alerting.
//! - [`WorkflowStatus`] / [`WorkflowEvent`] — Public workflow state.
//! - [`ResultRepository`] — Persistence seam for per-agent results.

/// The orchestration engine.
pub mod engine;
/// Periodic health checks and alerting.
pub mod monitor;
/// Result persistence trait and in-memory implementation.
pub mod repository;
/// Workflow state, options, events, and job payload shapes.
pub mod types;

pub use engine::{Orchestrator, OrchestratorStatistics};
pub use monitor::{AlertKind, HealthAlert, HealthMonitor, MonitorConfig, MonitorEvent};
pub use repository::{AgentResultRecord, InMemoryResultRepository, ResultRepository, ResultStatus};
pub use types::{
    AgentTaskJobData, EvaluationRequestJobData, ResultProcessingJobData, WorkflowEvent,
    WorkflowJobData, WorkflowOptions, WorkflowState, WorkflowStatus, WORKFLOW_JOB_TYPE,
};
