use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;
use vettor_core::{AgentResponse, AgentType, BusinessIdea};

/// Job type the orchestrator registers its workflow handler under.
pub const WORKFLOW_JOB_TYPE: &str = "workflow.execute";

/// Lifecycle state of one workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    /// Submitted and executing.
    Running,
    /// All levels finished successfully.
    Completed,
    /// A level failed terminally.
    Failed,
    /// Cancelled cooperatively; running agents were not interrupted.
    Cancelled,
}

/// Public status record for one workflow, owned by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStatus {
    /// Workflow identifier.
    pub workflow_id: Uuid,
    /// The evaluation this workflow analyzes.
    pub evaluation_id: Uuid,
    /// Agents included in the run.
    pub agent_types: Vec<AgentType>,
    /// Current state.
    pub status: WorkflowState,
    /// Submission time.
    pub started_at: DateTime<Utc>,
    /// Set when the workflow reaches a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
    /// Terminal error description, when failed.
    pub error: Option<String>,
}

/// Per-workflow submission options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowOptions {
    /// Agents to run; defaults to every registered agent. Registered
    /// dependencies of listed agents are included automatically.
    pub required_agents: Option<Vec<AgentType>>,
    /// Queue priority of the workflow job.
    pub priority: i32,
    /// Per-agent-invocation time budget in milliseconds.
    pub timeout_ms: u64,
    /// User on whose behalf the evaluation runs.
    pub user_id: Option<String>,
    /// Correlation id threaded through jobs, logs, and events.
    pub correlation_id: Option<Uuid>,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self {
            required_agents: None,
            priority: 0,
            timeout_ms: 30_000,
            user_id: None,
            correlation_id: None,
        }
    }
}

/// Payload of the single queue job a workflow submission produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowJobData {
    /// The evaluation under analysis.
    pub evaluation_id: Uuid,
    /// Workflow identifier.
    pub workflow_id: Uuid,
    /// Agents included in the run.
    pub agent_types: Vec<AgentType>,
    /// Execution levels; each inner group runs concurrently.
    pub parallel_groups: Vec<Vec<AgentType>>,
    /// Declared dependencies per agent, for observers and debugging.
    pub dependencies: HashMap<AgentType, Vec<AgentType>>,
    /// Queue priority the job was submitted with.
    pub priority: i32,
    /// Per-agent-invocation time budget in milliseconds.
    pub timeout_ms: u64,
    /// The idea being evaluated.
    pub business_idea: BusinessIdea,
    /// User on whose behalf the evaluation runs.
    pub user_id: Option<String>,
    /// Correlation id threaded through jobs, logs, and events.
    pub correlation_id: Option<Uuid>,
}

/// Payload shape for an inbound evaluation request job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRequestJobData {
    /// Correlation id threaded through the pipeline.
    pub correlation_id: Uuid,
    /// Submission time.
    pub timestamp: DateTime<Utc>,
    /// The idea to evaluate.
    pub business_idea_id: Uuid,
    /// Requesting user, if any.
    pub user_id: Option<String>,
    /// Requested priority.
    pub priority: i32,
}

/// Payload shape for a single agent-task job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTaskJobData {
    /// Correlation id threaded through the pipeline.
    pub correlation_id: Uuid,
    /// Dispatch time.
    pub timestamp: DateTime<Utc>,
    /// The evaluation the task belongs to.
    pub evaluation_id: Uuid,
    /// The agent to invoke.
    pub agent_type: AgentType,
    /// The idea under analysis.
    pub business_idea: BusinessIdea,
    /// The kind of analysis requested.
    pub analysis_type: AgentType,
}

/// Payload shape for the result-aggregation job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultProcessingJobData {
    /// Correlation id threaded through the pipeline.
    pub correlation_id: Uuid,
    /// Dispatch time.
    pub timestamp: DateTime<Utc>,
    /// The evaluation being aggregated.
    pub evaluation_id: Uuid,
    /// Per-agent results to aggregate.
    pub agent_results: Vec<AgentResponse>,
}

/// Workflow-level notifications emitted by the orchestrator.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    /// A workflow job was validated and enqueued.
    WorkflowStarted {
        /// Workflow identifier.
        workflow_id: Uuid,
        /// The evaluation under analysis.
        evaluation_id: Uuid,
        /// The queue job carrying the workflow.
        job_id: Uuid,
        /// Agents included in the run.
        agent_types: Vec<AgentType>,
        /// Submission time.
        started_at: DateTime<Utc>,
    },
    /// The workflow job completed successfully.
    WorkflowCompleted {
        /// Workflow identifier.
        workflow_id: Uuid,
        /// The evaluation under analysis.
        evaluation_id: Uuid,
        /// The queue job carrying the workflow.
        job_id: Uuid,
        /// Confidence-weighted mean of agent scores, when available.
        overall_score: Option<f64>,
    },
    /// The workflow job failed terminally.
    WorkflowFailed {
        /// Workflow identifier.
        workflow_id: Uuid,
        /// The evaluation under analysis.
        evaluation_id: Uuid,
        /// The queue job carrying the workflow.
        job_id: Uuid,
        /// Terminal error description.
        error: String,
    },
}
