use crate::repository::{AgentResultRecord, ResultRepository, ResultStatus};
use crate::types::{
    WorkflowEvent, WorkflowJobData, WorkflowOptions, WorkflowState, WorkflowStatus,
    WORKFLOW_JOB_TYPE,
};
use chrono::Utc;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;
use vettor_agents::graph::{self, CriticalPath, DependencyGraph};
use vettor_agents::{AgentRegistry, Capability};
use vettor_core::{
    AgentContext, AgentRequest, AgentResponse, AgentType, BusinessIdea, VettorError, VettorResult,
};
use vettor_queue::{Job, JobOptions, JobQueue, JobStatus, QueueEvent};
use vettor_recovery::{ErrorContext, ErrorHandler};

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    total_workflows: u64,
    completed_workflows: u64,
    failed_workflows: u64,
    cancelled_workflows: u64,
    agents_executed: u64,
    agent_failures: u64,
}

/// Aggregate orchestrator statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorStatistics {
    /// Workflows currently running.
    pub active_workflows: usize,
    /// Workflows submitted since creation.
    pub total_workflows: u64,
    /// Workflows that completed.
    pub completed_workflows: u64,
    /// Workflows that failed terminally.
    pub failed_workflows: u64,
    /// Workflows cancelled by callers.
    pub cancelled_workflows: u64,
    /// Successful agent executions across all workflows.
    pub agents_executed: u64,
    /// Terminal agent failures across all workflows.
    pub agent_failures: u64,
}

/// State the workflow job handler shares with the orchestrator facade.
#[derive(Clone)]
struct EngineShared {
    registry: Arc<AgentRegistry>,
    recovery: Arc<ErrorHandler>,
    repository: Arc<dyn ResultRepository>,
    workflows: Arc<RwLock<HashMap<Uuid, WorkflowStatus>>>,
    durations: Arc<RwLock<HashMap<AgentType, u64>>>,
    counters: Arc<RwLock<Counters>>,
}

/// Top-level coordinator for multi-agent evaluation workflows.
///
/// A workflow submission validates the dependency graph against the
/// registry, enqueues exactly one job carrying the graph and agent set, and
/// tracks status until the queue reports the job terminal. The workflow
/// handler executes agents level by level: every agent in a level runs
/// concurrently, and the next level starts only after the whole level
/// finished. Each failed invocation routes through the error handler before
/// any retry happens.
pub struct Orchestrator {
    shared: EngineShared,
    queue: Arc<JobQueue>,
    job_index: Arc<RwLock<HashMap<Uuid, Uuid>>>,
    events: broadcast::Sender<WorkflowEvent>,
}

impl Orchestrator {
    /// Wires an orchestrator from its injected collaborators.
    pub fn new(
        registry: Arc<AgentRegistry>,
        queue: Arc<JobQueue>,
        recovery: Arc<ErrorHandler>,
        repository: Arc<dyn ResultRepository>,
    ) -> Self {
        let (events, _) = broadcast::channel(128);
        Self {
            shared: EngineShared {
                registry,
                recovery,
                repository,
                workflows: Arc::new(RwLock::new(HashMap::new())),
                durations: Arc::new(RwLock::new(HashMap::new())),
                counters: Arc::new(RwLock::new(Counters::default())),
            },
            queue,
            job_index: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    /// Subscribes to workflow-level events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.events.subscribe()
    }

    /// Registers the workflow handler on the queue and starts the task that
    /// re-emits queue completion/failure as workflow events.
    pub async fn start(&self) -> VettorResult<()> {
        let shared = self.shared.clone();
        self.queue
            .process(WORKFLOW_JOB_TYPE, move |job| {
                let shared = shared.clone();
                async move { run_workflow(shared, job).await }
            })
            .await?;

        let mut rx = self.queue.subscribe();
        let shared = self.shared.clone();
        let job_index = Arc::clone(&self.job_index);
        let events = self.events.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(QueueEvent::Completed { job_id, result, .. }) => {
                        finalize_job(&shared, &job_index, &events, job_id, Ok(result)).await;
                    }
                    Ok(QueueEvent::Failed { job_id, error, .. }) => {
                        finalize_job(&shared, &job_index, &events, job_id, Err(error)).await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Workflow event bridge lagged behind queue events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(())
    }

    /// Validates and submits one workflow, returning the queue job id.
    ///
    /// Fails before anything is enqueued when the agent set references an
    /// unregistered agent, an unregistered dependency, or a dependency
    /// cycle.
    pub async fn execute_workflow(
        &self,
        workflow_id: Uuid,
        evaluation_id: Uuid,
        business_idea: BusinessIdea,
        opts: WorkflowOptions,
    ) -> VettorResult<Uuid> {
        let selected = self.resolve_agent_set(opts.required_agents.as_deref()).await?;
        let graph = graph::build_graph(&selected)?;

        let agent_types: Vec<AgentType> = graph.nodes.clone();
        let dependencies: HashMap<AgentType, Vec<AgentType>> = selected
            .iter()
            .map(|(&t, cap)| (t, cap.dependencies.clone()))
            .collect();

        let data = WorkflowJobData {
            evaluation_id,
            workflow_id,
            agent_types: agent_types.clone(),
            parallel_groups: graph.levels.clone(),
            dependencies,
            priority: opts.priority,
            timeout_ms: opts.timeout_ms,
            business_idea,
            user_id: opts.user_id.clone(),
            correlation_id: opts.correlation_id,
        };

        let started_at = Utc::now();
        {
            let mut workflows = self.shared.workflows.write().await;
            workflows.insert(
                workflow_id,
                WorkflowStatus {
                    workflow_id,
                    evaluation_id,
                    agent_types: agent_types.clone(),
                    status: WorkflowState::Running,
                    started_at,
                    finished_at: None,
                    error: None,
                },
            );
        }

        let job = self
            .queue
            .add(
                WORKFLOW_JOB_TYPE,
                serde_json::to_value(&data)?,
                JobOptions::default().with_priority(opts.priority),
            )
            .await?;
        self.job_index.write().await.insert(job.id, workflow_id);
        self.shared.counters.write().await.total_workflows += 1;

        info!(
            workflow = %workflow_id,
            evaluation = %evaluation_id,
            job = %job.id,
            agents = agent_types.len(),
            levels = graph.levels.len(),
            "Workflow started"
        );
        let _ = self.events.send(WorkflowEvent::WorkflowStarted {
            workflow_id,
            evaluation_id,
            job_id: job.id,
            agent_types,
            started_at,
        });

        // The job may already have finished before the index entry landed;
        // apply the terminal transition from the stored job if so.
        if let Some(done) = self.queue.get_job(job.id).await {
            if done.is_finished() {
                let outcome = match done.status {
                    JobStatus::Completed => Ok(done.result.unwrap_or(serde_json::Value::Null)),
                    _ => Err(done.last_error.unwrap_or_else(|| "job failed".to_string())),
                };
                finalize_job(&self.shared, &self.job_index, &self.events, job.id, outcome).await;
            }
        }

        Ok(job.id)
    }

    /// Builds the dependency graph for an explicit agent set, including
    /// registered dependencies automatically.
    pub async fn build_dependency_graph(
        &self,
        agent_types: &[AgentType],
    ) -> VettorResult<DependencyGraph> {
        let selected = self.resolve_agent_set(Some(agent_types)).await?;
        graph::build_graph(&selected)
    }

    /// Critical path for an agent set, weighted by observed durations.
    pub async fn calculate_critical_path(
        &self,
        agent_types: &[AgentType],
    ) -> VettorResult<CriticalPath> {
        let graph = self.build_dependency_graph(agent_types).await?;
        let durations = self.shared.durations.read().await.clone();
        Ok(graph::critical_path(&graph, &durations))
    }

    /// Graph reordered so critical-path agents dispatch first within each
    /// level.
    pub async fn optimize_workflow_execution(
        &self,
        agent_types: &[AgentType],
    ) -> VettorResult<DependencyGraph> {
        let graph = self.build_dependency_graph(agent_types).await?;
        let durations = self.shared.durations.read().await.clone();
        Ok(graph::optimize_execution_order(&graph, &durations))
    }

    /// Status of one workflow.
    pub async fn workflow_status(&self, workflow_id: Uuid) -> Option<WorkflowStatus> {
        self.shared.workflows.read().await.get(&workflow_id).cloned()
    }

    /// All workflows currently running.
    pub async fn active_workflows(&self) -> Vec<WorkflowStatus> {
        let workflows = self.shared.workflows.read().await;
        let mut active: Vec<WorkflowStatus> = workflows
            .values()
            .filter(|w| w.status == WorkflowState::Running)
            .cloned()
            .collect();
        active.sort_by_key(|w| w.started_at);
        active
    }

    /// Cancels a running workflow cooperatively.
    ///
    /// Stops dispatch of further levels; agents already running are not
    /// interrupted. Returns false when the workflow is unknown or already
    /// terminal.
    pub async fn cancel_workflow(&self, workflow_id: Uuid) -> bool {
        let cancelled = {
            let mut workflows = self.shared.workflows.write().await;
            match workflows.get_mut(&workflow_id) {
                Some(status) if status.status == WorkflowState::Running => {
                    status.status = WorkflowState::Cancelled;
                    status.finished_at = Some(Utc::now());
                    true
                }
                _ => false,
            }
        };
        if cancelled {
            self.shared.counters.write().await.cancelled_workflows += 1;
            info!(workflow = %workflow_id, "Workflow cancelled");
        }
        cancelled
    }

    /// Aggregate statistics across all workflows.
    pub async fn statistics(&self) -> OrchestratorStatistics {
        let counters = *self.shared.counters.read().await;
        let active = self
            .shared
            .workflows
            .read()
            .await
            .values()
            .filter(|w| w.status == WorkflowState::Running)
            .count();
        OrchestratorStatistics {
            active_workflows: active,
            total_workflows: counters.total_workflows,
            completed_workflows: counters.completed_workflows,
            failed_workflows: counters.failed_workflows,
            cancelled_workflows: counters.cancelled_workflows,
            agents_executed: counters.agents_executed,
            agent_failures: counters.agent_failures,
        }
    }

    /// Resolves the requested agent set (or all registered agents) into a
    /// capability map, pulling in registered dependencies transitively.
    async fn resolve_agent_set(
        &self,
        requested: Option<&[AgentType]>,
    ) -> VettorResult<HashMap<AgentType, Capability>> {
        let available = self.shared.registry.capabilities().await;
        let mut stack: Vec<AgentType> = match requested {
            Some(list) => list.to_vec(),
            None => available.keys().copied().collect(),
        };
        if stack.is_empty() {
            return Err(VettorError::Validation(
                "no agents available to execute".to_string(),
            ));
        }

        let mut selected: HashMap<AgentType, Capability> = HashMap::new();
        while let Some(agent_type) = stack.pop() {
            if selected.contains_key(&agent_type) {
                continue;
            }
            let cap = available.get(&agent_type).ok_or_else(|| {
                VettorError::Validation(format!("agent {agent_type} is not registered"))
            })?;
            for &dep in &cap.dependencies {
                if !available.contains_key(&dep) {
                    return Err(VettorError::Validation(format!(
                        "agent {agent_type} depends on unregistered agent {dep}"
                    )));
                }
                stack.push(dep);
            }
            selected.insert(agent_type, cap.clone());
        }
        Ok(selected)
    }
}

/// Applies the terminal transition for a finished workflow job and re-emits
/// the outcome as a workflow event. Idempotent: only a `Running` workflow
/// transitions, so the bridge task and the submission catch-up path cannot
/// both fire.
async fn finalize_job(
    shared: &EngineShared,
    job_index: &Arc<RwLock<HashMap<Uuid, Uuid>>>,
    events: &broadcast::Sender<WorkflowEvent>,
    job_id: Uuid,
    outcome: Result<serde_json::Value, String>,
) {
    let Some(workflow_id) = job_index.read().await.get(&job_id).copied() else {
        return;
    };
    let transition = {
        let mut workflows = shared.workflows.write().await;
        match workflows.get_mut(&workflow_id) {
            Some(status) if status.status == WorkflowState::Running => {
                status.finished_at = Some(Utc::now());
                match &outcome {
                    Ok(_) => status.status = WorkflowState::Completed,
                    Err(error) => {
                        status.status = WorkflowState::Failed;
                        status.error = Some(error.clone());
                    }
                }
                Some(status.evaluation_id)
            }
            _ => None,
        }
    };
    let Some(evaluation_id) = transition else {
        return;
    };

    match outcome {
        Ok(result) => {
            shared.counters.write().await.completed_workflows += 1;
            let overall_score = result.get("overall_score").and_then(serde_json::Value::as_f64);
            info!(workflow = %workflow_id, job = %job_id, "Workflow completed");
            let _ = events.send(WorkflowEvent::WorkflowCompleted {
                workflow_id,
                evaluation_id,
                job_id,
                overall_score,
            });
        }
        Err(error) => {
            shared.counters.write().await.failed_workflows += 1;
            warn!(workflow = %workflow_id, job = %job_id, error = %error, "Workflow failed");
            let _ = events.send(WorkflowEvent::WorkflowFailed {
                workflow_id,
                evaluation_id,
                job_id,
                error,
            });
        }
    }
}

async fn workflow_cancelled(
    workflows: &Arc<RwLock<HashMap<Uuid, WorkflowStatus>>>,
    workflow_id: Uuid,
) -> bool {
    workflows
        .read()
        .await
        .get(&workflow_id)
        .is_some_and(|w| w.status == WorkflowState::Cancelled)
}

/// The workflow job handler: dispatches agents level by level with a
/// barrier between levels, threading upstream scores into each context.
async fn run_workflow(shared: EngineShared, job: Job) -> VettorResult<serde_json::Value> {
    let data: WorkflowJobData = serde_json::from_value(job.payload)?;
    debug!(
        workflow = %data.workflow_id,
        levels = data.parallel_groups.len(),
        "Dispatching workflow levels"
    );

    let mut prior_scores: HashMap<AgentType, f64> = HashMap::new();
    let mut responses: Vec<AgentResponse> = Vec::new();

    for group in &data.parallel_groups {
        if workflow_cancelled(&shared.workflows, data.workflow_id).await {
            info!(workflow = %data.workflow_id, "Workflow cancelled, stopping dispatch");
            return Ok(serde_json::json!({
                "workflow_id": data.workflow_id,
                "evaluation_id": data.evaluation_id,
                "cancelled": true,
                "completed_agents": responses.len(),
            }));
        }

        let runs = group
            .iter()
            .map(|&agent_type| run_agent(&shared, &data, agent_type, prior_scores.clone()));
        let results = join_all(runs).await;

        for (&agent_type, result) in group.iter().zip(results) {
            let response = result?;
            prior_scores.insert(agent_type, response.score);
            responses.push(response);
        }
    }

    let overall_score = aggregate_score(&responses);
    Ok(serde_json::json!({
        "workflow_id": data.workflow_id,
        "evaluation_id": data.evaluation_id,
        "overall_score": overall_score,
        "agent_count": responses.len(),
    }))
}

/// Executes one agent with error-handler-driven retries and a circuit
/// breaker gate, persisting a result record for the execution.
async fn run_agent(
    shared: &EngineShared,
    data: &WorkflowJobData,
    agent_type: AgentType,
    prior_scores: HashMap<AgentType, f64>,
) -> VettorResult<AgentResponse> {
    let breaker_key = agent_type.to_string();
    if shared.recovery.is_circuit_breaker_open(&breaker_key).await {
        shared.counters.write().await.agent_failures += 1;
        return Err(VettorError::Orchestrator(format!(
            "circuit breaker open for agent {agent_type}"
        )));
    }

    let agent = shared.registry.get_agent(agent_type).await.ok_or_else(|| {
        VettorError::Orchestrator(format!("agent {agent_type} is not registered"))
    })?;

    let request = AgentRequest {
        evaluation_id: data.evaluation_id,
        business_idea: data.business_idea.clone(),
        analysis_type: agent_type,
        correlation_id: data.correlation_id,
    };
    if !agent.can_handle(&request) {
        return Err(VettorError::Orchestrator(format!(
            "agent {agent_type} rejected the request"
        )));
    }
    let exec_ctx = AgentContext {
        workflow_id: Some(data.workflow_id),
        user_id: data.user_id.clone(),
        prior_scores,
    };

    let mut record = AgentResultRecord::pending(
        data.evaluation_id,
        agent_type,
        serde_json::to_value(&request)?,
    );
    shared.repository.create(record.clone()).await?;

    let mut attempt: u32 = 1;
    loop {
        let started = Instant::now();
        let outcome = tokio::time::timeout(
            Duration::from_millis(data.timeout_ms),
            agent.execute(&request, &exec_ctx),
        )
        .await
        .unwrap_or_else(|_| {
            Err(VettorError::Agent(format!(
                "agent {agent_type} timed out after {}ms",
                data.timeout_ms
            )))
        });

        match outcome {
            Ok(response) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                let err_ctx = ErrorContext::new(agent_type);
                shared.recovery.record_success(&err_ctx).await;

                record.status = ResultStatus::Completed;
                record.output_data = Some(serde_json::to_value(&response)?);
                record.score = Some(response.score);
                shared.repository.update(record).await?;

                {
                    let mut durations = shared.durations.write().await;
                    let entry = durations.entry(agent_type).or_insert(elapsed_ms);
                    *entry = (*entry + elapsed_ms) / 2;
                }
                shared.counters.write().await.agents_executed += 1;

                debug!(agent = %agent_type, attempt, elapsed_ms, score = response.score, "Agent execution succeeded");
                return Ok(response);
            }
            Err(err) => {
                let mut err_ctx = ErrorContext::new(agent_type);
                err_ctx.correlation_id = data.correlation_id;
                err_ctx.user_id = data.user_id.clone();
                let categorized = shared.recovery.handle_error(&err, &err_ctx).await;

                if shared.recovery.should_retry(&categorized, &err_ctx, attempt).await {
                    let delay = shared.recovery.retry_delay(&categorized, attempt);
                    debug!(
                        agent = %agent_type,
                        attempt,
                        delay_ms = delay,
                        category = %categorized.category,
                        "Agent attempt failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                    continue;
                }

                record.status = ResultStatus::Failed;
                record.output_data = Some(serde_json::json!({"error": err.to_string()}));
                if let Err(update_err) = shared.repository.update(record).await {
                    warn!(agent = %agent_type, error = %update_err, "Failed to persist failure record");
                }
                shared.counters.write().await.agent_failures += 1;

                return Err(VettorError::Orchestrator(format!(
                    "agent {agent_type} failed after {attempt} attempt(s) \
                     (category {}, severity {:?}): {err}",
                    categorized.category, categorized.severity
                )));
            }
        }
    }
}

/// Confidence-weighted mean of agent scores; falls back to a plain mean
/// when confidences sum to zero.
fn aggregate_score(responses: &[AgentResponse]) -> Option<f64> {
    if responses.is_empty() {
        return None;
    }
    let weight_sum: f64 = responses.iter().map(|r| r.confidence).sum();
    if weight_sum > f64::EPSILON {
        let weighted: f64 = responses.iter().map(|r| r.score * r.confidence).sum();
        Some(weighted / weight_sum)
    } else {
        let plain: f64 = responses.iter().map(|r| r.score).sum();
        Some(plain / responses.len() as f64)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn response(agent_type: AgentType, score: f64, confidence: f64) -> AgentResponse {
        AgentResponse {
            agent_type,
            score,
            insights: Vec::new(),
            confidence,
            metadata: HashMap::new(),
            raw_data: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_aggregate_weighted_by_confidence() {
        let responses = vec![
            response(AgentType::MarketSizing, 80.0, 1.0),
            response(AgentType::Pricing, 40.0, 0.5),
        ];
        let overall = aggregate_score(&responses).unwrap();
        // (80*1.0 + 40*0.5) / 1.5 = 66.66..
        assert!((overall - 66.666).abs() < 0.01);
    }

    #[test]
    fn test_aggregate_zero_confidence_falls_back_to_mean() {
        let responses = vec![
            response(AgentType::MarketSizing, 80.0, 0.0),
            response(AgentType::Pricing, 40.0, 0.0),
        ];
        assert_eq!(aggregate_score(&responses), Some(60.0));
    }

    #[test]
    fn test_aggregate_empty() {
        assert_eq!(aggregate_score(&[]), None);
    }
}
