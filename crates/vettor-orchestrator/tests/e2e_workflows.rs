//! End-to-end workflow tests over the full stack: registry, queue, error
//! handler, repository, and orchestrator, using scripted mock agents.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;
use vettor_agents::{Agent, AgentRegistry, Capability};
use vettor_core::{
    AgentContext, AgentRequest, AgentResponse, AgentType, BusinessIdea, VettorError, VettorResult,
};
use vettor_orchestrator::{
    InMemoryResultRepository, Orchestrator, ResultRepository, ResultStatus, WorkflowEvent,
    WorkflowOptions, WorkflowState,
};
use vettor_queue::JobQueue;
use vettor_recovery::{ErrorCategory, ErrorHandler, ErrorMatcher, ErrorPattern, ErrorSeverity, RetryPolicy};

/// Scripted agent: optional initial failures, optional block gate, fixed
/// score, and an execution log shared across agents.
struct ScriptedAgent {
    agent_type: AgentType,
    dependencies: Vec<AgentType>,
    score: f64,
    fail_times: AtomicU32,
    fail_message: String,
    log: Arc<Mutex<Vec<AgentType>>>,
    seen_prior: Arc<Mutex<Option<HashMap<AgentType, f64>>>>,
    gate: Option<tokio::sync::watch::Receiver<bool>>,
}

impl ScriptedAgent {
    fn new(agent_type: AgentType, score: f64, log: Arc<Mutex<Vec<AgentType>>>) -> Self {
        Self {
            agent_type,
            dependencies: Vec::new(),
            score,
            fail_times: AtomicU32::new(0),
            fail_message: String::new(),
            log,
            seen_prior: Arc::new(Mutex::new(None)),
            gate: None,
        }
    }

    fn with_dependencies(mut self, deps: Vec<AgentType>) -> Self {
        self.dependencies = deps;
        self
    }

    fn failing(mut self, times: u32, message: &str) -> Self {
        self.fail_times = AtomicU32::new(times);
        self.fail_message = message.to_string();
        self
    }

    fn gated(mut self, gate: tokio::sync::watch::Receiver<bool>) -> Self {
        self.gate = Some(gate);
        self
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn agent_type(&self) -> AgentType {
        self.agent_type
    }

    fn capabilities(&self) -> Capability {
        Capability::new(self.agent_type.to_string(), "1.0.0")
            .with_dependencies(self.dependencies.clone())
    }

    async fn execute(
        &self,
        _request: &AgentRequest,
        ctx: &AgentContext,
    ) -> VettorResult<AgentResponse> {
        self.log.lock().await.push(self.agent_type);
        if let Some(gate) = &self.gate {
            let mut gate = gate.clone();
            while !*gate.borrow() {
                if gate.changed().await.is_err() {
                    break;
                }
            }
        }
        if self.fail_times.load(Ordering::SeqCst) > 0 {
            self.fail_times.fetch_sub(1, Ordering::SeqCst);
            return Err(VettorError::Agent(self.fail_message.clone()));
        }
        *self.seen_prior.lock().await = Some(ctx.prior_scores.clone());
        Ok(AgentResponse {
            agent_type: self.agent_type,
            score: self.score,
            insights: vec![format!("{} looks plausible", self.agent_type)],
            confidence: 1.0,
            metadata: HashMap::new(),
            raw_data: serde_json::Value::Null,
        })
    }
}

struct Harness {
    registry: Arc<AgentRegistry>,
    queue: Arc<JobQueue>,
    recovery: Arc<ErrorHandler>,
    repository: Arc<InMemoryResultRepository>,
    orchestrator: Orchestrator,
    log: Arc<Mutex<Vec<AgentType>>>,
}

async fn harness() -> Harness {
    let registry = Arc::new(AgentRegistry::new());
    let queue = Arc::new(JobQueue::new());
    let recovery = Arc::new(ErrorHandler::new());
    let repository = Arc::new(InMemoryResultRepository::new());
    let orchestrator = Orchestrator::new(
        Arc::clone(&registry),
        Arc::clone(&queue),
        Arc::clone(&recovery),
        Arc::clone(&repository) as Arc<dyn vettor_orchestrator::ResultRepository>,
    );
    orchestrator.start().await.unwrap();
    Harness {
        registry,
        queue,
        recovery,
        repository,
        orchestrator,
        log: Arc::new(Mutex::new(Vec::new())),
    }
}

async fn wait_for_terminal(
    rx: &mut tokio::sync::broadcast::Receiver<WorkflowEvent>,
    workflow_id: Uuid,
) -> WorkflowEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(ev @ WorkflowEvent::WorkflowCompleted { workflow_id: id, .. })
                    if id == workflow_id =>
                {
                    return ev;
                }
                Ok(ev @ WorkflowEvent::WorkflowFailed { workflow_id: id, .. })
                    if id == workflow_id =>
                {
                    return ev;
                }
                Ok(_) => {}
                Err(e) => panic!("workflow event channel closed: {e}"),
            }
        }
    })
    .await
    .expect("timed out waiting for workflow to finish")
}

#[tokio::test]
async fn workflow_runs_levels_in_dependency_order() {
    let h = harness().await;

    let market = Arc::new(ScriptedAgent::new(AgentType::MarketSizing, 80.0, Arc::clone(&h.log)));
    let pricing = Arc::new(
        ScriptedAgent::new(AgentType::Pricing, 60.0, Arc::clone(&h.log))
            .with_dependencies(vec![AgentType::MarketSizing]),
    );
    let competition = Arc::new(
        ScriptedAgent::new(AgentType::Competition, 70.0, Arc::clone(&h.log))
            .with_dependencies(vec![AgentType::MarketSizing]),
    );
    let pricing_prior = Arc::clone(&pricing.seen_prior);

    h.registry.register_agent(market).await.unwrap();
    h.registry.register_agent(pricing).await.unwrap();
    h.registry.register_agent(competition).await.unwrap();

    let mut rx = h.orchestrator.subscribe();
    let workflow_id = Uuid::new_v4();
    let evaluation_id = Uuid::new_v4();
    let job_id = h
        .orchestrator
        .execute_workflow(
            workflow_id,
            evaluation_id,
            BusinessIdea::new("Vet scheduling", "Booking platform for rural vets"),
            WorkflowOptions::default(),
        )
        .await
        .unwrap();

    // Started fires before the terminal event.
    match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap() {
        WorkflowEvent::WorkflowStarted { workflow_id: id, job_id: jid, agent_types, .. } => {
            assert_eq!(id, workflow_id);
            assert_eq!(jid, job_id);
            assert_eq!(agent_types.len(), 3);
        }
        other => panic!("expected WorkflowStarted, got {other:?}"),
    }

    match wait_for_terminal(&mut rx, workflow_id).await {
        WorkflowEvent::WorkflowCompleted { overall_score, .. } => {
            // All confidences are 1.0: plain mean of 80/60/70.
            let score = overall_score.unwrap();
            assert!((score - 70.0).abs() < 0.001);
        }
        other => panic!("expected completion, got {other:?}"),
    }

    // MarketSizing ran strictly before its dependents.
    let log = h.log.lock().await.clone();
    assert_eq!(log.len(), 3);
    assert_eq!(log[0], AgentType::MarketSizing);
    assert!(log[1..].contains(&AgentType::Pricing));
    assert!(log[1..].contains(&AgentType::Competition));

    // Upstream score was threaded into the dependent's context.
    let prior = pricing_prior.lock().await.clone().unwrap();
    assert_eq!(prior.get(&AgentType::MarketSizing), Some(&80.0));

    // One completed record per agent execution.
    let records = h.repository.find_by_evaluation_id(evaluation_id).await.unwrap();
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.status == ResultStatus::Completed));
    assert!(records.iter().all(|r| r.score.is_some()));

    let status = h.orchestrator.workflow_status(workflow_id).await.unwrap();
    assert_eq!(status.status, WorkflowState::Completed);
    assert!(status.finished_at.is_some());

    let stats = h.orchestrator.statistics().await;
    assert_eq!(stats.total_workflows, 1);
    assert_eq!(stats.completed_workflows, 1);
    assert_eq!(stats.agents_executed, 3);
    assert_eq!(stats.active_workflows, 0);
}

#[tokio::test]
async fn unregistered_dependency_rejected_before_enqueue() {
    let h = harness().await;
    h.registry
        .register_agent(Arc::new(
            ScriptedAgent::new(AgentType::Pricing, 50.0, Arc::clone(&h.log))
                .with_dependencies(vec![AgentType::MarketSizing]),
        ))
        .await
        .unwrap();

    let workflow_id = Uuid::new_v4();
    let err = h
        .orchestrator
        .execute_workflow(
            workflow_id,
            Uuid::new_v4(),
            BusinessIdea::new("t", "d"),
            WorkflowOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, VettorError::Validation(_)));
    assert!(err.to_string().contains("unregistered"));

    // Nothing was enqueued and no workflow was recorded.
    let metrics = h.queue.metrics().await;
    assert_eq!(metrics.waiting + metrics.active, 0);
    assert_eq!(metrics.completed, 0);
    assert!(h.orchestrator.workflow_status(workflow_id).await.is_none());
    assert_eq!(h.orchestrator.statistics().await.total_workflows, 0);
}

#[tokio::test]
async fn flaky_agent_recovers_through_retries() {
    let h = harness().await;
    // A fast-retry pattern so the test does not sleep through real backoff.
    h.recovery
        .add_error_pattern(
            ErrorPattern::new(
                "transient-blip",
                ErrorMatcher::contains("transient blip"),
                ErrorCategory::System,
                ErrorSeverity::Medium,
            )
            .retryable(RetryPolicy::linear(3, 1)),
        )
        .await;

    h.registry
        .register_agent(Arc::new(
            ScriptedAgent::new(AgentType::MarketSizing, 75.0, Arc::clone(&h.log))
                .failing(2, "transient blip in sizing feed"),
        ))
        .await
        .unwrap();

    let mut rx = h.orchestrator.subscribe();
    let workflow_id = Uuid::new_v4();
    let evaluation_id = Uuid::new_v4();
    h.orchestrator
        .execute_workflow(
            workflow_id,
            evaluation_id,
            BusinessIdea::new("t", "d"),
            WorkflowOptions::default(),
        )
        .await
        .unwrap();

    match wait_for_terminal(&mut rx, workflow_id).await {
        WorkflowEvent::WorkflowCompleted { .. } => {}
        other => panic!("expected completion after retries, got {other:?}"),
    }

    // Two failures then one success: three invocations of the same agent.
    assert_eq!(h.log.lock().await.len(), 3);
    assert!(!h.recovery.is_circuit_breaker_open("market-sizing").await);

    let records = h.repository.find_by_evaluation_id(evaluation_id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ResultStatus::Completed);
}

#[tokio::test]
async fn non_retryable_failure_fails_the_workflow() {
    let h = harness().await;
    h.registry
        .register_agent(Arc::new(
            ScriptedAgent::new(AgentType::Pricing, 50.0, Arc::clone(&h.log))
                .failing(u32::MAX, "401 unauthorized from pricing upstream"),
        ))
        .await
        .unwrap();

    let mut rx = h.orchestrator.subscribe();
    let workflow_id = Uuid::new_v4();
    let evaluation_id = Uuid::new_v4();
    h.orchestrator
        .execute_workflow(
            workflow_id,
            evaluation_id,
            BusinessIdea::new("t", "d"),
            WorkflowOptions::default(),
        )
        .await
        .unwrap();

    match wait_for_terminal(&mut rx, workflow_id).await {
        WorkflowEvent::WorkflowFailed { error, .. } => {
            assert!(error.contains("authentication"), "error was: {error}");
        }
        other => panic!("expected failure, got {other:?}"),
    }

    // Exactly one invocation: authentication errors never retry.
    assert_eq!(h.log.lock().await.len(), 1);

    let status = h.orchestrator.workflow_status(workflow_id).await.unwrap();
    assert_eq!(status.status, WorkflowState::Failed);
    assert!(status.error.is_some());

    let records = h.repository.find_by_evaluation_id(evaluation_id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ResultStatus::Failed);

    let stats = h.orchestrator.statistics().await;
    assert_eq!(stats.failed_workflows, 1);
    assert_eq!(stats.agent_failures, 1);
}

#[tokio::test]
async fn cancellation_stops_later_levels() {
    let h = harness().await;
    let (release, gate) = tokio::sync::watch::channel(false);

    h.registry
        .register_agent(Arc::new(
            ScriptedAgent::new(AgentType::MarketSizing, 80.0, Arc::clone(&h.log)).gated(gate),
        ))
        .await
        .unwrap();
    h.registry
        .register_agent(Arc::new(
            ScriptedAgent::new(AgentType::Pricing, 60.0, Arc::clone(&h.log))
                .with_dependencies(vec![AgentType::MarketSizing]),
        ))
        .await
        .unwrap();

    let mut workflow_rx = h.orchestrator.subscribe();
    let mut queue_rx = h.queue.subscribe();
    let workflow_id = Uuid::new_v4();
    let job_id = h
        .orchestrator
        .execute_workflow(
            workflow_id,
            Uuid::new_v4(),
            BusinessIdea::new("t", "d"),
            WorkflowOptions::default(),
        )
        .await
        .unwrap();

    // Let the first level start, then cancel while it is blocked.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.orchestrator.cancel_workflow(workflow_id).await);
    assert!(!h.orchestrator.cancel_workflow(workflow_id).await, "second cancel is a no-op");
    release.send(true).unwrap();

    // The queue job finishes (the handler returns early), but the workflow
    // stays cancelled and no completion event is emitted.
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match queue_rx.recv().await {
                Ok(vettor_queue::QueueEvent::Completed { job_id: id, .. }) if id == job_id => break,
                Ok(_) => {}
                Err(e) => panic!("queue channel closed: {e}"),
            }
        }
    })
    .await
    .expect("workflow job did not finish");

    tokio::time::sleep(Duration::from_millis(100)).await;
    let status = h.orchestrator.workflow_status(workflow_id).await.unwrap();
    assert_eq!(status.status, WorkflowState::Cancelled);

    // Pricing never ran.
    let log = h.log.lock().await.clone();
    assert!(!log.contains(&AgentType::Pricing));

    // Only the started event was emitted for this workflow.
    let mut saw_terminal = false;
    while let Ok(event) = workflow_rx.try_recv() {
        match event {
            WorkflowEvent::WorkflowCompleted { workflow_id: id, .. }
            | WorkflowEvent::WorkflowFailed { workflow_id: id, .. }
                if id == workflow_id =>
            {
                saw_terminal = true;
            }
            _ => {}
        }
    }
    assert!(!saw_terminal, "cancelled workflow must not emit a terminal event");

    let stats = h.orchestrator.statistics().await;
    assert_eq!(stats.cancelled_workflows, 1);
}

#[tokio::test]
async fn open_breaker_blocks_agent_before_execution() {
    let h = harness().await;
    h.registry
        .register_agent(Arc::new(ScriptedAgent::new(
            AgentType::Competition,
            70.0,
            Arc::clone(&h.log),
        )))
        .await
        .unwrap();

    // Trip the breaker out of band.
    let ctx = vettor_recovery::ErrorContext::new(AgentType::Competition);
    for _ in 0..5 {
        h.recovery
            .handle_error(&VettorError::Agent("connection refused".to_string()), &ctx)
            .await;
    }
    assert!(h.recovery.is_circuit_breaker_open("competition").await);

    let mut rx = h.orchestrator.subscribe();
    let workflow_id = Uuid::new_v4();
    h.orchestrator
        .execute_workflow(
            workflow_id,
            Uuid::new_v4(),
            BusinessIdea::new("t", "d"),
            WorkflowOptions::default(),
        )
        .await
        .unwrap();

    match wait_for_terminal(&mut rx, workflow_id).await {
        WorkflowEvent::WorkflowFailed { error, .. } => {
            assert!(error.contains("circuit breaker open"), "error was: {error}");
        }
        other => panic!("expected breaker-gated failure, got {other:?}"),
    }
    // The agent body never ran.
    assert!(h.log.lock().await.is_empty());
}

#[tokio::test]
async fn critical_path_and_optimization_cover_agent_sets() {
    let h = harness().await;
    h.registry
        .register_agent(Arc::new(ScriptedAgent::new(
            AgentType::MarketSizing,
            80.0,
            Arc::clone(&h.log),
        )))
        .await
        .unwrap();
    h.registry
        .register_agent(Arc::new(
            ScriptedAgent::new(AgentType::Pricing, 60.0, Arc::clone(&h.log))
                .with_dependencies(vec![AgentType::MarketSizing]),
        ))
        .await
        .unwrap();

    // Asking for Pricing alone pulls in its registered dependency.
    let graph = h
        .orchestrator
        .build_dependency_graph(&[AgentType::Pricing])
        .await
        .unwrap();
    assert_eq!(
        graph.levels,
        vec![vec![AgentType::MarketSizing], vec![AgentType::Pricing]]
    );

    let cp = h
        .orchestrator
        .calculate_critical_path(&[AgentType::Pricing])
        .await
        .unwrap();
    assert_eq!(cp.path, vec![AgentType::MarketSizing, AgentType::Pricing]);
    // No observed durations yet: two default estimates.
    assert_eq!(cp.duration_ms, 2 * vettor_agents::DEFAULT_AGENT_DURATION_MS);

    let optimized = h
        .orchestrator
        .optimize_workflow_execution(&[AgentType::Pricing])
        .await
        .unwrap();
    assert_eq!(optimized.nodes, graph.nodes);
}
