//! Vettor command-line interface: wires the engine, registers the built-in
//! analysis agents, and runs evaluations from the terminal.

use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use vettor_agents::AgentRegistry;
use vettor_builtins::register_builtins;
use vettor_core::{BusinessIdea, VettorError, VettorResult};
use vettor_orchestrator::{
    HealthMonitor, InMemoryResultRepository, MonitorConfig, Orchestrator, ResultRepository,
    WorkflowEvent, WorkflowOptions,
};
use vettor_queue::{JobQueue, QueueConfig};
use vettor_recovery::{ErrorHandler, RecoveryConfig};

#[derive(Parser)]
#[command(name = "vettor", about = "Vettor — multi-agent business-idea vetting engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "vettor.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a business idea with the built-in agents
    Evaluate {
        /// Short idea title
        #[arg(long)]
        title: String,
        /// Free-form idea description
        #[arg(long)]
        description: String,
        /// Optional target market descriptor
        #[arg(long)]
        target_market: Option<String>,
    },
    /// Print the execution levels of the built-in agent graph
    Graph,
}

#[derive(Deserialize, Default)]
struct VettorConfig {
    #[serde(default)]
    queue: QueueConfig,
    #[serde(default)]
    recovery: RecoveryConfig,
    #[serde(default)]
    monitor: MonitorConfig,
    #[serde(default)]
    workflow: WorkflowDefaults,
}

#[derive(Deserialize)]
struct WorkflowDefaults {
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
    #[serde(default)]
    priority: i32,
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for WorkflowDefaults {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            priority: 0,
        }
    }
}

fn load_config(path: &Path) -> VettorResult<VettorConfig> {
    if !path.exists() {
        return Ok(VettorConfig::default());
    }
    let text = std::fs::read_to_string(path)?;
    toml::from_str(&text).map_err(|e| VettorError::Config(format!("{}: {e}", path.display())))
}

#[tokio::main]
async fn main() -> VettorResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Evaluate {
            title,
            description,
            target_market,
        } => {
            let mut idea = BusinessIdea::new(title, description);
            if let Some(market) = target_market {
                idea = idea.with_target_market(market);
            }
            evaluate(config, idea).await
        }
        Commands::Graph => print_graph().await,
    }
}

async fn evaluate(config: VettorConfig, idea: BusinessIdea) -> VettorResult<()> {
    let registry = Arc::new(AgentRegistry::new());
    let queue = Arc::new(JobQueue::with_config(config.queue));
    let recovery = Arc::new(ErrorHandler::with_config(config.recovery));
    let repository = Arc::new(InMemoryResultRepository::new());
    let orchestrator = Orchestrator::new(
        Arc::clone(&registry),
        Arc::clone(&queue),
        Arc::clone(&recovery),
        Arc::clone(&repository) as Arc<dyn ResultRepository>,
    );

    register_builtins(&registry).await?;
    orchestrator.start().await?;

    let monitor = HealthMonitor::new(Arc::clone(&registry), Arc::clone(&recovery), config.monitor);
    monitor.start().await;

    let workflow_id = Uuid::new_v4();
    let evaluation_id = Uuid::new_v4();
    let mut events = orchestrator.subscribe();

    info!(workflow = %workflow_id, idea = %idea.title, "Submitting evaluation workflow");
    orchestrator
        .execute_workflow(
            workflow_id,
            evaluation_id,
            idea.clone(),
            WorkflowOptions {
                timeout_ms: config.workflow.timeout_ms,
                priority: config.workflow.priority,
                ..WorkflowOptions::default()
            },
        )
        .await?;

    let outcome = tokio::time::timeout(Duration::from_secs(120), async {
        loop {
            match events.recv().await {
                Ok(WorkflowEvent::WorkflowCompleted {
                    workflow_id: id,
                    overall_score,
                    ..
                }) if id == workflow_id => return Ok(overall_score),
                Ok(WorkflowEvent::WorkflowFailed {
                    workflow_id: id,
                    error,
                    ..
                }) if id == workflow_id => return Err(error),
                Ok(_) => {}
                Err(e) => return Err(format!("event channel closed: {e}")),
            }
        }
    })
    .await
    .map_err(|_| VettorError::Orchestrator("evaluation timed out".to_string()))?;

    monitor.stop().await;

    match outcome {
        Ok(overall_score) => {
            println!("Evaluation of \"{}\"", idea.title);
            println!();
            let records = repository.find_by_evaluation_id(evaluation_id).await?;
            for record in &records {
                let score = record
                    .score
                    .map_or_else(|| "-".to_string(), |s| format!("{s:.1}"));
                println!("  {:<20} {score:>6}", record.agent_type.to_string());
                if let Some(output) = &record.output_data {
                    if let Some(insights) = output.get("insights").and_then(|v| v.as_array()) {
                        for insight in insights.iter().filter_map(|v| v.as_str()) {
                            println!("      - {insight}");
                        }
                    }
                }
            }
            println!();
            match overall_score {
                Some(score) => println!("Overall score: {score:.1} / 100"),
                None => println!("Overall score: n/a"),
            }
            Ok(())
        }
        Err(error) => Err(VettorError::Orchestrator(format!(
            "evaluation failed: {error}"
        ))),
    }
}

async fn print_graph() -> VettorResult<()> {
    let registry = AgentRegistry::new();
    register_builtins(&registry).await?;

    let validation = registry.validate_dependencies().await;
    if !validation.valid {
        return Err(VettorError::Validation(validation.issues.join("; ")));
    }

    println!("Execution levels (agents in a level run in parallel):");
    for (idx, level) in registry.parallel_execution_groups().await?.iter().enumerate() {
        let names: Vec<String> = level.iter().map(ToString::to_string).collect();
        println!("  level {idx}: {}", names.join(", "));
    }
    Ok(())
}
