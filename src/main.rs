use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use clap::{CommandFactory, Parser, Subcommand};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use meshflow_core::config::AppConfig;
use meshflow_core::event::EventBus;
use meshflow_core::graph::WorkflowGraph;
use meshflow_core::types::ExecutionStatus;
use meshflow_core::{ExecutionContext, MeshflowError};

use meshflow_engine::{
    A2AScheduler, GraphExecutor, RunLogger, SimulatedNodeExecutor, SimulatedTransport,
    WorkflowValidator,
};

#[derive(Parser)]
#[command(name = "meshflow", version, about = "Multi-agent workflow graph engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "meshflow.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a graph without running it
    Validate {
        /// Graph JSON file (`-` for stdin)
        graph: PathBuf,
    },
    /// Run a graph depth-first from its trigger nodes
    Run {
        /// Graph JSON file (`-` for stdin)
        graph: PathBuf,
        /// Initial context as a JSON object
        #[arg(long)]
        context: Option<String>,
        /// Execute each node at most once
        #[arg(long)]
        dedupe: bool,
    },
    /// Print the A2A steps derived from a graph
    Steps {
        /// Graph JSON file (`-` for stdin)
        graph: PathBuf,
    },
    /// Run a graph's agent steps in dependency waves
    A2a {
        /// Graph JSON file (`-` for stdin)
        graph: PathBuf,
        /// Message handed to the first wave
        #[arg(short, long)]
        message: String,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "meshflow", &mut std::io::stdout());
        return Ok(());
    }

    let config = AppConfig::load_or_default(&cli.config)?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let ok = match cli.command {
        Commands::Validate { graph } => {
            let graph = read_graph(&graph)?;
            let result = WorkflowValidator::validate_graph(&graph);
            print_json(&result)?;
            result.is_valid
        }
        Commands::Run {
            graph,
            context,
            dedupe,
        } => {
            let graph = read_graph(&graph)?;
            let initial = match context {
                Some(raw) => {
                    let value: serde_json::Value =
                        serde_json::from_str(&raw).context("--context is not valid JSON")?;
                    ExecutionContext::from_value(value)
                }
                None => ExecutionContext::new(),
            };
            run_graph(&config, graph, initial, dedupe).await?
        }
        Commands::Steps { graph } => {
            let graph = read_graph(&graph)?;
            let scheduler = A2AScheduler::new(Arc::new(SimulatedTransport::from_config(
                &config.simulation,
            )))
            .with_config(config.scheduler.clone());
            print_json(&scheduler.steps_for_graph(&graph))?;
            true
        }
        Commands::A2a { graph, message } => {
            let graph = read_graph(&graph)?;
            run_a2a(&config, graph, &message).await?
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
            true
        }
        Commands::Completions { .. } => unreachable!("handled before config load"),
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_graph(
    config: &AppConfig,
    graph: WorkflowGraph,
    initial: ExecutionContext,
    dedupe: bool,
) -> anyhow::Result<bool> {
    let bus = Arc::new(EventBus::default());
    let logger = spawn_logger(config, &bus);

    let mut engine_config = config.engine.clone();
    engine_config.dedupe_visits |= dedupe;

    let executor = GraphExecutor::new(Arc::new(SimulatedNodeExecutor::from_config(
        config.simulation.clone(),
    )))
    .with_config(engine_config)
    .with_event_bus(bus.clone());

    let result = executor
        .execute_workflow(workflow_id(&graph), &graph.nodes, &graph.edges, initial)
        .await;

    drop(executor);
    drop(bus);
    finish_logger(logger).await;

    match result {
        Ok(execution) => {
            print_json(&execution)?;
            Ok(execution.status == ExecutionStatus::Completed)
        }
        Err(MeshflowError::Validation(errors)) => {
            for e in &errors {
                warn!(error = %e, "Validation failed");
            }
            print_json(&serde_json::json!({ "isValid": false, "errors": errors }))?;
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

async fn run_a2a(config: &AppConfig, graph: WorkflowGraph, message: &str) -> anyhow::Result<bool> {
    let bus = Arc::new(EventBus::default());
    let logger = spawn_logger(config, &bus);

    let scheduler = A2AScheduler::new(Arc::new(SimulatedTransport::from_config(
        &config.simulation,
    )))
    .with_config(config.scheduler.clone())
    .with_event_bus(bus.clone());

    let id = scheduler.register_workflow(graph).await?;
    let report = scheduler.execute_workflow(&id, message).await;

    drop(scheduler);
    drop(bus);
    finish_logger(logger).await;

    let report = report?;
    print_json(&report)?;
    Ok(report.success)
}

/// Start the JSONL logger when `log.dir` is configured. It subscribes here,
/// before any event is published, and stops once the bus is dropped.
fn spawn_logger(config: &AppConfig, bus: &EventBus) -> Option<(JoinHandle<()>, CancellationToken)> {
    let dir = config.log.log_dir()?;
    let cancel = CancellationToken::new();
    let logger = RunLogger::new(dir, config.log.level);
    let handle = tokio::spawn(logger.run(bus.subscribe(), cancel.clone()));
    Some((handle, cancel))
}

async fn finish_logger(logger: Option<(JoinHandle<()>, CancellationToken)>) {
    let Some((handle, cancel)) = logger else {
        return;
    };
    if tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .is_err()
    {
        warn!("Run logger did not drain in time");
        cancel.cancel();
    }
}

fn workflow_id(graph: &WorkflowGraph) -> &str {
    if graph.id.is_empty() {
        "adhoc"
    } else {
        &graph.id
    }
}

fn read_graph(path: &Path) -> anyhow::Result<WorkflowGraph> {
    let raw = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed to read graph {}", path.display()))?
    };
    let graph: WorkflowGraph = serde_json::from_str(&raw)
        .with_context(|| format!("invalid graph JSON in {}", path.display()))?;
    info!(
        nodes = graph.nodes.len(),
        edges = graph.edges.len(),
        "Graph loaded"
    );
    Ok(graph)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
