//! agentgraph: run agentic task graphs from the command line
//!
//! Usage:
//!   agentgraph run task.json                   → plan + execute, print the RunResult
//!   agentgraph run task.json --mock            → offline run against the echo provider
//!   agentgraph run task.json --trace-out t.jsonl
//!   agentgraph plan task.json                  → print the planned graph only
//!   agentgraph replay t.jsonl                  → rebuild the graph view from a trace
//!   agentgraph config                          → print the effective config as TOML

use agentgraph_core::{Memory, Outcome, TaskSpec, Trace};
use agentgraph_exec::{build_registry, AgentGraphConfig, JsonlTraceWriter, LlmPlanner, Orchestrator, TopologyView};
use agentgraph_llm::{AnthropicProvider, LlmProvider, MockProvider};
use agentgraph_tools::{StructuredOutputTool, ToolRegistry};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "agentgraph",
    about = "Plan and execute task graphs of LLM-backed tools",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,
}

#[derive(Args)]
struct PlanArgs {
    /// Task spec (JSON)
    spec: PathBuf,

    /// Use the offline echo provider instead of Anthropic
    #[arg(long, default_value_t = false)]
    mock: bool,

    /// Ask the model for the plan (falls back to the heuristic planner)
    #[arg(long, default_value_t = false)]
    llm_planner: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan and execute a task
    Run {
        #[command(flatten)]
        plan: PlanArgs,

        /// Append every trace event to this JSONL file
        #[arg(long)]
        trace_out: Option<PathBuf>,

        /// Cancel the run after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Print the graph a task would run, without executing it
    Plan {
        #[command(flatten)]
        plan: PlanArgs,
    },
    /// Rebuild the graph view from a JSONL trace
    Replay {
        trace: PathBuf,
    },
    /// Print the effective config
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = match &cli.config {
        Some(path) => AgentGraphConfig::load(path),
        None => AgentGraphConfig::default(),
    };

    match cli.command {
        Commands::Run { plan, trace_out, timeout_secs } => {
            let outcome = run(&config, &plan, trace_out.as_deref(), timeout_secs).await?;
            if outcome != Outcome::Success {
                std::process::exit(1);
            }
        }
        Commands::Plan { plan } => {
            let spec = read_spec(&plan.spec)?;
            let orchestrator = planning_orchestrator(&config, &plan)?;
            let graph = orchestrator.plan(&spec, Arc::new(Trace::default())).await?;
            println!("{}", serde_json::to_string_pretty(&graph)?);
        }
        Commands::Replay { trace } => {
            let events = JsonlTraceWriter::read_events(&trace).await?;
            let view = TopologyView::from_events(&events);
            print!("{}", view.render());
            if let Some(end) = events.iter().rev().find(|e| e.event == "run.end") {
                println!("outcome: {}", end.data["outcome"].as_str().unwrap_or("unknown"));
            }
        }
        Commands::Config => {
            print!("{}", config.to_toml());
        }
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "agentgraph=info,agentgraph_core=info,agentgraph_llm=info,agentgraph_tools=info,agentgraph_exec=info".into()
    });
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn read_spec(path: &Path) -> anyhow::Result<TaskSpec> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("cannot read {}: {}", path.display(), e))?;
    Ok(TaskSpec::from_json(&content)?)
}

fn provider(config: &AgentGraphConfig, mock: bool) -> anyhow::Result<Arc<dyn LlmProvider>> {
    if mock {
        return Ok(Arc::new(MockProvider::echo()));
    }
    let api_key = std::env::var("ANTHROPIC_API_KEY")
        .map_err(|_| anyhow::anyhow!("ANTHROPIC_API_KEY not set (use --mock for an offline run)"))?;
    let mut provider = AnthropicProvider::new(api_key);
    if let Some(url) = &config.provider.base_url {
        provider = provider.with_base_url(url);
    }
    Ok(Arc::new(provider))
}

fn orchestrator(config: &AgentGraphConfig, args: &PlanArgs) -> anyhow::Result<Orchestrator> {
    let provider = provider(config, args.mock)?;
    let tools = Arc::new(build_registry(config, provider.clone()));
    let mut orchestrator = Orchestrator::from_config(config, tools.clone());
    if args.llm_planner {
        let structured = Arc::new(StructuredOutputTool::new(provider, config.structured_output_config()));
        let planner = LlmPlanner::new(structured, config.planner_config()).with_allowed_tools(tools.list());
        orchestrator = orchestrator.with_planner(Arc::new(planner));
    }
    Ok(orchestrator)
}

/// Heuristic planning never calls a provider; only the LLM planner needs one.
fn planning_orchestrator(config: &AgentGraphConfig, args: &PlanArgs) -> anyhow::Result<Orchestrator> {
    if args.llm_planner {
        return orchestrator(config, args);
    }
    Ok(Orchestrator::from_config(config, Arc::new(ToolRegistry::new())))
}

async fn run(
    config: &AgentGraphConfig,
    args: &PlanArgs,
    trace_out: Option<&Path>,
    timeout_secs: Option<u64>,
) -> anyhow::Result<Outcome> {
    let spec = read_spec(&args.spec)?;
    let mut orchestrator = orchestrator(config, args)?;
    if let Some(secs) = timeout_secs {
        orchestrator = orchestrator.with_timeout(Some(Duration::from_secs(secs)));
    }

    let trace = Arc::new(Trace::default());
    let writer = trace_out.map(|path| JsonlTraceWriter::new(path).spawn(trace.subscribe()));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling run");
            on_signal.cancel();
        }
    });

    let result = orchestrator
        .orchestrate_cancellable(&spec, trace.clone(), Arc::new(Memory::new()), cancel)
        .await;
    trace.close_subscribers();
    if let Some(writer) = writer {
        let written = writer.await??;
        tracing::info!("wrote {} trace events", written);
    }

    let result = result?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(result.outcome)
}
