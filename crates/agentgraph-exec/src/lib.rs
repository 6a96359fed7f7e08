//! Agentgraph Exec - planning, graph execution, and run orchestration
//!
//! The orchestrator turns a TaskSpec into a Graph through a Planner, runs it
//! on the Executor, and packages the result. Everything observable about a
//! run goes through the shared Trace.

pub mod config;
pub mod executor;
pub mod graph;
pub mod manifest;
pub mod orchestrator;
pub mod planner;
pub mod sink;
pub mod topology;

pub use config::AgentGraphConfig;
pub use executor::{node_args, ExecutionReport, Executor, ExecutorConfig, FailurePolicy};
pub use graph::{GraphExtensionError, LiveGraph};
pub use manifest::RunManifest;
pub use orchestrator::{OrchestrateError, Orchestrator};
pub use planner::{HeuristicPlanner, LlmPlanner, PlanError, Planner, PlannerConfig};
pub use sink::JsonlTraceWriter;
pub use topology::{infer_kind, TopologyNode, TopologyView};

use agentgraph_llm::LlmProvider;
use agentgraph_tools::{create_default_registry, StructuredOutputTool, ToolRegistry};
use std::sync::Arc;

/// Default registry with the structured output tool tuned from `config`.
pub fn build_registry(config: &AgentGraphConfig, provider: Arc<dyn LlmProvider>) -> ToolRegistry {
    let mut registry = create_default_registry(
        provider.clone(),
        &config.provider.model,
        config.provider.max_tokens,
        config.retry_policy(),
    );
    registry.register(StructuredOutputTool::new(provider, config.structured_output_config()));
    registry
}
