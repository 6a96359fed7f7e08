//! Orchestrator: plan, execute, and package one run.

use crate::config::AgentGraphConfig;
use crate::executor::{Executor, ExecutorConfig};
use crate::planner::{HeuristicPlanner, PlanError, Planner};
use agentgraph_core::{Graph, Memory, Outcome, RunResult, TaskSpec, Trace};
use agentgraph_tools::{ExecContext, ToolRegistry};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum OrchestrateError {
    #[error("invalid task spec: {0}")]
    InvalidTaskSpec(#[source] agentgraph_core::Error),

    #[error("planning failed: {0}")]
    Planning(#[from] PlanError),

    #[error("invalid graph: {0}")]
    InvalidGraph(String),
}

pub struct Orchestrator {
    planner: Arc<dyn Planner>,
    executor: Executor,
    timeout: Option<Duration>,
}

impl Orchestrator {
    /// Heuristic planner and default executor settings.
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self {
            planner: Arc::new(HeuristicPlanner::default()),
            executor: Executor::new(tools),
            timeout: None,
        }
    }

    pub fn from_config(config: &AgentGraphConfig, tools: Arc<ToolRegistry>) -> Self {
        Self {
            planner: Arc::new(HeuristicPlanner::new(config.planner_config())),
            executor: Executor::new(tools).with_config(config.executor_config()),
            timeout: config.run_timeout(),
        }
    }

    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = planner;
        self
    }

    pub fn with_executor_config(mut self, config: ExecutorConfig) -> Self {
        self.executor = Executor::new(self.executor.tools().clone()).with_config(config);
        self
    }

    /// Cancel the run when it takes longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn planner(&self) -> &Arc<dyn Planner> {
        &self.planner
    }

    /// Plan without executing.
    pub async fn plan(&self, spec: &TaskSpec, trace: Arc<Trace>) -> Result<Graph, OrchestrateError> {
        spec.validate().map_err(OrchestrateError::InvalidTaskSpec)?;
        let ctx = ExecContext::new(Arc::new(Memory::new()), trace);
        let graph = self.planner.make_plan(spec, &ctx).await?;
        check_plan(spec, &graph)?;
        Ok(graph)
    }

    /// One run with fresh Memory and no external cancellation.
    pub async fn orchestrate(&self, spec: &TaskSpec, trace: Arc<Trace>) -> Result<RunResult, OrchestrateError> {
        self.orchestrate_cancellable(spec, trace, Arc::new(Memory::new()), CancellationToken::new())
            .await
    }

    pub async fn orchestrate_cancellable(
        &self,
        spec: &TaskSpec,
        trace: Arc<Trace>,
        memory: Arc<Memory>,
        cancel: CancellationToken,
    ) -> Result<RunResult, OrchestrateError> {
        let started = Instant::now();
        let run_id = trace.run_id().to_string();
        info!(run_id = %run_id, goal = %spec.goal, task_type = %spec.task_type, "run starting");
        trace.info(
            "run.start",
            json!({ "runId": run_id, "goal": spec.goal, "type": spec.task_type }),
        );

        let ctx = ExecContext::new(memory, trace.clone()).with_cancel(cancel.clone());
        let graph = match self.prepare(spec, &ctx).await {
            Ok(graph) => graph,
            Err(e) => {
                end_run(&trace, Outcome::Failure, started, Some(&e.to_string()));
                return Err(e);
            }
        };
        trace.info(
            "run.plan",
            json!({ "planner": self.planner.name(), "nodes": graph.nodes, "edges": graph.edges }),
        );

        let execution = self.executor.execute(spec, &graph, &ctx, cancel.clone());
        let report = match self.timeout {
            Some(limit) => {
                tokio::pin!(execution);
                tokio::select! {
                    report = &mut execution => report,
                    _ = tokio::time::sleep(limit) => {
                        warn!(run_id = %run_id, timeout_ms = limit.as_millis() as u64, "run timed out, cancelling");
                        trace.warn("run.timeout", json!({ "timeoutMs": limit.as_millis() as u64 }));
                        cancel.cancel();
                        execution.await
                    }
                }
            }
            None => execution.await,
        };
        let report = match report {
            Ok(report) => report,
            Err(e) => {
                let e = OrchestrateError::InvalidGraph(e.to_string());
                end_run(&trace, Outcome::Failure, started, Some(&e.to_string()));
                return Err(e);
            }
        };

        end_run(&trace, report.outcome, started, report.error.as_deref());

        Ok(RunResult {
            run_id,
            result: report.result,
            metrics: report.metrics,
            outcome: report.outcome,
            error: report.error,
            nodes: report.manifest.nodes,
            event_count: trace.count(),
        })
    }

    async fn prepare(&self, spec: &TaskSpec, ctx: &ExecContext) -> Result<Graph, OrchestrateError> {
        spec.validate().map_err(OrchestrateError::InvalidTaskSpec)?;
        let graph = self.planner.make_plan(spec, ctx).await?;
        check_plan(spec, &graph)?;
        Ok(graph)
    }
}

/// A plan must have nodes and respect the step cap.
fn check_plan(spec: &TaskSpec, graph: &Graph) -> Result<(), OrchestrateError> {
    if graph.is_empty() {
        return Err(OrchestrateError::InvalidGraph("plan has no nodes".into()));
    }
    if let Some(max) = spec.max_steps() {
        if graph.nodes.len() > max {
            return Err(OrchestrateError::InvalidGraph(format!(
                "plan has {} nodes, more than maxSteps {}",
                graph.nodes.len(),
                max
            )));
        }
    }
    graph
        .validate()
        .map_err(|e| OrchestrateError::InvalidGraph(e.to_string()))
}

fn end_run(trace: &Trace, outcome: Outcome, started: Instant, error: Option<&str>) {
    let mut data = json!({
        "outcome": outcome,
        "elapsedMs": started.elapsed().as_millis() as u64,
    });
    if let Some(error) = error {
        data["error"] = json!(error);
    }
    if outcome == Outcome::Success {
        trace.info("run.end", data);
    } else {
        trace.error("run.end", data);
    }
    info!(run_id = trace.run_id(), outcome = %outcome, "run finished");
}
