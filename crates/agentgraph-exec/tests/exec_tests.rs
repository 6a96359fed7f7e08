//! Tests for agentgraph-exec: executor semantics, failure policies, dynamic
//! extension, cancellation, planners, and trace replay against scripted tools

use agentgraph_core::{
    Edge, Graph, GraphExtension, Memory, Metrics, NodeSpec, NodeState, Outcome, TaskSpec, Trace, TraceEvent,
    KIND_ANSWER, KIND_TOOL,
};
use agentgraph_exec::*;
use agentgraph_llm::{LlmProvider, MockBehavior, MockProvider, RetryPolicy};
use agentgraph_tools::{
    create_default_registry, ExecContext, StructuredOutputConfig, StructuredOutputTool, Tool, ToolError, ToolOutput,
    ToolRegistry,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ============================================================
// Scripted tools
// ============================================================

/// Replies "<name> saw [<input ids>]" after an optional delay.
struct Scripted {
    name: String,
    delay: Duration,
    fail: bool,
    metrics: Option<Metrics>,
    extension: Option<GraphExtension>,
}

impl Scripted {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            delay: Duration::ZERO,
            fail: false,
            metrics: None,
            extension: None,
        }
    }

    fn failing(name: &str) -> Self {
        Self { fail: true, ..Self::new(name) }
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn with_metrics(mut self, input: u64, output: u64) -> Self {
        self.metrics = Some(Metrics::new(input, output));
        self
    }

    fn extending(mut self, extension: GraphExtension) -> Self {
        self.extension = Some(extension);
        self
    }
}

#[async_trait::async_trait]
impl Tool for Scripted {
    fn name(&self) -> &str {
        &self.name
    }
    fn description(&self) -> &str {
        "scripted test tool"
    }
    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, args: Value, ctx: &ExecContext) -> Result<ToolOutput, ToolError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(ToolError::execution(&self.name, "scripted failure"));
        }
        if let Some(ext) = &self.extension {
            ctx.extend(ext.clone());
        }
        let mut inputs: Vec<&str> = args["inputs"]
            .as_object()
            .map(|m| m.keys().map(String::as_str).collect())
            .unwrap_or_default();
        inputs.sort_unstable();
        let out = ToolOutput::text(format!("{} saw [{}]", self.name, inputs.join(",")));
        Ok(match self.metrics {
            Some(m) => out.with_metrics(m),
            None => out,
        })
    }
}

/// Records the highest number of simultaneous executions.
struct Gauge {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl Tool for Gauge {
    fn name(&self) -> &str {
        "gauge"
    }
    fn description(&self) -> &str {
        "concurrency probe"
    }
    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _args: Value, _ctx: &ExecContext) -> Result<ToolOutput, ToolError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(40)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(ToolOutput::text("measured"))
    }
}

fn registry(tools: Vec<Scripted>) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool);
    }
    Arc::new(registry)
}

fn node(id: &str, tool: &str) -> NodeSpec {
    NodeSpec::new(id).kind(KIND_TOOL).tool(tool)
}

fn task(graph: Graph) -> TaskSpec {
    TaskSpec::new("test goal", "custom").with_graph(graph)
}

fn trace() -> Arc<Trace> {
    Arc::new(Trace::new("test-run"))
}

fn node_events(trace: &Trace) -> Vec<(String, String)> {
    trace
        .events()
        .into_iter()
        .filter(|e| e.event.starts_with("node."))
        .map(|e| (e.event.clone(), e.node_id().unwrap_or_default().to_string()))
        .collect()
}

fn position(events: &[TraceEvent], name: &str, id: &str) -> Option<usize> {
    events.iter().position(|e| {
        e.event == name && (e.data.get("id").or_else(|| e.data.get("from"))).and_then(Value::as_str) == Some(id)
    })
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(10))
}

// ============================================================
// End to end
// ============================================================

#[tokio::test]
async fn search_then_answer_runs_in_order() {
    let tools = registry(vec![Scripted::new("search"), Scripted::new("answer")]);
    let graph = Graph::new()
        .with_node(node("search", "search"))
        .with_node(NodeSpec::new("answer").kind(KIND_ANSWER).tool("answer"))
        .with_edge("search", "answer");
    let trace = trace();

    let result = Orchestrator::new(tools).orchestrate(&task(graph), trace.clone()).await.unwrap();

    assert_eq!(result.outcome, Outcome::Success);
    assert_eq!(result.result, "answer saw [search]");
    assert_eq!(
        node_events(&trace),
        vec![
            ("node.start".to_string(), "search".to_string()),
            ("node.end".to_string(), "search".to_string()),
            ("node.start".to_string(), "answer".to_string()),
            ("node.end".to_string(), "answer".to_string()),
        ]
    );
    assert_eq!(result.nodes["answer"].state, NodeState::Complete);
}

#[tokio::test]
async fn run_events_bracket_the_run() {
    let tools = registry(vec![Scripted::new("echo")]);
    let trace = trace();
    let result = Orchestrator::new(tools)
        .orchestrate(&task(Graph::new().with_node(node("only", "echo"))), trace.clone())
        .await
        .unwrap();

    let events = trace.events();
    assert_eq!(events.first().unwrap().event, "run.start");
    assert_eq!(events[0].data["goal"], "test goal");
    assert_eq!(events[1].event, "run.plan");
    let end = events.last().unwrap();
    assert_eq!(end.event, "run.end");
    assert_eq!(end.data["outcome"], "success");
    assert!(end.data["elapsedMs"].is_u64());
    assert_eq!(result.run_id, "test-run");
}

#[tokio::test]
async fn event_count_matches_trace_and_every_planned_node_starts() {
    let tools = registry(vec![Scripted::new("echo")]);
    let graph = Graph::new()
        .with_node(node("a", "echo"))
        .with_node(node("b", "echo"))
        .with_node(node("c", "echo"))
        .with_edge("a", "b")
        .with_edge("a", "c");
    let trace = trace();

    let result = Orchestrator::new(tools).orchestrate(&task(graph.clone()), trace.clone()).await.unwrap();

    assert_eq!(result.event_count, trace.count());
    assert_eq!(result.event_count, trace.events().len());
    let started: Vec<String> = trace
        .events_named("node.start")
        .iter()
        .filter_map(|e| e.node_id().map(str::to_string))
        .collect();
    for id in graph.node_ids() {
        assert!(started.iter().any(|s| s == id), "{} never started", id);
    }
}

#[tokio::test]
async fn explicit_graph_passes_through_planning() {
    let tools = registry(vec![Scripted::new("echo")]);
    let graph = Graph::new()
        .with_node(node("x", "echo"))
        .with_node(node("y", "echo"))
        .with_edge("x", "y");
    let spec = TaskSpec::new("g", "research").with_graph(graph.clone());
    let trace = trace();

    Orchestrator::new(tools).orchestrate(&spec, trace.clone()).await.unwrap();

    let plan = &trace.events_named("run.plan")[0];
    let planned: Graph = serde_json::from_value(json!({
        "nodes": plan.data["nodes"],
        "edges": plan.data["edges"],
    }))
    .unwrap();
    assert_eq!(planned, graph);
}

#[tokio::test]
async fn predecessor_outputs_reach_dependents() {
    let tools = registry(vec![Scripted::new("echo")]);
    let graph = Graph::new()
        .with_node(node("a", "echo"))
        .with_node(node("b", "echo"))
        .with_node(NodeSpec::new("join").kind(KIND_ANSWER).tool("echo"))
        .with_edge("a", "join")
        .with_edge("b", "join");

    let result = Orchestrator::new(tools).orchestrate(&task(graph), trace()).await.unwrap();
    assert_eq!(result.result, "echo saw [a,b]");
}

// ============================================================
// Dynamic extension
// ============================================================

#[tokio::test]
async fn extension_schedules_new_node_before_parent_ends() {
    let ext = GraphExtension::new()
        .node(node("extra", "echo"))
        .edge("seed", "extra");
    let tools = registry(vec![Scripted::new("seeder").extending(ext), Scripted::new("echo")]);
    let trace = trace();

    let result = Orchestrator::new(tools)
        .orchestrate(&task(Graph::new().with_node(node("seed", "seeder"))), trace.clone())
        .await
        .unwrap();

    let events = trace.events();
    let extend = position(&events, "graph.extend", "seed").expect("graph.extend");
    let seed_end = position(&events, "node.end", "seed").expect("seed end");
    let extra_start = position(&events, "node.start", "extra").expect("extra start");
    let extra_end = position(&events, "node.end", "extra").expect("extra end");
    assert!(extend < seed_end);
    assert!(seed_end < extra_start);
    assert!(extra_start < extra_end);
    assert_eq!(result.result, "echo saw [seed]");
    assert!(result.nodes.contains_key("extra"));
}

#[tokio::test]
async fn dangling_extension_is_rejected_and_run_continues() {
    let ext = GraphExtension::new()
        .node(node("extra", "echo"))
        .edge("ghost", "extra");
    let tools = registry(vec![Scripted::new("seeder").extending(ext), Scripted::new("echo")]);
    let trace = trace();

    let result = Orchestrator::new(tools)
        .orchestrate(&task(Graph::new().with_node(node("seed", "seeder"))), trace.clone())
        .await
        .unwrap();

    assert_eq!(result.outcome, Outcome::Success);
    let rejected = trace.events_named("graph.extend.rejected");
    assert_eq!(rejected.len(), 1);
    assert!(rejected[0].data["error"].as_str().unwrap().contains("ghost"));
    assert!(trace.events_named("graph.extend").is_empty());
    assert!(!result.nodes.contains_key("extra"));
}

#[tokio::test]
async fn extension_beyond_step_limit_is_rejected() {
    let ext = GraphExtension::new()
        .node(node("third", "echo"))
        .edge("seed", "third");
    let tools = registry(vec![Scripted::new("seeder").extending(ext), Scripted::new("echo")]);
    let graph = Graph::new()
        .with_node(node("seed", "seeder"))
        .with_node(node("second", "echo"))
        .with_edge("seed", "second");
    let spec = task(graph).with_max_steps(2);
    let trace = trace();

    let result = Orchestrator::new(tools).orchestrate(&spec, trace.clone()).await.unwrap();

    assert_eq!(result.outcome, Outcome::Success);
    assert_eq!(trace.events_named("graph.extend.rejected").len(), 1);
    assert!(trace.events_named("node.start").iter().all(|e| e.node_id() != Some("third")));
}

#[tokio::test]
async fn duplicate_extension_node_is_rejected() {
    let ext = GraphExtension::new().node(node("seed", "echo"));
    let tools = registry(vec![Scripted::new("seeder").extending(ext), Scripted::new("echo")]);
    let trace = trace();

    Orchestrator::new(tools)
        .orchestrate(&task(Graph::new().with_node(node("seed", "seeder"))), trace.clone())
        .await
        .unwrap();

    assert_eq!(trace.events_named("graph.extend.rejected").len(), 1);
    assert_eq!(trace.events_named("node.start").len(), 1);
}

// ============================================================
// Failure policies
// ============================================================

/// a (root) feeds b (fails) and d; c depends on b.
fn diamond_with_failure() -> (Arc<ToolRegistry>, TaskSpec) {
    let tools = registry(vec![Scripted::new("ok"), Scripted::failing("bad")]);
    let graph = Graph::new()
        .with_node(node("a", "ok"))
        .with_node(node("b", "bad"))
        .with_node(node("c", "ok"))
        .with_node(node("d", "ok"))
        .with_edge("a", "b")
        .with_edge("b", "c")
        .with_edge("a", "d");
    (tools, task(graph))
}

fn with_policy(tools: Arc<ToolRegistry>, policy: FailurePolicy) -> Orchestrator {
    Orchestrator::new(tools).with_executor_config(ExecutorConfig {
        failure_policy: policy,
        ..Default::default()
    })
}

#[tokio::test]
async fn skip_dependents_skips_downstream_only() {
    let (tools, spec) = diamond_with_failure();
    let trace = trace();

    let result = with_policy(tools, FailurePolicy::SkipDependents)
        .orchestrate(&spec, trace.clone())
        .await
        .unwrap();

    assert_eq!(result.outcome, Outcome::Success);
    assert_eq!(result.nodes["b"].state, NodeState::Error);
    assert_eq!(result.nodes["c"].state, NodeState::Skipped);
    assert_eq!(result.nodes["d"].state, NodeState::Complete);

    let skipped = trace.events_named("node.skipped");
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].data["id"], "c");
    assert_eq!(skipped[0].data["blockedBy"], "b");

    let errors = trace.events_named("node.error");
    assert_eq!(errors[0].data["reason"], "tool_failed");
}

#[tokio::test]
async fn continue_dependents_runs_downstream() {
    let (tools, spec) = diamond_with_failure();
    let trace = trace();

    let result = with_policy(tools, FailurePolicy::ContinueDependents)
        .orchestrate(&spec, trace.clone())
        .await
        .unwrap();

    assert_eq!(result.outcome, Outcome::Success);
    assert_eq!(result.nodes["c"].state, NodeState::Complete);
    assert!(trace.events_named("node.skipped").is_empty());
}

#[tokio::test]
async fn abort_run_fails_the_run() {
    let (tools, spec) = diamond_with_failure();
    let trace = trace();

    let result = with_policy(tools, FailurePolicy::AbortRun)
        .orchestrate(&spec, trace.clone())
        .await
        .unwrap();

    assert_eq!(result.outcome, Outcome::Failure);
    assert!(result.error.as_deref().unwrap().contains("'b'"));
    assert_eq!(result.nodes["c"].state, NodeState::Skipped);
    let end = trace.events_named("run.end");
    assert_eq!(end[0].data["outcome"], "failure");
    assert!(end[0].data["error"].is_string());
}

#[tokio::test]
async fn root_failure_fails_the_run_under_any_policy() {
    let tools = registry(vec![Scripted::new("ok"), Scripted::failing("bad")]);
    let graph = Graph::new()
        .with_node(node("root", "bad"))
        .with_node(node("next", "ok"))
        .with_edge("root", "next");

    let result = Orchestrator::new(tools).orchestrate(&task(graph), trace()).await.unwrap();

    assert_eq!(result.outcome, Outcome::Failure);
    assert_eq!(result.nodes["next"].state, NodeState::Skipped);
    assert_eq!(result.result, "");
}

#[tokio::test]
async fn unknown_tool_reports_tool_not_found() {
    let tools = registry(vec![Scripted::new("ok")]);
    let graph = Graph::new()
        .with_node(node("a", "ok"))
        .with_node(node("b", "missing"))
        .with_edge("a", "b");
    let trace = trace();

    let result = Orchestrator::new(tools).orchestrate(&task(graph), trace.clone()).await.unwrap();

    let errors = trace.events_named("node.error");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].data["id"], "b");
    assert_eq!(errors[0].data["reason"], "tool_not_found");
    // the only sink failed, so there is nothing to report
    assert_eq!(result.outcome, Outcome::Failure);
    assert_eq!(result.result, "");
    assert!(result.error.as_deref().unwrap().contains("node 'b' failed"));
}

#[tokio::test]
async fn failure_that_skips_the_answer_fails_the_run() {
    let tools = registry(vec![Scripted::new("search")]);
    let graph = Graph::new()
        .with_node(node("r1", "search"))
        .with_node(node("r2", "missing_tool"))
        .with_node(NodeSpec::new("answer").kind(KIND_ANSWER).tool("search"))
        .with_edge("r1", "answer")
        .with_edge("r2", "answer");
    let trace = trace();

    let result = Orchestrator::new(tools).orchestrate(&task(graph), trace.clone()).await.unwrap();

    assert_eq!(result.outcome, Outcome::Failure);
    assert_eq!(result.result, "");
    assert_eq!(result.nodes["answer"].state, NodeState::Skipped);
    let error = result.error.as_deref().unwrap();
    assert!(error.contains("node 'r2' failed"), "{}", error);
    assert!(error.contains("missing_tool"), "{}", error);
    assert_eq!(trace.events_named("run.end")[0].data["outcome"], "failure");
}

#[tokio::test]
async fn failure_off_the_answer_path_keeps_success() {
    let tools = registry(vec![Scripted::new("search")]);
    let graph = Graph::new()
        .with_node(node("r1", "search"))
        .with_node(node("side", "missing_tool"))
        .with_node(NodeSpec::new("answer").kind(KIND_ANSWER).tool("search"))
        .with_edge("r1", "answer")
        .with_edge("r1", "side");

    let result = Orchestrator::new(tools).orchestrate(&task(graph), trace()).await.unwrap();

    assert_eq!(result.outcome, Outcome::Success);
    assert_eq!(result.nodes["side"].state, NodeState::Error);
    assert_eq!(result.result, "search saw [r1]");
    assert!(result.error.is_none());
}

#[tokio::test]
async fn root_with_missing_predecessor_fails_the_run() {
    let tools = registry(vec![Scripted::new("answer")]);
    let graph = Graph::new()
        .with_node(NodeSpec::new("answer").kind(KIND_ANSWER).tool("answer"))
        .with_edge("ghost", "answer");
    let trace = trace();

    let result = Orchestrator::new(tools).orchestrate(&task(graph), trace.clone()).await.unwrap();

    assert_eq!(result.outcome, Outcome::Failure);
    assert_eq!(result.result, "");
    assert_eq!(result.nodes["answer"].state, NodeState::Skipped);
    assert!(result.error.as_deref().unwrap().contains("'ghost'"));
    assert!(trace.events_named("node.start").is_empty());
}

#[tokio::test]
async fn cyclic_graph_fails_the_run() {
    let tools = registry(vec![Scripted::new("echo")]);
    let graph = Graph::new()
        .with_node(node("a", "echo"))
        .with_node(node("b", "echo"))
        .with_edge("a", "b")
        .with_edge("b", "a");
    let trace = trace();

    let result = Orchestrator::new(tools).orchestrate(&task(graph), trace.clone()).await.unwrap();

    assert_eq!(result.outcome, Outcome::Failure);
    assert!(result.error.as_deref().unwrap().contains("root node 'a' never ran"));
    assert!(trace.events_named("node.start").is_empty());
    assert_eq!(trace.events_named("node.skipped").len(), 2);
}

// ============================================================
// Cancellation
// ============================================================

#[tokio::test]
async fn timeout_cancels_in_flight_and_pending_nodes() {
    let tools = registry(vec![
        Scripted::new("slow").delayed(Duration::from_secs(30)),
        Scripted::new("ok"),
    ]);
    let graph = Graph::new()
        .with_node(node("wait", "slow"))
        .with_node(node("after", "ok"))
        .with_edge("wait", "after");
    let trace = trace();

    let result = Orchestrator::new(tools)
        .with_timeout(Some(Duration::from_millis(50)))
        .orchestrate(&task(graph), trace.clone())
        .await
        .unwrap();

    assert_eq!(result.outcome, Outcome::Cancelled);
    assert_eq!(trace.events_named("run.timeout").len(), 1);
    let errors = trace.events_named("node.error");
    assert_eq!(errors[0].data["reason"], "cancelled");
    assert_eq!(result.nodes["after"].state, NodeState::Skipped);

    let events = trace.events();
    let timeout_at = events.iter().position(|e| e.event == "run.timeout").unwrap();
    assert!(events[timeout_at..].iter().all(|e| e.event != "node.start"));
}

#[tokio::test]
async fn external_cancellation_marks_run_cancelled() {
    let tools = registry(vec![
        Scripted::new("slow").delayed(Duration::from_secs(30)),
        Scripted::new("ok"),
    ]);
    let graph = Graph::new()
        .with_node(node("wait", "slow"))
        .with_node(node("after", "ok"))
        .with_edge("wait", "after");
    let trace = trace();
    let cancel = CancellationToken::new();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        canceller.cancel();
    });

    let result = Orchestrator::new(tools)
        .orchestrate_cancellable(&task(graph), trace.clone(), Arc::new(Memory::new()), cancel)
        .await
        .unwrap();

    assert_eq!(result.outcome, Outcome::Cancelled);
    let skipped = trace.events_named("node.skipped");
    assert_eq!(skipped[0].data["id"], "after");
    assert_eq!(skipped[0].data["reason"], "run cancelled");
}

// ============================================================
// Concurrency and metrics
// ============================================================

#[tokio::test]
async fn independent_nodes_respect_max_concurrency() {
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut registry = ToolRegistry::new();
    registry.register(Gauge { current: current.clone(), peak: peak.clone() });

    let mut graph = Graph::new();
    for i in 0..5 {
        graph = graph.with_node(node(&format!("g{}", i), "gauge"));
    }

    let result = Orchestrator::new(Arc::new(registry))
        .with_executor_config(ExecutorConfig {
            max_concurrency: 2,
            ..Default::default()
        })
        .orchestrate(&task(graph), trace())
        .await
        .unwrap();

    assert_eq!(result.outcome, Outcome::Success);
    assert_eq!(peak.load(Ordering::SeqCst), 2);
    assert_eq!(current.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn token_usage_is_aggregated_per_node() {
    let tools = registry(vec![Scripted::new("metered").with_metrics(10, 3), Scripted::new("free")]);
    let graph = Graph::new()
        .with_node(node("m1", "metered"))
        .with_node(node("m2", "metered"))
        .with_node(node("f", "free"))
        .with_edge("m1", "m2")
        .with_edge("m2", "f");
    let trace = trace();

    let result = Orchestrator::new(tools).orchestrate(&task(graph), trace.clone()).await.unwrap();

    assert_eq!(result.metrics.len(), 2);
    assert_eq!(result.metrics["m1"], Metrics::new(10, 3));
    assert_eq!(result.total_metrics(), Metrics::new(20, 6));
    let ends = trace.events_named("node.end");
    let m1 = ends.iter().find(|e| e.node_id() == Some("m1")).unwrap();
    assert_eq!(m1.data["inputTokens"], 10);
    assert_eq!(m1.data["outputTokens"], 3);
    let f = ends.iter().find(|e| e.node_id() == Some("f")).unwrap();
    assert!(f.data.get("inputTokens").is_none());
}

// ============================================================
// Run-level errors
// ============================================================

#[tokio::test]
async fn empty_goal_is_rejected() {
    let tools = registry(vec![]);
    let trace = trace();
    let err = Orchestrator::new(tools)
        .orchestrate(&TaskSpec::new("  ", "research"), trace.clone())
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestrateError::InvalidTaskSpec(_)));
    assert_eq!(trace.events_named("run.end")[0].data["outcome"], "failure");
}

#[tokio::test]
async fn explicit_graph_over_step_cap_is_rejected() {
    let tools = registry(vec![Scripted::new("ok")]);
    let graph = Graph::new()
        .with_node(node("a", "ok"))
        .with_node(node("b", "ok"))
        .with_node(node("c", "ok"));

    let err = Orchestrator::new(tools)
        .orchestrate(&task(graph).with_max_steps(2), trace())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestrateError::InvalidGraph(_)));
}

// ============================================================
// Planners
// ============================================================

#[tokio::test]
async fn heuristic_research_plan_runs_end_to_end() {
    let tools = registry(vec![Scripted::new("research"), Scripted::new("answer")]);
    let spec = TaskSpec::new("compare runtimes", "research").with_hints(["tokio", "smol"]);
    let trace = trace();

    let result = Orchestrator::new(tools).orchestrate(&spec, trace.clone()).await.unwrap();

    assert_eq!(result.result, "answer saw [research_1,research_2]");
    assert_eq!(result.nodes.len(), 3);
    assert_eq!(trace.events_named("run.plan")[0].data["planner"], "heuristic");
}

#[tokio::test]
async fn llm_planner_uses_model_graph() {
    let planned = json!({
        "nodes": [
            {"id": "look", "kind": "tool", "tool": "echo"},
            {"id": "say", "kind": "answer", "tool": "echo"}
        ],
        "edges": [{"from": "look", "to": "say"}]
    });
    let mock: Arc<dyn LlmProvider> = Arc::new(MockProvider::constant(MockBehavior::ToolCall {
        name: "submit_plan".into(),
        args: planned,
    }));
    let structured = Arc::new(StructuredOutputTool::new(
        mock,
        StructuredOutputConfig { retry: fast_retry(), ..Default::default() },
    ));
    let planner = LlmPlanner::new(structured, PlannerConfig::default()).with_allowed_tools(["echo"]);
    let trace = trace();

    let result = Orchestrator::new(registry(vec![Scripted::new("echo")]))
        .with_planner(Arc::new(planner))
        .orchestrate(&TaskSpec::new("say hi", "freeform"), trace.clone())
        .await
        .unwrap();

    assert_eq!(result.result, "echo saw [look]");
    assert!(trace.events_named("planner.fallback").is_empty());
    assert_eq!(trace.events_named("run.plan")[0].data["planner"], "llm");
}

#[tokio::test]
async fn llm_planner_falls_back_on_unusable_plan() {
    let mock: Arc<dyn LlmProvider> = Arc::new(MockProvider::constant(MockBehavior::Text("no idea".into())));
    let structured = Arc::new(StructuredOutputTool::new(
        mock,
        StructuredOutputConfig { retry: fast_retry(), ..Default::default() },
    ));
    let planner = LlmPlanner::new(structured, PlannerConfig::default());
    let trace = trace();

    let result = Orchestrator::new(registry(vec![Scripted::new("answer")]))
        .with_planner(Arc::new(planner))
        .orchestrate(&TaskSpec::new("say hi", "freeform"), trace.clone())
        .await
        .unwrap();

    assert_eq!(trace.events_named("planner.fallback").len(), 1);
    assert_eq!(result.outcome, Outcome::Success);
    assert!(result.nodes.contains_key("answer"));
}

// ============================================================
// Reflection with the built-in tools
// ============================================================

#[tokio::test]
async fn reflection_extends_the_graph_with_follow_ups() {
    let mock = Arc::new(MockProvider::sequence(vec![
        MockBehavior::Text("notes about tokio".into()),
        MockBehavior::Text("first answer".into()),
        MockBehavior::Text(r#"{"satisfied": false, "critique": "thin", "followUps": ["what about io_uring?"]}"#.into()),
        MockBehavior::Text("io_uring notes".into()),
        MockBehavior::Text("revised answer".into()),
    ]));
    let provider: Arc<dyn LlmProvider> = mock.clone();
    let tools = Arc::new(create_default_registry(provider, "mock-model", 4096, fast_retry()));
    let planner = HeuristicPlanner::new(PlannerConfig { reflect: true, ..Default::default() });
    let spec = TaskSpec::new("explain tokio", "research");
    let trace = trace();
    let memory = Arc::new(Memory::new());

    let result = Orchestrator::new(tools)
        .with_planner(Arc::new(planner))
        .orchestrate_cancellable(&spec, trace.clone(), memory.clone(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.outcome, Outcome::Success);
    assert_eq!(result.result, "revised answer");
    assert_eq!(mock.call_count().await, 5);
    assert!(result.nodes.contains_key("evaluate_followup_1"));
    assert_eq!(result.nodes["evaluate_answer"].state, NodeState::Complete);
    assert_eq!(trace.events_named("graph.extend").len(), 1);
    // both answers were stored
    assert_eq!(memory.docs_snapshot().keys().filter(|k| k.starts_with("answer_")).count(), 2);
}

// ============================================================
// Topology replay
// ============================================================

#[tokio::test]
async fn topology_replay_matches_the_run() {
    let ext = GraphExtension::new()
        .node(node("extra", "echo"))
        .edge("seed", "extra");
    let tools = registry(vec![
        Scripted::new("seeder").extending(ext),
        Scripted::new("echo"),
        Scripted::failing("bad"),
    ]);
    let graph = Graph::new()
        .with_node(node("seed", "seeder"))
        .with_node(node("broken", "bad"))
        .with_node(node("never", "echo"))
        .with_edge("seed", "broken")
        .with_edge("broken", "never");
    let trace = trace();

    let result = Orchestrator::new(tools).orchestrate(&task(graph), trace.clone()).await.unwrap();

    let view = TopologyView::from_events(&trace.events());
    for (id, record) in &result.nodes {
        let seen = view.node(id).unwrap_or_else(|| panic!("{} missing from replay", id));
        assert_eq!(seen.state, record.state, "{}", id);
        assert!(seen.declared);
    }
    assert!(view.edges().contains(&Edge::new("seed", "extra")));
    assert!(view.render().contains("✗ broken"));
}

#[tokio::test]
async fn trace_file_round_trips_through_replay() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("run.jsonl");
    let tools = registry(vec![Scripted::new("echo")]);
    let trace = trace();
    let writer = JsonlTraceWriter::new(&path).spawn(trace.subscribe());

    Orchestrator::new(tools)
        .orchestrate(&task(Graph::new().with_node(node("a", "echo"))), trace.clone())
        .await
        .unwrap();
    trace.close_subscribers();

    assert_eq!(writer.await.unwrap().unwrap(), trace.count());
    let events = JsonlTraceWriter::read_events(&path).await.unwrap();
    let view = TopologyView::from_events(&events);
    assert_eq!(view.node("a").unwrap().state, NodeState::Complete);
}
