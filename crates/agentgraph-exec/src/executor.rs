//! Graph executor: schedules ready nodes, invokes their tools, and grows the
//! graph when a running node asks for it.
//!
//! - Nodes live in a [`LiveGraph`] arena. Each pass collects the ready set,
//!   starts up to `max_concurrency` of them, then waits for the next
//!   completion or extension request.
//! - Extensions arrive over a channel carried by every node's [`ExecContext`].
//!   Pending requests are drained before a completion is recorded, so a node's
//!   `graph.extend` always precedes its `node.end`.
//! - Failures follow [`FailurePolicy`]. The root node failing always fails the run,
//!   and so does a run that ends with its root skipped or no answer node complete.
//! - Cancellation stops scheduling at once; in-flight tools observe the token
//!   and end as `node.error` with reason `cancelled`.

use crate::graph::{LiveGraph, LiveNode};
use crate::manifest::RunManifest;
use agentgraph_core::{
    Graph, Metrics, NodeId, NodeSpec, NodeState, Outcome, TaskSpec, Trace, KIND_ANSWER,
};
use agentgraph_tools::{ExecContext, ExtensionRequest, ToolError, ToolOutput, ToolRegistry};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What a failed non-root node does to the rest of the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop scheduling and cancel in-flight nodes; the run fails.
    AbortRun,
    /// Skip every node downstream of the failure; independent branches continue.
    #[default]
    SkipDependents,
    /// Treat the failed node as settled; dependents run without its output.
    ContinueDependents,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
    pub failure_policy: FailurePolicy,
    pub max_concurrency: usize,
    pub enforce_edges: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::SkipDependents,
            max_concurrency: 4,
            enforce_edges: true,
        }
    }
}

/// Everything one execution produced.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub result: String,
    pub metrics: BTreeMap<NodeId, Metrics>,
    pub outcome: Outcome,
    pub error: Option<String>,
    pub manifest: RunManifest,
    /// Final topology, including every accepted extension.
    pub graph: Graph,
}

struct NodeCompletion {
    id: NodeId,
    result: Result<ToolOutput, ToolError>,
    elapsed_ms: u64,
}

/// Mutable state of one execution. Never shared across a suspension point.
struct RunState {
    graph: LiveGraph,
    manifest: RunManifest,
    metrics: BTreeMap<NodeId, Metrics>,
    trace: Arc<Trace>,
    root: Option<NodeId>,
    failure: Option<String>,
}

impl RunState {
    /// Merge one extension request. Returns true if the graph changed.
    fn apply_extension(&mut self, req: ExtensionRequest) -> bool {
        if req.extension.is_empty() {
            return false;
        }
        match self.graph.extend(&req.extension) {
            Ok(()) => {
                for node in &req.extension.add_nodes {
                    self.manifest.add_node(node);
                }
                info!(
                    from = ?req.from,
                    nodes = req.extension.add_nodes.len(),
                    edges = req.extension.add_edges.len(),
                    "graph extended"
                );
                self.trace.info(
                    "graph.extend",
                    json!({
                        "from": req.from,
                        "addNodes": req.extension.add_nodes,
                        "addEdges": req.extension.add_edges,
                    }),
                );
                true
            }
            Err(e) => {
                warn!(from = ?req.from, error = %e, "graph extension rejected");
                self.trace.warn(
                    "graph.extend.rejected",
                    json!({ "from": req.from, "error": e.to_string() }),
                );
                false
            }
        }
    }

    /// Skip pending nodes downstream of an error, until nothing changes.
    fn skip_blocked(&mut self) {
        loop {
            let blocked = self.graph.blocked(&[NodeState::Error, NodeState::Skipped]);
            if blocked.is_empty() {
                return;
            }
            for (id, by) in blocked {
                self.skip(&id, Some(by.as_str()), &format!("blocked by '{}'", by));
            }
        }
    }

    fn skip(&mut self, id: &str, blocked_by: Option<&str>, reason: &str) {
        debug!(node = id, reason, "node skipped");
        self.graph.set_state(id, NodeState::Skipped);
        self.manifest.skip_node(id, reason);
        self.trace.warn(
            "node.skipped",
            json!({ "id": id, "blockedBy": blocked_by, "reason": reason }),
        );
    }

    /// Record a completion. Returns true when the run must abort.
    fn finish(&mut self, done: NodeCompletion, policy: FailurePolicy) -> bool {
        let NodeCompletion { id, result, elapsed_ms } = done;
        match result {
            Ok(output) => {
                let mut data = json!({ "id": id, "elapsedMs": elapsed_ms });
                if let Some(m) = output.metrics {
                    if let Some(t) = m.input_tokens {
                        data["inputTokens"] = json!(t);
                    }
                    if let Some(t) = m.output_tokens {
                        data["outputTokens"] = json!(t);
                    }
                    self.metrics.entry(id.clone()).or_default().add(&m);
                }
                self.graph.complete(&id, output.to_value());
                self.manifest.finish_node(&id, elapsed_ms);
                info!(node = %id, elapsed_ms, "node complete");
                self.trace.info("node.end", data);
                false
            }
            Err(e) => {
                self.graph.set_state(&id, NodeState::Error);
                self.manifest.fail_node(&id, elapsed_ms, &e.to_string());
                warn!(node = %id, error = %e, reason = e.reason(), "node failed");
                self.trace.error(
                    "node.error",
                    json!({ "id": id, "error": e.to_string(), "reason": e.reason() }),
                );

                let fatal = self.root.as_deref() == Some(id.as_str()) || policy == FailurePolicy::AbortRun;
                if fatal && !matches!(e, ToolError::Cancelled) && self.failure.is_none() {
                    self.failure = Some(format!("node '{}' failed: {}", id, e));
                    return true;
                }
                false
            }
        }
    }

    /// First predecessor of `id` that did not complete.
    fn blocker(&self, id: &str) -> String {
        self.graph
            .predecessors(id)
            .into_iter()
            .find(|p| self.graph.state(p) != Some(NodeState::Complete))
            .unwrap_or("unknown")
            .to_string()
    }

    /// Answer nodes, or the sinks when the graph has none.
    fn deliverables(&self) -> Vec<&LiveNode> {
        let answers: Vec<&LiveNode> = self.graph.nodes().filter(|n| n.spec.kind == KIND_ANSWER).collect();
        if !answers.is_empty() {
            return answers;
        }
        self.graph
            .nodes()
            .filter(|n| !self.graph.has_successors(&n.spec.id))
            .collect()
    }

    /// Why a run that settled without a fatal error still has nothing to return.
    fn missing_result(&self) -> Option<String> {
        if let Some(root) = self.root.as_deref() {
            if self.graph.state(root) == Some(NodeState::Skipped) {
                return Some(format!("root node '{}' never ran: blocked by '{}'", root, self.blocker(root)));
            }
        }

        let deliverables = self.deliverables();
        if deliverables.iter().any(|n| n.state == NodeState::Complete) {
            return None;
        }
        let cause = match self.graph.nodes().find(|n| n.state == NodeState::Error) {
            Some(failed) => {
                let error = self
                    .manifest
                    .nodes
                    .get(&failed.spec.id)
                    .and_then(|r| r.error.as_deref())
                    .unwrap_or("unknown error");
                format!("node '{}' failed: {}", failed.spec.id, error)
            }
            None => match deliverables.first() {
                Some(node) => format!("'{}' blocked by '{}'", node.spec.id, self.blocker(&node.spec.id)),
                None => "graph has no terminal node".to_string(),
            },
        };
        Some(format!("no result produced: {}", cause))
    }

    /// Output of the last-completed answer node, else the last-completed sink.
    fn select_result(&self) -> String {
        let completed = || {
            self.graph
                .nodes()
                .filter(|n| n.state == NodeState::Complete && n.output.is_some())
        };
        completed()
            .filter(|n| n.spec.kind == KIND_ANSWER)
            .max_by_key(|n| n.completed_seq)
            .or_else(|| {
                completed()
                    .filter(|n| !self.graph.has_successors(&n.spec.id))
                    .max_by_key(|n| n.completed_seq)
            })
            .and_then(|n| n.output.as_ref())
            .map(value_to_text)
            .unwrap_or_default()
    }
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Node args: `NodeSpec.args` plus `prompt`, `goal` and predecessor `inputs`.
pub fn node_args(spec: &NodeSpec, is_root: bool, goal: &str, inputs: Map<String, Value>) -> Value {
    let mut args = match &spec.args {
        Some(Value::Object(m)) => m.clone(),
        _ => Map::new(),
    };
    match &spec.prompt {
        Some(prompt) => {
            args.insert("prompt".into(), Value::String(prompt.clone()));
        }
        None if is_root => {
            args.entry("prompt").or_insert_with(|| Value::String(goal.to_string()));
        }
        None => {}
    }
    args.entry("goal").or_insert_with(|| Value::String(goal.to_string()));
    args.insert("inputs".into(), Value::Object(inputs));
    Value::Object(args)
}

pub struct Executor {
    tools: Arc<ToolRegistry>,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self {
            tools,
            config: ExecutorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    fn satisfied(&self, state: NodeState) -> bool {
        match self.config.failure_policy {
            FailurePolicy::ContinueDependents => state.is_terminal(),
            _ => state == NodeState::Complete,
        }
    }

    /// Run `graph` to completion for `spec`, using the run's shared Memory and
    /// Trace from `ctx`.
    pub async fn execute(
        &self,
        spec: &TaskSpec,
        graph: &Graph,
        ctx: &ExecContext,
        cancel: CancellationToken,
    ) -> agentgraph_core::Result<ExecutionReport> {
        let live = LiveGraph::from_graph(graph)?.with_limit(spec.max_steps());
        let mut manifest = RunManifest::new(ctx.trace.run_id());
        for node in live.nodes() {
            manifest.add_node(&node.spec);
        }
        let mut state = RunState {
            root: live.root().map(str::to_string),
            graph: live,
            manifest,
            metrics: BTreeMap::new(),
            trace: ctx.trace.clone(),
            failure: None,
        };

        // Aborting cancels in-flight nodes without marking the run as cancelled.
        let abort = cancel.child_token();
        let (ext_tx, mut ext_rx) = mpsc::unbounded_channel::<ExtensionRequest>();
        let base = ctx.clone().with_cancel(abort.clone()).with_extension_channel(ext_tx);
        let mut in_flight: FuturesUnordered<BoxFuture<'static, NodeCompletion>> = FuturesUnordered::new();
        let max_concurrency = self.config.max_concurrency.max(1);

        loop {
            if !abort.is_cancelled() {
                if self.config.enforce_edges && self.config.failure_policy != FailurePolicy::ContinueDependents {
                    state.skip_blocked();
                }
                for id in state.graph.ready(self.config.enforce_edges, |s| self.satisfied(s)) {
                    if in_flight.len() >= max_concurrency {
                        break;
                    }
                    in_flight.push(self.start_node(&mut state, &id, &spec.goal, &base));
                }
            }

            if in_flight.is_empty() {
                let mut extended = false;
                while let Ok(req) = ext_rx.try_recv() {
                    extended |= state.apply_extension(req);
                }
                if extended && !abort.is_cancelled() {
                    continue;
                }
                break;
            }

            tokio::select! {
                biased;
                Some(req) = ext_rx.recv() => {
                    state.apply_extension(req);
                }
                Some(done) = in_flight.next() => {
                    while let Ok(req) = ext_rx.try_recv() {
                        state.apply_extension(req);
                    }
                    if state.finish(done, self.config.failure_policy) {
                        warn!(run_id = ctx.trace.run_id(), "aborting run");
                        abort.cancel();
                    }
                }
            }
        }

        let cancelled = cancel.is_cancelled();
        let leftover_reason = if state.failure.is_some() {
            "run aborted"
        } else if cancelled {
            "run cancelled"
        } else {
            "unmet dependencies"
        };
        for id in state.graph.pending() {
            let blocked_by = state
                .graph
                .predecessors(&id)
                .into_iter()
                .find(|p| state.graph.state(p) != Some(NodeState::Complete))
                .map(str::to_string);
            state.skip(&id, blocked_by.as_deref(), leftover_reason);
        }

        if state.failure.is_none() && !cancelled {
            if let Some(reason) = state.missing_result() {
                warn!(run_id = ctx.trace.run_id(), reason = %reason, "run settled without a result");
                state.failure = Some(reason);
            }
        }

        let (outcome, error) = match (&state.failure, cancelled) {
            (Some(f), _) => (Outcome::Failure, Some(f.clone())),
            (None, true) => (Outcome::Cancelled, Some("run cancelled".to_string())),
            (None, false) => (Outcome::Success, None),
        };
        state.manifest.finalize(outcome, &state.metrics);
        info!(run_id = ctx.trace.run_id(), outcome = %outcome, "{}", state.manifest.run_log_line());

        Ok(ExecutionReport {
            result: state.select_result(),
            metrics: state.metrics,
            outcome,
            error,
            graph: state.graph.to_graph(),
            manifest: state.manifest,
        })
    }

    fn start_node(
        &self,
        state: &mut RunState,
        id: &str,
        goal: &str,
        base: &ExecContext,
    ) -> BoxFuture<'static, NodeCompletion> {
        let spec = match state.graph.node(id) {
            Some(node) => node.spec.clone(),
            None => NodeSpec::new(id),
        };
        let tool = spec.tool_name().to_string();
        let is_root = state.root.as_deref() == Some(id);
        let args = node_args(&spec, is_root, goal, state.graph.inputs_for(id));

        state.graph.set_state(id, NodeState::Running);
        state.manifest.start_node(id);
        info!(node = id, tool = %tool, kind = %spec.kind, "node started");
        state.trace.info(
            "node.start",
            json!({
                "id": id,
                "kind": spec.kind,
                "label": spec.display_label(),
                "tool": tool,
            }),
        );

        let tools = self.tools.clone();
        let node_ctx = base.for_node(id);
        let id = id.to_string();
        async move {
            let started = Instant::now();
            let result = tools.execute(&tool, args, &node_ctx).await;
            NodeCompletion {
                id,
                result,
                elapsed_ms: started.elapsed().as_millis() as u64,
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_merge_prompt_goal_inputs() {
        let spec = NodeSpec::new("n").args(json!({"schema": {"type": "object"}, "goal": "own"}));
        let mut inputs = Map::new();
        inputs.insert("prev".into(), json!("text"));
        let args = node_args(&spec, true, "the goal", inputs);
        assert_eq!(args["prompt"], "the goal");
        assert_eq!(args["goal"], "own");
        assert_eq!(args["schema"]["type"], "object");
        assert_eq!(args["inputs"]["prev"], "text");
    }

    #[test]
    fn node_prompt_wins_and_non_root_gets_no_default_prompt() {
        let args = node_args(&NodeSpec::new("n").prompt("do it"), false, "g", Map::new());
        assert_eq!(args["prompt"], "do it");
        let args = node_args(&NodeSpec::new("n"), false, "g", Map::new());
        assert!(args.get("prompt").is_none());
        assert_eq!(args["goal"], "g");
    }

    #[test]
    fn failure_policy_serde_names() {
        assert_eq!(serde_json::to_string(&FailurePolicy::AbortRun).unwrap(), "\"abort_run\"");
        let p: FailurePolicy = serde_json::from_str("\"continue_dependents\"").unwrap();
        assert_eq!(p, FailurePolicy::ContinueDependents);
    }
}
