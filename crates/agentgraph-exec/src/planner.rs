//! Planning: TaskSpec → initial Graph.
//!
//! An explicit `graph` on the task is always used verbatim. Otherwise the
//! heuristic planner synthesizes a small graph from the task type, hints and
//! step cap; the LLM planner asks the provider for one and falls back to the
//! heuristic on any failure.

use agentgraph_core::{Graph, NodeSpec, TaskSpec, KIND_ANSWER, KIND_EVAL, KIND_TOOL};
use agentgraph_tools::{ExecContext, Tool, ToolError, StructuredOutputTool};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("invalid task spec: {0}")]
    InvalidSpec(#[from] agentgraph_core::Error),

    #[error("unusable plan: {0}")]
    InvalidGraph(String),

    #[error("planning tool failed: {0}")]
    Tool(#[from] ToolError),
}

#[async_trait::async_trait]
pub trait Planner: Send + Sync {
    fn name(&self) -> &str;

    async fn make_plan(&self, spec: &TaskSpec, ctx: &ExecContext) -> Result<Graph, PlanError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannerConfig {
    pub step_tool: String,
    pub answer_tool: String,
    pub structured_tool: String,
    pub reflect: bool,
    pub default_max_steps: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            step_tool: "research".into(),
            answer_tool: "answer".into(),
            structured_tool: "structured_output".into(),
            reflect: false,
            default_max_steps: 8,
        }
    }
}

/// Target shape for `extract` nodes when the task carries no schema of its own.
pub fn default_extract_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "summary": { "type": "string" },
            "items": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["summary"]
    })
}

// ============================================================
// Heuristic
// ============================================================

#[derive(Debug, Clone, Default)]
pub struct HeuristicPlanner {
    config: PlannerConfig,
}

impl HeuristicPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    fn subject(spec: &TaskSpec) -> String {
        match &spec.topic {
            Some(topic) if !topic.trim().is_empty() => format!("{} (topic: {})", spec.goal, topic),
            _ => spec.goal.clone(),
        }
    }

    /// Deterministic synthesis. Pass-through when the task carries a graph.
    pub fn plan(&self, spec: &TaskSpec) -> Result<Graph, PlanError> {
        spec.validate()?;
        if let Some(graph) = &spec.graph {
            return Ok(graph.clone());
        }

        let cap = spec.max_steps().unwrap_or(self.config.default_max_steps).max(1);
        let graph = match spec.task_type.as_str() {
            "research" => self.research_graph(spec, cap),
            "structured" | "extract" => Graph::new().with_node(
                NodeSpec::new("extract")
                    .kind(KIND_TOOL)
                    .tool(&self.config.structured_tool)
                    .label("Extract structured result")
                    .prompt(Self::subject(spec))
                    .args(json!({ "schema": default_extract_schema() })),
            ),
            _ => Graph::new().with_node(self.answer_node(spec)),
        };
        debug!(
            task_type = %spec.task_type,
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            "synthesized plan"
        );
        Ok(graph)
    }

    fn answer_node(&self, spec: &TaskSpec) -> NodeSpec {
        NodeSpec::new("answer")
            .kind(KIND_ANSWER)
            .tool(&self.config.answer_tool)
            .label("Answer")
            .prompt(Self::subject(spec))
    }

    /// `research_<n>` per hint feeding one answer, optionally followed by an evaluation.
    fn research_graph(&self, spec: &TaskSpec, cap: usize) -> Graph {
        let mut budget = cap - 1;
        let reflect = self.config.reflect && budget > 0;
        if reflect {
            budget -= 1;
        }

        let subject = Self::subject(spec);
        let mut questions: Vec<String> = spec.hints().iter().take(budget).cloned().collect();
        if questions.is_empty() && budget > 0 {
            questions.push(subject.clone());
        }

        let mut graph = Graph::new();
        for (i, question) in questions.iter().enumerate() {
            graph = graph.with_node(
                NodeSpec::new(format!("research_{}", i + 1))
                    .kind(KIND_TOOL)
                    .tool(&self.config.step_tool)
                    .label(question.clone())
                    .prompt(format!("Research this for the goal \"{}\": {}", spec.goal, question)),
            );
        }
        graph = graph.with_node(self.answer_node(spec));
        for i in 0..questions.len() {
            graph = graph.with_edge(format!("research_{}", i + 1), "answer");
        }
        if reflect {
            graph = graph
                .with_node(
                    NodeSpec::new("evaluate")
                        .kind(KIND_EVAL)
                        .tool("eval")
                        .label("Evaluate answer")
                        .prompt(format!("Judge whether the answer fully addresses: {}", subject)),
                )
                .with_edge("answer", "evaluate");
        }
        graph
    }
}

#[async_trait::async_trait]
impl Planner for HeuristicPlanner {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn make_plan(&self, spec: &TaskSpec, _ctx: &ExecContext) -> Result<Graph, PlanError> {
        self.plan(spec)
    }
}

// ============================================================
// LLM-backed
// ============================================================

/// Asks the model for a graph through the structured output tool.
pub struct LlmPlanner {
    tool: Arc<StructuredOutputTool>,
    fallback: HeuristicPlanner,
    allowed_tools: Vec<String>,
}

impl LlmPlanner {
    pub fn new(tool: Arc<StructuredOutputTool>, config: PlannerConfig) -> Self {
        Self {
            tool,
            fallback: HeuristicPlanner::new(config),
            allowed_tools: Vec::new(),
        }
    }

    /// Restrict planned nodes to these registry names.
    pub fn with_allowed_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    fn graph_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "nodes": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string" },
                            "kind": { "type": "string", "enum": ["tool", "answer", "eval"] },
                            "label": { "type": "string" },
                            "prompt": { "type": "string" },
                            "tool": { "type": "string" }
                        },
                        "required": ["id", "kind", "tool"]
                    }
                },
                "edges": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": { "from": { "type": "string" }, "to": { "type": "string" } },
                        "required": ["from", "to"]
                    }
                }
            },
            "required": ["nodes", "edges"]
        })
    }

    fn prompt(&self, spec: &TaskSpec, cap: usize) -> String {
        let mut p = format!(
            "Plan a small task graph for this goal.\nGoal: {}\nType: {}\nUse at most {} nodes. \
             Exactly one node must have kind \"answer\"; it produces the final result. \
             Edges run from a prerequisite to the node that needs its output.",
            spec.goal, spec.task_type, cap
        );
        if let Some(topic) = &spec.topic {
            p.push_str(&format!("\nTopic: {}", topic));
        }
        if !spec.hints().is_empty() {
            p.push_str(&format!("\nHints: {}", spec.hints().join("; ")));
        }
        if !self.allowed_tools.is_empty() {
            p.push_str(&format!("\nAvailable tools: {}", self.allowed_tools.join(", ")));
        }
        p
    }

    fn check(&self, graph: &Graph, cap: usize) -> Result<(), PlanError> {
        if graph.is_empty() {
            return Err(PlanError::InvalidGraph("no nodes".into()));
        }
        if graph.nodes.len() > cap {
            return Err(PlanError::InvalidGraph(format!(
                "{} nodes exceeds the limit of {}",
                graph.nodes.len(),
                cap
            )));
        }
        graph.validate()?;
        let ids: HashSet<&str> = graph.node_ids().into_iter().collect();
        if let Some(edge) = graph
            .edges
            .iter()
            .find(|e| !ids.contains(e.from.as_str()) || !ids.contains(e.to.as_str()))
        {
            return Err(PlanError::InvalidGraph(format!(
                "edge {} -> {} references an unknown node",
                edge.from, edge.to
            )));
        }
        if !self.allowed_tools.is_empty() {
            if let Some(node) = graph
                .nodes
                .iter()
                .find(|n| !self.allowed_tools.iter().any(|t| t == n.tool_name()))
            {
                return Err(PlanError::InvalidGraph(format!(
                    "node '{}' uses unknown tool '{}'",
                    node.id,
                    node.tool_name()
                )));
            }
        }
        Ok(())
    }

    async fn ask(&self, spec: &TaskSpec, cap: usize, ctx: &ExecContext) -> Result<Graph, PlanError> {
        let args = json!({
            "prompt": self.prompt(spec, cap),
            "caption": "",
            "schema": Self::graph_schema(),
            "functionName": "submit_plan",
        });
        let output = self.tool.execute(args, ctx).await?;
        let graph: Graph = serde_json::from_value(output.to_value())
            .map_err(|e| PlanError::InvalidGraph(e.to_string()))?;
        self.check(&graph, cap)?;
        Ok(graph)
    }
}

#[async_trait::async_trait]
impl Planner for LlmPlanner {
    fn name(&self) -> &str {
        "llm"
    }

    async fn make_plan(&self, spec: &TaskSpec, ctx: &ExecContext) -> Result<Graph, PlanError> {
        spec.validate()?;
        if let Some(graph) = &spec.graph {
            return Ok(graph.clone());
        }

        let cap = spec
            .max_steps()
            .unwrap_or(self.fallback.config.default_max_steps)
            .max(1);
        match self.ask(spec, cap, ctx).await {
            Ok(graph) => Ok(graph),
            Err(e) => {
                warn!(error = %e, "model plan unusable, falling back to heuristic planner");
                ctx.trace.warn("planner.fallback", json!({ "error": e.to_string() }));
                self.fallback.plan(spec)
            }
        }
    }
}
