//! Rebuild a live view of the task graph from trace events alone.
//!
//! This is what an external progress tracker does: it never sees the Graph,
//! only `run.plan`, `graph.extend` and `node.*` events. Ids that show up in a
//! node event without ever being declared are synthesized, with the kind
//! taken from the event when present and otherwise guessed from the id.

use agentgraph_core::{Edge, NodeId, NodeSpec, NodeState, TraceEvent, KIND_ORCHESTRATE, KIND_TOOL};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TopologyNode {
    pub id: NodeId,
    pub kind: String,
    pub label: String,
    pub state: NodeState,
    /// False when the node was synthesized from a node event.
    pub declared: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Degraded path for undeclared ids.
pub fn infer_kind(id: &str) -> &'static str {
    let lower = id.to_ascii_lowercase();
    if lower.contains("orchestrate") || lower.contains("main") {
        KIND_ORCHESTRATE
    } else {
        KIND_TOOL
    }
}

#[derive(Debug, Clone, Default)]
pub struct TopologyView {
    nodes: Vec<TopologyNode>,
    index: HashMap<NodeId, usize>,
    edges: Vec<Edge>,
    edge_set: HashSet<Edge>,
}

impl TopologyView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a TraceEvent>) -> Self {
        let mut view = Self::new();
        for event in events {
            view.apply(event);
        }
        view
    }

    pub fn apply(&mut self, event: &TraceEvent) {
        let data = &event.data;
        match event.event.as_str() {
            "run.plan" => {
                self.declare_nodes(data.get("nodes"));
                self.add_edges(data.get("edges"));
            }
            "graph.extend" => {
                self.declare_nodes(data.get("addNodes"));
                self.add_edges(data.get("addEdges"));
            }
            "node.start" => {
                if let Some(node) = self.observe(data) {
                    node.state = NodeState::Running;
                    node.started = Some(event.ts);
                }
            }
            "node.end" => {
                if let Some(node) = self.observe(data) {
                    node.state = NodeState::Complete;
                    node.elapsed_ms = data.get("elapsedMs").and_then(Value::as_u64);
                }
            }
            "node.error" => {
                if let Some(node) = self.observe(data) {
                    node.state = NodeState::Error;
                    node.error = data.get("error").and_then(Value::as_str).map(str::to_string);
                }
            }
            "node.skipped" => {
                if let Some(node) = self.observe(data) {
                    node.state = NodeState::Skipped;
                }
            }
            _ => {}
        }
    }

    fn declare_nodes(&mut self, nodes: Option<&Value>) {
        let Some(nodes) = nodes else { return };
        let Ok(specs) = serde_json::from_value::<Vec<NodeSpec>>(nodes.clone()) else {
            tracing::debug!("ignoring malformed node list in trace");
            return;
        };
        for spec in specs {
            if let Some(&i) = self.index.get(&spec.id) {
                let node = &mut self.nodes[i];
                node.kind = spec.kind.clone();
                node.label = spec.display_label().to_string();
                node.declared = true;
                continue;
            }
            self.insert(TopologyNode {
                label: spec.display_label().to_string(),
                id: spec.id,
                kind: spec.kind,
                state: NodeState::Pending,
                declared: true,
                started: None,
                elapsed_ms: None,
                error: None,
            });
        }
    }

    fn add_edges(&mut self, edges: Option<&Value>) {
        let Some(edges) = edges else { return };
        let Ok(edges) = serde_json::from_value::<Vec<Edge>>(edges.clone()) else {
            return;
        };
        for edge in edges {
            if self.edge_set.insert(edge.clone()) {
                self.edges.push(edge);
            }
        }
    }

    fn insert(&mut self, node: TopologyNode) -> usize {
        let i = self.nodes.len();
        self.index.insert(node.id.clone(), i);
        self.nodes.push(node);
        i
    }

    /// The node an event refers to, synthesized when never declared.
    fn observe(&mut self, data: &Value) -> Option<&mut TopologyNode> {
        let id = data.get("id").and_then(Value::as_str)?;
        let i = match self.index.get(id) {
            Some(&i) => i,
            None => {
                let kind = data
                    .get("kind")
                    .and_then(Value::as_str)
                    .unwrap_or_else(|| infer_kind(id))
                    .to_string();
                let label = data.get("label").and_then(Value::as_str).unwrap_or(id).to_string();
                self.insert(TopologyNode {
                    id: id.to_string(),
                    kind,
                    label,
                    state: NodeState::Pending,
                    declared: false,
                    started: None,
                    elapsed_ms: None,
                    error: None,
                })
            }
        };
        self.nodes.get_mut(i)
    }

    pub fn node(&self, id: &str) -> Option<&TopologyNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn nodes(&self) -> &[TopologyNode] {
        &self.nodes
    }

    pub fn node_ids(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.id.as_str()).collect()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Human-readable status listing.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            let icon = match node.state {
                NodeState::Complete => "✓",
                NodeState::Error => "✗",
                NodeState::Running => "⟳",
                NodeState::Pending => "○",
                NodeState::Skipped => "▪",
            };
            let timing = node.elapsed_ms.map(|ms| format!(" {}ms", ms)).unwrap_or_default();
            let synthesized = if node.declared { "" } else { " (undeclared)" };
            out.push_str(&format!(
                "{} {} [{}] {}{}{}\n",
                icon, node.id, node.kind, node.label, timing, synthesized
            ));
            for edge in self.edges.iter().filter(|e| e.from == node.id) {
                out.push_str(&format!("    -> {}\n", edge.to));
            }
        }
        out
    }
}
