//! Live task graph: an arena of nodes indexed by id, grown by extensions.
//!
//! The executor never iterates the arena while mutating it. Ready nodes are
//! collected into a fresh list each scheduling pass and extensions are merged
//! between passes.

use agentgraph_core::{Edge, Graph, GraphExtension, NodeId, NodeSpec, NodeState};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphExtensionError {
    #[error("node '{0}' already exists")]
    DuplicateNode(NodeId),

    #[error("edge {from} -> {to} references unknown node '{missing}'")]
    DanglingEdge {
        from: NodeId,
        to: NodeId,
        missing: NodeId,
    },

    #[error("node id must not be empty")]
    EmptyNodeId,

    #[error("extension would grow the graph to {requested} nodes (limit {limit})")]
    StepLimit { limit: usize, requested: usize },
}

#[derive(Debug, Clone)]
pub struct LiveNode {
    pub spec: NodeSpec,
    pub state: NodeState,
    pub output: Option<Value>,
    /// Position in completion order, set when the node completes.
    pub completed_seq: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct LiveGraph {
    nodes: Vec<LiveNode>,
    index: HashMap<NodeId, usize>,
    edges: Vec<Edge>,
    edge_set: HashSet<Edge>,
    limit: Option<usize>,
    completions: usize,
}

impl LiveGraph {
    /// Build from an initial graph. Edges may name nodes that do not exist yet.
    pub fn from_graph(graph: &Graph) -> agentgraph_core::Result<Self> {
        graph.validate()?;
        let mut live = Self::default();
        for spec in &graph.nodes {
            live.push_node(spec.clone());
        }
        for edge in &graph.edges {
            live.push_edge(edge.clone());
        }
        Ok(live)
    }

    /// Cap the node count for later extensions.
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    fn push_node(&mut self, spec: NodeSpec) {
        self.index.insert(spec.id.clone(), self.nodes.len());
        self.nodes.push(LiveNode {
            spec,
            state: NodeState::Pending,
            output: None,
            completed_seq: None,
        });
    }

    fn push_edge(&mut self, edge: Edge) {
        if self.edge_set.insert(edge.clone()) {
            self.edges.push(edge);
        }
    }

    /// The first node of the initial graph.
    pub fn root(&self) -> Option<&str> {
        self.nodes.first().map(|n| n.spec.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<&LiveNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    fn node_mut(&mut self, id: &str) -> Option<&mut LiveNode> {
        match self.index.get(id) {
            Some(&i) => self.nodes.get_mut(i),
            None => None,
        }
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &LiveNode> {
        self.nodes.iter()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn state(&self, id: &str) -> Option<NodeState> {
        self.node(id).map(|n| n.state)
    }

    pub fn predecessors(&self, id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.to == id)
            .map(|e| e.from.as_str())
            .collect()
    }

    pub fn has_successors(&self, id: &str) -> bool {
        self.edges.iter().any(|e| e.from == id)
    }

    pub fn set_state(&mut self, id: &str, state: NodeState) {
        if let Some(node) = self.node_mut(id) {
            node.state = state;
        }
    }

    pub fn complete(&mut self, id: &str, output: Value) {
        let seq = self.completions;
        if let Some(node) = self.node_mut(id) {
            node.state = NodeState::Complete;
            node.output = Some(output);
            node.completed_seq = Some(seq);
            self.completions += 1;
        }
    }

    /// Outputs of completed predecessors, keyed by id.
    pub fn inputs_for(&self, id: &str) -> serde_json::Map<String, Value> {
        self.predecessors(id)
            .into_iter()
            .filter_map(|p| {
                let node = self.node(p)?;
                node.output.as_ref().map(|o| (p.to_string(), o.clone()))
            })
            .collect()
    }

    /// Pending nodes whose predecessors are all settled, in insertion order.
    ///
    /// A predecessor counts as settled when `satisfied(state)` holds; a
    /// predecessor id that has not materialized never does.
    pub fn ready(&self, enforce_edges: bool, satisfied: impl Fn(NodeState) -> bool) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.state == NodeState::Pending)
            .filter(|n| {
                !enforce_edges
                    || self
                        .predecessors(&n.spec.id)
                        .iter()
                        .all(|p| self.state(p).is_some_and(&satisfied))
            })
            .map(|n| n.spec.id.clone())
            .collect()
    }

    /// Pending nodes with a predecessor in one of `blocking` states, paired with that predecessor.
    pub fn blocked(&self, blocking: &[NodeState]) -> Vec<(NodeId, NodeId)> {
        self.nodes
            .iter()
            .filter(|n| n.state == NodeState::Pending)
            .filter_map(|n| {
                self.predecessors(&n.spec.id)
                    .into_iter()
                    .find(|p| self.state(p).is_some_and(|s| blocking.contains(&s)))
                    .map(|p| (n.spec.id.clone(), p.to_string()))
            })
            .collect()
    }

    pub fn pending(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.state == NodeState::Pending)
            .map(|n| n.spec.id.clone())
            .collect()
    }

    /// Check an extension against the current graph without applying it.
    pub fn validate_extension(&self, ext: &GraphExtension) -> Result<(), GraphExtensionError> {
        let mut added = HashSet::new();
        for node in &ext.add_nodes {
            if node.id.trim().is_empty() {
                return Err(GraphExtensionError::EmptyNodeId);
            }
            if self.contains(&node.id) || !added.insert(node.id.as_str()) {
                return Err(GraphExtensionError::DuplicateNode(node.id.clone()));
            }
        }

        for edge in &ext.add_edges {
            for end in [&edge.from, &edge.to] {
                if !self.contains(end) && !added.contains(end.as_str()) {
                    return Err(GraphExtensionError::DanglingEdge {
                        from: edge.from.clone(),
                        to: edge.to.clone(),
                        missing: end.clone(),
                    });
                }
            }
        }

        if let Some(limit) = self.limit {
            let requested = self.len() + ext.add_nodes.len();
            if requested > limit {
                return Err(GraphExtensionError::StepLimit { limit, requested });
            }
        }
        Ok(())
    }

    /// Validate and merge. A rejected extension leaves the graph untouched.
    pub fn extend(&mut self, ext: &GraphExtension) -> Result<(), GraphExtensionError> {
        self.validate_extension(ext)?;
        for node in &ext.add_nodes {
            self.push_node(node.clone());
        }
        for edge in &ext.add_edges {
            self.push_edge(edge.clone());
        }
        Ok(())
    }

    /// Snapshot of the current topology.
    pub fn to_graph(&self) -> Graph {
        Graph {
            nodes: self.nodes.iter().map(|n| n.spec.clone()).collect(),
            edges: self.edges.clone(),
        }
    }
}
