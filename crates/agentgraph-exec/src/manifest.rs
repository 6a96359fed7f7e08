//! Run manifest: structured status for every node of one execution.

use agentgraph_core::{Metrics, NodeId, NodeRecord, NodeSpec, NodeState, Outcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RunManifest {
    pub run_id: String,
    pub started: DateTime<Utc>,
    pub ended: Option<DateTime<Utc>>,
    pub outcome: Outcome,
    pub total_tokens: u64,
    pub total_wall_ms: u64,
    pub nodes: BTreeMap<NodeId, NodeRecord>,
}

impl RunManifest {
    pub fn new(run_id: &str) -> Self {
        Self {
            run_id: run_id.into(),
            started: Utc::now(),
            ended: None,
            outcome: Outcome::Pending,
            total_tokens: 0,
            total_wall_ms: 0,
            nodes: BTreeMap::new(),
        }
    }

    pub fn add_node(&mut self, spec: &NodeSpec) {
        self.nodes.entry(spec.id.clone()).or_insert_with(|| NodeRecord {
            state: NodeState::Pending,
            kind: spec.kind.clone(),
            tool: spec.tool_name().to_string(),
            started: None,
            ended: None,
            elapsed_ms: None,
            error: None,
        });
    }

    pub fn start_node(&mut self, id: &str) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.state = NodeState::Running;
            node.started = Some(Utc::now());
        }
    }

    pub fn finish_node(&mut self, id: &str, elapsed_ms: u64) {
        self.end_node(id, NodeState::Complete, Some(elapsed_ms), None);
    }

    pub fn fail_node(&mut self, id: &str, elapsed_ms: u64, error: &str) {
        self.end_node(id, NodeState::Error, Some(elapsed_ms), Some(error.to_string()));
    }

    pub fn skip_node(&mut self, id: &str, reason: &str) {
        self.end_node(id, NodeState::Skipped, None, Some(reason.to_string()));
    }

    fn end_node(&mut self, id: &str, state: NodeState, elapsed_ms: Option<u64>, error: Option<String>) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.state = state;
            node.ended = Some(Utc::now());
            node.elapsed_ms = elapsed_ms;
            node.error = error;
        }
    }

    pub fn count(&self, state: NodeState) -> usize {
        self.nodes.values().filter(|n| n.state == state).count()
    }

    pub fn finalize(&mut self, outcome: Outcome, metrics: &BTreeMap<NodeId, Metrics>) {
        let ended = Utc::now();
        self.outcome = outcome;
        self.ended = Some(ended);
        self.total_tokens = metrics.values().map(Metrics::total_tokens).sum();
        self.total_wall_ms = (ended - self.started).num_milliseconds().max(0) as u64;
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    pub fn run_log_line(&self) -> String {
        format!(
            "| {} | {} | {} nodes | {} complete | {} error | {} skipped | {} tokens |",
            self.run_id,
            self.outcome,
            self.nodes.len(),
            self.count(NodeState::Complete),
            self.count(NodeState::Error),
            self.count(NodeState::Skipped),
            self.total_tokens,
        )
    }
}
