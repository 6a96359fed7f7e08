//! Execution context handed to every tool invocation.

use agentgraph_core::{GraphExtension, Memory, NodeId, Trace};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A graph-extension request, tagged with the node that made it.
#[derive(Clone, Debug)]
pub struct ExtensionRequest {
    pub from: Option<NodeId>,
    pub extension: GraphExtension,
}

/// Per-invocation context. Memory and Trace are shared for the whole run;
/// the node id, cancellation token and extension channel are set by the executor.
#[derive(Clone)]
pub struct ExecContext {
    pub memory: Arc<Memory>,
    pub trace: Arc<Trace>,
    node_id: Option<NodeId>,
    cancel: CancellationToken,
    extensions: Option<mpsc::UnboundedSender<ExtensionRequest>>,
}

impl ExecContext {
    pub fn new(memory: Arc<Memory>, trace: Arc<Trace>) -> Self {
        Self {
            memory,
            trace,
            node_id: None,
            cancel: CancellationToken::new(),
            extensions: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_extension_channel(mut self, tx: mpsc::UnboundedSender<ExtensionRequest>) -> Self {
        self.extensions = Some(tx);
        self
    }

    /// Same shared state, scoped to one node.
    pub fn for_node(&self, node_id: impl Into<NodeId>) -> Self {
        let mut ctx = self.clone();
        ctx.node_id = Some(node_id.into());
        ctx
    }

    pub fn node_id(&self) -> Option<&str> {
        self.node_id.as_deref()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Ask the executor to splice nodes/edges into the live graph.
    ///
    /// Returns false when no executor is listening (the tool is being invoked
    /// outside a run); the request is then dropped.
    pub fn extend(&self, extension: GraphExtension) -> bool {
        let Some(tx) = &self.extensions else {
            tracing::warn!(node = ?self.node_id, "graph extension requested outside an executor");
            return false;
        };
        tx.send(ExtensionRequest {
            from: self.node_id.clone(),
            extension,
        })
        .is_ok()
    }
}
