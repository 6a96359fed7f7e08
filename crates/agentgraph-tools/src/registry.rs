//! Tool registry and trait definitions
//!
//! A tool is a named capability: structured arguments plus an execution
//! context in, a result or a typed failure out. Tools are stateless from the
//! registry's point of view; anything they need lives in Memory or in `args`.

use crate::context::ExecContext;
use agentgraph_core::Metrics;
use agentgraph_llm::LlmTool;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("tool '{0}' is disabled")]
    Disabled(String),

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("tool error: {tool} - {message}")]
    Execution { tool: String, message: String },

    #[error("cancelled")]
    Cancelled,
}

impl ToolError {
    pub fn execution(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::InvalidArgs(message.into())
    }

    /// Short machine-readable reason carried on `node.error` trace events.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NotFound(_) | Self::Disabled(_) => "tool_not_found",
            Self::InvalidArgs(_) | Self::Execution { .. } => "tool_failed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ToolContent {
    Text(String),
    Json(Value),
}

/// Successful tool result plus whatever usage the tool measured.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolOutput {
    pub content: ToolContent,
    pub metrics: Option<Metrics>,
}

impl ToolOutput {
    pub fn text(s: impl Into<String>) -> Self {
        Self { content: ToolContent::Text(s.into()), metrics: None }
    }

    pub fn json(v: Value) -> Self {
        Self { content: ToolContent::Json(v), metrics: None }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = if metrics.is_empty() { None } else { Some(metrics) };
        self
    }

    pub fn to_content_string(&self) -> String {
        match &self.content {
            ToolContent::Text(s) => s.clone(),
            ToolContent::Json(v) => serde_json::to_string_pretty(v).unwrap_or_default(),
        }
    }

    /// The result as a JSON value (text becomes a JSON string).
    pub fn to_value(&self) -> Value {
        match &self.content {
            ToolContent::Text(s) => Value::String(s.clone()),
            ToolContent::Json(v) => v.clone(),
        }
    }
}

/// The Tool trait: implement this to add a new capability.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name (e.g. "answer", "structured_output").
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for input parameters.
    fn input_schema(&self) -> Value;

    /// Whether this tool is currently enabled.
    fn is_enabled(&self) -> bool { true }

    /// Execute the tool with the given arguments.
    async fn execute(&self, args: Value, ctx: &ExecContext) -> Result<ToolOutput, ToolError>;

    /// Execute with cancellation support. Default: race execute() against the
    /// context's cancellation token.
    async fn execute_cancellable(&self, args: Value, ctx: &ExecContext) -> Result<ToolOutput, ToolError> {
        let cancel = ctx.cancel_token().clone();
        tokio::select! {
            result = self.execute(args, ctx) => result,
            _ = cancel.cancelled() => Err(ToolError::Cancelled),
        }
    }

    /// Convert to the LLM tool definition format.
    fn to_llm_tool(&self) -> LlmTool {
        LlmTool {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl Default for ToolRegistry {
    fn default() -> Self { Self::new() }
}

impl ToolRegistry {
    pub fn new() -> Self { Self { tools: HashMap::new() } }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Remove a tool by name.
    pub fn remove(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Resolve an enabled tool or fail with the typed lookup error.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Tool>, ToolError> {
        match self.tools.get(name) {
            Some(tool) if tool.is_enabled() => Ok(tool.clone()),
            Some(_) => Err(ToolError::Disabled(name.to_string())),
            None => Err(ToolError::NotFound(name.to_string())),
        }
    }

    pub async fn execute(&self, name: &str, args: Value, ctx: &ExecContext) -> Result<ToolOutput, ToolError> {
        self.resolve(name)?.execute_cancellable(args, ctx).await
    }

    /// Get LLM tool definitions for all enabled tools.
    pub fn get_definitions(&self) -> Vec<LlmTool> {
        self.tools.values()
            .filter(|t| t.is_enabled())
            .map(|t| t.to_llm_tool())
            .collect()
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
