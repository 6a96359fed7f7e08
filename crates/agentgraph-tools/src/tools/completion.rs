//! Plain text completion tool, registered as `research` and `answer`.

use super::{call_provider, usage_metrics};
use crate::context::ExecContext;
use crate::registry::{Tool, ToolError, ToolOutput};
use agentgraph_core::Memory;
use agentgraph_llm::{LlmProvider, LlmRequest, RetryPolicy, DEFAULT_MODEL};
use serde_json::{json, Value};
use std::sync::Arc;

/// Memory prefix for generated answers; the structured output tool captions from it.
pub const ANSWER_PREFIX: &str = "answer_";

const DEFAULT_SYSTEM: &str = "You are a careful assistant working on one step of a larger task. \
     Answer the step directly and concisely, using the context from earlier steps when given.";

pub struct CompletionTool {
    name: String,
    description: String,
    provider: Arc<dyn LlmProvider>,
    model: String,
    max_tokens: u32,
    system: String,
    retry: RetryPolicy,
    store_prefix: Option<String>,
}

impl CompletionTool {
    pub fn new(name: impl Into<String>, provider: Arc<dyn LlmProvider>) -> Self {
        let name = name.into();
        Self {
            description: format!("Run the '{}' step as a single model completion.", name),
            name,
            provider,
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 4096,
            system: DEFAULT_SYSTEM.to_string(),
            retry: RetryPolicy::default(),
            store_prefix: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = system.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Store every completion in Memory under a fresh key with this prefix.
    pub fn storing_as(mut self, prefix: impl Into<String>) -> Self {
        self.store_prefix = Some(prefix.into());
        self
    }
}

/// Prompt text plus the outputs of predecessor nodes, in id order.
pub(crate) fn render_prompt(args: &Value) -> Result<String, ToolError> {
    let prompt = args
        .get("prompt")
        .and_then(Value::as_str)
        .or_else(|| args.get("goal").and_then(Value::as_str))
        .ok_or_else(|| ToolError::invalid_args("'prompt' is required"))?;

    let mut out = prompt.to_string();
    if let Some(goal) = args.get("goal").and_then(Value::as_str) {
        if goal != prompt {
            out.push_str(&format!("\n\nOverall goal: {}", goal));
        }
    }
    if let Some(inputs) = args.get("inputs").and_then(Value::as_object) {
        if !inputs.is_empty() {
            out.push_str("\n\nContext from previous steps:");
            for (id, value) in inputs {
                let text = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                out.push_str(&format!("\n[{}]\n{}", id, text));
            }
        }
    }
    Ok(out)
}

#[async_trait::async_trait]
impl Tool for CompletionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["prompt"],
            "properties": {
                "prompt": { "type": "string" },
                "goal": { "type": "string" },
                "inputs": { "type": "object", "description": "Outputs of predecessor nodes keyed by node id" }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ExecContext) -> Result<ToolOutput, ToolError> {
        let user = render_prompt(&args)?;
        let request = LlmRequest::chat(&self.system, user)
            .with_model(&self.model)
            .with_max_tokens(self.max_tokens);

        let completion = call_provider(&self.name, &self.provider, &self.retry, request, ctx).await?;
        let metrics = usage_metrics(&completion);

        if let Some(prefix) = &self.store_prefix {
            ctx.memory.put_doc(Memory::unique_key(prefix), completion.text.clone());
        }

        Ok(ToolOutput::text(completion.text).with_metrics(metrics))
    }
}
