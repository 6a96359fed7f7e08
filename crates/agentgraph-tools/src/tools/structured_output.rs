//! Structured output tool: coerce a model response into a caller-supplied schema.
//!
//! Primary strategy forces a single function call whose parameters are the
//! caller's schema. If that yields no parseable arguments, a JSON-object
//! request is the fallback, and an unparseable fallback becomes `{}`. The
//! result is coerced locally and stored in Memory under a fresh key.

use super::{call_provider, usage_metrics};
use crate::context::ExecContext;
use crate::registry::{Tool, ToolError, ToolOutput};
use crate::schema::{coerce_to_schema, parse_json_object};
use agentgraph_core::{Memory, Metrics};
use agentgraph_llm::{LlmProvider, LlmRequest, LlmTool, RetryPolicy, DEFAULT_MODEL};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

pub const DEFAULT_FUNCTION_NAME: &str = "produce_structured_output";

const TOOL_MODE_SYSTEM: &str = "You convert the user's request into structured data. \
     Call the provided function exactly once with arguments that satisfy its schema.";
const JSON_MODE_SYSTEM: &str = "You convert the user's request into structured data. \
     Reply with one JSON object that satisfies the requested fields.";

#[derive(Clone, Debug)]
pub struct StructuredOutputConfig {
    pub function_name: String,
    /// Memory prefix searched for a caption when the caller passes none.
    pub caption_prefix: String,
    /// Memory prefix for the stored result.
    pub memory_prefix: String,
    pub model: String,
    pub max_tokens: u32,
    pub retry: RetryPolicy,
}

impl Default for StructuredOutputConfig {
    fn default() -> Self {
        Self {
            function_name: DEFAULT_FUNCTION_NAME.to_string(),
            caption_prefix: "answer_".to_string(),
            memory_prefix: "structured_".to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 2048,
            retry: RetryPolicy::default(),
        }
    }
}

pub struct StructuredOutputTool {
    provider: Arc<dyn LlmProvider>,
    config: StructuredOutputConfig,
}

impl StructuredOutputTool {
    pub fn new(provider: Arc<dyn LlmProvider>, config: StructuredOutputConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &StructuredOutputConfig {
        &self.config
    }

    fn combined_prompt(prompt: &str, caption: Option<&str>) -> String {
        match caption {
            Some(c) if !c.trim().is_empty() => format!("{}\n\nCaption:\n{}", prompt, c),
            _ => prompt.to_string(),
        }
    }

    /// Strategy 1: forced function call. `None` means fall through.
    async fn tool_mode(
        &self,
        function_name: &str,
        schema: &Value,
        prompt: &str,
        ctx: &ExecContext,
        metrics: &mut Metrics,
    ) -> Result<Option<Value>, ToolError> {
        let request = LlmRequest::chat(TOOL_MODE_SYSTEM, prompt)
            .with_model(&self.config.model)
            .with_max_tokens(self.config.max_tokens)
            .with_forced_tool(LlmTool {
                name: function_name.to_string(),
                description: "Return the structured result.".to_string(),
                input_schema: schema.clone(),
            });
        let completion = call_provider(self.name(), &self.provider, &self.config.retry, request, ctx).await?;
        metrics.add(&usage_metrics(&completion));

        let Some(call) = completion.tool_call(function_name) else {
            self.parse_failed(ctx, "tool", "model did not call the function");
            return Ok(None);
        };
        match call.parse_arguments() {
            Ok(v @ Value::Object(_)) => Ok(Some(v)),
            Ok(other) => {
                self.parse_failed(ctx, "tool", &format!("arguments are not an object: {}", other));
                Ok(None)
            }
            Err(e) => {
                self.parse_failed(ctx, "tool", &e.to_string());
                Ok(None)
            }
        }
    }

    /// Strategy 2: JSON-object response. Unparseable text becomes `{}`.
    async fn json_mode(
        &self,
        prompt: &str,
        ctx: &ExecContext,
        metrics: &mut Metrics,
    ) -> Result<Value, ToolError> {
        let request = LlmRequest::chat(JSON_MODE_SYSTEM, prompt)
            .with_model(&self.config.model)
            .with_max_tokens(self.config.max_tokens)
            .json_object();
        let completion = call_provider(self.name(), &self.provider, &self.config.retry, request, ctx).await?;
        metrics.add(&usage_metrics(&completion));

        match parse_json_object(&completion.text) {
            Ok(v) => Ok(v),
            Err(e) => {
                self.parse_failed(ctx, "json", &e.to_string());
                Ok(Value::Object(Default::default()))
            }
        }
    }

    fn parse_failed(&self, ctx: &ExecContext, strategy: &str, error: &str) {
        warn!(strategy, error, "structured output parse failed");
        ctx.trace.warn(
            "structured_output.parse_failed",
            json!({ "node": ctx.node_id(), "strategy": strategy, "error": error }),
        );
    }
}

#[async_trait::async_trait]
impl Tool for StructuredOutputTool {
    fn name(&self) -> &str {
        "structured_output"
    }

    fn description(&self) -> &str {
        "Produce an object conforming to a caller-supplied JSON schema from a prompt \
         and an optional caption (defaults to the latest generated answer)."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["prompt", "schema"],
            "properties": {
                "prompt": { "type": "string", "description": "What to extract or produce" },
                "caption": { "type": "string", "description": "Source text; defaults to the latest answer in memory" },
                "schema": { "type": "object", "description": "Target JSON schema" },
                "functionName": { "type": "string", "description": "Name of the callable offered to the model" }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ExecContext) -> Result<ToolOutput, ToolError> {
        let prompt = args
            .get("prompt")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::invalid_args("'prompt' is required"))?;
        let schema = args
            .get("schema")
            .filter(|s| s.is_object())
            .ok_or_else(|| ToolError::invalid_args("'schema' must be an object"))?;
        let function_name = args
            .get("functionName")
            .and_then(Value::as_str)
            .unwrap_or(&self.config.function_name)
            .to_string();

        let caption = match args.get("caption").and_then(Value::as_str) {
            Some(c) => Some(c.to_string()),
            None => ctx
                .memory
                .latest_with_prefix(&self.config.caption_prefix)
                .map(|(key, value)| {
                    debug!(key, "captioning with latest answer");
                    value
                }),
        };
        let combined = Self::combined_prompt(prompt, caption.as_deref());

        let mut metrics = Metrics::default();
        let candidate = match self.tool_mode(&function_name, schema, &combined, ctx, &mut metrics).await? {
            Some(v) => v,
            None => self.json_mode(&combined, ctx, &mut metrics).await?,
        };

        let coerced = coerce_to_schema(candidate, schema);

        let key = Memory::unique_key(&self.config.memory_prefix);
        ctx.memory.put_doc(&key, coerced.to_string());
        ctx.trace.info(
            "structured_output.stored",
            json!({ "node": ctx.node_id(), "key": key }),
        );

        Ok(ToolOutput::json(coerced).with_metrics(metrics))
    }
}
