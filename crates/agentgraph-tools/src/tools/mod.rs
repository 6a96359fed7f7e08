//! Built-in tool implementations.
//!
//! Each tool is a self-contained module. To add a new tool:
//! 1. Create a new file in this directory
//! 2. Implement the Tool trait
//! 3. Add `pub mod <name>;` here
//! 4. Register it in create_default_registry() in ../lib.rs

pub mod completion;
pub mod reflect;
pub mod structured_output;

use crate::context::ExecContext;
use crate::registry::ToolError;
use agentgraph_core::Metrics;
use agentgraph_llm::{complete, Completion, LlmError, LlmProvider, LlmRequest, RetryPolicy};
use serde_json::json;
use std::sync::Arc;

/// One provider call under the retry policy. Rate-limit retries are reported
/// to the run trace as `provider.rate_limited`.
pub(crate) async fn call_provider(
    tool: &str,
    provider: &Arc<dyn LlmProvider>,
    retry: &RetryPolicy,
    request: LlmRequest,
    ctx: &ExecContext,
) -> Result<Completion, ToolError> {
    let cancel = ctx.cancel_token().clone();
    let result = agentgraph_llm::with_retry(
        retry,
        |_| {
            let provider = provider.clone();
            let request = request.clone();
            let cancel = cancel.clone();
            async move { complete(provider.as_ref(), request, Some(cancel)).await }
        },
        |attempt, delay| {
            ctx.trace.warn(
                "provider.rate_limited",
                json!({
                    "tool": tool,
                    "node": ctx.node_id(),
                    "attempt": attempt,
                    "delayMs": delay.as_millis() as u64,
                }),
            );
        },
    )
    .await;

    result.map_err(|e| match e {
        LlmError::Cancelled => ToolError::Cancelled,
        LlmError::RetriesExhausted { attempts } => ToolError::execution(
            tool,
            format!("provider still rate limited after {} attempts", attempts),
        ),
        other => ToolError::execution(tool, other.to_string()),
    })
}

pub(crate) fn usage_metrics(completion: &Completion) -> Metrics {
    completion
        .usage
        .as_ref()
        .map(|u| Metrics::new(u.input_tokens as u64, u.output_tokens as u64))
        .unwrap_or_default()
}
