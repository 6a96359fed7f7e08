//! Non-streaming view of a provider response.
//!
//! Tools in a task graph want the whole answer at once; this folds a
//! `StreamDelta` stream into text, completed tool calls and usage.

use crate::provider::{LlmError, LlmProvider, LlmResult, LlmStream};
use crate::types::{AccumulatedToolCall, LlmRequest, StreamDelta, Usage};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug, Default)]
pub struct Completion {
    pub text: String,
    pub tool_calls: Vec<AccumulatedToolCall>,
    pub usage: Option<Usage>,
    pub stop_reason: Option<String>,
}

impl Completion {
    /// First call to the named tool, if the model made one.
    pub fn tool_call(&self, name: &str) -> Option<&AccumulatedToolCall> {
        self.tool_calls.iter().find(|c| c.name == name)
    }
}

pub async fn collect_completion(mut stream: LlmStream) -> LlmResult<Completion> {
    let mut completion = Completion::default();
    let mut pending: Vec<AccumulatedToolCall> = Vec::new();

    while let Some(delta) = stream.next().await {
        match delta? {
            StreamDelta::Text(t) => completion.text.push_str(&t),
            StreamDelta::Thinking(_) => {}
            StreamDelta::ToolCallStart { id, name } => {
                pending.push(AccumulatedToolCall {
                    id,
                    name,
                    arguments: String::new(),
                });
            }
            StreamDelta::ToolCallDelta { id, arguments } => {
                if let Some(call) = pending.iter_mut().find(|c| c.id == id) {
                    call.arguments.push_str(&arguments);
                }
            }
            StreamDelta::ToolCallEnd { id } => {
                if let Some(pos) = pending.iter().position(|c| c.id == id) {
                    completion.tool_calls.push(pending.remove(pos));
                }
            }
            StreamDelta::Done { stop_reason, usage } => {
                completion.stop_reason = stop_reason;
                if usage.is_some() {
                    completion.usage = usage;
                }
                break;
            }
            StreamDelta::Error(e) => return Err(LlmError::StreamError(e)),
        }
    }

    // Calls the stream never closed still carry whatever arguments arrived.
    completion.tool_calls.append(&mut pending);
    Ok(completion)
}

/// Issue one request and wait for the full response.
pub async fn complete(
    provider: &dyn LlmProvider,
    request: LlmRequest,
    cancel: Option<CancellationToken>,
) -> LlmResult<Completion> {
    let stream = provider.complete_stream(request, cancel).await?;
    collect_completion(stream).await
}
