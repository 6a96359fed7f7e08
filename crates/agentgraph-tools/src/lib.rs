//! Agentgraph Tools: tool contract, registry, and built-in LLM-backed tools
//!
//! Each built-in tool is a self-contained file in src/tools/.
//! To add a tool: create the file, implement the Tool trait, register it
//! in `create_default_registry` below (or on your own registry).

pub mod context;
pub mod registry;
pub mod schema;
pub mod tools;

pub use context::{ExecContext, ExtensionRequest};
pub use registry::{Tool, ToolContent, ToolError, ToolOutput, ToolRegistry};
pub use tools::completion::CompletionTool;
pub use tools::reflect::ReflectTool;
pub use tools::structured_output::{StructuredOutputConfig, StructuredOutputTool};

use agentgraph_llm::{LlmProvider, RetryPolicy};
use std::sync::Arc;

/// Registry with every built-in tool wired to one provider:
/// `research` and `answer` completions, `eval` reflection, and `structured_output`.
/// `max_tokens` caps every provider call the built-ins make.
pub fn create_default_registry(
    provider: Arc<dyn LlmProvider>,
    model: &str,
    max_tokens: u32,
    retry: RetryPolicy,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(
        CompletionTool::new("research", provider.clone())
            .with_model(model)
            .with_max_tokens(max_tokens)
            .with_retry(retry.clone()),
    );
    registry.register(
        CompletionTool::new("answer", provider.clone())
            .with_model(model)
            .with_max_tokens(max_tokens)
            .with_retry(retry.clone())
            .storing_as(tools::completion::ANSWER_PREFIX),
    );
    registry.register(
        ReflectTool::new(provider.clone())
            .with_model(model)
            .with_max_tokens(max_tokens)
            .with_retry(retry.clone()),
    );
    registry.register(StructuredOutputTool::new(
        provider,
        StructuredOutputConfig {
            model: model.to_string(),
            max_tokens,
            retry,
            ..Default::default()
        },
    ));

    registry
}
