//! Agentgraph LLM - provider adapters, completion collection, and retry policy

pub mod anthropic;
pub mod completion;
pub mod mock;
pub mod provider;
pub mod retry;
pub mod types;

pub use anthropic::AnthropicProvider;
pub use completion::{collect_completion, complete, Completion};
pub use mock::{MockBehavior, MockProvider};
pub use provider::{LlmError, LlmProvider, LlmResult, LlmStream};
pub use retry::{with_retry, RetryPolicy};
pub use tokio_util::sync::CancellationToken;
pub use types::*;
