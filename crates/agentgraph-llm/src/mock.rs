//! MockProvider: deterministic LLM responses for tests and offline runs
//!
//! Each call to `complete_stream` pops the next scripted behavior. When the
//! script runs out, the default behavior answers. Requests are recorded so
//! tests can assert on exactly what a tool sent.

use crate::provider::{LlmError, LlmProvider, LlmResult, LlmStream};
use crate::types::{LlmRequest, ResponseFormat, StreamDelta, Usage};
use async_stream::stream;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Mock behavior configuration
#[derive(Clone, Debug)]
pub enum MockBehavior {
    /// Return a text-only response
    Text(String),
    /// Return a tool_use call with given name and args
    ToolCall { name: String, args: Value },
    /// Return a tool_use call whose argument text is not valid JSON
    MalformedToolCall { name: String, arguments: String },
    /// Answer from the request itself: forced tool → empty-object call,
    /// JSON mode → `{}`, otherwise echo the last user message.
    Echo,
    /// Fail the call with a rate-limit signal (HTTP 429)
    RateLimited,
    /// Fail the call with a non-retryable error
    Error(String),
}

pub struct MockProvider {
    behaviors: Mutex<Vec<MockBehavior>>,
    default_behavior: MockBehavior,
    usage: Option<Usage>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl MockProvider {
    /// Create a mock that always returns the same behavior
    pub fn constant(behavior: MockBehavior) -> Self {
        Self {
            behaviors: Mutex::new(Vec::new()),
            default_behavior: behavior,
            usage: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock with a sequence of behaviors (consumed in order)
    pub fn sequence(behaviors: Vec<MockBehavior>) -> Self {
        Self {
            behaviors: Mutex::new(behaviors),
            default_behavior: MockBehavior::Text("(mock: sequence exhausted)".into()),
            usage: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn echo() -> Self {
        Self::constant(MockBehavior::Echo)
    }

    /// Report this usage on every successful response.
    pub fn with_usage(mut self, input_tokens: u32, output_tokens: u32) -> Self {
        self.usage = Some(Usage {
            input_tokens,
            output_tokens,
        });
        self
    }

    /// Get the number of calls made
    pub async fn call_count(&self) -> usize {
        self.requests.lock().await.len()
    }

    pub async fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().await.clone()
    }

    async fn next_behavior(&self) -> MockBehavior {
        let mut behaviors = self.behaviors.lock().await;
        if behaviors.is_empty() {
            self.default_behavior.clone()
        } else {
            behaviors.remove(0)
        }
    }
}

fn mock_tool_id() -> String {
    format!(
        "toolu_mock_{}",
        uuid::Uuid::new_v4().to_string().split('-').next().unwrap_or("0")
    )
}

fn echo_behavior(request: &LlmRequest) -> MockBehavior {
    if let Some(name) = &request.tool_choice {
        return MockBehavior::ToolCall {
            name: name.clone(),
            args: Value::Object(Default::default()),
        };
    }
    if request.response_format == Some(ResponseFormat::JsonObject) {
        return MockBehavior::Text("{}".into());
    }
    let last = request.messages.last().map(|m| m.text()).unwrap_or_default();
    let preview: String = last.chars().take(200).collect();
    MockBehavior::Text(format!("(mock) {}", preview))
}

#[async_trait::async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn models(&self) -> &[&str] {
        &["mock"]
    }

    fn supports_model(&self, _model: &str) -> bool {
        true
    }

    async fn complete_stream(
        &self,
        request: LlmRequest,
        cancel: Option<CancellationToken>,
    ) -> LlmResult<LlmStream> {
        if cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            return Err(LlmError::Cancelled);
        }

        let mut behavior = self.next_behavior().await;
        if matches!(behavior, MockBehavior::Echo) {
            behavior = echo_behavior(&request);
        }
        self.requests.lock().await.push(request);

        let usage = self.usage.clone();
        match behavior {
            MockBehavior::RateLimited => Err(LlmError::RateLimited { retry_after_ms: 0 }),
            MockBehavior::Error(msg) => Err(LlmError::RequestFailed(msg)),
            MockBehavior::Text(text) => Ok(Box::pin(stream! {
                // Stream text in chunks like a real LLM
                for chunk in text.as_bytes().chunks(20) {
                    yield Ok::<_, LlmError>(StreamDelta::Text(String::from_utf8_lossy(chunk).to_string()));
                }
                yield Ok(StreamDelta::Done { stop_reason: Some("end_turn".into()), usage });
            })),
            MockBehavior::ToolCall { name, args } => {
                let arguments = serde_json::to_string(&args).unwrap_or_default();
                Ok(tool_call_stream(name, arguments, usage))
            }
            MockBehavior::MalformedToolCall { name, arguments } => {
                Ok(tool_call_stream(name, arguments, usage))
            }
            MockBehavior::Echo => Err(LlmError::InvalidResponse("unresolved echo".into())),
        }
    }
}

fn tool_call_stream(name: String, arguments: String, usage: Option<Usage>) -> LlmStream {
    let id = mock_tool_id();
    Box::pin(stream! {
        yield Ok::<_, LlmError>(StreamDelta::ToolCallStart { id: id.clone(), name });
        yield Ok(StreamDelta::ToolCallDelta { id: id.clone(), arguments });
        yield Ok(StreamDelta::ToolCallEnd { id });
        yield Ok(StreamDelta::Done { stop_reason: Some("tool_use".into()), usage });
    })
}
