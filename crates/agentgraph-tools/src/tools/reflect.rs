//! Reflection tool (`eval`): critiques the work so far and, when it falls
//! short, grows the graph with follow-up research plus a revised answer.

use super::{call_provider, usage_metrics};
use crate::context::ExecContext;
use crate::registry::{Tool, ToolError, ToolOutput};
use crate::schema::parse_json_object;
use crate::tools::completion::render_prompt;
use agentgraph_core::{GraphExtension, NodeSpec, KIND_ANSWER, KIND_TOOL};
use agentgraph_llm::{LlmProvider, LlmRequest, RetryPolicy, DEFAULT_MODEL};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

const SYSTEM: &str = "You review work produced for a task. Reply with one JSON object: \
     {\"satisfied\": boolean, \"critique\": string, \"followUps\": [string]}. \
     followUps lists short research questions that would close the gaps; leave it empty when satisfied.";

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    #[serde(default)]
    pub satisfied: bool,
    #[serde(default)]
    pub critique: String,
    #[serde(default)]
    pub follow_ups: Vec<String>,
}

pub struct ReflectTool {
    provider: Arc<dyn LlmProvider>,
    model: String,
    retry: RetryPolicy,
    step_tool: String,
    answer_tool: String,
    max_follow_ups: usize,
    max_tokens: u32,
}

impl ReflectTool {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            model: DEFAULT_MODEL.to_string(),
            retry: RetryPolicy::default(),
            step_tool: "research".to_string(),
            answer_tool: "answer".to_string(),
            max_follow_ups: 2,
            max_tokens: 1024,
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

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_max_follow_ups(mut self, n: usize) -> Self {
        self.max_follow_ups = n;
        self
    }

    /// Follow-up research nodes feeding a revised answer, all hanging off `origin`.
    pub fn follow_up_extension(&self, origin: &str, goal: &str, verdict: &Verdict) -> GraphExtension {
        let answer_id = format!("{}_answer", origin);
        let mut ext = GraphExtension::new();

        for (i, question) in verdict.follow_ups.iter().take(self.max_follow_ups).enumerate() {
            let id = format!("{}_followup_{}", origin, i + 1);
            ext = ext
                .node(
                    NodeSpec::new(&id)
                        .kind(KIND_TOOL)
                        .tool(&self.step_tool)
                        .label(format!("Follow-up {}", i + 1))
                        .prompt(question.clone()),
                )
                .edge(origin, &id)
                .edge(&id, &answer_id);
        }

        ext.node(
            NodeSpec::new(&answer_id)
                .kind(KIND_ANSWER)
                .tool(&self.answer_tool)
                .label("Revised answer")
                .prompt(format!(
                    "Write an improved final answer to: {}\nAddress this critique: {}",
                    goal, verdict.critique
                )),
        )
        .edge(origin, &answer_id)
    }
}

#[async_trait::async_trait]
impl Tool for ReflectTool {
    fn name(&self) -> &str {
        "eval"
    }

    fn description(&self) -> &str {
        "Critique the answers produced so far and schedule follow-up work when they fall short."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["prompt"],
            "properties": {
                "prompt": { "type": "string" },
                "goal": { "type": "string" },
                "inputs": { "type": "object" }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ExecContext) -> Result<ToolOutput, ToolError> {
        let user = render_prompt(&args)?;
        let request = LlmRequest::chat(SYSTEM, user)
            .with_model(&self.model)
            .with_max_tokens(self.max_tokens)
            .json_object();

        let completion = call_provider(self.name(), &self.provider, &self.retry, request, ctx).await?;
        let metrics = usage_metrics(&completion);

        let verdict: Verdict = parse_json_object(&completion.text)
            .and_then(serde_json::from_value)
            .map_err(|e| ToolError::execution(self.name(), format!("unreadable verdict: {}", e)))?;
        debug!(satisfied = verdict.satisfied, follow_ups = verdict.follow_ups.len(), "reflection verdict");

        let mut scheduled = false;
        if !verdict.satisfied && !verdict.follow_ups.is_empty() && self.max_follow_ups > 0 {
            if let Some(origin) = ctx.node_id() {
                let goal = args
                    .get("goal")
                    .and_then(Value::as_str)
                    .or_else(|| args.get("prompt").and_then(Value::as_str))
                    .unwrap_or_default();
                scheduled = ctx.extend(self.follow_up_extension(origin, goal, &verdict));
                info!(node = origin, scheduled, "reflection requested follow-ups");
            }
        }

        Ok(ToolOutput::json(json!({
            "satisfied": verdict.satisfied,
            "critique": verdict.critique,
            "followUps": verdict.follow_ups,
            "scheduled": scheduled,
        }))
        .with_metrics(metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentgraph_llm::MockProvider;

    #[test]
    fn extension_wires_follow_ups_into_revised_answer() {
        let tool = ReflectTool::new(Arc::new(MockProvider::echo())).with_max_follow_ups(2);
        let verdict = Verdict {
            satisfied: false,
            critique: "too vague".into(),
            follow_ups: vec!["a?".into(), "b?".into(), "c?".into()],
        };
        let ext = tool.follow_up_extension("evaluate", "Explain tides", &verdict);

        let ids: Vec<&str> = ext.add_nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["evaluate_followup_1", "evaluate_followup_2", "evaluate_answer"]);
        assert_eq!(ext.add_nodes[2].kind, KIND_ANSWER);
        assert_eq!(ext.add_nodes[0].tool.as_deref(), Some("research"));
        assert!(ext
            .add_edges
            .iter()
            .any(|e| e.from == "evaluate_followup_2" && e.to == "evaluate_answer"));
        assert!(ext.add_edges.iter().any(|e| e.from == "evaluate" && e.to == "evaluate_answer"));
        assert_eq!(ext.add_edges.len(), 5);
    }

    #[test]
    fn verdict_reads_camel_case() {
        let v: Verdict =
            serde_json::from_value(json!({"satisfied": false, "followUps": ["x"]})).unwrap();
        assert_eq!(v.follow_ups, vec!["x".to_string()]);
        assert!(v.critique.is_empty());
    }
}
