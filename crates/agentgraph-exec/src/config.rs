//! Agentgraph configuration
//!
//! All tunable parameters in one place. Loaded from TOML at startup,
//! falls back to defaults if no config file exists.

use crate::executor::{ExecutorConfig, FailurePolicy};
use crate::planner::PlannerConfig;
use agentgraph_llm::{RetryPolicy, DEFAULT_MODEL};
use agentgraph_tools::StructuredOutputConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentGraphConfig {
    /// Scheduling and failure handling.
    pub executor: ExecutorSection,
    /// Provider rate-limit retries.
    pub retry: RetrySection,
    /// Structured output tool naming.
    pub structured_output: StructuredOutputSection,
    /// Default graph synthesis.
    pub planner: PlannerSection,
    /// Language-model provider.
    pub provider: ProviderSection,
    /// Whole-run limits.
    pub run: RunSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutorSection {
    pub failure_policy: FailurePolicy,
    /// Nodes allowed in flight at once.
    pub max_concurrency: usize,
    /// Edges gate scheduling. When false they are informational only.
    pub enforce_edges: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StructuredOutputSection {
    pub function_name: String,
    pub caption_prefix: String,
    pub memory_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlannerSection {
    pub step_tool: String,
    pub answer_tool: String,
    pub structured_tool: String,
    /// Append an `evaluate` node to synthesized research graphs.
    pub reflect: bool,
    /// Node cap for synthesized graphs when the task sets none.
    pub default_max_steps: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderSection {
    pub model: String,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunSection {
    /// Cancel the run after this many seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::SkipDependents,
            max_concurrency: 4,
            enforce_edges: true,
        }
    }
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 750,
            max_delay_ms: 5000,
        }
    }
}

impl Default for StructuredOutputSection {
    fn default() -> Self {
        let defaults = StructuredOutputConfig::default();
        Self {
            function_name: defaults.function_name,
            caption_prefix: defaults.caption_prefix,
            memory_prefix: defaults.memory_prefix,
        }
    }
}

impl Default for PlannerSection {
    fn default() -> Self {
        Self {
            step_tool: "research".into(),
            answer_tool: "answer".into(),
            structured_tool: "structured_output".into(),
            reflect: false,
            default_max_steps: 8,
        }
    }
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.into(),
            max_tokens: 4096,
            base_url: None,
        }
    }
}

// ============================================================
// Loading
// ============================================================

impl AgentGraphConfig {
    /// Load config from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}, using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!("No config at {}, using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the current config as TOML (for generating a default config file).
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_millis(self.retry.base_delay_ms),
            Duration::from_millis(self.retry.max_delay_ms),
        )
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            failure_policy: self.executor.failure_policy,
            max_concurrency: self.executor.max_concurrency.max(1),
            enforce_edges: self.executor.enforce_edges,
        }
    }

    pub fn planner_config(&self) -> PlannerConfig {
        PlannerConfig {
            step_tool: self.planner.step_tool.clone(),
            answer_tool: self.planner.answer_tool.clone(),
            structured_tool: self.planner.structured_tool.clone(),
            reflect: self.planner.reflect,
            default_max_steps: self.planner.default_max_steps.max(1),
        }
    }

    pub fn structured_output_config(&self) -> StructuredOutputConfig {
        StructuredOutputConfig {
            function_name: self.structured_output.function_name.clone(),
            caption_prefix: self.structured_output.caption_prefix.clone(),
            memory_prefix: self.structured_output.memory_prefix.clone(),
            model: self.provider.model.clone(),
            max_tokens: self.provider.max_tokens,
            retry: self.retry_policy(),
        }
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run.timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = AgentGraphConfig::default();
        assert_eq!(c.executor.failure_policy, FailurePolicy::SkipDependents);
        assert!(c.executor.enforce_edges);
        assert_eq!(c.retry_policy(), RetryPolicy::default());
        assert_eq!(c.structured_output.function_name, "produce_structured_output");
        assert_eq!(c.planner.default_max_steps, 8);
        assert!(c.run_timeout().is_none());
    }

    #[test]
    fn toml_roundtrip() {
        let c = AgentGraphConfig::default();
        let parsed: AgentGraphConfig = toml::from_str(&c.to_toml()).unwrap();
        assert_eq!(parsed, c);
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let c: AgentGraphConfig = toml::from_str(
            "[executor]\nfailure_policy = \"abort_run\"\n\n[run]\ntimeout_secs = 30\n",
        )
        .unwrap();
        assert_eq!(c.executor.failure_policy, FailurePolicy::AbortRun);
        assert_eq!(c.executor.max_concurrency, 4);
        assert_eq!(c.run_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(c.retry.max_attempts, 3);
    }

    #[test]
    fn load_missing_file_falls_back() {
        let tmp = tempfile::tempdir().unwrap();
        let c = AgentGraphConfig::load(&tmp.path().join("absent.toml"));
        assert_eq!(c, AgentGraphConfig::default());
    }

    #[test]
    fn load_invalid_file_falls_back() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.toml");
        std::fs::write(&path, "executor = [[[").unwrap();
        assert_eq!(AgentGraphConfig::load(&path), AgentGraphConfig::default());
    }
}
