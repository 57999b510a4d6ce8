//! Step-loop settings: step cap, tool quotas, hook timeouts.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Default instruction injected when a tool quota is exhausted.
pub const DEFAULT_FORCE_FINAL_ANSWER_PROMPT: &str = "Tool call limit reached. Do not call any more tools. \
     Answer the user now using only the information you already have.";

/// Settings for the session execution engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    /// Maximum model calls per run.
    pub max_steps: u32,
    /// Quota applied to tools without an explicit entry in `tool_quotas`.
    pub default_tool_quota: ToolQuota,
    /// Per-tool quota overrides, keyed by tool name.
    pub tool_quotas: HashMap<String, ToolQuota>,
    /// Instruction injected when a quota is exhausted.
    pub force_final_answer_prompt: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_steps: 50,
            default_tool_quota: ToolQuota::default(),
            tool_quotas: HashMap::new(),
            force_final_answer_prompt: DEFAULT_FORCE_FINAL_ANSWER_PROMPT.to_string(),
        }
    }
}

impl EngineSettings {
    /// Effective quota for `tool_name`.
    #[must_use]
    pub fn quota_for(&self, tool_name: &str) -> ToolQuota {
        self.tool_quotas
            .get(tool_name)
            .copied()
            .unwrap_or(self.default_tool_quota)
    }
}

/// Hard caps on how often one tool may execute. `None` means unlimited.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolQuota {
    /// Executions allowed within one run.
    pub per_turn: Option<u32>,
    /// Executions allowed over the session's lifetime.
    pub per_session: Option<u32>,
}

impl Default for ToolQuota {
    fn default() -> Self {
        Self {
            per_turn: Some(100),
            per_session: None,
        }
    }
}

impl ToolQuota {
    /// No caps at all.
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            per_turn: None,
            per_session: None,
        }
    }
}

/// Hook plumbing settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HookSettings {
    /// Timeout applied to handlers that do not declare their own.
    pub default_timeout_ms: u64,
}

impl Default for HookSettings {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
        }
    }
}
