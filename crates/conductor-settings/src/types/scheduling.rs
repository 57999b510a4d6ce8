//! Backlog and background-task settings.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Per-session backlog settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueSettings {
    /// Maximum queued prompts per session. `None` is unbounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_backlog: Option<usize>,
}

/// Task scheduler settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskSettings {
    /// Tasks allowed in RUNNING at once.
    pub max_concurrent: usize,
    /// Maximum sub-agent nesting. 1 lets top-level sessions delegate but
    /// stops sub-agents from delegating further.
    pub max_depth: u32,
    /// Wait timeout used by the task tool when the model gives none.
    pub default_wait_timeout_ms: u64,
    /// Sub-agent profiles keyed by agent type.
    pub agents: HashMap<String, AgentProfile>,
}

impl Default for TaskSettings {
    fn default() -> Self {
        let mut agents = HashMap::new();
        let _ = agents.insert(
            "general".to_string(),
            AgentProfile {
                description: "General-purpose agent with the parent's tools".to_string(),
                allowed_tools: None,
                system_prompt: "You are a focused sub-agent. Complete the delegated task \
                                and reply with a concise report of what you found or did."
                    .to_string(),
                max_steps: None,
            },
        );
        let _ = agents.insert(
            "explore".to_string(),
            AgentProfile {
                description: "Read-only codebase exploration".to_string(),
                allowed_tools: Some(
                    ["read_file", "list_dir", "grep", "glob"]
                        .iter()
                        .map(ToString::to_string)
                        .collect(),
                ),
                system_prompt: "You are a read-only exploration agent. Investigate the \
                                question and report findings. Never modify files."
                    .to_string(),
                max_steps: Some(20),
            },
        );
        Self {
            max_concurrent: 3,
            max_depth: 1,
            default_wait_timeout_ms: 300_000,
            agents,
        }
    }
}

/// A restricted sub-agent configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentProfile {
    /// Shown to the model in the task tool description.
    pub description: String,
    /// Tools the sub-agent may use. `None` inherits the parent's tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    /// System prompt prepended to the sub-agent's session.
    pub system_prompt: String,
    /// Step cap override. `None` uses the engine default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<u32>,
}
