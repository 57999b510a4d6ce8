//! Conversation turns and tool-call records.
//!
//! A session's history is an ordered list of [`Turn`]s. Assistant turns may
//! carry [`ToolCall`]s; each call is answered by exactly one tool-result turn
//! whose `tool_call_id` points back at it. Every call the engine sees, executed
//! or not, also leaves a [`ToolCallRecord`] in the session's audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::ToolCallId;

// ─────────────────────────────────────────────────────────────────────────────
// Turns
// ─────────────────────────────────────────────────────────────────────────────

/// Author of a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human (or a queued prompt on their behalf).
    User,
    /// The model.
    Assistant,
    /// A tool result answering an assistant tool call.
    Tool,
    /// Engine-injected instructions and summaries.
    System,
}

/// A tool invocation requested by the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call ID, echoed back by the result turn.
    pub id: ToolCallId,
    /// Tool name.
    pub name: String,
    /// Tool arguments (JSON object).
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    /// Build a call with a fresh ID. Non-object arguments become an empty map.
    #[must_use]
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: ToolCallId::new(),
            name: name.into(),
            arguments: match arguments {
                Value::Object(map) => map,
                _ => Map::new(),
            },
        }
    }
}

/// One entry in a session's history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    /// Author.
    pub role: Role,
    /// Text content.
    pub content: String,
    /// Tool calls (assistant turns only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Call this turn answers (tool turns only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<ToolCallId>,
    /// Whether a tool turn reports a failure.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
    /// Set on the single turn that replaces compacted history.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub summary: bool,
    /// When the turn was appended.
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    fn base(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            is_error: false,
            summary: false,
            timestamp: Utc::now(),
        }
    }

    /// A user prompt.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::base(Role::User, content)
    }

    /// A plain assistant answer.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::base(Role::Assistant, content)
    }

    /// An assistant turn that requests tool calls.
    #[must_use]
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::base(Role::Assistant, content)
        }
    }

    /// The result of one tool call.
    #[must_use]
    pub fn tool_result(call_id: ToolCallId, content: impl Into<String>, is_error: bool) -> Self {
        Self {
            tool_call_id: Some(call_id),
            is_error,
            ..Self::base(Role::Tool, content)
        }
    }

    /// An engine-injected instruction or notice.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::base(Role::System, content)
    }

    /// The summary standing in for compacted history.
    #[must_use]
    pub fn summary(content: impl Into<String>) -> Self {
        Self {
            summary: true,
            ..Self::base(Role::System, content)
        }
    }

    /// Whether this turn answers a tool call.
    #[must_use]
    pub fn is_tool_result(&self) -> bool {
        self.role == Role::Tool
    }

    /// Whether this is an assistant turn with at least one tool call.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Audit trail
// ─────────────────────────────────────────────────────────────────────────────

/// What happened to a tool call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    /// Executed and reported success.
    Succeeded,
    /// Executed and reported failure (including unknown tools).
    Failed,
    /// Vetoed by a pre-tool-use check or the user.
    Denied,
    /// Not executed because its quota was exhausted.
    QuotaExceeded,
    /// Not executed because the run was cancelled.
    Cancelled,
}

impl CallOutcome {
    /// Whether the tool actually ran.
    #[must_use]
    pub fn executed(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Immutable audit entry for one tool call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
    /// Tool name.
    pub tool_name: String,
    /// Arguments as finally presented to the tool.
    pub arguments: Map<String, Value>,
    /// Step (1-based) within the run that issued the call.
    pub step: u32,
    /// Outcome.
    pub outcome: CallOutcome,
    /// When the call was resolved.
    pub timestamp: DateTime<Utc>,
}

impl ToolCallRecord {
    /// Record an outcome for `call` at `step`.
    #[must_use]
    pub fn new(
        tool_name: impl Into<String>,
        arguments: Map<String, Value>,
        step: u32,
        outcome: CallOutcome,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
            step,
            outcome,
            timestamp: Utc::now(),
        }
    }
}
