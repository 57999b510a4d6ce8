//! Request and outcome types for tool-use checks.
//!
//! Outcomes are closed types: a pre-tool-use check answers with a
//! [`PermissionDecision`] plus optional payload, a post-tool-use check with
//! an optional replacement result and optional feedback.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use conductor_core::ids::{SessionId, ToolCallId};
use conductor_core::tools::ToolOutcome;

/// Verdict on a proposed tool call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionDecision {
    /// Run the tool.
    #[default]
    Allow,
    /// Do not run the tool.
    Deny,
    /// Ask the confirmation collaborator; allow if there is none.
    Ask,
}

impl std::fmt::Display for PermissionDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allow => write!(f, "allow"),
            Self::Deny => write!(f, "deny"),
            Self::Ask => write!(f, "ask"),
        }
    }
}

/// A tool call awaiting permission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreToolUseRequest {
    /// Session issuing the call.
    pub session_id: SessionId,
    /// Tool name.
    pub tool_name: String,
    /// Arguments as proposed (or as rewritten by earlier handlers).
    pub arguments: Map<String, Value>,
    /// Call ID.
    pub tool_call_id: ToolCallId,
}

/// Answer to a [`PreToolUseRequest`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreToolUseOutcome {
    /// Verdict.
    pub decision: PermissionDecision,
    /// Why (shown to the model on denial, to the user on ask).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Replacement arguments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_args: Option<Map<String, Value>>,
}

impl PreToolUseOutcome {
    /// Allow unchanged.
    #[must_use]
    pub fn allow() -> Self {
        Self::default()
    }

    /// Deny with a reason.
    #[must_use]
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            decision: PermissionDecision::Deny,
            reason: Some(reason.into()),
            updated_args: None,
        }
    }

    /// Defer to the user.
    #[must_use]
    pub fn ask(reason: impl Into<String>) -> Self {
        Self {
            decision: PermissionDecision::Ask,
            reason: Some(reason.into()),
            updated_args: None,
        }
    }

    /// Allow with rewritten arguments.
    #[must_use]
    pub fn allow_with_args(args: Map<String, Value>) -> Self {
        Self {
            decision: PermissionDecision::Allow,
            reason: None,
            updated_args: Some(args),
        }
    }

    /// Whether the call must not run.
    #[must_use]
    pub fn is_denied(&self) -> bool {
        self.decision == PermissionDecision::Deny
    }
}

/// A finished tool call offered for review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostToolUseRequest {
    /// Session issuing the call.
    pub session_id: SessionId,
    /// Tool name.
    pub tool_name: String,
    /// Arguments the tool ran with.
    pub arguments: Map<String, Value>,
    /// Call ID.
    pub tool_call_id: ToolCallId,
    /// Result (possibly rewritten by earlier handlers).
    pub result: ToolOutcome,
}

/// Answer to a [`PostToolUseRequest`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostToolUseOutcome {
    /// Replacement result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_result: Option<ToolOutcome>,
    /// Note appended to the result the model sees.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

impl PostToolUseOutcome {
    /// Leave the result alone.
    #[must_use]
    pub fn unchanged() -> Self {
        Self::default()
    }

    /// Attach feedback.
    #[must_use]
    pub fn with_feedback(feedback: impl Into<String>) -> Self {
        Self {
            updated_result: None,
            feedback: Some(feedback.into()),
        }
    }

    /// Replace the result.
    #[must_use]
    pub fn replace(result: ToolOutcome) -> Self {
        Self {
            updated_result: Some(result),
            feedback: None,
        }
    }

    /// Apply this outcome to `result`, returning what the model should see.
    #[must_use]
    pub fn apply(self, result: ToolOutcome) -> ToolOutcome {
        let mut result = self.updated_result.unwrap_or(result);
        if let Some(feedback) = self.feedback {
            if !result.content.is_empty() {
                result.content.push_str("\n\n");
            }
            result.content.push_str(&feedback);
        }
        result
    }
}

/// What the confirmation collaborator is asked to approve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationRequest {
    /// Session issuing the call.
    pub session_id: SessionId,
    /// Tool name.
    pub tool_name: String,
    /// Arguments the tool would run with.
    pub arguments: Map<String, Value>,
    /// Why a check asked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
