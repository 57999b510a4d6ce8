//! Model client contract.
//!
//! The transport (HTTP, streaming, retries, auth) lives outside this crate.
//! The engine only needs one request/response exchange per step.

use async_trait::async_trait;
use conductor_core::errors::ModelError;
use conductor_core::messages::{ToolCall, Turn};
use conductor_core::tools::ToolSpec;
use serde::{Deserialize, Serialize};

/// One model reply.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelResponse {
    /// Visible text.
    pub content: String,
    /// Requested tool calls, in the order they should run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Reasoning text, if the model exposes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
}

impl ModelResponse {
    /// A plain text answer.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    /// A reply that requests tools.
    #[must_use]
    pub fn with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: content.into(),
            tool_calls,
            thinking: None,
        }
    }

    /// Whether the model asked for tools.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Sends history plus tool specs to a model.
///
/// An empty `tools` slice means the model must answer in text.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Perform one exchange.
    async fn chat(&self, turns: &[Turn], tools: &[ToolSpec]) -> Result<ModelResponse, ModelError>;
}
