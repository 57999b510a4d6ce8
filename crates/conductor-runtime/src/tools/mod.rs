//! Tool trait, execution context and registry.
//!
//! Tools are trait objects keyed by name in a [`ToolRegistry`] populated at
//! startup. The one tool this crate ships itself is [`TaskTool`], which
//! exposes the task scheduler to the model.

pub mod registry;
pub mod task_tool;

use async_trait::async_trait;
use conductor_core::errors::ToolError;
use conductor_core::ids::{SessionId, ToolCallId};
use conductor_core::tools::{ToolOutcome, ToolSpec};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

pub use registry::ToolRegistry;
pub use task_tool::TaskTool;

// ─────────────────────────────────────────────────────────────────────────────
// Tool context
// ─────────────────────────────────────────────────────────────────────────────

/// Execution context passed to every tool invocation.
#[derive(Clone, Debug)]
pub struct ToolContext {
    /// Session whose engine issued the call.
    pub session_id: SessionId,
    /// ID of this tool call.
    pub tool_call_id: ToolCallId,
    /// Sub-agent nesting depth of the calling engine (0 = top level).
    pub depth: u32,
    /// Tripped when the calling run is cancelled.
    pub cancellation: CancellationToken,
}

impl ToolContext {
    /// Context for a top-level call outside any engine run.
    #[must_use]
    pub fn detached(session_id: SessionId) -> Self {
        Self {
            session_id,
            tool_call_id: ToolCallId::new(),
            depth: 0,
            cancellation: CancellationToken::new(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool trait
// ─────────────────────────────────────────────────────────────────────────────

/// A capability the model can invoke by name.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the model uses to call the tool.
    fn name(&self) -> &str;

    /// Schema sent to the model.
    fn definition(&self) -> ToolSpec;

    /// Run the tool.
    async fn execute(
        &self,
        args: Map<String, Value>,
        ctx: &ToolContext,
    ) -> Result<ToolOutcome, ToolError>;
}
