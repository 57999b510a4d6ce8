//! Hook handler traits.
//!
//! Handlers are registered with the [`HookRegistry`](crate::registry::HookRegistry)
//! and run by the [`HookEngine`](crate::engine::HookEngine) in priority
//! order, highest first. A handler that errors or times out is skipped
//! (fail-open).

use async_trait::async_trait;

use crate::errors::HookError;
use crate::types::{PostToolUseOutcome, PostToolUseRequest, PreToolUseOutcome, PreToolUseRequest};

/// Metadata shared by every handler kind.
pub trait HookHandler: Send + Sync {
    /// Unique name. Registering a second handler with the same name replaces the first.
    fn name(&self) -> &str;

    /// Execution priority. Higher runs first. Default: 0.
    fn priority(&self) -> i32 {
        0
    }

    /// Timeout in milliseconds. `None` uses the engine default.
    fn timeout_ms(&self) -> Option<u64> {
        None
    }

    /// Whether the handler cares about `tool_name`. Default: every tool.
    fn matches(&self, _tool_name: &str) -> bool {
        true
    }
}

/// Inspects a tool call before it runs.
#[async_trait]
pub trait PreToolUseHandler: HookHandler {
    /// Decide on the call.
    async fn handle(&self, request: &PreToolUseRequest) -> Result<PreToolUseOutcome, HookError>;
}

/// Inspects a tool result after the tool ran.
#[async_trait]
pub trait PostToolUseHandler: HookHandler {
    /// Review the result.
    async fn handle(&self, request: &PostToolUseRequest) -> Result<PostToolUseOutcome, HookError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::ids::{SessionId, ToolCallId};
    use serde_json::Map;

    struct DenyShell;

    impl HookHandler for DenyShell {
        fn name(&self) -> &str {
            "deny-shell"
        }
        fn matches(&self, tool_name: &str) -> bool {
            tool_name == "bash"
        }
    }

    #[async_trait]
    impl PreToolUseHandler for DenyShell {
        async fn handle(
            &self,
            _request: &PreToolUseRequest,
        ) -> Result<PreToolUseOutcome, HookError> {
            Ok(PreToolUseOutcome::deny("shell disabled"))
        }
    }

    #[test]
    fn defaults() {
        let h = DenyShell;
        assert_eq!(h.priority(), 0);
        assert!(h.timeout_ms().is_none());
        assert!(h.matches("bash"));
        assert!(!h.matches("read_file"));
    }

    #[tokio::test]
    async fn handle_via_trait_object() {
        let h: Box<dyn PreToolUseHandler> = Box::new(DenyShell);
        let request = PreToolUseRequest {
            session_id: SessionId::from("s1"),
            tool_name: "bash".into(),
            arguments: Map::new(),
            tool_call_id: ToolCallId::from("c1"),
        };
        let outcome = h.handle(&request).await.unwrap();
        assert!(outcome.is_denied());
        assert_eq!(h.name(), "deny-shell");
    }
}
