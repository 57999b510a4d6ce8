//! Check contracts consumed by the session engine.
//!
//! The engine consults any number of [`PreToolUseCheck`]s and
//! [`PostToolUseCheck`]s around every tool call. External permission
//! systems implement these directly; [`HookEngine`](crate::engine::HookEngine)
//! implements both on top of the handler registry.

use async_trait::async_trait;

use crate::errors::HookError;
use crate::types::{
    ConfirmationRequest, PostToolUseOutcome, PostToolUseRequest, PreToolUseOutcome,
    PreToolUseRequest,
};

/// Approves, denies, or rewrites a tool call before it runs.
#[async_trait]
pub trait PreToolUseCheck: Send + Sync {
    /// Evaluate the call. Implementations absorb their own failures.
    async fn check(&self, request: &PreToolUseRequest) -> PreToolUseOutcome;
}

/// Reviews or rewrites a tool result after the tool ran.
#[async_trait]
pub trait PostToolUseCheck: Send + Sync {
    /// Evaluate the result. Implementations absorb their own failures.
    async fn check(&self, request: &PostToolUseRequest) -> PostToolUseOutcome;
}

/// Resolves `Ask` decisions, typically by prompting the user.
#[async_trait]
pub trait Confirmer: Send + Sync {
    /// `Ok(true)` runs the tool, `Ok(false)` denies it.
    async fn confirm(&self, request: &ConfirmationRequest) -> Result<bool, HookError>;
}

/// Confirmer that answers every request the same way.
#[derive(Debug, Clone, Copy)]
pub struct StaticConfirmer(pub bool);

#[async_trait]
impl Confirmer for StaticConfirmer {
    async fn confirm(&self, _request: &ConfirmationRequest) -> Result<bool, HookError> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::ids::SessionId;
    use serde_json::Map;

    fn request() -> ConfirmationRequest {
        ConfirmationRequest {
            session_id: SessionId::from("s1"),
            tool_name: "bash".into(),
            arguments: Map::new(),
            reason: Some("destructive command".into()),
        }
    }

    #[tokio::test]
    async fn static_confirmer_answers() {
        assert!(StaticConfirmer(true).confirm(&request()).await.unwrap());
        assert!(!StaticConfirmer(false).confirm(&request()).await.unwrap());
    }
}
