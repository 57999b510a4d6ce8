//! Tool call pipeline: pre-checks → confirmation → execute → post-checks.
//!
//! Quotas sit between the pre-checks and execution but change the engine's
//! control flow, so the engine enforces them itself.

use std::sync::Arc;

use conductor_core::ids::SessionId;
use conductor_core::messages::ToolCall;
use conductor_core::tools::ToolOutcome;
use conductor_hooks::{
    Confirmer, ConfirmationRequest, PermissionDecision, PostToolUseCheck, PostToolUseRequest,
    PreToolUseCheck, PreToolUseRequest,
};
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::tools::{ToolContext, ToolRegistry};

/// Result of the pre-tool-use checks.
#[derive(Clone, Debug, PartialEq)]
pub enum Verdict {
    /// Run the tool with these (possibly rewritten) arguments.
    Proceed(Map<String, Value>),
    /// Do not run the tool.
    Deny {
        /// Why, shown to the model.
        reason: String,
        /// Arguments as they stood when the call was refused.
        arguments: Map<String, Value>,
    },
}

/// Consult every pre-tool-use check in order.
///
/// The first `Deny` wins. `updated_args` from one check are what the next
/// check sees. If any check asked and nothing denied, the confirmer decides;
/// without a confirmer the call is allowed. A confirmer error denies.
#[instrument(skip_all, fields(tool_name = %call.name))]
pub async fn run_pre_checks(
    session_id: &SessionId,
    call: &ToolCall,
    checks: &[Arc<dyn PreToolUseCheck>],
    confirmer: Option<&Arc<dyn Confirmer>>,
) -> Verdict {
    let mut arguments = call.arguments.clone();
    let mut ask: Option<Option<String>> = None;

    for check in checks {
        let request = PreToolUseRequest {
            session_id: session_id.clone(),
            tool_name: call.name.clone(),
            arguments: arguments.clone(),
            tool_call_id: call.id.clone(),
        };
        let outcome = check.check(&request).await;
        if let Some(updated) = outcome.updated_args {
            arguments = updated;
        }
        match outcome.decision {
            PermissionDecision::Allow => {}
            PermissionDecision::Deny => {
                let reason = outcome
                    .reason
                    .unwrap_or_else(|| "denied by pre-tool-use check".into());
                debug!(reason, "tool call denied");
                return Verdict::Deny { reason, arguments };
            }
            PermissionDecision::Ask => {
                if ask.is_none() {
                    ask = Some(outcome.reason);
                }
            }
        }
    }

    let (Some(reason), Some(confirmer)) = (ask, confirmer) else {
        return Verdict::Proceed(arguments);
    };
    let request = ConfirmationRequest {
        session_id: session_id.clone(),
        tool_name: call.name.clone(),
        arguments: arguments.clone(),
        reason,
    };
    match confirmer.confirm(&request).await {
        Ok(true) => Verdict::Proceed(arguments),
        Ok(false) => Verdict::Deny {
            reason: "declined by user".into(),
            arguments,
        },
        Err(e) => {
            warn!(error = %e, "confirmation failed, denying");
            Verdict::Deny {
                reason: format!("confirmation failed: {e}"),
                arguments,
            }
        }
    }
}

/// Execute an admitted call and run the post-tool-use checks over its result.
///
/// Returns `None` if the context's cancellation token trips first.
#[instrument(skip_all, fields(tool_name = name, tool_call_id = %ctx.tool_call_id))]
pub async fn execute_tool(
    registry: &ToolRegistry,
    name: &str,
    arguments: Map<String, Value>,
    ctx: &ToolContext,
    post_checks: &[Arc<dyn PostToolUseCheck>],
) -> Option<ToolOutcome> {
    let outcome = tokio::select! {
        biased;
        () = ctx.cancellation.cancelled() => None,
        outcome = registry.execute(name, arguments.clone(), ctx) => Some(outcome),
    };
    let mut result = outcome?;
    debug!(success = result.success, "tool executed");

    for check in post_checks {
        let request = PostToolUseRequest {
            session_id: ctx.session_id.clone(),
            tool_name: name.to_owned(),
            arguments: arguments.clone(),
            tool_call_id: ctx.tool_call_id.clone(),
            result: result.clone(),
        };
        result = check.check(&request).await.apply(result);
    }
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conductor_core::errors::ToolError;
    use conductor_core::tools::ToolSpec;
    use conductor_hooks::{
        HookError, PostToolUseOutcome, PreToolUseOutcome, StaticConfirmer,
    };
    use serde_json::json;
    use std::time::Duration;

    struct Fixed(PreToolUseOutcome);

    #[async_trait]
    impl PreToolUseCheck for Fixed {
        async fn check(&self, _request: &PreToolUseRequest) -> PreToolUseOutcome {
            self.0.clone()
        }
    }

    struct RequirePath;

    #[async_trait]
    impl PreToolUseCheck for RequirePath {
        async fn check(&self, request: &PreToolUseRequest) -> PreToolUseOutcome {
            if request.arguments.contains_key("path") {
                PreToolUseOutcome::allow()
            } else {
                PreToolUseOutcome::deny("path required")
            }
        }
    }

    struct BrokenConfirmer;

    #[async_trait]
    impl Confirmer for BrokenConfirmer {
        async fn confirm(&self, _request: &ConfirmationRequest) -> Result<bool, HookError> {
            Err(HookError::Confirmation("terminal closed".into()))
        }
    }

    fn call() -> ToolCall {
        ToolCall::new("read_file", json!({"file": "a.rs"}))
    }

    fn sid() -> SessionId {
        SessionId::from("s1")
    }

    fn checks(list: Vec<Arc<dyn PreToolUseCheck>>) -> Vec<Arc<dyn PreToolUseCheck>> {
        list
    }

    #[tokio::test]
    async fn no_checks_proceeds_with_original_args() {
        let verdict = run_pre_checks(&sid(), &call(), &[], None).await;
        assert_eq!(verdict, Verdict::Proceed(call().arguments));
    }

    #[tokio::test]
    async fn deny_wins() {
        let list = checks(vec![
            Arc::new(Fixed(PreToolUseOutcome::allow())),
            Arc::new(Fixed(PreToolUseOutcome::deny("no reading"))),
        ]);
        let verdict = run_pre_checks(&sid(), &call(), &list, None).await;
        assert!(matches!(verdict, Verdict::Deny { ref reason, .. } if reason == "no reading"));
    }

    #[tokio::test]
    async fn updated_args_are_threaded() {
        let mut rewritten = Map::new();
        let _ = rewritten.insert("path".into(), json!("a.rs"));
        let list = checks(vec![
            Arc::new(Fixed(PreToolUseOutcome::allow_with_args(rewritten.clone()))),
            Arc::new(RequirePath),
        ]);
        let verdict = run_pre_checks(&sid(), &call(), &list, None).await;
        assert_eq!(verdict, Verdict::Proceed(rewritten));
    }

    #[tokio::test]
    async fn ask_without_confirmer_allows() {
        let list = checks(vec![Arc::new(Fixed(PreToolUseOutcome::ask("sure?")))]);
        let verdict = run_pre_checks(&sid(), &call(), &list, None).await;
        assert!(matches!(verdict, Verdict::Proceed(_)));
    }

    #[tokio::test]
    async fn ask_goes_to_confirmer() {
        let list = checks(vec![Arc::new(Fixed(PreToolUseOutcome::ask("sure?")))]);
        let yes: Arc<dyn Confirmer> = Arc::new(StaticConfirmer(true));
        let no: Arc<dyn Confirmer> = Arc::new(StaticConfirmer(false));
        assert!(matches!(
            run_pre_checks(&sid(), &call(), &list, Some(&yes)).await,
            Verdict::Proceed(_)
        ));
        assert!(matches!(
            run_pre_checks(&sid(), &call(), &list, Some(&no)).await,
            Verdict::Deny { ref reason, .. } if reason == "declined by user"
        ));
    }

    #[tokio::test]
    async fn later_deny_beats_earlier_ask() {
        let list = checks(vec![
            Arc::new(Fixed(PreToolUseOutcome::ask("sure?"))),
            Arc::new(Fixed(PreToolUseOutcome::deny("blocked"))),
        ]);
        let yes: Arc<dyn Confirmer> = Arc::new(StaticConfirmer(true));
        let verdict = run_pre_checks(&sid(), &call(), &list, Some(&yes)).await;
        assert!(matches!(verdict, Verdict::Deny { ref reason, .. } if reason == "blocked"));
    }

    #[tokio::test]
    async fn confirmer_error_denies() {
        let list = checks(vec![Arc::new(Fixed(PreToolUseOutcome::ask("sure?")))]);
        let broken: Arc<dyn Confirmer> = Arc::new(BrokenConfirmer);
        let verdict = run_pre_checks(&sid(), &call(), &list, Some(&broken)).await;
        assert!(matches!(verdict, Verdict::Deny { ref reason, .. } if reason.contains("terminal closed")));
    }

    // ── execution ──

    struct Echo;

    #[async_trait]
    impl crate::tools::Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn definition(&self) -> ToolSpec {
            ToolSpec::new("echo", "Echo", json!({"type": "object"}))
        }
        async fn execute(
            &self,
            args: Map<String, Value>,
            _ctx: &ToolContext,
        ) -> Result<ToolOutcome, ToolError> {
            Ok(ToolOutcome::ok(Value::Object(args).to_string()))
        }
    }

    struct Hang;

    #[async_trait]
    impl crate::tools::Tool for Hang {
        fn name(&self) -> &str {
            "hang"
        }
        fn definition(&self) -> ToolSpec {
            ToolSpec::new("hang", "Never returns", json!({"type": "object"}))
        }
        async fn execute(
            &self,
            _args: Map<String, Value>,
            _ctx: &ToolContext,
        ) -> Result<ToolOutcome, ToolError> {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
            Ok(ToolOutcome::ok("late"))
        }
    }

    struct Annotate(&'static str);

    #[async_trait]
    impl PostToolUseCheck for Annotate {
        async fn check(&self, _request: &PostToolUseRequest) -> PostToolUseOutcome {
            PostToolUseOutcome::with_feedback(self.0)
        }
    }

    fn registry() -> ToolRegistry {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(Echo));
        reg.register(Arc::new(Hang));
        reg
    }

    #[tokio::test]
    async fn post_checks_apply_in_order() {
        let post: Vec<Arc<dyn PostToolUseCheck>> =
            vec![Arc::new(Annotate("first")), Arc::new(Annotate("second"))];
        let ctx = ToolContext::detached(sid());
        let out = execute_tool(&registry(), "echo", Map::new(), &ctx, &post)
            .await
            .unwrap();
        assert_eq!(out.content, "{}\n\nfirst\n\nsecond");
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_execution() {
        let ctx = ToolContext::detached(sid());
        let token = ctx.cancellation.clone();
        let _ = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });
        let out = execute_tool(&registry(), "hang", Map::new(), &ctx, &[]).await;
        assert!(out.is_none());
    }
}
