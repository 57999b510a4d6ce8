//! Hook execution engine.
//!
//! Runs the registered handlers for one checkpoint sequentially, in priority
//! order (highest first).
//!
//! # Pre-tool-use
//!
//! - `Deny` stops the chain immediately.
//! - `Ask` is remembered and the chain continues; a later `Deny` still wins.
//! - `updated_args` replace the arguments seen by every later handler.
//!
//! # Post-tool-use
//!
//! - `updated_result` replaces the result seen by every later handler.
//! - Feedback from all handlers is joined with newlines.
//!
//! # Fail-open
//!
//! A handler that errors or exceeds its timeout is logged and skipped.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::checks::{PostToolUseCheck, PreToolUseCheck};
use crate::errors::HookError;
use crate::handler::HookHandler;
use crate::registry::HookRegistry;
use crate::types::{
    PermissionDecision, PostToolUseOutcome, PostToolUseRequest, PreToolUseOutcome,
    PreToolUseRequest,
};

/// Default handler timeout.
pub const DEFAULT_HOOK_TIMEOUT_MS: u64 = 30_000;

/// Hook execution engine.
pub struct HookEngine {
    registry: HookRegistry,
    default_timeout_ms: u64,
}

impl HookEngine {
    /// Create an engine over `registry`.
    #[must_use]
    pub fn new(registry: HookRegistry) -> Self {
        Self {
            registry,
            default_timeout_ms: DEFAULT_HOOK_TIMEOUT_MS,
        }
    }

    /// Override the timeout used by handlers that do not declare one.
    #[must_use]
    pub fn with_default_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }

    /// The underlying registry.
    #[must_use]
    pub fn registry(&self) -> &HookRegistry {
        &self.registry
    }

    /// Run every matching pre-tool-use handler.
    #[instrument(skip_all, fields(tool_name = %request.tool_name, tool_call_id = %request.tool_call_id))]
    pub async fn run_pre_tool_use(&self, request: &PreToolUseRequest) -> PreToolUseOutcome {
        let handlers = self.registry.pre_handlers(&request.tool_name);
        if handlers.is_empty() {
            return PreToolUseOutcome::allow();
        }

        let start = Instant::now();
        let mut current = request.clone();
        let mut args_changed = false;
        let mut ask_reason: Option<Option<String>> = None;

        for handler in handlers {
            let Some(outcome) = self
                .run_guarded(handler.as_ref(), handler.handle(&current))
                .await
            else {
                continue;
            };

            if let Some(args) = outcome.updated_args {
                current.arguments = args;
                args_changed = true;
            }

            match outcome.decision {
                PermissionDecision::Deny => {
                    debug!(
                        name = %handler.name(),
                        reason = outcome.reason.as_deref().unwrap_or("(none)"),
                        "pre-tool-use hook denied call"
                    );
                    return PreToolUseOutcome {
                        decision: PermissionDecision::Deny,
                        reason: outcome.reason,
                        updated_args: None,
                    };
                }
                PermissionDecision::Ask => {
                    if ask_reason.is_none() {
                        ask_reason = Some(outcome.reason);
                    }
                }
                PermissionDecision::Allow => {}
            }
        }

        debug!(
            duration_ms = start.elapsed().as_millis(),
            ask = ask_reason.is_some(),
            args_changed,
            "pre-tool-use hooks complete"
        );

        let (decision, reason) = match ask_reason {
            Some(reason) => (PermissionDecision::Ask, reason),
            None => (PermissionDecision::Allow, None),
        };
        PreToolUseOutcome {
            decision,
            reason,
            updated_args: args_changed.then_some(current.arguments),
        }
    }

    /// Run every matching post-tool-use handler.
    #[instrument(skip_all, fields(tool_name = %request.tool_name, tool_call_id = %request.tool_call_id))]
    pub async fn run_post_tool_use(&self, request: &PostToolUseRequest) -> PostToolUseOutcome {
        let handlers = self.registry.post_handlers(&request.tool_name);
        if handlers.is_empty() {
            return PostToolUseOutcome::unchanged();
        }

        let mut current = request.clone();
        let mut result_changed = false;
        let mut feedback: Vec<String> = Vec::new();

        for handler in handlers {
            let Some(outcome) = self
                .run_guarded(handler.as_ref(), handler.handle(&current))
                .await
            else {
                continue;
            };
            if let Some(result) = outcome.updated_result {
                current.result = result;
                result_changed = true;
            }
            if let Some(note) = outcome.feedback {
                feedback.push(note);
            }
        }

        PostToolUseOutcome {
            updated_result: result_changed.then_some(current.result),
            feedback: (!feedback.is_empty()).then(|| feedback.join("\n")),
        }
    }

    /// Await one handler under its timeout. `None` means fail-open.
    async fn run_guarded<H, T, F>(&self, handler: &H, fut: F) -> Option<T>
    where
        H: HookHandler + ?Sized,
        F: Future<Output = Result<T, HookError>>,
    {
        let timeout_ms = handler.timeout_ms().unwrap_or(self.default_timeout_ms);
        match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
            Ok(Ok(outcome)) => Some(outcome),
            Ok(Err(e)) => {
                warn!(name = %handler.name(), error = %e, "hook handler error (fail-open)");
                None
            }
            Err(_) => {
                warn!(name = %handler.name(), timeout_ms, "hook handler timed out (fail-open)");
                None
            }
        }
    }
}

#[async_trait]
impl PreToolUseCheck for HookEngine {
    async fn check(&self, request: &PreToolUseRequest) -> PreToolUseOutcome {
        self.run_pre_tool_use(request).await
    }
}

#[async_trait]
impl PostToolUseCheck for HookEngine {
    async fn check(&self, request: &PostToolUseRequest) -> PostToolUseOutcome {
        self.run_post_tool_use(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{PostToolUseHandler, PreToolUseHandler};
    use conductor_core::ids::{SessionId, ToolCallId};
    use conductor_core::tools::ToolOutcome;
    use serde_json::{Map, Value, json};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behavior {
        Outcome(PreToolUseOutcome),
        Fail,
        Hang,
    }

    struct TestPre {
        name: &'static str,
        priority: i32,
        behavior: Behavior,
        calls: Arc<AtomicUsize>,
        seen_args: Arc<parking_lot::Mutex<Vec<Map<String, Value>>>>,
    }

    impl TestPre {
        fn new(name: &'static str, priority: i32, behavior: Behavior) -> Self {
            Self {
                name,
                priority,
                behavior,
                calls: Arc::new(AtomicUsize::new(0)),
                seen_args: Arc::default(),
            }
        }
    }

    impl HookHandler for TestPre {
        fn name(&self) -> &str {
            self.name
        }
        fn priority(&self) -> i32 {
            self.priority
        }
        fn timeout_ms(&self) -> Option<u64> {
            Some(50)
        }
    }

    #[async_trait]
    impl PreToolUseHandler for TestPre {
        async fn handle(&self, request: &PreToolUseRequest) -> Result<PreToolUseOutcome, HookError> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_args.lock().push(request.arguments.clone());
            match &self.behavior {
                Behavior::Outcome(o) => Ok(o.clone()),
                Behavior::Fail => Err(HookError::handler(self.name, "boom")),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(PreToolUseOutcome::deny("too late"))
                }
            }
        }
    }

    struct TestPost {
        name: &'static str,
        priority: i32,
        outcome: PostToolUseOutcome,
        seen: Arc<parking_lot::Mutex<Vec<String>>>,
    }

    impl HookHandler for TestPost {
        fn name(&self) -> &str {
            self.name
        }
        fn priority(&self) -> i32 {
            self.priority
        }
    }

    #[async_trait]
    impl PostToolUseHandler for TestPost {
        async fn handle(&self, request: &PostToolUseRequest) -> Result<PostToolUseOutcome, HookError> {
            self.seen.lock().push(request.result.content.clone());
            Ok(self.outcome.clone())
        }
    }

    fn pre_request(args: Value) -> PreToolUseRequest {
        PreToolUseRequest {
            session_id: SessionId::from("s1"),
            tool_name: "bash".into(),
            arguments: args.as_object().cloned().unwrap_or_default(),
            tool_call_id: ToolCallId::from("c1"),
        }
    }

    fn post_request(content: &str) -> PostToolUseRequest {
        PostToolUseRequest {
            session_id: SessionId::from("s1"),
            tool_name: "bash".into(),
            arguments: Map::new(),
            tool_call_id: ToolCallId::from("c1"),
            result: ToolOutcome::ok(content),
        }
    }

    fn engine_with_pre(handlers: Vec<TestPre>) -> HookEngine {
        let mut registry = HookRegistry::new();
        for h in handlers {
            registry.register_pre(Arc::new(h));
        }
        HookEngine::new(registry)
    }

    #[tokio::test]
    async fn empty_registry_allows() {
        let engine = HookEngine::new(HookRegistry::new());
        let outcome = engine.run_pre_tool_use(&pre_request(json!({}))).await;
        assert_eq!(outcome, PreToolUseOutcome::allow());
    }

    #[tokio::test]
    async fn deny_short_circuits() {
        let late = TestPre::new("late", 0, Behavior::Outcome(PreToolUseOutcome::allow()));
        let late_calls = Arc::clone(&late.calls);
        let engine = engine_with_pre(vec![
            TestPre::new("guard", 10, Behavior::Outcome(PreToolUseOutcome::deny("no shell"))),
            late,
        ]);
        let outcome = engine.run_pre_tool_use(&pre_request(json!({}))).await;
        assert!(outcome.is_denied());
        assert_eq!(outcome.reason.as_deref(), Some("no shell"));
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn deny_after_ask_wins() {
        let engine = engine_with_pre(vec![
            TestPre::new("asker", 10, Behavior::Outcome(PreToolUseOutcome::ask("confirm?"))),
            TestPre::new("denier", 0, Behavior::Outcome(PreToolUseOutcome::deny("never"))),
        ]);
        let outcome = engine.run_pre_tool_use(&pre_request(json!({}))).await;
        assert_eq!(outcome.decision, PermissionDecision::Deny);
        assert_eq!(outcome.reason.as_deref(), Some("never"));
    }

    #[tokio::test]
    async fn ask_is_reported_with_first_reason() {
        let engine = engine_with_pre(vec![
            TestPre::new("a", 10, Behavior::Outcome(PreToolUseOutcome::ask("first"))),
            TestPre::new("b", 0, Behavior::Outcome(PreToolUseOutcome::ask("second"))),
        ]);
        let outcome = engine.run_pre_tool_use(&pre_request(json!({}))).await;
        assert_eq!(outcome.decision, PermissionDecision::Ask);
        assert_eq!(outcome.reason.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn updated_args_thread_through_chain() {
        let rewritten = json!({"command": "ls -la"}).as_object().cloned().unwrap();
        let observer = TestPre::new("observer", 0, Behavior::Outcome(PreToolUseOutcome::allow()));
        let seen = Arc::clone(&observer.seen_args);
        let engine = engine_with_pre(vec![
            TestPre::new(
                "rewriter",
                10,
                Behavior::Outcome(PreToolUseOutcome::allow_with_args(rewritten.clone())),
            ),
            observer,
        ]);
        let outcome = engine
            .run_pre_tool_use(&pre_request(json!({"command": "ls"})))
            .await;
        assert_eq!(outcome.decision, PermissionDecision::Allow);
        assert_eq!(outcome.updated_args, Some(rewritten.clone()));
        assert_eq!(seen.lock()[0], rewritten);
    }

    #[tokio::test]
    async fn unchanged_args_are_not_reported() {
        let engine = engine_with_pre(vec![TestPre::new(
            "noop",
            0,
            Behavior::Outcome(PreToolUseOutcome::allow()),
        )]);
        let outcome = engine.run_pre_tool_use(&pre_request(json!({"a": 1}))).await;
        assert!(outcome.updated_args.is_none());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn failing_handler_is_fail_open() {
        let (logs, _guard) = conductor_core::logging::capture_logs();
        let engine = engine_with_pre(vec![TestPre::new("broken", 0, Behavior::Fail)]);
        let outcome = engine.run_pre_tool_use(&pre_request(json!({}))).await;
        assert_eq!(outcome.decision, PermissionDecision::Allow);
        assert!(logs.has_event(tracing::Level::WARN, "fail-open"));
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_handler_times_out_open() {
        let engine = engine_with_pre(vec![TestPre::new("slow", 0, Behavior::Hang)]);
        let outcome = engine.run_pre_tool_use(&pre_request(json!({}))).await;
        assert_eq!(outcome.decision, PermissionDecision::Allow);
    }

    #[tokio::test]
    async fn post_results_and_feedback_chain() {
        let second_seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut registry = HookRegistry::new();
        registry.register_post(Arc::new(TestPost {
            name: "redact",
            priority: 10,
            outcome: PostToolUseOutcome {
                updated_result: Some(ToolOutcome::ok("[redacted]")),
                feedback: Some("secrets removed".into()),
            },
            seen: Arc::default(),
        }));
        registry.register_post(Arc::new(TestPost {
            name: "size",
            priority: 0,
            outcome: PostToolUseOutcome::with_feedback("output is short"),
            seen: Arc::clone(&second_seen),
        }));
        let engine = HookEngine::new(registry);

        let outcome = engine.run_post_tool_use(&post_request("API_KEY=abc")).await;
        assert_eq!(outcome.updated_result, Some(ToolOutcome::ok("[redacted]")));
        assert_eq!(
            outcome.feedback.as_deref(),
            Some("secrets removed\noutput is short")
        );
        assert_eq!(second_seen.lock().as_slice(), ["[redacted]".to_string()]);
    }

    #[tokio::test]
    async fn check_traits_delegate() {
        let engine = engine_with_pre(vec![TestPre::new(
            "guard",
            0,
            Behavior::Outcome(PreToolUseOutcome::deny("x")),
        )]);
        let check: &dyn PreToolUseCheck = &engine;
        assert!(check.check(&pre_request(json!({}))).await.is_denied());
        let post: &dyn PostToolUseCheck = &engine;
        assert_eq!(
            post.check(&post_request("ok")).await,
            PostToolUseOutcome::unchanged()
        );
    }
}
