//! `SessionEngine`: the step loop for one session.
//!
//! One run appends the user turn, compacts if needed, then alternates model
//! calls and tool execution until the model answers without tools or a limit
//! is hit. The session is saved after every step and on every error path, so
//! persisted history always matches what actually ran.

use std::sync::Arc;

use conductor_core::events::{BaseEvent, ConductorEvent};
use conductor_core::ids::SessionId;
use conductor_core::messages::{CallOutcome, ToolCall, ToolCallRecord, Turn};
use conductor_core::tools::ToolSpec;
use conductor_hooks::{Confirmer, HookEngine, PostToolUseCheck, PreToolUseCheck};
use conductor_settings::EngineSettings;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::agent::event_emitter::EventEmitter;
use crate::agent::tool_executor::{self, Verdict};
use crate::context::Compactor;
use crate::errors::{RuntimeError, StopReason};
use crate::model::ModelClient;
use crate::persistence::SessionStore;
use crate::session::Session;
use crate::tools::{ToolContext, ToolRegistry};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration and collaborators
// ─────────────────────────────────────────────────────────────────────────────

/// Per-engine configuration.
#[derive(Clone, Debug, Default)]
pub struct EngineConfig {
    /// Step cap, quotas and the forcing instruction.
    pub settings: EngineSettings,
    /// Sent ahead of the history on every model call; never stored in it.
    pub system_prompt: Option<String>,
    /// Sub-agent nesting depth (0 = top level).
    pub depth: u32,
}

impl EngineConfig {
    /// Config from engine settings.
    #[must_use]
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            system_prompt: None,
            depth: 0,
        }
    }

    /// Set the system prompt.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Set the nesting depth.
    #[must_use]
    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }
}

/// Everything an engine talks to. Cheap to clone.
#[derive(Clone)]
pub struct EngineDeps {
    /// Model client.
    pub model: Arc<dyn ModelClient>,
    /// Tools the model may call.
    pub tools: Arc<ToolRegistry>,
    /// Session persistence.
    pub store: Arc<dyn SessionStore>,
    /// Consulted in order before every tool call.
    pub pre_checks: Vec<Arc<dyn PreToolUseCheck>>,
    /// Consulted in order after every executed tool call.
    pub post_checks: Vec<Arc<dyn PostToolUseCheck>>,
    /// Resolves `Ask` decisions. Without one, `Ask` allows.
    pub confirmer: Option<Arc<dyn Confirmer>>,
    /// History compaction.
    pub compactor: Option<Arc<dyn Compactor>>,
    /// Event fan-out.
    pub emitter: Arc<EventEmitter>,
}

impl EngineDeps {
    /// Minimal dependencies: no checks, no compaction.
    pub fn new(
        model: Arc<dyn ModelClient>,
        tools: Arc<ToolRegistry>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            model,
            tools,
            store,
            pre_checks: Vec::new(),
            post_checks: Vec::new(),
            confirmer: None,
            compactor: None,
            emitter: Arc::new(EventEmitter::new()),
        }
    }

    /// Add a pre-tool-use check.
    #[must_use]
    pub fn with_pre_check(mut self, check: Arc<dyn PreToolUseCheck>) -> Self {
        self.pre_checks.push(check);
        self
    }

    /// Add a post-tool-use check.
    #[must_use]
    pub fn with_post_check(mut self, check: Arc<dyn PostToolUseCheck>) -> Self {
        self.post_checks.push(check);
        self
    }

    /// Plug a hook engine in as both a pre- and a post-tool-use check.
    #[must_use]
    pub fn with_hooks(self, hooks: Arc<HookEngine>) -> Self {
        self.with_pre_check(hooks.clone()).with_post_check(hooks)
    }

    /// Set the confirmer.
    #[must_use]
    pub fn with_confirmer(mut self, confirmer: Arc<dyn Confirmer>) -> Self {
        self.confirmer = Some(confirmer);
        self
    }

    /// Set the compactor.
    #[must_use]
    pub fn with_compactor(mut self, compactor: Arc<dyn Compactor>) -> Self {
        self.compactor = Some(compactor);
        self
    }

    /// Share an emitter.
    #[must_use]
    pub fn with_emitter(mut self, emitter: Arc<EventEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    /// Same collaborators, different tool set.
    #[must_use]
    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = tools;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Run result
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of a successful run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    /// Final answer.
    pub text: String,
    /// Model calls made.
    pub steps: u32,
    /// Tool calls that actually executed.
    pub tool_calls: u32,
    /// Why the run stopped.
    pub stop_reason: StopReason,
    /// Whether an exhausted tool quota forced the answer.
    pub forced_final_answer: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

/// Drives one session. Holds the session exclusively for its lifetime.
pub struct SessionEngine {
    session: Session,
    config: EngineConfig,
    deps: EngineDeps,
    cancel: CancellationToken,
}

/// Mutable state of one run.
#[derive(Default)]
struct RunState {
    steps: u32,
    executed: u32,
    forced: bool,
    last_text: Option<String>,
}

enum StepOutcome {
    Continue,
    Done(RunSummary),
}

impl SessionEngine {
    /// Engine over an already loaded session.
    pub fn new(session: Session, config: EngineConfig, deps: EngineDeps) -> Self {
        Self {
            session,
            config,
            deps,
            cancel: CancellationToken::new(),
        }
    }

    /// Load `id` from the store (or start it empty) and build an engine.
    #[instrument(skip_all, fields(session_id = %id))]
    pub async fn load(
        id: SessionId,
        config: EngineConfig,
        deps: EngineDeps,
    ) -> Result<Self, RuntimeError> {
        let session = match deps.store.load(&id).await? {
            Some(snapshot) => Session::from_snapshot(id, snapshot),
            None => Session::new(id),
        };
        debug!(turns = session.turns().len(), "session loaded");
        Ok(Self::new(session, config, deps))
    }

    /// Replace the cancellation token (e.g. with one the caller can trip).
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that aborts the current and every later run.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Abort the run at its next checkpoint.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Session state.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Session ID.
    pub fn session_id(&self) -> &SessionId {
        self.session.id()
    }

    /// Configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Drop history, records and quota counters, and persist the empty session.
    pub async fn clear_history(&mut self) -> Result<(), RuntimeError> {
        self.session.clear();
        self.persist().await
    }

    /// Run one prompt to a final answer.
    ///
    /// Fails with [`RuntimeError::MaxStepsReached`] when the step budget runs
    /// out, [`RuntimeError::Cancelled`] when the token trips, and
    /// [`RuntimeError::AgentExecution`] on model or persistence failure.
    #[instrument(skip_all, fields(session_id = %self.session.id(), depth = self.config.depth))]
    pub async fn run(&mut self, prompt: &str) -> Result<RunSummary, RuntimeError> {
        self.emit(ConductorEvent::RunStart {
            base: self.base(),
        });
        info!("run started");

        let result = self.run_inner(prompt).await;
        match &result {
            Ok(summary) => {
                info!(steps = summary.steps, stop_reason = %summary.stop_reason, "run completed");
                self.emit(ConductorEvent::RunEnd {
                    base: self.base(),
                    steps: summary.steps,
                    stop_reason: summary.stop_reason.to_string(),
                });
            }
            Err(e) => {
                warn!(error = %e, "run failed");
                self.emit(ConductorEvent::RunFailed {
                    base: self.base(),
                    error: e.to_string(),
                    category: e.category().to_owned(),
                });
            }
        }
        result
    }

    async fn run_inner(&mut self, prompt: &str) -> Result<RunSummary, RuntimeError> {
        self.session.quotas_mut().reset_turn();
        self.session.push_turn(Turn::user(prompt));
        self.maybe_compact().await;

        let max_steps = self.config.settings.max_steps;
        let mut state = RunState::default();
        loop {
            if self.cancel.is_cancelled() {
                return self.abort_cancelled().await;
            }
            // The forced final-answer call is a step like any other: a quota
            // tripped on the last step ends the run here.
            if state.steps >= max_steps {
                self.session.push_turn(Turn::assistant(format!(
                    "Stopped: reached the limit of {max_steps} steps before finishing."
                )));
                self.persist().await?;
                return Err(RuntimeError::MaxStepsReached {
                    max_steps,
                    partial: state.last_text,
                });
            }
            match self.step(&mut state).await? {
                StepOutcome::Continue => {}
                StepOutcome::Done(summary) => return Ok(summary),
            }
        }
    }

    async fn step(&mut self, state: &mut RunState) -> Result<StepOutcome, RuntimeError> {
        state.steps += 1;
        self.emit(ConductorEvent::StepStart {
            base: self.base(),
            step: state.steps,
        });

        let specs: Vec<ToolSpec> = if state.forced {
            Vec::new()
        } else {
            self.deps.tools.definitions()
        };
        let request = self.request_turns();
        let response = tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            response = self.deps.model.chat(&request, &specs) => Some(response),
        };
        let Some(response) = response else {
            return self.abort_cancelled().await;
        };
        let response = match response {
            Ok(r) => r,
            Err(e) => {
                self.session
                    .push_turn(Turn::system(format!("Run failed: {e}")));
                self.persist_best_effort().await;
                return Err(RuntimeError::from_model(e));
            }
        };

        if !response.has_tool_calls() || state.forced {
            if response.has_tool_calls() {
                debug!("model requested tools after the forcing instruction; accepting its text");
            }
            self.session.push_turn(Turn::assistant(&response.content));
            self.persist().await?;
            return Ok(StepOutcome::Done(RunSummary {
                text: response.content,
                steps: state.steps,
                tool_calls: state.executed,
                stop_reason: if state.forced {
                    StopReason::QuotaExhausted
                } else {
                    StopReason::FinalAnswer
                },
                forced_final_answer: state.forced,
            }));
        }

        if !response.content.is_empty() {
            state.last_text = Some(response.content.clone());
        }
        self.session.push_turn(Turn::assistant_with_tools(
            &response.content,
            response.tool_calls.clone(),
        ));

        let mut calls = response.tool_calls.into_iter();
        while let Some(call) = calls.next() {
            if self.cancel.is_cancelled() {
                self.skip_calls(std::iter::once(call).chain(calls), state.steps, CallOutcome::Cancelled);
                return self.abort_cancelled().await;
            }
            if state.forced {
                self.skip_calls(std::iter::once(call).chain(calls), state.steps, CallOutcome::QuotaExceeded);
                break;
            }
            match self.handle_call(call, state).await {
                CallOutcome::Cancelled => {
                    self.skip_calls(calls, state.steps, CallOutcome::Cancelled);
                    return self.abort_cancelled().await;
                }
                CallOutcome::QuotaExceeded => state.forced = true,
                _ => {}
            }
        }

        if state.forced {
            self.session
                .push_turn(Turn::system(&self.config.settings.force_final_answer_prompt));
        }
        self.persist().await?;
        Ok(StepOutcome::Continue)
    }

    /// Resolve one tool call: checks, quota, execution, result turn, record.
    async fn handle_call(&mut self, call: ToolCall, state: &mut RunState) -> CallOutcome {
        let session_id = self.session.id().clone();
        let verdict = tool_executor::run_pre_checks(
            &session_id,
            &call,
            &self.deps.pre_checks,
            self.deps.confirmer.as_ref(),
        )
        .await;

        let arguments = match verdict {
            Verdict::Deny { reason, arguments } => {
                let text = format!("Tool call denied: {reason}");
                return self.finish_call(&call, arguments, state.steps, CallOutcome::Denied, text, false);
            }
            Verdict::Proceed(arguments) => arguments,
        };

        if let Some(exceeded) = self.session.quotas().check_with(&call.name, &self.config.settings) {
            warn!(tool_name = %call.name, limit = exceeded.limit, scope = %exceeded.scope, "tool quota exceeded");
            self.emit(ConductorEvent::QuotaExceeded {
                base: self.base(),
                tool_name: call.name.clone(),
                limit: exceeded.limit,
            });
            let text = format!(
                "Not executed: {} reached its limit of {} calls per {}.",
                call.name, exceeded.limit, exceeded.scope
            );
            return self.finish_call(&call, arguments, state.steps, CallOutcome::QuotaExceeded, text, true);
        }

        self.emit(ConductorEvent::ToolStart {
            base: self.base(),
            tool_call_id: call.id.to_string(),
            tool_name: call.name.clone(),
        });
        let ctx = ToolContext {
            session_id,
            tool_call_id: call.id.clone(),
            depth: self.config.depth,
            cancellation: self.cancel.clone(),
        };
        let result = tool_executor::execute_tool(
            &self.deps.tools,
            &call.name,
            arguments.clone(),
            &ctx,
            &self.deps.post_checks,
        )
        .await;

        let Some(result) = result else {
            return self.finish_call(
                &call,
                arguments,
                state.steps,
                CallOutcome::Cancelled,
                "Cancelled before the tool finished.".into(),
                true,
            );
        };
        self.session.quotas_mut().record(&call.name);
        state.executed += 1;
        let outcome = if result.success {
            CallOutcome::Succeeded
        } else {
            CallOutcome::Failed
        };
        self.finish_call(&call, arguments, state.steps, outcome, result.content, !result.success)
    }

    /// Append the result turn and the audit record for a resolved call.
    fn finish_call(
        &mut self,
        call: &ToolCall,
        arguments: Map<String, Value>,
        step: u32,
        outcome: CallOutcome,
        content: String,
        is_error: bool,
    ) -> CallOutcome {
        self.session
            .push_turn(Turn::tool_result(call.id.clone(), content, is_error));
        self.session
            .push_record(ToolCallRecord::new(&call.name, arguments, step, outcome));
        self.emit(ConductorEvent::ToolEnd {
            base: self.base(),
            tool_call_id: call.id.to_string(),
            tool_name: call.name.clone(),
            outcome,
        });
        outcome
    }

    /// Answer calls that will not run, so every call in history has a result.
    fn skip_calls(&mut self, calls: impl IntoIterator<Item = ToolCall>, step: u32, outcome: CallOutcome) {
        let text = match outcome {
            CallOutcome::Cancelled => "Not executed: the run was cancelled.",
            _ => "Not executed: tool call limit reached.",
        };
        for call in calls {
            let arguments = call.arguments.clone();
            let _ = self.finish_call(&call, arguments, step, outcome, text.to_owned(), true);
        }
    }

    async fn abort_cancelled<T>(&mut self) -> Result<T, RuntimeError> {
        self.session.push_turn(Turn::system("Run cancelled."));
        self.persist_best_effort().await;
        Err(RuntimeError::Cancelled)
    }

    async fn maybe_compact(&mut self) {
        let Some(compactor) = self.deps.compactor.clone() else {
            return;
        };
        if !compactor.should_compact(self.session.turns()) {
            return;
        }
        let result = compactor.compact(self.session.take_turns()).await;
        if result.changed() {
            self.emit(ConductorEvent::CompactionComplete {
                base: self.base(),
                tokens_before: result.tokens_before,
                tokens_after: result.tokens_after,
                truncated: result.truncated,
            });
        }
        self.session.replace_turns(result.turns);
    }

    fn request_turns(&self) -> Vec<Turn> {
        let history = self.session.turns();
        let mut turns = Vec::with_capacity(history.len() + 1);
        if let Some(prompt) = &self.config.system_prompt {
            turns.push(Turn::system(prompt));
        }
        turns.extend_from_slice(history);
        turns
    }

    async fn persist(&self) -> Result<(), RuntimeError> {
        self.deps
            .store
            .save(self.session.id(), &self.session.snapshot())
            .await
            .map_err(RuntimeError::from_save)
    }

    async fn persist_best_effort(&self) {
        if let Err(e) = self.persist().await {
            warn!(error = %e, "failed to persist session on error path");
        }
    }

    fn base(&self) -> BaseEvent {
        BaseEvent::now(self.session.id().as_str())
    }

    fn emit(&self, event: ConductorEvent) {
        let _ = self.deps.emitter.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelResponse;
    use crate::persistence::MemorySessionStore;
    use crate::test_support::{CountingTool, ScriptedModel, read_call};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use conductor_core::errors::{ModelError, PersistenceError};
    use conductor_core::messages::Role;
    use conductor_hooks::{
        PostToolUseOutcome, PostToolUseRequest, PreToolUseOutcome, PreToolUseRequest,
        StaticConfirmer,
    };
    use conductor_settings::ToolQuota;
    use std::time::Duration;

    struct Setup {
        model: Arc<ScriptedModel>,
        tool: Arc<CountingTool>,
        store: Arc<MemorySessionStore>,
        deps: EngineDeps,
    }

    fn setup(script: Vec<Result<ModelResponse, ModelError>>) -> Setup {
        let model = Arc::new(ScriptedModel::new(script));
        let tool = Arc::new(CountingTool::new("read_file"));
        let mut tools = ToolRegistry::new();
        tools.register(tool.clone());
        let store = Arc::new(MemorySessionStore::new());
        let deps = EngineDeps::new(model.clone(), Arc::new(tools), store.clone());
        Setup {
            model,
            tool,
            store,
            deps,
        }
    }

    fn engine(deps: EngineDeps) -> SessionEngine {
        SessionEngine::new(
            Session::new("s1".into()),
            EngineConfig::new(EngineSettings::default()),
            deps,
        )
    }

    fn stored(store: &MemorySessionStore) -> Vec<Turn> {
        store.snapshot(&"s1".into()).unwrap().turns
    }

    #[tokio::test]
    async fn text_answer_is_final() {
        let s = setup(vec![Ok(ModelResponse::text("hello back"))]);
        let mut e = engine(s.deps);
        let summary = e.run("hello").await.unwrap();
        assert_eq!(summary.text, "hello back");
        assert_eq!(summary.steps, 1);
        assert_eq!(summary.stop_reason, StopReason::FinalAnswer);
        assert_eq!(e.session().turns().len(), 2);
        assert_eq!(stored(&s.store).len(), 2);
    }

    #[tokio::test]
    async fn tool_round_trip() {
        let s = setup(vec![
            Ok(ModelResponse::with_tools("", vec![read_call("a.rs")])),
            Ok(ModelResponse::text("read it")),
        ]);
        let mut e = engine(s.deps);
        let summary = e.run("read a.rs").await.unwrap();
        assert_eq!(summary.steps, 2);
        assert_eq!(summary.tool_calls, 1);
        assert_eq!(s.tool.calls(), 1);

        let roles: Vec<Role> = e.session().turns().iter().map(|t| t.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
        assert_eq!(e.session().records().len(), 1);
        assert_eq!(e.session().records()[0].outcome, CallOutcome::Succeeded);
        assert_eq!(e.session().records()[0].step, 1);
        // Second model call saw the tool result.
        assert_eq!(s.model.requests()[1].turns, 3);
    }

    #[tokio::test]
    async fn system_prompt_is_sent_but_not_stored() {
        let s = setup(vec![Ok(ModelResponse::text("ok"))]);
        let mut e = SessionEngine::new(
            Session::new("s1".into()),
            EngineConfig::new(EngineSettings::default()).with_system_prompt("be brief"),
            s.deps,
        );
        let _ = e.run("hi").await.unwrap();
        assert_eq!(s.model.requests()[0].turns, 2);
        assert_eq!(e.session().turns().len(), 2);
    }

    #[tokio::test]
    async fn unknown_tool_becomes_failure_and_loop_continues() {
        let s = setup(vec![
            Ok(ModelResponse::with_tools(
                "",
                vec![ToolCall::new("nope", serde_json::json!({}))],
            )),
            Ok(ModelResponse::text("sorry")),
        ]);
        let mut e = engine(s.deps);
        let summary = e.run("go").await.unwrap();
        assert_eq!(summary.text, "sorry");
        let result = &e.session().turns()[2];
        assert!(result.is_error);
        assert!(result.content.contains("Tool not found"));
        assert_eq!(e.session().records()[0].outcome, CallOutcome::Failed);
    }

    #[tokio::test]
    async fn max_steps_reached() {
        let script = (0..5)
            .map(|_| Ok(ModelResponse::with_tools("working", vec![read_call("a")])))
            .collect();
        let s = setup(script);
        let mut settings = EngineSettings::default();
        settings.max_steps = 3;
        let mut e = SessionEngine::new(Session::new("s1".into()), EngineConfig::new(settings), s.deps);

        let err = e.run("loop").await.unwrap_err();
        assert_matches!(
            err,
            RuntimeError::MaxStepsReached { max_steps: 3, partial: Some(ref p) } if p == "working"
        );
        assert_eq!(s.model.requests().len(), 3);
        assert_eq!(s.tool.calls(), 3);
        let turns = stored(&s.store);
        assert_eq!(turns.last().unwrap().role, Role::Assistant);
        assert!(turns.last().unwrap().content.contains("limit of 3 steps"));
    }

    #[tokio::test]
    async fn model_error_is_recorded_then_raised() {
        let s = setup(vec![Err(ModelError::Transport("reset".into()))]);
        let mut e = engine(s.deps);
        let err = e.run("hi").await.unwrap_err();
        assert_matches!(err, RuntimeError::AgentExecution { .. });
        let turns = stored(&s.store);
        assert_eq!(turns.len(), 2);
        assert!(turns[1].content.contains("reset"));
    }

    #[tokio::test]
    async fn denied_call_never_executes() {
        struct DenyAll;
        #[async_trait]
        impl PreToolUseCheck for DenyAll {
            async fn check(&self, _r: &PreToolUseRequest) -> PreToolUseOutcome {
                PreToolUseOutcome::deny("read_file is disabled")
            }
        }

        let s = setup(vec![
            Ok(ModelResponse::with_tools("", vec![read_call("a")])),
            Ok(ModelResponse::text("ok")),
        ]);
        let mut e = engine(s.deps.with_pre_check(Arc::new(DenyAll)));
        let summary = e.run("read").await.unwrap();
        assert_eq!(s.tool.calls(), 0);
        assert_eq!(summary.tool_calls, 0);
        assert_eq!(summary.steps, 2);
        let denial = &e.session().turns()[2];
        assert!(denial.content.contains("denied: read_file is disabled"));
        assert_eq!(e.session().records()[0].outcome, CallOutcome::Denied);
    }

    #[tokio::test]
    async fn ask_with_declining_confirmer_denies() {
        struct AskAll;
        #[async_trait]
        impl PreToolUseCheck for AskAll {
            async fn check(&self, _r: &PreToolUseRequest) -> PreToolUseOutcome {
                PreToolUseOutcome::ask("reads are sensitive")
            }
        }

        let s = setup(vec![
            Ok(ModelResponse::with_tools("", vec![read_call("a")])),
            Ok(ModelResponse::text("ok")),
        ]);
        let deps = s
            .deps
            .with_pre_check(Arc::new(AskAll))
            .with_confirmer(Arc::new(StaticConfirmer(false)));
        let mut e = engine(deps);
        let _ = e.run("read").await.unwrap();
        assert_eq!(s.tool.calls(), 0);
        assert_eq!(e.session().records()[0].outcome, CallOutcome::Denied);
    }

    #[tokio::test]
    async fn post_check_rewrites_result() {
        struct Redact;
        #[async_trait]
        impl PostToolUseCheck for Redact {
            async fn check(&self, _r: &PostToolUseRequest) -> PostToolUseOutcome {
                PostToolUseOutcome::replace(conductor_core::tools::ToolOutcome::ok("[redacted]"))
            }
        }

        let s = setup(vec![
            Ok(ModelResponse::with_tools("", vec![read_call("secrets")])),
            Ok(ModelResponse::text("ok")),
        ]);
        let mut e = engine(s.deps.with_post_check(Arc::new(Redact)));
        let _ = e.run("read").await.unwrap();
        assert_eq!(e.session().turns()[2].content, "[redacted]");
    }

    #[tokio::test]
    async fn quota_forces_final_answer() {
        let s = setup(vec![
            Ok(ModelResponse::with_tools(
                "",
                vec![read_call("a"), read_call("b"), read_call("c")],
            )),
            Ok(ModelResponse::with_tools("still want tools", vec![read_call("d")])),
        ]);
        let mut settings = EngineSettings::default();
        let _ = settings.tool_quotas.insert(
            "read_file".into(),
            ToolQuota {
                per_turn: Some(1),
                per_session: None,
            },
        );
        let mut e = SessionEngine::new(Session::new("s1".into()), EngineConfig::new(settings.clone()), s.deps);
        let summary = e.run("read all").await.unwrap();

        assert_eq!(s.tool.calls(), 1);
        assert!(summary.forced_final_answer);
        assert_eq!(summary.stop_reason, StopReason::QuotaExhausted);
        assert_eq!(summary.text, "still want tools");
        // The forced call went out without tool specs.
        assert_eq!(s.model.requests()[1].tools, 0);
        let outcomes: Vec<CallOutcome> = e.session().records().iter().map(|r| r.outcome).collect();
        assert_eq!(
            outcomes,
            vec![
                CallOutcome::Succeeded,
                CallOutcome::QuotaExceeded,
                CallOutcome::QuotaExceeded
            ]
        );
        let forcing = e
            .session()
            .turns()
            .iter()
            .find(|t| t.role == Role::System)
            .unwrap();
        assert_eq!(forcing.content, settings.force_final_answer_prompt);
    }

    #[tokio::test]
    async fn quota_on_last_step_hits_step_limit() {
        let s = setup(vec![Ok(ModelResponse::with_tools(
            "",
            vec![read_call("a"), read_call("b")],
        ))]);
        let mut settings = EngineSettings::default();
        settings.max_steps = 1;
        settings.default_tool_quota = ToolQuota {
            per_turn: Some(1),
            per_session: None,
        };
        let mut e = SessionEngine::new(Session::new("s1".into()), EngineConfig::new(settings.clone()), s.deps);

        let err = e.run("read both").await.unwrap_err();
        assert_matches!(err, RuntimeError::MaxStepsReached { max_steps: 1, partial: None });
        assert_eq!(s.model.requests().len(), 1);
        assert_eq!(s.tool.calls(), 1);
        let turns = stored(&s.store);
        assert!(turns.iter().any(|t| t.content == settings.force_final_answer_prompt));
        assert!(turns.last().unwrap().content.contains("limit of 1 steps"));
    }

    #[tokio::test]
    async fn turn_quota_resets_between_runs() {
        let s = setup(vec![
            Ok(ModelResponse::with_tools("", vec![read_call("a")])),
            Ok(ModelResponse::text("one")),
            Ok(ModelResponse::with_tools("", vec![read_call("b")])),
            Ok(ModelResponse::text("two")),
        ]);
        let mut settings = EngineSettings::default();
        settings.default_tool_quota = ToolQuota {
            per_turn: Some(1),
            per_session: None,
        };
        let mut e = SessionEngine::new(Session::new("s1".into()), EngineConfig::new(settings), s.deps);
        assert!(!e.run("first").await.unwrap().forced_final_answer);
        assert!(!e.run("second").await.unwrap().forced_final_answer);
        assert_eq!(s.tool.calls(), 2);
        assert_eq!(e.session().quotas().session_count("read_file"), 2);
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let s = setup(vec![Ok(ModelResponse::text("never"))]);
        let mut e = engine(s.deps);
        e.cancel();
        assert_matches!(e.run("hi").await, Err(RuntimeError::Cancelled));
        assert!(s.model.requests().is_empty());
        let turns = stored(&s.store);
        assert_eq!(turns.last().unwrap().content, "Run cancelled.");
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_model_call() {
        let s = setup(vec![]);
        s.model.hang_forever();
        let mut e = engine(s.deps);
        let token = e.cancellation_token();
        let _ = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });
        assert_matches!(e.run("hi").await, Err(RuntimeError::Cancelled));
    }

    #[tokio::test]
    async fn load_resumes_history_and_session_quota() {
        let s = setup(vec![
            Ok(ModelResponse::with_tools("", vec![read_call("a")])),
            Ok(ModelResponse::text("first")),
            Ok(ModelResponse::text("second")),
        ]);
        let config = EngineConfig::new(EngineSettings::default());
        let mut first = SessionEngine::load("s1".into(), config.clone(), s.deps.clone())
            .await
            .unwrap();
        let _ = first.run("one").await.unwrap();
        drop(first);

        let mut second = SessionEngine::load("s1".into(), config, s.deps).await.unwrap();
        assert_eq!(second.session().turns().len(), 4);
        assert_eq!(second.session().quotas().session_count("read_file"), 1);
        let _ = second.run("two").await.unwrap();
        assert_eq!(stored(&s.store).len(), 6);
    }

    #[tokio::test]
    async fn clear_history_persists_empty_session() {
        let s = setup(vec![Ok(ModelResponse::text("ok"))]);
        let mut e = engine(s.deps);
        let _ = e.run("hi").await.unwrap();
        e.clear_history().await.unwrap();
        assert!(stored(&s.store).is_empty());
        assert!(e.session().records().is_empty());
    }

    #[tokio::test]
    async fn compaction_runs_before_first_call() {
        use crate::context::ContextCompactor;
        use conductor_settings::CompactionSettings;

        let s = setup(vec![Ok(ModelResponse::text("ok"))]);
        let compactor = ContextCompactor::new(CompactionSettings {
            context_window_tokens: 40,
            threshold: 0.5,
            preserve_recent_turns: 1,
            ..Default::default()
        });
        let mut session = Session::new("s1".into());
        for i in 0..6 {
            session.push_turn(Turn::user(format!("old message {i} {}", "x".repeat(60))));
        }
        let deps = s.deps.with_compactor(Arc::new(compactor));
        let mut rx = deps.emitter.subscribe();
        let mut e = SessionEngine::new(session, EngineConfig::default(), deps);
        let _ = e.run("new").await.unwrap();

        // summary + new user turn were sent.
        assert_eq!(s.model.requests()[0].turns, 2);
        assert!(e.session().turns()[0].summary);
        let mut saw_compaction = false;
        while let Ok(event) = rx.try_recv() {
            saw_compaction |= event.event_type() == "compaction_complete";
        }
        assert!(saw_compaction);
    }

    #[tokio::test]
    async fn save_failure_aborts_run() {
        struct FailingStore;
        #[async_trait]
        impl SessionStore for FailingStore {
            async fn load(
                &self,
                _id: &SessionId,
            ) -> Result<Option<crate::persistence::SessionSnapshot>, PersistenceError> {
                Ok(None)
            }
            async fn save(
                &self,
                _id: &SessionId,
                _snapshot: &crate::persistence::SessionSnapshot,
            ) -> Result<(), PersistenceError> {
                Err(PersistenceError::Backend("read-only".into()))
            }
        }

        let s = setup(vec![Ok(ModelResponse::text("ok"))]);
        let deps = EngineDeps::new(s.deps.model.clone(), s.deps.tools.clone(), Arc::new(FailingStore));
        let mut e = engine(deps);
        let err = e.run("hi").await.unwrap_err();
        assert_matches!(err, RuntimeError::AgentExecution { ref message, .. } if message.contains("read-only"));
    }

    #[tokio::test]
    async fn events_bracket_the_run() {
        let s = setup(vec![
            Ok(ModelResponse::with_tools("", vec![read_call("a")])),
            Ok(ModelResponse::text("done")),
        ]);
        let mut rx = s.deps.emitter.subscribe();
        let mut e = engine(s.deps);
        let _ = e.run("go").await.unwrap();

        let mut types = Vec::new();
        while let Ok(event) = rx.try_recv() {
            types.push(event.event_type());
        }
        assert_eq!(
            types,
            vec![
                "run_start",
                "step_start",
                "tool_start",
                "tool_end",
                "step_start",
                "run_end"
            ]
        );
    }
}
