//! Orchestrator: runs prompts against sessions, one at a time per session.
//!
//! `run` takes the session's lease or, when the session is busy, queues the
//! prompt (or rejects it). Whoever holds the lease drains the backlog in the
//! background once its own prompt is done, and re-checks the backlog after
//! releasing so a prompt enqueued during the release is picked up.

use std::sync::Arc;

use conductor_core::events::{BaseEvent, ConductorEvent};
use conductor_core::ids::SessionId;
use conductor_core::priority::Priority;
use conductor_hooks::{Confirmer, HookEngine, HookRegistry, PostToolUseCheck, PreToolUseCheck};
use conductor_settings::ConductorSettings;
use dashmap::DashMap;
use serde_json::Map;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, instrument, warn};

use crate::agent::{EngineConfig, EngineDeps, EventEmitter, RunSummary, SessionEngine};
use crate::context::{ContextCompactor, ModelSummarizer, Summarizer};
use crate::errors::RuntimeError;
use crate::model::ModelClient;
use crate::persistence::{MemorySessionStore, SessionSnapshot, SessionStore};
use crate::queue::{QueuedMessage, SessionLease, SessionQueueManager};
use crate::tasks::{DefaultSubAgentFactory, TaskScheduler};
use crate::tools::{TaskTool, Tool, ToolRegistry};

/// What `run` did with a prompt.
#[derive(Clone, Debug, PartialEq)]
pub enum RunReply {
    /// The session was idle; the prompt ran to a final answer.
    Completed(RunSummary),
    /// The session was busy; the prompt waits in its backlog.
    Queued(QueuedMessage),
}

impl RunReply {
    /// Final text, if the prompt ran.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Completed(summary) => Some(&summary.text),
            Self::Queued(_) => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Wires an [`Orchestrator`] together.
pub struct OrchestratorBuilder {
    settings: ConductorSettings,
    model: Arc<dyn ModelClient>,
    tools: ToolRegistry,
    store: Option<Arc<dyn SessionStore>>,
    pre_checks: Vec<Arc<dyn PreToolUseCheck>>,
    post_checks: Vec<Arc<dyn PostToolUseCheck>>,
    hooks: Option<HookRegistry>,
    confirmer: Option<Arc<dyn Confirmer>>,
    summarizer: Option<Arc<dyn Summarizer>>,
    system_prompt: Option<String>,
}

impl OrchestratorBuilder {
    /// Add a tool available to top-level sessions (and to sub-agents whose
    /// profile allows it).
    #[must_use]
    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.register(tool);
        self
    }

    /// Persist sessions here instead of in memory.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Add an external pre-tool-use check. Checks run in insertion order,
    /// after the hook engine if one is configured.
    #[must_use]
    pub fn pre_check(mut self, check: Arc<dyn PreToolUseCheck>) -> Self {
        self.pre_checks.push(check);
        self
    }

    /// Add an external post-tool-use check.
    #[must_use]
    pub fn post_check(mut self, check: Arc<dyn PostToolUseCheck>) -> Self {
        self.post_checks.push(check);
        self
    }

    /// Run these hook handlers before and after every tool call.
    #[must_use]
    pub fn hooks(mut self, registry: HookRegistry) -> Self {
        self.hooks = Some(registry);
        self
    }

    /// Resolve `Ask` decisions with `confirmer`.
    #[must_use]
    pub fn confirmer(mut self, confirmer: Arc<dyn Confirmer>) -> Self {
        self.confirmer = Some(confirmer);
        self
    }

    /// Summarize compacted history with `summarizer` instead of the model.
    #[must_use]
    pub fn summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// System prompt for top-level sessions.
    #[must_use]
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Build. Sub-agents get the `task` tool while below the depth limit;
    /// top-level sessions get it whenever delegation is enabled.
    pub fn build(self) -> Orchestrator {
        let Self {
            settings,
            model,
            mut tools,
            store,
            pre_checks,
            post_checks,
            hooks,
            confirmer,
            summarizer,
            system_prompt,
        } = self;

        let emitter = Arc::new(EventEmitter::new());
        let store: Arc<dyn SessionStore> = match store {
            Some(store) => store,
            None => Arc::new(MemorySessionStore::new()),
        };
        let summarizer: Arc<dyn Summarizer> = match summarizer {
            Some(summarizer) => summarizer,
            None => Arc::new(ModelSummarizer::new(Arc::clone(&model))),
        };
        let compactor = ContextCompactor::new(settings.compaction.clone()).with_summarizer(summarizer);

        let mut deps = EngineDeps::new(model, Arc::new(tools.clone()), store)
            .with_emitter(Arc::clone(&emitter))
            .with_compactor(Arc::new(compactor));
        if let Some(registry) = hooks {
            let engine = HookEngine::new(registry).with_default_timeout_ms(settings.hooks.default_timeout_ms);
            deps = deps.with_hooks(Arc::new(engine));
        }
        for check in pre_checks {
            deps = deps.with_pre_check(check);
        }
        for check in post_checks {
            deps = deps.with_post_check(check);
        }
        if let Some(confirmer) = confirmer {
            deps = deps.with_confirmer(confirmer);
        }

        let factory = Arc::new(DefaultSubAgentFactory::new(
            deps.clone(),
            settings.engine.clone(),
            &settings.tasks,
        ));
        let scheduler = TaskScheduler::new(&settings.tasks, factory.clone(), Arc::clone(&emitter));
        if settings.tasks.max_depth > 0 {
            let task_tool: Arc<dyn Tool> = Arc::new(TaskTool::new(&scheduler, &settings.tasks));
            factory.set_task_tool(Arc::clone(&task_tool));
            tools.register(task_tool);
        }
        let deps = deps.with_tools(Arc::new(tools));

        let mut config = EngineConfig::new(settings.engine.clone());
        if let Some(prompt) = system_prompt {
            config = config.with_system_prompt(prompt);
        }

        info!(
            tools = deps.tools.len(),
            max_concurrent_tasks = settings.tasks.max_concurrent,
            "orchestrator ready"
        );
        Orchestrator {
            inner: Arc::new(Inner {
                queue: Arc::new(SessionQueueManager::with_max_backlog(settings.queue.max_backlog)),
                settings,
                scheduler,
                deps,
                config,
                emitter,
                active: DashMap::new(),
            }),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Orchestrator
// ─────────────────────────────────────────────────────────────────────────────

struct Inner {
    settings: ConductorSettings,
    queue: Arc<SessionQueueManager>,
    scheduler: TaskScheduler,
    deps: EngineDeps,
    config: EngineConfig,
    emitter: Arc<EventEmitter>,
    /// Cancellation tokens of engines currently running, by session.
    active: DashMap<SessionId, CancellationToken>,
}

/// Multi-session coordinator. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Start building an orchestrator around `model`.
    pub fn builder(settings: ConductorSettings, model: Arc<dyn ModelClient>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            settings,
            model,
            tools: ToolRegistry::new(),
            store: None,
            pre_checks: Vec::new(),
            post_checks: Vec::new(),
            hooks: None,
            confirmer: None,
            summarizer: None,
            system_prompt: None,
        }
    }

    /// Run `prompt` against `session_id`.
    ///
    /// If the session is busy the prompt is queued (`queue_if_busy`) or
    /// rejected with [`RuntimeError::Busy`].
    #[instrument(skip_all, fields(session_id = %session_id, %priority))]
    pub async fn run(
        &self,
        session_id: &SessionId,
        prompt: &str,
        priority: Priority,
        queue_if_busy: bool,
    ) -> Result<RunReply, RuntimeError> {
        let Some(lease) = self.inner.queue.try_lease(session_id) else {
            if !queue_if_busy {
                debug!("session busy, rejecting");
                return Err(RuntimeError::Busy(session_id.clone()));
            }
            let message = self
                .inner
                .queue
                .enqueue(session_id, prompt, priority, Map::new())?;
            let _ = self.inner.emitter.emit(ConductorEvent::MessageQueued {
                base: BaseEvent::now(session_id.as_str()),
                message_id: message.id.to_string(),
                queued: self.inner.queue.queued_count(session_id),
            });
            self.inner.kick(session_id);
            return Ok(RunReply::Queued(message));
        };

        let _hand_off = HandOff::new(&self.inner, lease);
        self.inner
            .run_leased(session_id, prompt)
            .await
            .map(RunReply::Completed)
    }

    /// Whether a prompt is executing for `session_id`.
    pub fn is_busy(&self, session_id: &SessionId) -> bool {
        self.inner.queue.is_busy(session_id)
    }

    /// Prompts waiting for `session_id`.
    pub fn queued_count(&self, session_id: &SessionId) -> usize {
        self.inner.queue.queued_count(session_id)
    }

    /// Backlog of `session_id` in drain order.
    pub fn queued_prompts(&self, session_id: &SessionId) -> Vec<QueuedMessage> {
        self.inner.queue.queued_prompts(session_id)
    }

    /// Drop the backlog of `session_id`. Returns how many prompts were dropped.
    pub fn clear_queue(&self, session_id: &SessionId) -> usize {
        self.inner.queue.clear_queue(session_id)
    }

    /// Trip the cancellation token of the engine running `session_id`.
    /// Returns `false` if nothing is running there.
    pub fn cancel_session(&self, session_id: &SessionId) -> bool {
        match self.inner.active.get(session_id) {
            Some(token) => {
                info!(session_id = %session_id, "cancelling session run");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Wipe the history, records and quota counters of an idle session.
    pub async fn clear_history(&self, session_id: &SessionId) -> Result<(), RuntimeError> {
        let Some(lease) = self.inner.queue.try_lease(session_id) else {
            return Err(RuntimeError::Busy(session_id.clone()));
        };
        let _hand_off = HandOff::new(&self.inner, lease);
        let mut engine =
            SessionEngine::load(session_id.clone(), self.inner.config.clone(), self.inner.deps.clone())
                .await?;
        engine.clear_history().await
    }

    /// Persisted state of `session_id`.
    pub async fn load_session(&self, session_id: &SessionId) -> Result<Option<SessionSnapshot>, RuntimeError> {
        Ok(self.inner.deps.store.load(session_id).await?)
    }

    /// The task scheduler.
    pub fn scheduler(&self) -> &TaskScheduler {
        &self.inner.scheduler
    }

    /// Settings in effect.
    pub fn settings(&self) -> &ConductorSettings {
        &self.inner.settings
    }

    /// Receive every event emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ConductorEvent> {
        self.inner.emitter.subscribe()
    }

    /// Cancel running sessions and every open task.
    pub fn shutdown(&self) {
        for entry in &self.inner.active {
            entry.value().cancel();
        }
        let tasks = self.inner.scheduler.shutdown();
        info!(sessions = self.inner.active.len(), tasks, "orchestrator shut down");
    }
}

impl Inner {
    async fn run_leased(&self, session_id: &SessionId, prompt: &str) -> Result<RunSummary, RuntimeError> {
        let mut engine =
            SessionEngine::load(session_id.clone(), self.config.clone(), self.deps.clone()).await?;
        let _ = self
            .active
            .insert(session_id.clone(), engine.cancellation_token());
        let _active = ActiveRun {
            active: &self.active,
            session_id,
        };
        engine.run(prompt).await
    }

    /// Give up the lease, draining the backlog first if it is not empty.
    fn hand_off(self: &Arc<Self>, lease: SessionLease) {
        let session_id = lease.session_id().clone();
        if self.queue.queued_count(&session_id) > 0 {
            self.spawn_drain(lease);
            return;
        }
        drop(lease);
        self.kick(&session_id);
    }

    /// Start draining `session_id` if it has a backlog and nobody holds it.
    fn kick(self: &Arc<Self>, session_id: &SessionId) {
        if self.queue.queued_count(session_id) == 0 {
            return;
        }
        if let Some(lease) = self.queue.try_lease(session_id) {
            self.spawn_drain(lease);
        }
    }

    fn spawn_drain(self: &Arc<Self>, lease: SessionLease) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(session_id = %lease.session_id(), "no runtime to drain backlog on");
            return;
        };
        let inner = Arc::clone(self);
        let span = info_span!("drain", session_id = %lease.session_id());
        let _ = runtime.spawn(inner.drain(lease).instrument(span));
    }

    async fn drain(self: Arc<Self>, lease: SessionLease) {
        let session_id = lease.session_id().clone();
        while let Some(message) = self.queue.dequeue(&session_id) {
            debug!(message_id = %message.id, priority = %message.priority, "running queued prompt");
            match self.run_leased(&session_id, &message.prompt).await {
                Ok(summary) => debug!(steps = summary.steps, "queued prompt completed"),
                Err(e) => warn!(error = %e, message_id = %message.id, "queued prompt failed"),
            }
        }
        drop(lease);
        self.kick(&session_id);
    }
}

/// Hands the lease off when dropped, whether the run finished or its future
/// was dropped mid-turn.
struct HandOff {
    inner: Arc<Inner>,
    lease: Option<SessionLease>,
}

impl HandOff {
    fn new(inner: &Arc<Inner>, lease: SessionLease) -> Self {
        Self {
            inner: Arc::clone(inner),
            lease: Some(lease),
        }
    }
}

impl Drop for HandOff {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            self.inner.hand_off(lease);
        }
    }
}

/// Unregisters a session's cancellation token when its run ends.
struct ActiveRun<'a> {
    active: &'a DashMap<SessionId, CancellationToken>,
    session_id: &'a SessionId,
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        let _ = self.active.remove(self.session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelResponse;
    use crate::test_support::{GatedModel, ScriptedModel, wait_until};
    use assert_matches::assert_matches;

    fn scripted(replies: &[&str]) -> Orchestrator {
        let script = replies.iter().map(|r| Ok(ModelResponse::text(*r))).collect();
        Orchestrator::builder(ConductorSettings::default(), Arc::new(ScriptedModel::new(script))).build()
    }

    fn sid() -> SessionId {
        SessionId::from("sess_1")
    }

    #[tokio::test]
    async fn idle_session_runs_directly() {
        let o = scripted(&["hi there"]);
        let reply = o.run(&sid(), "hello", Priority::Normal, true).await.unwrap();
        assert_eq!(reply.text(), Some("hi there"));
        assert!(!o.is_busy(&sid()));
        let snapshot = o.load_session(&sid()).await.unwrap().unwrap();
        assert_eq!(snapshot.turns.len(), 2);
    }

    #[tokio::test]
    async fn top_level_sessions_get_the_task_tool() {
        let o = scripted(&[]);
        assert!(o.inner.deps.tools.contains("task"));

        let mut settings = ConductorSettings::default();
        settings.tasks.max_depth = 0;
        let o = Orchestrator::builder(settings, Arc::new(ScriptedModel::new(vec![]))).build();
        assert!(!o.inner.deps.tools.contains("task"));
    }

    #[tokio::test]
    async fn busy_session_queues_or_rejects() {
        let model = Arc::new(GatedModel::new());
        let o = Orchestrator::builder(ConductorSettings::default(), model.clone()).build();
        let first = {
            let o = o.clone();
            tokio::spawn(async move { o.run(&sid(), "first", Priority::Normal, true).await })
        };
        wait_until(|| model.entered() == 1).await;
        assert!(o.is_busy(&sid()));

        assert_matches!(
            o.run(&sid(), "rejected", Priority::Normal, false).await,
            Err(RuntimeError::Busy(_))
        );
        let reply = o.run(&sid(), "second", Priority::High, true).await.unwrap();
        assert_matches!(reply, RunReply::Queued(ref m) if m.prompt == "second");
        assert_eq!(o.queued_count(&sid()), 1);

        model.open(2);
        let first = first.await.unwrap().unwrap();
        assert_matches!(first, RunReply::Completed(_));
        wait_until(|| !o.is_busy(&sid()) && o.queued_count(&sid()) == 0).await;

        let snapshot = o.load_session(&sid()).await.unwrap().unwrap();
        let prompts: Vec<&str> = snapshot
            .turns
            .iter()
            .filter(|t| t.role == conductor_core::messages::Role::User)
            .map(|t| t.content.as_str())
            .collect();
        assert_eq!(prompts, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn cancel_session_interrupts_run() {
        let model = Arc::new(GatedModel::new());
        let o = Orchestrator::builder(ConductorSettings::default(), model.clone()).build();
        assert!(!o.cancel_session(&sid()));
        let run = {
            let o = o.clone();
            tokio::spawn(async move { o.run(&sid(), "long", Priority::Normal, true).await })
        };
        wait_until(|| model.entered() == 1).await;
        assert!(o.cancel_session(&sid()));
        assert_matches!(run.await.unwrap(), Err(RuntimeError::Cancelled));
        assert!(!o.is_busy(&sid()));
    }

    #[tokio::test]
    async fn dropped_run_still_drains_backlog() {
        let model = Arc::new(GatedModel::new());
        let o = Orchestrator::builder(ConductorSettings::default(), model.clone()).build();
        let first = {
            let o = o.clone();
            tokio::spawn(async move { o.run(&sid(), "first", Priority::Normal, true).await })
        };
        wait_until(|| model.entered() == 1).await;
        let reply = o.run(&sid(), "second", Priority::Normal, true).await.unwrap();
        assert_matches!(reply, RunReply::Queued(_));

        first.abort();
        assert!(first.await.unwrap_err().is_cancelled());
        wait_until(|| model.entered() == 2).await;
        model.open(1);
        wait_until(|| !o.is_busy(&sid()) && o.queued_count(&sid()) == 0).await;
        assert!(!o.cancel_session(&sid()));

        let snapshot = o.load_session(&sid()).await.unwrap().unwrap();
        let last = snapshot.turns.last().unwrap();
        assert_eq!(last.content, "done");
        assert!(snapshot.turns.iter().any(|t| t.content == "second"));
    }

    #[tokio::test]
    async fn dropped_run_unregisters_its_token() {
        let model = Arc::new(GatedModel::new());
        let o = Orchestrator::builder(ConductorSettings::default(), model.clone()).build();
        let run = {
            let o = o.clone();
            tokio::spawn(async move { o.run(&sid(), "long", Priority::Normal, true).await })
        };
        wait_until(|| model.entered() == 1).await;
        run.abort();
        assert!(run.await.unwrap_err().is_cancelled());
        assert!(!o.is_busy(&sid()));
        assert!(!o.cancel_session(&sid()));
    }

    #[tokio::test]
    async fn clear_history_and_queue() {
        let o = scripted(&["one"]);
        let _ = o.run(&sid(), "hello", Priority::Normal, true).await.unwrap();
        o.clear_history(&sid()).await.unwrap();
        let snapshot = o.load_session(&sid()).await.unwrap().unwrap();
        assert!(snapshot.is_empty());
        assert_eq!(o.clear_queue(&sid()), 0);
    }

    #[tokio::test]
    async fn backlog_capacity_is_enforced() {
        let model = Arc::new(GatedModel::new());
        let mut settings = ConductorSettings::default();
        settings.queue.max_backlog = Some(1);
        let o = Orchestrator::builder(settings, model.clone()).build();
        let _run = {
            let o = o.clone();
            tokio::spawn(async move { o.run(&sid(), "first", Priority::Normal, true).await })
        };
        wait_until(|| model.entered() == 1).await;
        let _ = o.run(&sid(), "second", Priority::Normal, true).await.unwrap();
        assert_matches!(
            o.run(&sid(), "third", Priority::Normal, true).await,
            Err(RuntimeError::Queue(_))
        );
        assert_eq!(o.queued_prompts(&sid()).len(), 1);
        o.shutdown();
    }
}
