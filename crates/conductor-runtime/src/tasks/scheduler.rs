//! `TaskScheduler`: creates, admits, runs, waits on and cancels tasks.
//!
//! A semaphore of `max_concurrent` permits gates PENDING → RUNNING. Started
//! tasks wait in a FIFO and are admitted in start order as permits free up.
//! Each admitted task runs its sub-agent engine on its own tokio task with a
//! per-task cancellation token. State changes are published on a `watch`
//! channel so waiters resolve exactly once, on the first terminal state.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use conductor_core::ids::TaskId;
use conductor_settings::TaskSettings;
use dashmap::DashMap;
use futures::future::{self, FutureExt};
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, instrument, warn};

use crate::agent::EventEmitter;
use crate::errors::RuntimeError;

use super::errors::TaskError;
use super::factory::{SubAgentFactory, SubAgentSpec};
use super::types::{Task, TaskFilter, TaskRequest, TaskState};

// ─────────────────────────────────────────────────────────────────────────────
// Tracked task
// ─────────────────────────────────────────────────────────────────────────────

struct TrackedTask {
    record: Mutex<Task>,
    state_tx: watch::Sender<TaskState>,
    cancel: CancellationToken,
    submitted: AtomicBool,
}

impl TrackedTask {
    fn new(task: Task) -> Self {
        let (state_tx, _) = watch::channel(task.state);
        Self {
            record: Mutex::new(task),
            state_tx,
            cancel: CancellationToken::new(),
            submitted: AtomicBool::new(false),
        }
    }

    fn snapshot(&self) -> Task {
        self.record.lock().clone()
    }

    fn state(&self) -> TaskState {
        self.record.lock().state
    }

    /// Resolves once the task is terminal.
    async fn settled(&self) {
        let mut rx = self.state_tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|s| s.is_terminal()).await;
    }
}

struct Inner {
    tasks: DashMap<TaskId, Arc<TrackedTask>>,
    pending: Mutex<VecDeque<TaskId>>,
    slots: Arc<Semaphore>,
    max_depth: u32,
    factory: Arc<dyn SubAgentFactory>,
    emitter: Arc<EventEmitter>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Scheduler
// ─────────────────────────────────────────────────────────────────────────────

/// Task registry and admission control. Cheap to clone.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<Inner>,
}

/// Non-owning handle, held by the task tool so the scheduler (which owns the
/// factory, which owns the tool) can still be dropped.
#[derive(Clone)]
pub struct WeakTaskScheduler {
    inner: Weak<Inner>,
}

impl WeakTaskScheduler {
    /// The scheduler, if it is still alive.
    pub fn upgrade(&self) -> Option<TaskScheduler> {
        self.inner.upgrade().map(|inner| TaskScheduler { inner })
    }
}

impl TaskScheduler {
    /// Scheduler admitting at most `settings.max_concurrent` running tasks.
    pub fn new(
        settings: &TaskSettings,
        factory: Arc<dyn SubAgentFactory>,
        emitter: Arc<EventEmitter>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                tasks: DashMap::new(),
                pending: Mutex::new(VecDeque::new()),
                slots: Arc::new(Semaphore::new(settings.max_concurrent.max(1))),
                max_depth: settings.max_depth,
                factory,
                emitter,
            }),
        }
    }

    /// Non-owning handle.
    pub fn downgrade(&self) -> WeakTaskScheduler {
        WeakTaskScheduler {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Register a task. Starts it right away when `request.auto_start`.
    #[instrument(skip_all, fields(agent_type = %request.agent_type, depth = request.depth))]
    pub fn create_task(&self, request: TaskRequest) -> Result<Task, TaskError> {
        if request.description.trim().is_empty() {
            return Err(TaskError::InvalidRequest("description is empty".into()));
        }
        if request.depth > self.inner.max_depth {
            return Err(TaskError::DepthExceeded {
                depth: request.depth,
                max_depth: self.inner.max_depth,
            });
        }
        if !self
            .inner
            .factory
            .agent_types()
            .contains(&request.agent_type)
        {
            return Err(TaskError::UnknownAgentType(request.agent_type));
        }

        let task = Task::new(&request);
        let id = task.id.clone();
        info!(task_id = %id, "task created");
        let _ = self.inner.emitter.emit_task_state(
            task.parent_session_id.as_ref(),
            &id,
            task.state.as_str(),
        );
        let _ = self
            .inner
            .tasks
            .insert(id.clone(), Arc::new(TrackedTask::new(task.clone())));

        if request.auto_start {
            return self.start_task(&id);
        }
        Ok(task)
    }

    /// Queue a created task for admission.
    #[instrument(skip_all, fields(task_id = %id))]
    pub fn start_task(&self, id: &TaskId) -> Result<Task, TaskError> {
        let tracked = self.inner.tracked(id)?;
        if tracked.state() == TaskState::Cancelled {
            return Err(TaskError::Cancelled(id.clone()));
        }
        if tracked.submitted.swap(true, Ordering::SeqCst) {
            return Err(TaskError::AlreadyStarted(id.clone()));
        }
        self.inner.pending.lock().push_back(id.clone());
        debug!("task submitted");
        self.inner.pump();
        Ok(tracked.snapshot())
    }

    /// Cancel a non-terminal task. A pending task goes straight to CANCELLED;
    /// a running one does too, and its engine is interrupted.
    ///
    /// Returns `false` for unknown or already terminal tasks.
    #[instrument(skip_all, fields(task_id = %id))]
    pub fn cancel_task(&self, id: &TaskId) -> bool {
        let Ok(tracked) = self.inner.tracked(id) else {
            return false;
        };
        let cancelled = self.inner.transition(&tracked, TaskState::Cancelled, |task| {
            task.error = Some("cancelled".into());
        });
        if cancelled {
            tracked.cancel.cancel();
        }
        cancelled
    }

    /// Wait for one task to finish.
    ///
    /// Returns the task when it ends COMPLETED or FAILED. A CANCELLED task is
    /// [`TaskError::Cancelled`]. The timeout leaves the task untouched.
    #[instrument(skip_all, fields(task_id = %id))]
    pub async fn wait_for_task(&self, id: &TaskId, timeout: Duration) -> Result<Task, TaskError> {
        let tracked = self.inner.tracked(id)?;
        ensure_started(id, &tracked)?;
        if tokio::time::timeout(timeout, tracked.settled()).await.is_err() {
            return Err(timeout_error(timeout));
        }
        let task = tracked.snapshot();
        if task.state == TaskState::Cancelled {
            return Err(TaskError::Cancelled(task.id));
        }
        Ok(task)
    }

    /// Wait for every listed task, sharing one deadline. Cancelled tasks are
    /// returned like any other terminal task.
    pub async fn wait_for_all(
        &self,
        ids: &[TaskId],
        timeout: Duration,
    ) -> Result<Vec<Task>, TaskError> {
        let tracked = self.inner.tracked_started(ids)?;
        let all = future::join_all(tracked.iter().map(|t| t.settled()));
        if tokio::time::timeout(timeout, all).await.is_err() {
            return Err(timeout_error(timeout));
        }
        Ok(tracked.iter().map(|t| t.snapshot()).collect())
    }

    /// Wait for the first of the listed tasks to finish. A task that is
    /// already terminal is returned immediately.
    pub async fn wait_for_any(&self, ids: &[TaskId], timeout: Duration) -> Result<Task, TaskError> {
        if ids.is_empty() {
            return Err(TaskError::InvalidRequest("no task ids given".into()));
        }
        let tracked = self.inner.tracked_started(ids)?;
        if let Some(done) = tracked.iter().find(|t| t.state().is_terminal()) {
            return Ok(done.snapshot());
        }
        let any = future::select_all(tracked.iter().map(|t| t.settled().boxed()));
        match tokio::time::timeout(timeout, any).await {
            Ok(((), index, _)) => Ok(tracked[index].snapshot()),
            Err(_) => Err(timeout_error(timeout)),
        }
    }

    /// Snapshot of one task.
    pub fn get_task(&self, id: &TaskId) -> Option<Task> {
        self.inner.tasks.get(id).map(|t| t.snapshot())
    }

    /// Tasks passing `filter`, oldest first.
    pub fn list_tasks(&self, filter: &TaskFilter) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .inner
            .tasks
            .iter()
            .map(|entry| entry.value().snapshot())
            .filter(|task| filter.matches(task))
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        tasks
    }

    /// Tasks currently RUNNING.
    pub fn running_count(&self) -> usize {
        self.inner
            .tasks
            .iter()
            .filter(|entry| entry.value().state() == TaskState::Running)
            .count()
    }

    /// Cancel every non-terminal task. Returns how many were cancelled.
    pub fn shutdown(&self) -> usize {
        let ids: Vec<TaskId> = self.inner.tasks.iter().map(|e| e.key().clone()).collect();
        let cancelled = ids.iter().filter(|id| self.cancel_task(id)).count();
        self.inner.pending.lock().clear();
        info!(cancelled, "task scheduler shut down");
        cancelled
    }
}

fn ensure_started(id: &TaskId, tracked: &TrackedTask) -> Result<(), TaskError> {
    if !tracked.submitted.load(Ordering::SeqCst) && tracked.state() == TaskState::Pending {
        return Err(TaskError::NotStarted(id.clone()));
    }
    Ok(())
}

fn timeout_error(timeout: Duration) -> TaskError {
    TaskError::Timeout {
        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Admission and execution
// ─────────────────────────────────────────────────────────────────────────────

impl Inner {
    fn tracked(&self, id: &TaskId) -> Result<Arc<TrackedTask>, TaskError> {
        self.tasks
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| TaskError::NotFound(id.clone()))
    }

    fn tracked_started(&self, ids: &[TaskId]) -> Result<Vec<Arc<TrackedTask>>, TaskError> {
        ids.iter()
            .map(|id| {
                let tracked = self.tracked(id)?;
                ensure_started(id, &tracked)?;
                Ok(tracked)
            })
            .collect()
    }

    /// Apply `next` if legal from the current state. The first terminal
    /// transition wins; later ones are refused.
    fn transition(
        &self,
        tracked: &TrackedTask,
        next: TaskState,
        apply: impl FnOnce(&mut Task),
    ) -> bool {
        let (id, parent) = {
            let mut task = tracked.record.lock();
            if !task.state.can_transition_to(next) {
                debug!(task_id = %task.id, from = %task.state, to = %next, "transition refused");
                return false;
            }
            task.state = next;
            if next.is_terminal() {
                task.finished_at = Some(Utc::now());
            }
            apply(&mut *task);
            // Published under the lock so watchers never see states out of order.
            let _ = tracked.state_tx.send_replace(next);
            (task.id.clone(), task.parent_session_id.clone())
        };
        debug!(task_id = %id, state = %next, "task state changed");
        let _ = self
            .emitter
            .emit_task_state(parent.as_ref(), &id, next.as_str());
        true
    }

    /// Admit started tasks while permits are free.
    fn pump(self: &Arc<Self>) {
        loop {
            let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
                return;
            };
            let Some(tracked) = self.next_pending() else {
                return;
            };
            let inner = Arc::clone(self);
            let _ = tokio::spawn(async move { inner.run_task(tracked, permit).await });
        }
    }

    fn next_pending(&self) -> Option<Arc<TrackedTask>> {
        let mut pending = self.pending.lock();
        while let Some(id) = pending.pop_front() {
            match self.tasks.get(&id) {
                Some(entry) if entry.value().state() == TaskState::Pending => {
                    return Some(Arc::clone(entry.value()));
                }
                _ => debug!(task_id = %id, "skipping task that is no longer pending"),
            }
        }
        None
    }

    async fn run_task(self: Arc<Self>, tracked: Arc<TrackedTask>, permit: OwnedSemaphorePermit) {
        let started = self.transition(&tracked, TaskState::Running, |task| {
            task.started_at = Some(Utc::now());
        });
        if started {
            let task = tracked.snapshot();
            let span = info_span!("task", task_id = %task.id, agent_type = %task.agent_type);
            self.execute(&tracked, task).instrument(span).await;
        }
        drop(permit);
        self.pump();
    }

    async fn execute(&self, tracked: &TrackedTask, task: Task) {
        let spec = SubAgentSpec {
            agent_type: task.agent_type.clone(),
            session_id: task.child_session_id.clone(),
            parent_session_id: task.parent_session_id.clone(),
            depth: task.depth,
        };
        let engine = match self.factory.create(&spec).await {
            Ok(engine) => engine.with_cancellation(tracked.cancel.clone()),
            Err(e) => {
                warn!(error = %e, "sub-agent creation failed");
                let _ = self.transition(tracked, TaskState::Failed, |t| {
                    t.error = Some(e.to_string());
                });
                return;
            }
        };

        let prompt = task.description;
        let handle = tokio::spawn(
            async move {
                let mut engine = engine;
                engine.run(&prompt).await
            }
            .in_current_span(),
        );

        let _ = match handle.await {
            Ok(Ok(summary)) => {
                info!(steps = summary.steps, "task completed");
                self.transition(tracked, TaskState::Completed, |t| {
                    t.result = Some(summary.text);
                })
            }
            Ok(Err(RuntimeError::Cancelled)) => {
                info!("task cancelled");
                self.transition(tracked, TaskState::Cancelled, |t| {
                    t.error = Some("cancelled".into());
                })
            }
            Ok(Err(e)) => {
                warn!(error = %e, "task failed");
                self.transition(tracked, TaskState::Failed, |t| {
                    t.error = Some(e.to_string());
                })
            }
            Err(e) => {
                warn!(error = %e, "sub-agent panicked");
                self.transition(tracked, TaskState::Failed, |t| {
                    t.error = Some(format!("sub-agent aborted: {e}"));
                })
            }
        };
    }
}
