//! Task data types.

use std::fmt;

use chrono::{DateTime, Utc};
use conductor_core::ids::{SessionId, TaskId};
use conductor_core::priority::Priority;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Created, waiting for start or for a concurrency slot.
    Pending,
    /// Holds a slot; its engine is running.
    Running,
    /// Engine produced a final answer.
    Completed,
    /// Engine failed.
    Failed,
    /// Cancelled before or during execution.
    Cancelled,
}

impl TaskState {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running | Self::Cancelled)
                | (Self::Running, Self::Completed | Self::Failed | Self::Cancelled)
        )
    }

    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a task.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Task ID.
    pub id: TaskId,
    /// What the sub-agent is asked to do. Sent as its prompt.
    pub description: String,
    /// Sub-agent profile name.
    pub agent_type: String,
    /// Current state.
    pub state: TaskState,
    /// Recorded priority. Admission ignores it.
    pub priority: Priority,
    /// Session that delegated the task, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<SessionId>,
    /// Isolated session the sub-agent runs in.
    pub child_session_id: SessionId,
    /// Nesting depth of the sub-agent (1 for tasks created by a top-level session).
    pub depth: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Set on PENDING → RUNNING.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Set on entering a terminal state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Final answer, when COMPLETED.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Failure text, when FAILED or CANCELLED.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Task {
    pub(crate) fn new(request: &TaskRequest) -> Self {
        Self {
            id: TaskId::new(),
            description: request.description.clone(),
            agent_type: request.agent_type.clone(),
            state: TaskState::Pending,
            priority: request.priority,
            parent_session_id: request.parent_session.clone(),
            child_session_id: SessionId::new(),
            depth: request.depth,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
        }
    }

    /// Whether the task is done.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Parameters for [`TaskScheduler::create_task`](super::TaskScheduler::create_task).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskRequest {
    /// Prompt for the sub-agent.
    pub description: String,
    /// Profile name.
    pub agent_type: String,
    /// Recorded priority.
    pub priority: Priority,
    /// Delegating session.
    pub parent_session: Option<SessionId>,
    /// Start immediately after creation.
    pub auto_start: bool,
    /// Depth the sub-agent will run at.
    pub depth: u32,
}

impl TaskRequest {
    /// Auto-starting request at depth 1 and normal priority.
    pub fn new(description: impl Into<String>, agent_type: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            agent_type: agent_type.into(),
            priority: Priority::Normal,
            parent_session: None,
            auto_start: true,
            depth: 1,
        }
    }

    /// Set the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the delegating session.
    #[must_use]
    pub fn with_parent(mut self, parent: SessionId) -> Self {
        self.parent_session = Some(parent);
        self
    }

    /// Whether to start right away.
    #[must_use]
    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    /// Set the depth.
    #[must_use]
    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }
}

/// Filter for `list_tasks`. Empty matches everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaskFilter {
    /// Only tasks in this state.
    pub state: Option<TaskState>,
    /// Only tasks delegated by this session.
    pub parent_session: Option<SessionId>,
}

impl TaskFilter {
    /// Whether `task` passes.
    pub fn matches(&self, task: &Task) -> bool {
        self.state.is_none_or(|s| s == task.state)
            && self
                .parent_session
                .as_ref()
                .is_none_or(|p| task.parent_session_id.as_ref() == Some(p))
    }
}
