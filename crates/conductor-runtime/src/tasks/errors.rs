//! Task error types.
//!
//! Scheduler errors are explicit returns, never silent: callers (the task
//! tool, the orchestrator) decide how to surface them.

use conductor_core::ids::TaskId;
use thiserror::Error;

/// Errors from task operations.
#[derive(Debug, Error)]
pub enum TaskError {
    /// No task with this ID.
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// Waiting on a task that was created but never started.
    #[error("task {0} was never started")]
    NotStarted(TaskId),

    /// `start_task` on a task that was already started.
    #[error("task {0} was already started")]
    AlreadyStarted(TaskId),

    /// The task ended in CANCELLED.
    #[error("task {0} was cancelled")]
    Cancelled(TaskId),

    /// A wait ran out of time. The task is unaffected.
    #[error("timed out after {timeout_ms}ms waiting for tasks")]
    Timeout {
        /// Wait budget.
        timeout_ms: u64,
    },

    /// No sub-agent profile with this name.
    #[error("unknown agent type: {0}")]
    UnknownAgentType(String),

    /// Creating the task would nest sub-agents too deeply.
    #[error("sub-agent depth {depth} exceeds maximum {max_depth}")]
    DepthExceeded {
        /// Depth the new task would run at.
        depth: u32,
        /// Configured maximum.
        max_depth: u32,
    },

    /// Malformed request.
    #[error("invalid task request: {0}")]
    InvalidRequest(String),

    /// The sub-agent engine could not be built.
    #[error("failed to create sub-agent: {0}")]
    Creation(String),
}

impl TaskError {
    /// Category string for event emission.
    pub fn category(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::NotStarted(_) => "not_started",
            Self::AlreadyStarted(_) => "already_started",
            Self::Cancelled(_) => "cancelled",
            Self::Timeout { .. } => "timeout",
            Self::UnknownAgentType(_) => "unknown_agent_type",
            Self::DepthExceeded { .. } => "depth_exceeded",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Creation(_) => "creation",
        }
    }
}
