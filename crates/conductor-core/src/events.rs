//! Lifecycle events published while sessions and tasks run.
//!
//! Events are in-memory notifications for front-ends and tests. They are
//! never the source of truth: history lives in the session store.

use serde::{Deserialize, Serialize};

use crate::messages::CallOutcome;

// ─────────────────────────────────────────────────────────────────────────────
// BaseEvent
// ─────────────────────────────────────────────────────────────────────────────

/// Common fields for all events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseEvent {
    /// Session the event belongs to.
    pub session_id: String,
    /// RFC 3339 timestamp.
    pub timestamp: String,
}

impl BaseEvent {
    /// Stamp a new base with the current UTC time.
    #[must_use]
    pub fn now(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ConductorEvent
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ConductorEvent {
    /// An engine run began.
    RunStart {
        /// Common fields.
        #[serde(flatten)]
        base: BaseEvent,
    },
    /// A model call is about to be made.
    StepStart {
        /// Common fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// 1-based step number.
        step: u32,
    },
    /// A tool call is about to execute.
    ToolStart {
        /// Common fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Call ID.
        tool_call_id: String,
        /// Tool name.
        tool_name: String,
    },
    /// A tool call was resolved (executed, denied, or preempted).
    ToolEnd {
        /// Common fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Call ID.
        tool_call_id: String,
        /// Tool name.
        tool_name: String,
        /// Outcome.
        outcome: CallOutcome,
    },
    /// A tool hit its quota; the model is being forced to answer.
    QuotaExceeded {
        /// Common fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Tool name.
        tool_name: String,
        /// The cap that was hit.
        limit: u32,
    },
    /// History was compacted.
    CompactionComplete {
        /// Common fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Estimated tokens before.
        tokens_before: usize,
        /// Estimated tokens after.
        tokens_after: usize,
        /// Whether truncation replaced summarization.
        truncated: bool,
    },
    /// An engine run finished with an answer.
    RunEnd {
        /// Common fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Steps executed.
        steps: u32,
        /// Why the run stopped.
        stop_reason: String,
    },
    /// An engine run failed.
    RunFailed {
        /// Common fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Error message.
        error: String,
        /// Error category.
        category: String,
    },
    /// A prompt was added to a busy session's backlog.
    MessageQueued {
        /// Common fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Backlog entry ID.
        message_id: String,
        /// Queue depth after insertion.
        queued: usize,
    },
    /// A background task changed state. `base.session_id` is the parent session.
    TaskStateChanged {
        /// Common fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Task ID.
        task_id: String,
        /// New state.
        state: String,
    },
}

impl ConductorEvent {
    /// Common fields.
    #[must_use]
    pub fn base(&self) -> &BaseEvent {
        match self {
            Self::RunStart { base }
            | Self::StepStart { base, .. }
            | Self::ToolStart { base, .. }
            | Self::ToolEnd { base, .. }
            | Self::QuotaExceeded { base, .. }
            | Self::CompactionComplete { base, .. }
            | Self::RunEnd { base, .. }
            | Self::RunFailed { base, .. }
            | Self::MessageQueued { base, .. }
            | Self::TaskStateChanged { base, .. } => base,
        }
    }

    /// Session the event belongs to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.base().session_id
    }

    /// Wire discriminator.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunStart { .. } => "run_start",
            Self::StepStart { .. } => "step_start",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolEnd { .. } => "tool_end",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::CompactionComplete { .. } => "compaction_complete",
            Self::RunEnd { .. } => "run_end",
            Self::RunFailed { .. } => "run_failed",
            Self::MessageQueued { .. } => "message_queued",
            Self::TaskStateChanged { .. } => "task_state_changed",
        }
    }
}
