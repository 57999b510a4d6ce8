//! Runtime error types.

use std::fmt;

use conductor_core::errors::{ModelError, PersistenceError};
use conductor_core::ids::SessionId;
use serde::{Deserialize, Serialize};

use crate::queue::QueueError;
use crate::tasks::TaskError;

/// Boxed source error.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by engine runs and the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Model transport or persistence failed mid-run. History up to the
    /// failure was saved on a best-effort basis.
    #[error("agent execution failed: {message}")]
    AgentExecution {
        /// Description.
        message: String,
        /// Underlying failure.
        #[source]
        source: Option<BoxError>,
    },

    /// The run used its whole step budget without a final answer.
    #[error("max steps ({max_steps}) reached")]
    MaxStepsReached {
        /// Configured cap.
        max_steps: u32,
        /// Last assistant text produced, if any.
        partial: Option<String>,
    },

    /// Session is executing another request and queuing was not requested.
    #[error("session busy: {0}")]
    Busy(SessionId),

    /// Backlog rejected a prompt.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Task scheduler rejected a request.
    #[error(transparent)]
    Task(#[from] TaskError),

    /// The run was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Session history could not be loaded.
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Internal / unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RuntimeError {
    /// Wrap a model failure.
    pub fn from_model(err: ModelError) -> Self {
        Self::AgentExecution {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    /// Wrap a save failure that aborted a run.
    pub fn from_save(err: PersistenceError) -> Self {
        Self::AgentExecution {
            message: format!("failed to persist session: {err}"),
            source: Some(Box::new(err)),
        }
    }

    /// Whether the caller can simply try again later.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Cancelled | Self::MaxStepsReached { .. } | Self::Busy(_) | Self::Queue(_) => true,
            Self::AgentExecution { .. }
            | Self::Task(_)
            | Self::Persistence(_)
            | Self::Internal(_) => false,
        }
    }

    /// Error category string for event emission.
    pub fn category(&self) -> &'static str {
        match self {
            Self::AgentExecution { .. } => "agent_execution",
            Self::MaxStepsReached { .. } => "max_steps",
            Self::Busy(_) => "session_busy",
            Self::Queue(_) => "queue",
            Self::Task(_) => "task",
            Self::Cancelled => "cancelled",
            Self::Persistence(_) => "persistence",
            Self::Internal(_) => "internal",
        }
    }
}

/// Why a run stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model answered without tool calls.
    FinalAnswer,
    /// A tool quota was exhausted and the model was made to answer.
    QuotaExhausted,
    /// The step budget ran out.
    MaxSteps,
    /// The run was cancelled.
    Cancelled,
    /// Unrecoverable error.
    Error,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FinalAnswer => write!(f, "final_answer"),
            Self::QuotaExhausted => write!(f, "quota_exhausted"),
            Self::MaxSteps => write!(f, "max_steps"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn max_steps_display() {
        let err = RuntimeError::MaxStepsReached {
            max_steps: 25,
            partial: None,
        };
        assert_eq!(err.to_string(), "max steps (25) reached");
    }

    #[test]
    fn from_model_keeps_source() {
        let err = RuntimeError::from_model(ModelError::Transport("reset".into()));
        assert_eq!(
            err.to_string(),
            "agent execution failed: model transport error: reset"
        );
        assert!(err.source().is_some());
        assert_eq!(err.category(), "agent_execution");
    }

    #[test]
    fn from_save_is_agent_execution() {
        let err = RuntimeError::from_save(PersistenceError::Backend("disk full".into()));
        assert!(matches!(err, RuntimeError::AgentExecution { .. }));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn category() {
        assert_eq!(RuntimeError::Cancelled.category(), "cancelled");
        assert_eq!(RuntimeError::Busy("s".into()).category(), "session_busy");
        assert_eq!(RuntimeError::Internal("x".into()).category(), "internal");
        assert_eq!(
            RuntimeError::Queue(QueueError::Full {
                session_id: "s".into(),
                capacity: 1
            })
            .category(),
            "queue"
        );
    }

    #[test]
    fn is_recoverable() {
        assert!(RuntimeError::Cancelled.is_recoverable());
        assert!(RuntimeError::Busy("s".into()).is_recoverable());
        assert!(
            RuntimeError::MaxStepsReached {
                max_steps: 1,
                partial: None
            }
            .is_recoverable()
        );
        assert!(!RuntimeError::Internal("x".into()).is_recoverable());
        assert!(!RuntimeError::from_model(ModelError::InvalidResponse("x".into())).is_recoverable());
    }

    #[test]
    fn stop_reason_json_values() {
        assert_eq!(
            serde_json::to_string(&StopReason::FinalAnswer).unwrap(),
            "\"final_answer\""
        );
        assert_eq!(
            serde_json::to_string(&StopReason::QuotaExhausted).unwrap(),
            "\"quota_exhausted\""
        );
    }

    #[test]
    fn stop_reason_display_matches_serde() {
        for r in [
            StopReason::FinalAnswer,
            StopReason::QuotaExhausted,
            StopReason::MaxSteps,
            StopReason::Cancelled,
            StopReason::Error,
        ] {
            assert_eq!(format!("\"{r}\""), serde_json::to_string(&r).unwrap());
        }
    }
}
