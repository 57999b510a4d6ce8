//! Backlog errors.

use conductor_core::ids::SessionId;
use thiserror::Error;

/// Errors from backlog operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The session's backlog is at `max_backlog`.
    #[error("backlog full for session {session_id} (capacity {capacity})")]
    Full {
        /// Session whose backlog is full.
        session_id: SessionId,
        /// Configured capacity.
        capacity: usize,
    },
}

impl QueueError {
    /// Category string for event emission.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Full { .. } => "backlog_full",
        }
    }
}
