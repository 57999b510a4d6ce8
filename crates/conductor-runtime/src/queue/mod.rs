//! Per-session exclusivity and prompt backlog.
//!
//! Each session has one busy flag and one priority-ordered backlog. Slots
//! live in a sharded map, so unrelated sessions never contend on one lock,
//! and no lock is ever held while a session's work runs.

pub mod errors;
pub mod manager;

use chrono::{DateTime, Utc};
use conductor_core::ids::{MessageId, SessionId};
use conductor_core::priority::Priority;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use errors::QueueError;
pub use manager::{SessionLease, SessionQueueManager};

/// A prompt waiting for its session to become idle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMessage {
    /// Backlog entry ID.
    pub id: MessageId,
    /// Target session.
    pub session_id: SessionId,
    /// Prompt text.
    pub prompt: String,
    /// Drain priority.
    pub priority: Priority,
    /// Caller-supplied metadata, carried through untouched.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    /// Arrival time.
    pub created_at: DateTime<Utc>,
}

impl QueuedMessage {
    /// Stamp a new entry.
    #[must_use]
    pub fn new(
        session_id: SessionId,
        prompt: impl Into<String>,
        priority: Priority,
        metadata: Map<String, Value>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            session_id,
            prompt: prompt.into(),
            priority,
            metadata,
            created_at: Utc::now(),
        }
    }
}
