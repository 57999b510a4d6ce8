//! Session queue manager.

use std::collections::VecDeque;
use std::sync::Arc;

use conductor_core::ids::SessionId;
use conductor_core::priority::Priority;
use dashmap::DashMap;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::QueuedMessage;
use super::errors::QueueError;

#[derive(Default)]
struct SessionSlot {
    busy: bool,
    backlog: VecDeque<QueuedMessage>,
}

impl SessionSlot {
    fn is_idle_and_empty(&self) -> bool {
        !self.busy && self.backlog.is_empty()
    }
}

/// Tracks which sessions are executing and what is waiting for each.
///
/// `acquire` never blocks: contention returns `false`, which callers treat
/// as "queue or reject". Every successful `acquire` must be matched by
/// exactly one `release`; [`SessionLease`] does that on drop.
pub struct SessionQueueManager {
    slots: DashMap<SessionId, SessionSlot>,
    max_backlog: Option<usize>,
}

impl SessionQueueManager {
    /// Manager with an unbounded backlog per session.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_backlog(None)
    }

    /// Manager whose per-session backlog holds at most `max_backlog` prompts.
    #[must_use]
    pub fn with_max_backlog(max_backlog: Option<usize>) -> Self {
        Self {
            slots: DashMap::new(),
            max_backlog,
        }
    }

    /// Whether a request is executing for `id`.
    pub fn is_busy(&self, id: &SessionId) -> bool {
        self.slots.get(id).is_some_and(|slot| slot.busy)
    }

    /// Claim exclusive execution for `id`. Returns `false` if already held.
    pub fn acquire(&self, id: &SessionId) -> bool {
        let mut slot = self.slots.entry(id.clone()).or_default();
        if slot.busy {
            return false;
        }
        slot.busy = true;
        debug!(session_id = %id, "session acquired");
        true
    }

    /// Give up exclusive execution for `id`.
    pub fn release(&self, id: &SessionId) {
        match self.slots.get_mut(id) {
            Some(mut slot) if slot.busy => {
                slot.busy = false;
                debug!(session_id = %id, queued = slot.backlog.len(), "session released");
            }
            _ => {
                warn!(session_id = %id, "release of a session that was not acquired");
                return;
            }
        }
        self.prune(id);
    }

    /// Claim `id` and wrap the claim in a guard that releases on drop.
    pub fn try_lease(self: &Arc<Self>, id: &SessionId) -> Option<SessionLease> {
        self.acquire(id).then(|| SessionLease {
            manager: Arc::clone(self),
            session_id: id.clone(),
        })
    }

    /// Add a prompt to `id`'s backlog, behind everything of equal or higher
    /// priority.
    pub fn enqueue(
        &self,
        id: &SessionId,
        prompt: impl Into<String>,
        priority: Priority,
        metadata: Map<String, Value>,
    ) -> Result<QueuedMessage, QueueError> {
        let mut slot = self.slots.entry(id.clone()).or_default();
        if let Some(capacity) = self.max_backlog {
            if slot.backlog.len() >= capacity {
                return Err(QueueError::Full {
                    session_id: id.clone(),
                    capacity,
                });
            }
        }
        let message = QueuedMessage::new(id.clone(), prompt, priority, metadata);
        let position = slot
            .backlog
            .iter()
            .position(|queued| queued.priority < priority)
            .unwrap_or(slot.backlog.len());
        slot.backlog.insert(position, message.clone());
        debug!(
            session_id = %id,
            message_id = %message.id,
            %priority,
            queued = slot.backlog.len(),
            "prompt queued"
        );
        Ok(message)
    }

    /// Remove and return the next prompt for `id`.
    pub fn dequeue(&self, id: &SessionId) -> Option<QueuedMessage> {
        let message = self.slots.get_mut(id)?.backlog.pop_front();
        self.prune(id);
        message
    }

    /// Backlog length for `id`.
    pub fn queued_count(&self, id: &SessionId) -> usize {
        self.slots.get(id).map_or(0, |slot| slot.backlog.len())
    }

    /// Snapshot of `id`'s backlog in drain order.
    pub fn queued_prompts(&self, id: &SessionId) -> Vec<QueuedMessage> {
        self.slots
            .get(id)
            .map(|slot| slot.backlog.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop everything queued for `id`. Returns how many prompts were removed.
    pub fn clear_queue(&self, id: &SessionId) -> usize {
        let removed = self.slots.get_mut(id).map_or(0, |mut slot| {
            let n = slot.backlog.len();
            slot.backlog.clear();
            n
        });
        self.prune(id);
        removed
    }

    /// Sessions currently executing.
    pub fn busy_sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self
            .slots
            .iter()
            .filter(|entry| entry.busy)
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Drop the slot once it holds no state, so the map does not grow with
    /// every session ever seen.
    fn prune(&self, id: &SessionId) {
        let _ = self.slots.remove_if(id, |_, slot| slot.is_idle_and_empty());
    }
}

impl Default for SessionQueueManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive execution right for one session. Releases exactly once on drop.
pub struct SessionLease {
    manager: Arc<SessionQueueManager>,
    session_id: SessionId,
}

impl SessionLease {
    /// Session this lease holds.
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.manager.release(&self.session_id);
    }
}

impl std::fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLease")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}
