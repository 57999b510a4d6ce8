//! Broadcast fan-out for [`ConductorEvent`]s.

use std::sync::atomic::{AtomicU64, Ordering};

use conductor_core::events::{BaseEvent, ConductorEvent};
use conductor_core::ids::{SessionId, TaskId};
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 1024;

/// Broadcast-based event emitter.
///
/// `emit` never awaits. A receiver that falls more than the channel capacity
/// behind gets `RecvError::Lagged` instead of slowing the sender.
pub struct EventEmitter {
    tx: broadcast::Sender<ConductorEvent>,
    emit_count: AtomicU64,
}

impl EventEmitter {
    /// Emitter with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Emitter with a custom capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            emit_count: AtomicU64::new(0),
        }
    }

    /// Publish to every subscriber. Returns how many received it.
    pub fn emit(&self, event: ConductorEvent) -> usize {
        let _ = self.emit_count.fetch_add(1, Ordering::Relaxed);
        self.tx.send(event).unwrap_or(0)
    }

    /// Publish a task state change against the parent session (or the task
    /// itself when it has no parent).
    pub fn emit_task_state(&self, parent: Option<&SessionId>, task_id: &TaskId, state: &str) -> usize {
        let session = parent.map_or_else(|| task_id.to_string(), ToString::to_string);
        self.emit(ConductorEvent::TaskStateChanged {
            base: BaseEvent::now(session),
            task_id: task_id.to_string(),
            state: state.to_owned(),
        })
    }

    /// Receive everything emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ConductorEvent> {
        self.tx.subscribe()
    }

    /// Active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Events emitted so far, delivered or not.
    pub fn emit_count(&self) -> u64 {
        self.emit_count.load(Ordering::Relaxed)
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}
