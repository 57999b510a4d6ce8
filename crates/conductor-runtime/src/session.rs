//! In-memory session state owned by one engine.

use conductor_core::ids::SessionId;
use conductor_core::messages::{ToolCallRecord, Turn};

use crate::agent::quota::QuotaTracker;
use crate::persistence::SessionSnapshot;

/// A conversation: history, audit trail and quota counters.
///
/// Only the engine holding the session's lease mutates it; it is never shared
/// across two engines.
#[derive(Clone, Debug)]
pub struct Session {
    id: SessionId,
    turns: Vec<Turn>,
    records: Vec<ToolCallRecord>,
    quotas: QuotaTracker,
}

impl Session {
    /// Empty session.
    #[must_use]
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            turns: Vec::new(),
            records: Vec::new(),
            quotas: QuotaTracker::new(),
        }
    }

    /// Rebuild from persisted state. Session-wide quota counters are
    /// recomputed from the audit trail.
    #[must_use]
    pub fn from_snapshot(id: SessionId, snapshot: SessionSnapshot) -> Self {
        Self {
            quotas: QuotaTracker::from_records(&snapshot.records),
            id,
            turns: snapshot.turns,
            records: snapshot.records,
        }
    }

    /// Session ID.
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Ordered history.
    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Ordered audit trail.
    #[must_use]
    pub fn records(&self) -> &[ToolCallRecord] {
        &self.records
    }

    /// Quota counters.
    #[must_use]
    pub fn quotas(&self) -> &QuotaTracker {
        &self.quotas
    }

    pub(crate) fn quotas_mut(&mut self) -> &mut QuotaTracker {
        &mut self.quotas
    }

    pub(crate) fn push_turn(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub(crate) fn push_record(&mut self, record: ToolCallRecord) {
        self.records.push(record);
    }

    pub(crate) fn take_turns(&mut self) -> Vec<Turn> {
        std::mem::take(&mut self.turns)
    }

    pub(crate) fn replace_turns(&mut self, turns: Vec<Turn>) {
        self.turns = turns;
    }

    /// Drop history, records and every quota counter.
    pub fn clear(&mut self) {
        self.turns.clear();
        self.records.clear();
        self.quotas.reset();
    }

    /// What the persistence collaborator stores.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            turns: self.turns.clone(),
            records: self.records.clone(),
        }
    }
}
