//! Per-tool call quotas.
//!
//! Two counters per tool name: one for the current run, one for the whole
//! session. Only calls that actually executed count; denied, cancelled and
//! preempted calls do not.

use std::collections::HashMap;

use conductor_core::messages::ToolCallRecord;
use conductor_settings::{EngineSettings, ToolQuota};

/// Which cap was hit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuotaScope {
    /// Within the current run.
    Turn,
    /// Over the session's lifetime.
    Session,
}

impl std::fmt::Display for QuotaScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Turn => write!(f, "turn"),
            Self::Session => write!(f, "session"),
        }
    }
}

/// A refused call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuotaExceeded {
    /// Cap that was hit.
    pub scope: QuotaScope,
    /// Value of that cap.
    pub limit: u32,
}

/// Call counters for one session.
#[derive(Clone, Debug, Default)]
pub struct QuotaTracker {
    turn: HashMap<String, u32>,
    session: HashMap<String, u32>,
}

impl QuotaTracker {
    /// Empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild session counters from a persisted audit trail.
    #[must_use]
    pub fn from_records(records: &[ToolCallRecord]) -> Self {
        let mut tracker = Self::new();
        for record in records.iter().filter(|r| r.outcome.executed()) {
            *tracker.session.entry(record.tool_name.clone()).or_default() += 1;
        }
        tracker
    }

    /// Start a new run.
    pub fn reset_turn(&mut self) {
        self.turn.clear();
    }

    /// Forget everything (history was cleared).
    pub fn reset(&mut self) {
        self.turn.clear();
        self.session.clear();
    }

    /// Whether one more call to `tool_name` would exceed `quota`.
    pub fn check(&self, tool_name: &str, quota: ToolQuota) -> Option<QuotaExceeded> {
        if let Some(limit) = quota.per_turn {
            if self.turn_count(tool_name) >= limit {
                return Some(QuotaExceeded {
                    scope: QuotaScope::Turn,
                    limit,
                });
            }
        }
        if let Some(limit) = quota.per_session {
            if self.session_count(tool_name) >= limit {
                return Some(QuotaExceeded {
                    scope: QuotaScope::Session,
                    limit,
                });
            }
        }
        None
    }

    /// [`check`](Self::check) with the quota looked up in `settings`.
    pub fn check_with(&self, tool_name: &str, settings: &EngineSettings) -> Option<QuotaExceeded> {
        self.check(tool_name, settings.quota_for(tool_name))
    }

    /// Count one executed call.
    pub fn record(&mut self, tool_name: &str) {
        *self.turn.entry(tool_name.to_owned()).or_default() += 1;
        *self.session.entry(tool_name.to_owned()).or_default() += 1;
    }

    /// Executions of `tool_name` in the current run.
    pub fn turn_count(&self, tool_name: &str) -> u32 {
        self.turn.get(tool_name).copied().unwrap_or(0)
    }

    /// Executions of `tool_name` over the session.
    pub fn session_count(&self, tool_name: &str) -> u32 {
        self.session.get(tool_name).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::messages::CallOutcome;
    use serde_json::Map;

    fn quota(per_turn: Option<u32>, per_session: Option<u32>) -> ToolQuota {
        ToolQuota {
            per_turn,
            per_session,
        }
    }

    #[test]
    fn per_turn_cap() {
        let mut t = QuotaTracker::new();
        let q = quota(Some(2), None);
        assert!(t.check("ls", q).is_none());
        t.record("ls");
        t.record("ls");
        assert_eq!(
            t.check("ls", q),
            Some(QuotaExceeded {
                scope: QuotaScope::Turn,
                limit: 2
            })
        );
        assert!(t.check("grep", q).is_none());
    }

    #[test]
    fn reset_turn_keeps_session_count() {
        let mut t = QuotaTracker::new();
        t.record("ls");
        t.reset_turn();
        assert_eq!(t.turn_count("ls"), 0);
        assert_eq!(t.session_count("ls"), 1);
        let q = quota(None, Some(1));
        assert_eq!(t.check("ls", q).map(|e| e.scope), Some(QuotaScope::Session));
    }

    #[test]
    fn reset_clears_everything() {
        let mut t = QuotaTracker::new();
        t.record("ls");
        t.reset();
        assert_eq!(t.session_count("ls"), 0);
    }

    #[test]
    fn unlimited_never_trips() {
        let mut t = QuotaTracker::new();
        for _ in 0..1_000 {
            t.record("ls");
        }
        assert!(t.check("ls", ToolQuota::unlimited()).is_none());
    }

    #[test]
    fn from_records_counts_executed_only() {
        let records = vec![
            ToolCallRecord::new("ls", Map::new(), 1, CallOutcome::Succeeded),
            ToolCallRecord::new("ls", Map::new(), 1, CallOutcome::Failed),
            ToolCallRecord::new("ls", Map::new(), 2, CallOutcome::Denied),
            ToolCallRecord::new("ls", Map::new(), 2, CallOutcome::QuotaExceeded),
        ];
        let t = QuotaTracker::from_records(&records);
        assert_eq!(t.session_count("ls"), 2);
        assert_eq!(t.turn_count("ls"), 0);
    }

    #[test]
    fn check_with_uses_override() {
        let mut settings = EngineSettings::default();
        let _ = settings.tool_quotas.insert("bash".into(), quota(Some(1), None));
        let mut t = QuotaTracker::new();
        t.record("bash");
        t.record("ls");
        assert!(t.check_with("bash", &settings).is_some());
        assert!(t.check_with("ls", &settings).is_none());
    }
}
