//! Settings type definitions.
//!
//! All types use `camelCase` JSON field names and `#[serde(default)]`, so a
//! settings file only needs the keys it changes.

mod context;
mod engine;
mod scheduling;

pub use context::*;
pub use engine::*;
pub use scheduling::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "engine": { "maxSteps": 30, "toolQuotas": { "bash": { "perTurn": 10 } } },
///   "tasks": { "maxConcurrent": 2 }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConductorSettings {
    /// Step loop limits and tool quotas.
    pub engine: EngineSettings,
    /// History compaction.
    pub compaction: CompactionSettings,
    /// Per-session backlog.
    pub queue: QueueSettings,
    /// Background task scheduling.
    pub tasks: TaskSettings,
    /// Hook plumbing.
    pub hooks: HookSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl ConductorSettings {
    /// Reject values the runtime cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.engine.max_steps == 0 {
            return Err(SettingsError::InvalidValue(
                "engine.maxSteps must be at least 1".into(),
            ));
        }
        let threshold = self.compaction.threshold;
        if threshold.is_nan() || threshold <= 0.0 || threshold > 1.0 {
            return Err(SettingsError::InvalidValue(format!(
                "compaction.threshold must be in (0, 1], got {threshold}"
            )));
        }
        if self.compaction.context_window_tokens == 0 {
            return Err(SettingsError::InvalidValue(
                "compaction.contextWindowTokens must be positive".into(),
            ));
        }
        if self.tasks.max_concurrent == 0 {
            return Err(SettingsError::InvalidValue(
                "tasks.maxConcurrent must be at least 1".into(),
            ));
        }
        if self.queue.max_backlog == Some(0) {
            return Err(SettingsError::InvalidValue(
                "queue.maxBacklog must be at least 1 when set".into(),
            ));
        }
        Ok(())
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
