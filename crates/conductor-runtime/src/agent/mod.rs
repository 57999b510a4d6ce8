//! Session execution: the step loop and the pieces it is built from.

pub mod engine;
pub mod event_emitter;
pub mod quota;
pub mod tool_executor;

pub use engine::{EngineConfig, EngineDeps, RunSummary, SessionEngine};
pub use event_emitter::EventEmitter;
pub use quota::{QuotaExceeded, QuotaScope, QuotaTracker};
