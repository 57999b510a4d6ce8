//! Front-end surface: one explicitly constructed context that owns the queue
//! manager, the task scheduler and the engine collaborators.

#[allow(clippy::module_inception)]
pub mod orchestrator;

pub use orchestrator::{Orchestrator, OrchestratorBuilder, RunReply};
