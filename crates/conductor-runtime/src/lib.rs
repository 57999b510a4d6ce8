//! # conductor-runtime
//!
//! Session execution, per-session queuing and background task scheduling.
//!
//! - **Engine**: `SessionEngine` runs the step loop for one session: model call,
//!   pre-tool-use checks, quotas, tool execution, post-tool-use checks
//! - **Queue**: `SessionQueueManager` keeps one turn in flight per session and
//!   a priority backlog for the rest
//! - **Tasks**: `TaskScheduler` runs sub-agent engines under a global
//!   concurrency cap; the `task` tool exposes it to the model
//! - **Context**: history compaction with model-backed or keyword summaries
//! - **Persistence**: `SessionStore` with in-memory and JSON-file backends
//! - **Orchestrator**: the front-end surface tying the above together

#![deny(unsafe_code)]

pub mod agent;
pub mod context;
pub mod errors;
pub mod model;
pub mod orchestrator;
pub mod persistence;
pub mod queue;
pub mod session;
pub mod tasks;
pub mod tools;

#[cfg(test)]
mod test_support;

pub use agent::{EngineConfig, EngineDeps, EventEmitter, RunSummary, SessionEngine};
pub use errors::{RuntimeError, StopReason};
pub use model::{ModelClient, ModelResponse};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, RunReply};
pub use persistence::{JsonFileStore, MemorySessionStore, SessionSnapshot, SessionStore};
pub use queue::{QueueError, QueuedMessage, SessionQueueManager};
pub use session::Session;
pub use tasks::{Task, TaskError, TaskFilter, TaskRequest, TaskScheduler, TaskState};
pub use tools::{TaskTool, Tool, ToolContext, ToolRegistry};
