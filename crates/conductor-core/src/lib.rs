//! # conductor-core
//!
//! Foundation types shared by every conductor crate:
//!
//! - **Branded IDs**: `SessionId`, `MessageId`, `TaskId`, `ToolCallId`
//! - **Messages**: `Turn`, `ToolCall`, and the `ToolCallRecord` audit entry
//! - **Tools**: `ToolSpec` sent to the model, `ToolOutcome` returned by tools
//! - **Priority**: the ordering used by the backlog and the task scheduler
//! - **Events**: `ConductorEvent` lifecycle notifications
//! - **Errors**: collaborator error types (`ModelError`, `ToolError`, `PersistenceError`)
//! - **Logging**: `tracing` subscriber setup and test capture

#![deny(unsafe_code)]

pub mod constants;
pub mod errors;
pub mod events;
pub mod ids;
pub mod logging;
pub mod messages;
pub mod priority;
pub mod text;
pub mod tokens;
pub mod tools;
