//! # conductor-hooks
//!
//! Tool-use checkpoints for the session engine.
//!
//! - **Checks**: [`PreToolUseCheck`](checks::PreToolUseCheck) and
//!   [`PostToolUseCheck`](checks::PostToolUseCheck) are what the engine calls
//!   around every tool; [`Confirmer`](checks::Confirmer) resolves `Ask`.
//! - **Handlers**: prioritized, tool-filtered units registered in a
//!   [`HookRegistry`](registry::HookRegistry).
//! - **Engine**: [`HookEngine`](engine::HookEngine) runs the handlers and
//!   implements both check traits.
//!
//! ## Fail-Open
//!
//! Handler errors and timeouts never crash a session. They are logged and
//! treated as `Allow` / no change.

#![deny(unsafe_code)]

pub mod checks;
pub mod engine;
pub mod errors;
pub mod handler;
pub mod registry;
pub mod types;

pub use checks::{Confirmer, PostToolUseCheck, PreToolUseCheck, StaticConfirmer};
pub use engine::HookEngine;
pub use errors::HookError;
pub use handler::{HookHandler, PostToolUseHandler, PreToolUseHandler};
pub use registry::HookRegistry;
pub use types::{
    ConfirmationRequest, PermissionDecision, PostToolUseOutcome, PostToolUseRequest,
    PreToolUseOutcome, PreToolUseRequest,
};
