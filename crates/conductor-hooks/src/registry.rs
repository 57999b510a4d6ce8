//! Hook registry.
//!
//! Holds pre- and post-tool-use handlers, each list sorted by priority
//! (descending). The registry is the source of truth for which hooks are
//! active and in what order they run.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::handler::{HookHandler, PostToolUseHandler, PreToolUseHandler};

/// Which checkpoint a handler runs at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HookPoint {
    /// Before a tool runs.
    PreToolUse,
    /// After a tool ran.
    PostToolUse,
}

/// Summary of a registered handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookInfo {
    /// Handler name.
    pub name: String,
    /// Checkpoint.
    pub point: HookPoint,
    /// Priority.
    pub priority: i32,
    /// Declared timeout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Registry of tool-use hook handlers.
#[derive(Default)]
pub struct HookRegistry {
    pre: Vec<Arc<dyn PreToolUseHandler>>,
    post: Vec<Arc<dyn PostToolUseHandler>>,
}

/// Replace any same-named handler, then keep the list sorted by priority
/// descending. Equal priorities keep registration order.
fn insert_sorted<H: HookHandler + ?Sized>(handlers: &mut Vec<Arc<H>>, handler: Arc<H>) {
    let name = handler.name().to_string();
    handlers.retain(|h| h.name() != name);
    handlers.push(handler);
    handlers.sort_by_key(|h| std::cmp::Reverse(h.priority()));
}

fn info<H: HookHandler + ?Sized>(handler: &H, point: HookPoint) -> HookInfo {
    HookInfo {
        name: handler.name().to_string(),
        point,
        priority: handler.priority(),
        timeout_ms: handler.timeout_ms(),
    }
}

impl HookRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pre-tool-use handler.
    pub fn register_pre(&mut self, handler: Arc<dyn PreToolUseHandler>) {
        debug!(name = %handler.name(), priority = handler.priority(), "registering pre-tool-use hook");
        insert_sorted(&mut self.pre, handler);
    }

    /// Register a post-tool-use handler.
    pub fn register_post(&mut self, handler: Arc<dyn PostToolUseHandler>) {
        debug!(name = %handler.name(), priority = handler.priority(), "registering post-tool-use hook");
        insert_sorted(&mut self.post, handler);
    }

    /// Remove every handler called `name`. Returns whether any was removed.
    pub fn unregister(&mut self, name: &str) -> bool {
        let before = self.count();
        self.pre.retain(|h| h.name() != name);
        self.post.retain(|h| h.name() != name);
        let removed = self.count() < before;
        if removed {
            debug!(name, "unregistered hook");
        }
        removed
    }

    /// Pre-tool-use handlers that match `tool_name`, in run order.
    #[must_use]
    pub fn pre_handlers(&self, tool_name: &str) -> Vec<Arc<dyn PreToolUseHandler>> {
        self.pre
            .iter()
            .filter(|h| h.matches(tool_name))
            .cloned()
            .collect()
    }

    /// Post-tool-use handlers that match `tool_name`, in run order.
    #[must_use]
    pub fn post_handlers(&self, tool_name: &str) -> Vec<Arc<dyn PostToolUseHandler>> {
        self.post
            .iter()
            .filter(|h| h.matches(tool_name))
            .cloned()
            .collect()
    }

    /// Describe every registered handler, sorted by name.
    #[must_use]
    pub fn list_all(&self) -> Vec<HookInfo> {
        let mut infos: Vec<HookInfo> = self
            .pre
            .iter()
            .map(|h| info(h.as_ref(), HookPoint::PreToolUse))
            .chain(
                self.post
                    .iter()
                    .map(|h| info(h.as_ref(), HookPoint::PostToolUse)),
            )
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Total registered handlers.
    #[must_use]
    pub fn count(&self) -> usize {
        self.pre.len() + self.post.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }
}
