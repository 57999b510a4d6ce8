//! Tool registry: maps tool names to implementations.

use std::collections::HashMap;
use std::sync::Arc;

use conductor_core::tools::{ToolOutcome, ToolSpec};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{Tool, ToolContext};

/// Central registry mapping tool names to their implementations.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Overwrites any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        debug!(tool_name = tool.name(), "tool registered");
        let _ = self.tools.insert(tool.name().to_owned(), tool);
    }

    /// Look up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Schemas for the model, sorted by name so prompts are stable.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|t| t.definition()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// All tool names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Whether a tool with the given name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Remove a tool by name, returning it if it existed.
    pub fn remove(&mut self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.remove(name)
    }

    /// A registry holding only the named tools that exist here.
    #[must_use]
    pub fn restricted_to<S: AsRef<str>>(&self, allowed: &[S]) -> Self {
        let tools = allowed
            .iter()
            .filter_map(|name| {
                let name = name.as_ref();
                self.tools.get(name).map(|t| (name.to_owned(), Arc::clone(t)))
            })
            .collect();
        Self { tools }
    }

    /// Execute a tool by name. Unknown tools and tool errors become failed
    /// outcomes; this never fails the caller.
    pub async fn execute(
        &self,
        name: &str,
        args: Map<String, Value>,
        ctx: &ToolContext,
    ) -> ToolOutcome {
        let Some(tool) = self.get(name) else {
            warn!(tool_name = name, "tool not found");
            return ToolOutcome::failure(format!("Tool not found: {name}"));
        };
        match tool.execute(args, ctx).await {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!(tool_name = name, error = %e, "tool returned error");
                ToolOutcome::failure(e.to_string())
            }
        }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}
