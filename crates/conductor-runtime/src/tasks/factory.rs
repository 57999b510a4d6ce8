//! Sub-agent construction.
//!
//! A task runs an independent [`SessionEngine`] in its own session. The agent
//! type picks a profile from the task settings: which tools the sub-agent may
//! call, its system prompt and an optional step cap.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use conductor_core::ids::SessionId;
use conductor_settings::{AgentProfile, EngineSettings, TaskSettings};
use tracing::debug;

use crate::agent::{EngineConfig, EngineDeps, SessionEngine};
use crate::session::Session;
use crate::tools::{Tool, ToolRegistry};

use super::errors::TaskError;

/// Name of the tool that exposes the scheduler.
pub(crate) const TASK_TOOL_NAME: &str = "task";

/// What to build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubAgentSpec {
    /// Profile name.
    pub agent_type: String,
    /// Fresh session the sub-agent runs in.
    pub session_id: SessionId,
    /// Delegating session.
    pub parent_session_id: Option<SessionId>,
    /// Nesting depth of the sub-agent.
    pub depth: u32,
}

/// Builds sub-agent engines for the scheduler.
#[async_trait]
pub trait SubAgentFactory: Send + Sync {
    /// Agent types this factory can build, sorted.
    fn agent_types(&self) -> Vec<String>;

    /// Build an engine for `spec`.
    async fn create(&self, spec: &SubAgentSpec) -> Result<SessionEngine, TaskError>;
}

/// Builds engines from the parent's collaborators, restricted per profile.
pub struct DefaultSubAgentFactory {
    deps: EngineDeps,
    engine: EngineSettings,
    agents: HashMap<String, AgentProfile>,
    max_depth: u32,
    /// Set after construction; the task tool needs the scheduler, which needs
    /// this factory.
    task_tool: tokio::sync::OnceCell<Arc<dyn Tool>>,
}

impl DefaultSubAgentFactory {
    /// Factory sharing `deps` (model, store, checks, emitter) with its parent.
    pub fn new(deps: EngineDeps, engine: EngineSettings, tasks: &TaskSettings) -> Self {
        Self {
            deps,
            engine,
            agents: tasks.agents.clone(),
            max_depth: tasks.max_depth,
            task_tool: tokio::sync::OnceCell::new(),
        }
    }

    /// Let sub-agents below the depth limit delegate further.
    pub fn set_task_tool(&self, tool: Arc<dyn Tool>) {
        let _ = self.task_tool.set(tool);
    }

    fn tools_for(&self, profile: &AgentProfile, depth: u32) -> ToolRegistry {
        let mut tools = match &profile.allowed_tools {
            Some(allowed) => self.deps.tools.restricted_to(allowed.as_slice()),
            None => self.deps.tools.as_ref().clone(),
        };
        let _ = tools.remove(TASK_TOOL_NAME);

        let may_delegate = depth < self.max_depth
            && profile
                .allowed_tools
                .as_ref()
                .is_none_or(|allowed| allowed.iter().any(|t| t == TASK_TOOL_NAME));
        if may_delegate {
            if let Some(tool) = self.task_tool.get() {
                tools.register(Arc::clone(tool));
            }
        }
        tools
    }
}

#[async_trait]
impl SubAgentFactory for DefaultSubAgentFactory {
    fn agent_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.agents.keys().cloned().collect();
        types.sort();
        types
    }

    async fn create(&self, spec: &SubAgentSpec) -> Result<SessionEngine, TaskError> {
        let profile = self
            .agents
            .get(&spec.agent_type)
            .ok_or_else(|| TaskError::UnknownAgentType(spec.agent_type.clone()))?;

        let tools = self.tools_for(profile, spec.depth);
        debug!(
            agent_type = %spec.agent_type,
            session_id = %spec.session_id,
            depth = spec.depth,
            tools = ?tools.names(),
            "building sub-agent"
        );

        let mut settings = self.engine.clone();
        if let Some(max_steps) = profile.max_steps {
            settings.max_steps = max_steps;
        }
        let mut config = EngineConfig::new(settings).with_depth(spec.depth);
        if !profile.system_prompt.is_empty() {
            config = config.with_system_prompt(&profile.system_prompt);
        }
        let deps = self.deps.clone().with_tools(Arc::new(tools));
        Ok(SessionEngine::new(
            Session::new(spec.session_id.clone()),
            config,
            deps,
        ))
    }
}
