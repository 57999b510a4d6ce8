//! The `task` tool: the scheduler as seen by the model.
//!
//! One tool, with `action` selecting the operation. Results are pretty JSON
//! task snapshots; scheduler errors become failed tool results.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use conductor_core::errors::ToolError;
use conductor_core::ids::TaskId;
use conductor_core::priority::Priority;
use conductor_core::tools::{ToolOutcome, ToolSpec};
use conductor_settings::TaskSettings;
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::tasks::factory::TASK_TOOL_NAME;
use crate::tasks::{TaskError, TaskFilter, TaskRequest, TaskScheduler, TaskState, WeakTaskScheduler};

use super::{Tool, ToolContext};

const ACTIONS: [&str; 8] = [
    "create", "start", "status", "wait", "wait_all", "wait_any", "cancel", "list",
];

/// Exposes [`TaskScheduler`] to the model.
pub struct TaskTool {
    scheduler: WeakTaskScheduler,
    default_wait: Duration,
    agents: Vec<(String, String)>,
}

impl TaskTool {
    /// Tool over `scheduler`. Agent descriptions come from `settings`.
    pub fn new(scheduler: &TaskScheduler, settings: &TaskSettings) -> Self {
        let mut agents: Vec<(String, String)> = settings
            .agents
            .iter()
            .map(|(name, profile)| (name.clone(), profile.description.clone()))
            .collect();
        agents.sort();
        Self {
            scheduler: scheduler.downgrade(),
            default_wait: Duration::from_millis(settings.default_wait_timeout_ms),
            agents,
        }
    }

    fn description(&self) -> String {
        let mut text = String::from(
            "Delegate work to sub-agents that run in the background. \
             Use action=create to start a task, wait/wait_all/wait_any to collect results, \
             status or list to inspect, cancel to stop one.\n\nAgent types:",
        );
        for (name, description) in &self.agents {
            text.push_str(&format!("\n- {name}: {description}"));
        }
        text
    }

    fn timeout(&self, args: &Map<String, Value>) -> Duration {
        args.get("timeoutMs")
            .and_then(Value::as_u64)
            .map_or(self.default_wait, Duration::from_millis)
    }
}

fn str_arg<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

fn required_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str, ToolError> {
    str_arg(args, key)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ToolError::invalid_args(TASK_TOOL_NAME, format!("missing required parameter: {key}")))
}

fn task_id(args: &Map<String, Value>) -> Result<TaskId, ToolError> {
    required_str(args, "taskId").map(TaskId::from)
}

fn task_ids(args: &Map<String, Value>) -> Result<Vec<TaskId>, ToolError> {
    let ids: Vec<TaskId> = args
        .get("taskIds")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(TaskId::from).collect())
        .unwrap_or_default();
    if ids.is_empty() {
        return Err(ToolError::invalid_args(
            TASK_TOOL_NAME,
            "taskIds must contain at least one task ID",
        ));
    }
    Ok(ids)
}

fn task_error(e: TaskError) -> ToolError {
    ToolError::execution(TASK_TOOL_NAME, e.to_string())
}

fn render<T: Serialize>(value: &T) -> Result<ToolOutcome, ToolError> {
    serde_json::to_string_pretty(value)
        .map(ToolOutcome::ok)
        .map_err(|e| ToolError::execution(TASK_TOOL_NAME, e.to_string()))
}

/// Wait on `fut` unless the calling run is cancelled first.
async fn until_cancelled<T>(
    ctx: &ToolContext,
    fut: impl Future<Output = Result<T, TaskError>>,
) -> Result<T, ToolError> {
    tokio::select! {
        biased;
        () = ctx.cancellation.cancelled() => Err(ToolError::Cancelled(TASK_TOOL_NAME.into())),
        result = fut => result.map_err(task_error),
    }
}

#[async_trait]
impl Tool for TaskTool {
    fn name(&self) -> &str {
        TASK_TOOL_NAME
    }

    fn definition(&self) -> ToolSpec {
        let agent_types: Vec<&str> = self.agents.iter().map(|(name, _)| name.as_str()).collect();
        ToolSpec::new(
            TASK_TOOL_NAME,
            self.description(),
            json!({
                "type": "object",
                "properties": {
                    "action": {"type": "string", "enum": ACTIONS},
                    "description": {"type": "string", "description": "What the sub-agent should do (create)"},
                    "agentType": {"type": "string", "enum": agent_types, "description": "Sub-agent profile (create, default: general)"},
                    "priority": {"type": "string", "enum": ["low", "normal", "high", "urgent"]},
                    "autoStart": {"type": "boolean", "description": "Start immediately (create, default: true)"},
                    "taskId": {"type": "string", "description": "Task to start, inspect, wait on or cancel"},
                    "taskIds": {"type": "array", "items": {"type": "string"}, "description": "Tasks to wait on (wait_all, wait_any)"},
                    "timeoutMs": {"type": "number", "description": "Wait timeout in milliseconds"},
                    "state": {"type": "string", "enum": ["pending", "running", "completed", "failed", "cancelled"], "description": "Filter (list)"}
                },
                "required": ["action"]
            }),
        )
    }

    async fn execute(
        &self,
        args: Map<String, Value>,
        ctx: &ToolContext,
    ) -> Result<ToolOutcome, ToolError> {
        let scheduler = self
            .scheduler
            .upgrade()
            .ok_or_else(|| ToolError::execution(TASK_TOOL_NAME, "task scheduler has shut down"))?;
        let action = required_str(&args, "action")?;
        debug!(action, session_id = %ctx.session_id, depth = ctx.depth, "task tool invoked");

        match action {
            "create" => {
                let description = required_str(&args, "description")?;
                let agent_type = str_arg(&args, "agentType").unwrap_or("general");
                let priority = match str_arg(&args, "priority") {
                    Some(p) => p
                        .parse::<Priority>()
                        .map_err(|e| ToolError::invalid_args(TASK_TOOL_NAME, e))?,
                    None => Priority::Normal,
                };
                let auto_start = args.get("autoStart").and_then(Value::as_bool).unwrap_or(true);
                let request = TaskRequest::new(description, agent_type)
                    .with_priority(priority)
                    .with_parent(ctx.session_id.clone())
                    .with_auto_start(auto_start)
                    .with_depth(ctx.depth + 1);
                render(&scheduler.create_task(request).map_err(task_error)?)
            }
            "start" => render(&scheduler.start_task(&task_id(&args)?).map_err(task_error)?),
            "status" => {
                let id = task_id(&args)?;
                let task = scheduler
                    .get_task(&id)
                    .ok_or_else(|| task_error(TaskError::NotFound(id)))?;
                render(&task)
            }
            "wait" => {
                let id = task_id(&args)?;
                let task = until_cancelled(ctx, scheduler.wait_for_task(&id, self.timeout(&args))).await?;
                render(&task)
            }
            "wait_all" => {
                let ids = task_ids(&args)?;
                let tasks = until_cancelled(ctx, scheduler.wait_for_all(&ids, self.timeout(&args))).await?;
                render(&tasks)
            }
            "wait_any" => {
                let ids = task_ids(&args)?;
                let task = until_cancelled(ctx, scheduler.wait_for_any(&ids, self.timeout(&args))).await?;
                render(&task)
            }
            "cancel" => {
                let id = task_id(&args)?;
                let cancelled = scheduler.cancel_task(&id);
                render(&json!({ "taskId": id, "cancelled": cancelled }))
            }
            "list" => {
                let state = match str_arg(&args, "state") {
                    Some(s) => Some(
                        serde_json::from_value::<TaskState>(Value::String(s.to_owned()))
                            .map_err(|_| ToolError::invalid_args(TASK_TOOL_NAME, format!("unknown state: {s}")))?,
                    ),
                    None => None,
                };
                let filter = TaskFilter {
                    state,
                    parent_session: Some(ctx.session_id.clone()),
                };
                render(&scheduler.list_tasks(&filter))
            }
            other => Err(ToolError::invalid_args(
                TASK_TOOL_NAME,
                format!("unknown action \"{other}\", expected one of: {}", ACTIONS.join(", ")),
            )),
        }
    }
}
