//! Scripted collaborators shared by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use conductor_core::errors::{ModelError, ToolError};
use conductor_core::messages::{ToolCall, Turn};
use conductor_core::tools::{ToolOutcome, ToolSpec};
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use tokio::sync::Semaphore;

use crate::model::{ModelClient, ModelResponse};
use crate::tools::{Tool, ToolContext};

/// What one model call was sent.
#[derive(Clone, Debug)]
pub struct RequestLog {
    pub turns: usize,
    pub tools: usize,
    pub last_content: String,
}

/// Replays canned responses in order; answers "done" once the script runs out.
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<ModelResponse, ModelError>>>,
    requests: Mutex<Vec<RequestLog>>,
    hang: AtomicBool,
}

impl ScriptedModel {
    pub fn new(script: Vec<Result<ModelResponse, ModelError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            hang: AtomicBool::new(false),
        }
    }

    /// Every later call pends forever.
    pub fn hang_forever(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<RequestLog> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn chat(&self, turns: &[Turn], tools: &[ToolSpec]) -> Result<ModelResponse, ModelError> {
        self.requests.lock().push(RequestLog {
            turns: turns.len(),
            tools: tools.len(),
            last_content: turns.last().map(|t| t.content.clone()).unwrap_or_default(),
        });
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| Ok(ModelResponse::text("done")))
    }
}

/// Model whose calls block until the test opens the gate, one call per permit.
pub struct GatedModel {
    gate: Semaphore,
    entered: AtomicUsize,
}

impl GatedModel {
    pub fn new() -> Self {
        Self {
            gate: Semaphore::new(0),
            entered: AtomicUsize::new(0),
        }
    }

    /// Let `n` blocked or future calls through.
    pub fn open(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// Calls that have started.
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelClient for GatedModel {
    async fn chat(&self, _turns: &[Turn], _tools: &[ToolSpec]) -> Result<ModelResponse, ModelError> {
        let _ = self.entered.fetch_add(1, Ordering::SeqCst);
        match self.gate.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => return Err(ModelError::Transport("gate closed".into())),
        }
        Ok(ModelResponse::text("done"))
    }
}

/// Tool that counts its executions and echoes its arguments.
pub struct CountingTool {
    name: String,
    calls: AtomicUsize,
}

impl CountingTool {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for CountingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn definition(&self) -> ToolSpec {
        ToolSpec::new(&self.name, "Counts calls", json!({"type": "object"}))
    }

    async fn execute(
        &self,
        args: Map<String, Value>,
        _ctx: &ToolContext,
    ) -> Result<ToolOutcome, ToolError> {
        let _ = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ToolOutcome::ok(Value::Object(args).to_string()))
    }
}

pub fn read_call(path: &str) -> ToolCall {
    ToolCall::new("read_file", json!({ "path": path }))
}

/// Poll `cond` until it holds. Panics after five seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
