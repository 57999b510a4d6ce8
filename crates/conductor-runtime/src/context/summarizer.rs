//! Summarizers used by compaction.
//!
//! [`ModelSummarizer`] asks the model for a summary of a transcript.
//! [`KeywordSummarizer`] needs no model: it lists the user's requests, the
//! tools used and the paths touched.

use std::sync::Arc;

use async_trait::async_trait;
use conductor_core::messages::{Role, Turn};
use conductor_core::text::truncate_str;
use serde_json::{Map, Value};

use crate::model::ModelClient;

const ASSISTANT_TEXT_LIMIT: usize = 300;
const TOOL_RESULT_TEXT_LIMIT: usize = 100;
const KEY_ARG_LIMIT: usize = 100;
const MAX_TRANSCRIPT_CHARS: usize = 60_000;

const SUMMARY_INSTRUCTIONS: &str = "Summarize the conversation transcript below so the \
conversation can continue without it. Keep the user's goals, decisions made, files and \
commands involved, and any unfinished work. Reply with the summary only.";

/// Errors that can occur during summarization.
#[derive(Debug, thiserror::Error)]
pub enum SummarizerError {
    /// The model call failed.
    #[error("summarizer call failed: {0}")]
    CallFailed(String),

    /// The model answered with nothing usable.
    #[error("summarizer returned an empty summary")]
    Empty,
}

/// Turns a run of history into summary text.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize `turns`.
    async fn summarize(&self, turns: &[Turn]) -> Result<String, SummarizerError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Model-backed
// ─────────────────────────────────────────────────────────────────────────────

/// Summarizer that sends a transcript to a model without tools.
pub struct ModelSummarizer {
    model: Arc<dyn ModelClient>,
}

impl ModelSummarizer {
    /// Summarize with `model`.
    pub fn new(model: Arc<dyn ModelClient>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Summarizer for ModelSummarizer {
    async fn summarize(&self, turns: &[Turn]) -> Result<String, SummarizerError> {
        let request = [
            Turn::system(SUMMARY_INSTRUCTIONS),
            Turn::user(serialize_turns(turns)),
        ];
        let response = self
            .model
            .chat(&request, &[])
            .await
            .map_err(|e| SummarizerError::CallFailed(e.to_string()))?;
        let summary = response.content.trim();
        if summary.is_empty() {
            return Err(SummarizerError::Empty);
        }
        Ok(summary.to_owned())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Keyword
// ─────────────────────────────────────────────────────────────────────────────

/// Model-free summarizer.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordSummarizer;

#[async_trait]
impl Summarizer for KeywordSummarizer {
    async fn summarize(&self, turns: &[Turn]) -> Result<String, SummarizerError> {
        let mut requests = Vec::new();
        let mut tools: Vec<&str> = Vec::new();
        let mut paths: Vec<String> = Vec::new();
        let mut earlier = Vec::new();

        for turn in turns {
            match turn.role {
                Role::User => requests.push(truncate_str(&turn.content, 200)),
                Role::System if turn.summary => earlier.push(turn.content.as_str()),
                _ => {}
            }
            for call in &turn.tool_calls {
                if !tools.contains(&call.name.as_str()) {
                    tools.push(&call.name);
                }
                if let Some(path) = path_arg(&call.arguments) {
                    if !paths.contains(&path) {
                        paths.push(path);
                    }
                }
            }
        }

        let mut parts: Vec<String> = earlier.iter().map(|s| (*s).to_owned()).collect();
        if requests.is_empty() {
            parts.push(format!("({} turns summarized)", turns.len()));
        } else {
            parts.push(format!(
                "The user made {} requests: {}",
                requests.len(),
                requests.join("; ")
            ));
        }
        if !tools.is_empty() {
            parts.push(format!("Tools used: {}", tools.join(", ")));
        }
        if !paths.is_empty() {
            parts.push(format!("Files touched: {}", paths.join(", ")));
        }
        Ok(parts.join("\n"))
    }
}

fn path_arg(arguments: &Map<String, Value>) -> Option<String> {
    arguments
        .get("file_path")
        .or_else(|| arguments.get("path"))
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
}

// ─────────────────────────────────────────────────────────────────────────────
// Transcript
// ─────────────────────────────────────────────────────────────────────────────

/// Render turns as a line-based transcript:
///
/// ```text
/// [USER] text
/// [ASSISTANT] text (truncated)
/// [TOOL_CALL] name(path: a.rs)
/// [TOOL_RESULT] text (truncated)
/// [TOOL_ERROR] text (truncated)
/// [SUMMARY] text
/// ```
///
/// Transcripts over the size cap keep their first and last quarter.
#[must_use]
pub fn serialize_turns(turns: &[Turn]) -> String {
    let mut lines = Vec::new();
    for turn in turns {
        match turn.role {
            Role::User => lines.push(format!("[USER] {}", turn.content)),
            Role::Assistant => {
                if !turn.content.is_empty() {
                    lines.push(format!(
                        "[ASSISTANT] {}",
                        truncate_str(&turn.content, ASSISTANT_TEXT_LIMIT)
                    ));
                }
                for call in &turn.tool_calls {
                    lines.push(format!("[TOOL_CALL] {}({})", call.name, key_args(&call.arguments)));
                }
            }
            Role::Tool => {
                let tag = if turn.is_error { "TOOL_ERROR" } else { "TOOL_RESULT" };
                lines.push(format!(
                    "[{tag}] {}",
                    truncate_str(&turn.content, TOOL_RESULT_TEXT_LIMIT)
                ));
            }
            Role::System if turn.summary => lines.push(format!("[SUMMARY] {}", turn.content)),
            Role::System => {}
        }
    }
    cap_transcript(&lines.join("\n"), MAX_TRANSCRIPT_CHARS)
}

fn key_args(arguments: &Map<String, Value>) -> String {
    const KEYS: &[&str] = &["file_path", "path", "command", "pattern", "url", "query"];
    KEYS.iter()
        .filter_map(|&key| {
            arguments.get(key).map(|v| {
                let text = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                format!("{key}: {}", truncate_str(&text, KEY_ARG_LIMIT))
            })
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn cap_transcript(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        return text.to_owned();
    }
    let quarter = max_chars / 4;
    let head = truncate_str(text, quarter);
    let tail_start = text
        .char_indices()
        .map(|(i, _)| i)
        .find(|&i| i >= text.len() - quarter)
        .unwrap_or(text.len());
    let tail = &text[tail_start..];
    let omitted = text.len().saturating_sub(head.len() + tail.len());
    format!("{head}\n[... {omitted} characters omitted ...]\n{tail}")
}
