//! History compaction.
//!
//! When estimated history tokens pass `threshold × context_window`, every
//! turn except the most recent `preserve_recent_turns` is replaced by one
//! summary turn. If the summarizer fails (or none is attached) the prefix is
//! dropped and the summary turn only says how much was removed.

use std::sync::Arc;

use async_trait::async_trait;
use conductor_core::constants::SUMMARY_PREFIX;
use conductor_core::messages::Turn;
use conductor_core::text::truncate_str;
use conductor_core::tokens::estimate_history_tokens;
use conductor_settings::CompactionSettings;
use tracing::{debug, warn};

use super::summarizer::Summarizer;

/// What a compaction did.
#[derive(Clone, Debug, PartialEq)]
pub struct CompactionResult {
    /// The new history.
    pub turns: Vec<Turn>,
    /// Estimated tokens before.
    pub tokens_before: usize,
    /// Estimated tokens after.
    pub tokens_after: usize,
    /// Turns folded into the summary. Zero means nothing changed.
    pub compacted_turns: usize,
    /// Whether truncation replaced summarization.
    pub truncated: bool,
}

impl CompactionResult {
    fn unchanged(turns: Vec<Turn>) -> Self {
        let tokens = estimate_history_tokens(&turns);
        Self {
            turns,
            tokens_before: tokens,
            tokens_after: tokens,
            compacted_turns: 0,
            truncated: false,
        }
    }

    /// Whether the history was rewritten.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.compacted_turns > 0
    }
}

/// Decides when to compact, and compacts.
#[async_trait]
pub trait Compactor: Send + Sync {
    /// Whether `turns` is over budget and has something to fold.
    fn should_compact(&self, turns: &[Turn]) -> bool;

    /// Replace everything but the most recent turns with a summary.
    /// The most recent turns are never dropped.
    async fn compact(&self, turns: Vec<Turn>) -> CompactionResult;
}

/// Default compactor.
pub struct ContextCompactor {
    settings: CompactionSettings,
    summarizer: Option<Arc<dyn Summarizer>>,
}

impl ContextCompactor {
    /// Compactor that always truncates.
    #[must_use]
    pub fn new(settings: CompactionSettings) -> Self {
        Self {
            settings,
            summarizer: None,
        }
    }

    /// Summarize folded turns with `summarizer`.
    #[must_use]
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Settings in effect.
    #[must_use]
    pub fn settings(&self) -> &CompactionSettings {
        &self.settings
    }

    /// Index of the first preserved turn. Kept turns never open with a tool
    /// result, since its call would be folded away.
    fn split_point(&self, turns: &[Turn]) -> usize {
        let mut split = turns.len().saturating_sub(self.settings.preserve_recent_turns);
        while split > 0 && turns.get(split).is_some_and(Turn::is_tool_result) {
            split -= 1;
        }
        split
    }

    /// Whether the prefix before `split` holds anything to fold.
    fn has_foldable_prefix(turns: &[Turn], split: usize) -> bool {
        match &turns[..split] {
            [] => false,
            [only] => !only.summary,
            _ => true,
        }
    }

    fn summary_turn(&self, body: &str) -> Turn {
        let text = format!("{SUMMARY_PREFIX}\n\n{body}");
        Turn::summary(truncate_str(&text, self.settings.max_summary_chars))
    }
}

#[async_trait]
impl Compactor for ContextCompactor {
    fn should_compact(&self, turns: &[Turn]) -> bool {
        if !self.settings.enabled || turns.is_empty() {
            return false;
        }
        if estimate_history_tokens(turns) <= self.settings.trigger_tokens() {
            return false;
        }
        Self::has_foldable_prefix(turns, self.split_point(turns))
    }

    async fn compact(&self, turns: Vec<Turn>) -> CompactionResult {
        let split = self.split_point(&turns);
        if !Self::has_foldable_prefix(&turns, split) {
            return CompactionResult::unchanged(turns);
        }

        let tokens_before = estimate_history_tokens(&turns);
        let (prefix, recent) = turns.split_at(split);

        let summary = match &self.summarizer {
            Some(summarizer) => match summarizer.summarize(prefix).await {
                Ok(text) => Some(text),
                Err(e) => {
                    warn!(error = %e, "summarization failed, truncating instead");
                    None
                }
            },
            None => None,
        };
        let truncated = summary.is_none();
        let body = summary.unwrap_or_else(|| {
            format!(
                "{} earlier turns were removed to fit the context window.",
                prefix.len()
            )
        });

        let mut compacted = Vec::with_capacity(recent.len() + 1);
        compacted.push(self.summary_turn(&body));
        compacted.extend_from_slice(recent);
        let tokens_after = estimate_history_tokens(&compacted);

        debug!(
            compacted_turns = prefix.len(),
            tokens_before, tokens_after, truncated, "history compacted"
        );
        CompactionResult {
            compacted_turns: prefix.len(),
            turns: compacted,
            tokens_before,
            tokens_after,
            truncated,
        }
    }
}
