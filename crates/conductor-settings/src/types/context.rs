//! Context compaction settings.

use serde::{Deserialize, Serialize};

/// When and how history is compacted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompactionSettings {
    /// Master switch.
    pub enabled: bool,
    /// Model context window in tokens.
    pub context_window_tokens: usize,
    /// Fraction of the window (0.0–1.0) above which history is compacted.
    pub threshold: f64,
    /// Most recent turns never folded into the summary.
    pub preserve_recent_turns: usize,
    /// Upper bound on the summary length in characters.
    pub max_summary_chars: usize,
}

impl Default for CompactionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            context_window_tokens: 200_000,
            threshold: 0.8,
            preserve_recent_turns: 6,
            max_summary_chars: 8_000,
        }
    }
}

impl CompactionSettings {
    /// Token count above which compaction triggers.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn trigger_tokens(&self) -> usize {
        (self.context_window_tokens as f64 * self.threshold) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = CompactionSettings::default();
        assert!(s.enabled);
        assert_eq!(s.context_window_tokens, 200_000);
        assert!((s.threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(s.preserve_recent_turns, 6);
    }

    #[test]
    fn trigger_tokens() {
        let s = CompactionSettings {
            context_window_tokens: 1_000,
            threshold: 0.5,
            ..Default::default()
        };
        assert_eq!(s.trigger_tokens(), 500);
    }

    #[test]
    fn camel_case_json() {
        let s: CompactionSettings =
            serde_json::from_str(r#"{"contextWindowTokens": 32000, "preserveRecentTurns": 2}"#)
                .unwrap();
        assert_eq!(s.context_window_tokens, 32_000);
        assert_eq!(s.preserve_recent_turns, 2);
        assert!(s.enabled);
    }
}
