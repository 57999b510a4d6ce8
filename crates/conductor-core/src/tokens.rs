//! Token estimation.
//!
//! A chars/4 approximation. Good enough to decide when history is getting
//! close to the context window; never used for billing.

use crate::constants::{CHARS_PER_TOKEN, TURN_OVERHEAD_TOKENS};
use crate::messages::Turn;

fn chars_to_tokens(chars: usize) -> usize {
    chars.div_ceil(CHARS_PER_TOKEN)
}

/// Estimate tokens for a piece of text.
#[must_use]
pub fn estimate_text_tokens(text: &str) -> usize {
    chars_to_tokens(text.len())
}

/// Estimate tokens for one turn, tool calls included.
#[must_use]
pub fn estimate_turn_tokens(turn: &Turn) -> usize {
    let call_chars: usize = turn
        .tool_calls
        .iter()
        .map(|call| {
            call.name.len()
                + serde_json::to_string(&call.arguments).map_or(0, |s| s.len())
        })
        .sum();
    chars_to_tokens(turn.content.len() + call_chars) + TURN_OVERHEAD_TOKENS
}

/// Estimate tokens for a whole history.
#[must_use]
pub fn estimate_history_tokens(turns: &[Turn]) -> usize {
    turns.iter().map(estimate_turn_tokens).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ToolCall;
    use serde_json::json;

    #[test]
    fn text_rounds_up() {
        assert_eq!(estimate_text_tokens(""), 0);
        assert_eq!(estimate_text_tokens("abc"), 1);
        assert_eq!(estimate_text_tokens("abcd"), 1);
        assert_eq!(estimate_text_tokens("abcde"), 2);
    }

    #[test]
    fn turn_includes_overhead() {
        assert_eq!(estimate_turn_tokens(&Turn::user("")), TURN_OVERHEAD_TOKENS);
        assert_eq!(
            estimate_turn_tokens(&Turn::user("a".repeat(40))),
            10 + TURN_OVERHEAD_TOKENS
        );
    }

    #[test]
    fn tool_calls_count() {
        let bare = Turn::assistant("");
        let with_call = Turn::assistant_with_tools(
            "",
            vec![ToolCall::new("read_file", json!({"path": "src/lib.rs"}))],
        );
        assert!(estimate_turn_tokens(&with_call) > estimate_turn_tokens(&bare));
    }

    #[test]
    fn history_sums_turns() {
        let turns = vec![Turn::user("a".repeat(8)), Turn::assistant("b".repeat(8))];
        assert_eq!(
            estimate_history_tokens(&turns),
            2 * (2 + TURN_OVERHEAD_TOKENS)
        );
    }
}
