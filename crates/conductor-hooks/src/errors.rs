//! Hook error types.

use thiserror::Error;

/// Errors raised by hook handlers and confirmers.
///
/// The engine never propagates these: a failing handler is logged and
/// treated as if it had allowed the call.
#[derive(Debug, Error)]
pub enum HookError {
    /// Handler exceeded its timeout.
    #[error("hook timed out after {timeout_ms}ms: {name}")]
    Timeout {
        /// Handler name.
        name: String,
        /// Timeout in milliseconds.
        timeout_ms: u64,
    },

    /// Handler reported a failure.
    #[error("hook handler error in '{name}': {message}")]
    Handler {
        /// Handler name.
        name: String,
        /// Error message.
        message: String,
    },

    /// Confirmation could not be obtained (prompt closed, channel dropped).
    #[error("confirmation unavailable: {0}")]
    Confirmation(String),
}

impl HookError {
    /// Shorthand for [`HookError::Handler`].
    pub fn handler(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler {
            name: name.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_display() {
        let err = HookError::Timeout {
            name: "audit".into(),
            timeout_ms: 5000,
        };
        assert_eq!(err.to_string(), "hook timed out after 5000ms: audit");
    }

    #[test]
    fn handler_display() {
        assert_eq!(
            HookError::handler("policy", "rules file missing").to_string(),
            "hook handler error in 'policy': rules file missing"
        );
    }

    #[test]
    fn confirmation_display() {
        assert_eq!(
            HookError::Confirmation("stdin closed".into()).to_string(),
            "confirmation unavailable: stdin closed"
        );
    }
}
