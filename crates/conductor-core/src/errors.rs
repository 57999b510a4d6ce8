//! Errors raised by external collaborators.
//!
//! The model client, tools and the session store are implemented outside
//! this workspace. These types are the contract they report failures with;
//! the runtime decides what each one means for a run.

use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// ModelError
// ─────────────────────────────────────────────────────────────────────────────

/// Failure of a model call.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Network or protocol failure talking to the model.
    #[error("model transport error: {0}")]
    Transport(String),
    /// The provider rejected the call for rate reasons.
    #[error("model rate limited")]
    RateLimited {
        /// Suggested delay before retrying.
        retry_after_ms: Option<u64>,
    },
    /// The response could not be interpreted.
    #[error("invalid model response: {0}")]
    InvalidResponse(String),
}

impl ModelError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::RateLimited { .. })
    }

    /// Category string for event emission.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::RateLimited { .. } => "rate_limit",
            Self::InvalidResponse(_) => "invalid_response",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ToolError
// ─────────────────────────────────────────────────────────────────────────────

/// Failure inside a tool implementation.
///
/// The engine turns these into failed tool results; they never abort a run.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Arguments did not match the tool's schema.
    #[error("{tool_name}: invalid arguments: {message}")]
    InvalidArguments {
        /// Tool name.
        tool_name: String,
        /// What was wrong.
        message: String,
    },
    /// The tool ran and failed.
    #[error("{tool_name}: {message}")]
    Execution {
        /// Tool name.
        tool_name: String,
        /// Error description.
        message: String,
    },
    /// The tool observed cancellation and stopped.
    #[error("{0}: cancelled")]
    Cancelled(String),
}

impl ToolError {
    /// Shorthand for [`ToolError::InvalidArguments`].
    pub fn invalid_args(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Shorthand for [`ToolError::Execution`].
    pub fn execution(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PersistenceError
// ─────────────────────────────────────────────────────────────────────────────

/// Failure loading or saving session history.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Filesystem failure.
    #[error("session store I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// History could not be encoded or decoded.
    #[error("session store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Any other backend failure.
    #[error("session store error: {0}")]
    Backend(String),
}
