/// Error types for continuum memory operations.
///
/// Most "failures" in the memory pipeline are not errors at all: a missing id,
/// an unknown scope or an over-capacity tier are normal operating conditions and
/// surface as empty results, `false` or `None`. The variants below are reserved
/// for caller misuse and for conditions a caller has to decide about.
use thiserror::Error;

use crate::types::Scope;

/// The main error type for continuum memory operations.
#[derive(Error, Debug)]
pub enum MemoryError {
    /// A cycle-bound operation was called before `start_inner_loop`
    #[error("No active reasoning cycle for scope '{scope}'")]
    NoActiveCycle {
        /// The scope that has no cycle context
        scope: Scope,
    },

    /// Input that cannot be clamped into something usable
    #[error("Invalid input: {reason}")]
    InvalidInput {
        /// Description of why the input was rejected
        reason: String,
    },

    /// The injected summarizer failed
    #[error("Summarization failed: {0}")]
    Summarization(String),

    /// Configuration value outside its valid range
    #[error("Invalid configuration for '{key}': {reason}")]
    Config {
        /// The offending configuration key
        key: String,
        /// Why the value was rejected
        reason: String,
    },

    /// Serialization error when converting structured outcomes
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The subsystem is switched off
    #[error("Continuum memory is disabled")]
    Disabled,
}

impl MemoryError {
    /// Shorthand for [`MemoryError::InvalidInput`].
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        MemoryError::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`MemoryError::Config`].
    pub fn config(key: impl Into<String>, reason: impl Into<String>) -> Self {
        MemoryError::Config {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error signals misuse of the cycle state machine.
    pub fn is_precondition_violation(&self) -> bool {
        matches!(self, MemoryError::NoActiveCycle { .. })
    }
}

/// Result type alias for continuum memory operations.
pub type MemoryResult<T> = Result<T, MemoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = MemoryError::NoActiveCycle {
            scope: Scope::agent("alice"),
        };
        assert_eq!(
            err.to_string(),
            "No active reasoning cycle for scope 'agent:alice'"
        );
        assert!(err.is_precondition_violation());

        let err = MemoryError::config("outer_loop_frequency", "must be at least 1");
        assert!(err.to_string().contains("outer_loop_frequency"));
        assert!(!err.is_precondition_violation());
    }
}
