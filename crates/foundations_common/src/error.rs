//! Error types for the assessment core.

use thiserror::Error;

/// Errors raised by the assessment session and insights tracker.
///
/// None of these are fatal: validation errors are fixed by answering,
/// save failures by retrying, read-only by retaking.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("{message}")]
    Validation {
        step_id: Option<String>,
        message: String,
    },

    #[error("This assessment is read-only")]
    ReadOnly,

    #[error("A save is already in progress")]
    SaveInFlight,

    #[error("Save failed: {0}")]
    SaveFailed(String),

    #[error("Nothing to save")]
    NothingPending,
}

impl SessionError {
    /// Short machine-readable code, stable across message wording changes.
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::Validation { .. } => "validation",
            SessionError::ReadOnly => "read_only",
            SessionError::SaveInFlight => "save_in_flight",
            SessionError::SaveFailed(_) => "save_failed",
            SessionError::NothingPending => "nothing_pending",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::SaveFailed(_))
    }
}

/// Errors returned by remote record stores.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Not signed in")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Invalid response: {0}")]
    Decode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_save_failures_are_retryable() {
        assert!(SessionError::SaveFailed("offline".into()).is_retryable());
        assert!(!SessionError::ReadOnly.is_retryable());
        assert!(!SessionError::SaveInFlight.is_retryable());
    }

    #[test]
    fn test_validation_message_is_display() {
        let err = SessionError::Validation {
            step_id: Some("core_values".into()),
            message: "This question is required".into(),
        };
        assert_eq!(err.to_string(), "This question is required");
        assert_eq!(err.code(), "validation");
    }
}
