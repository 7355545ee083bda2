//! Exit codes for foundationsctl

use foundations_common::error::{SessionError, StoreError};

/// Exit code for success
pub const EXIT_SUCCESS: i32 = 0;

/// Exit code for general errors
pub const EXIT_GENERAL_ERROR: i32 = 1;

/// Exit code when the server returns invalid JSON
pub const EXIT_INVALID_RESPONSE: i32 = 65;

/// Exit code when a record does not exist
pub const EXIT_NOT_FOUND: i32 = 66;

/// Exit code when the server is unreachable
pub const EXIT_SERVER_UNAVAILABLE: i32 = 70;

/// Exit code when the command needs a signed-in user or admin token
pub const EXIT_NOT_AUTHORIZED: i32 = 77;

/// Map an error chain to an exit code
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(store) = cause.downcast_ref::<StoreError>() {
            return match store {
                StoreError::Unauthorized => EXIT_NOT_AUTHORIZED,
                StoreError::NotFound(_) => EXIT_NOT_FOUND,
                StoreError::Transport(_) => EXIT_SERVER_UNAVAILABLE,
                StoreError::Decode(_) => EXIT_INVALID_RESPONSE,
                StoreError::Server { status: 401 | 403, .. } => EXIT_NOT_AUTHORIZED,
                StoreError::Server { .. } => EXIT_GENERAL_ERROR,
            };
        }
        if let Some(SessionError::SaveFailed(_)) = cause.downcast_ref::<SessionError>() {
            return EXIT_SERVER_UNAVAILABLE;
        }
    }
    EXIT_GENERAL_ERROR
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_store_errors_map_to_codes() {
        let err = anyhow::Error::new(StoreError::Transport("refused".into()));
        assert_eq!(exit_code_for(&err), EXIT_SERVER_UNAVAILABLE);

        let err = anyhow::Error::new(StoreError::Server {
            status: 403,
            message: "Admin token required".into(),
        });
        assert_eq!(exit_code_for(&err), EXIT_NOT_AUTHORIZED);
    }

    #[test]
    fn test_context_does_not_hide_cause() {
        let result: Result<(), StoreError> = Err(StoreError::NotFound("a1".into()));
        let err = result.context("Failed to open assessment").unwrap_err();
        assert_eq!(exit_code_for(&err), EXIT_NOT_FOUND);
    }

    #[test]
    fn test_other_errors_are_general() {
        assert_eq!(exit_code_for(&anyhow::anyhow!("boom")), EXIT_GENERAL_ERROR);
    }
}
