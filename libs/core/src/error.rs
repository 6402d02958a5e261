use thiserror::Error;

/// Failures surfaced synchronously to a caller of the dispatch boundary.
///
/// In-loop failures never take this shape; they are recorded on the session
/// status instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("invalid credential format: {0}")]
    InvalidCredentialFormat(String),
    #[error("token extraction failed after {attempts} attempt(s): {reason}")]
    TokenExtractionFailed { attempts: u32, reason: String },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("session id already exists: {0}")]
    DuplicateSessionId(String),
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    /// Returns the machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::InvalidCredentialFormat(_) => "invalid_credential_format",
            DispatchError::TokenExtractionFailed { .. } => "token_extraction_failed",
            DispatchError::InvalidRequest(_) => "invalid_request",
            DispatchError::DuplicateSessionId(_) => "duplicate_session_id",
            DispatchError::NotFound(_) => "not_found",
            DispatchError::Internal(_) => "internal_error",
        }
    }

    /// Caller mistakes, as opposed to failures of an upstream or of this process.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            DispatchError::InvalidCredentialFormat(_)
                | DispatchError::InvalidRequest(_)
                | DispatchError::DuplicateSessionId(_)
                | DispatchError::NotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            DispatchError::InvalidCredentialFormat("x".into()).code(),
            "invalid_credential_format"
        );
        assert_eq!(
            DispatchError::TokenExtractionFailed {
                attempts: 3,
                reason: "no match".into()
            }
            .code(),
            "token_extraction_failed"
        );
        assert_eq!(DispatchError::NotFound("s".into()).code(), "not_found");
    }

    #[test]
    fn display_includes_attempts() {
        let err = DispatchError::TokenExtractionFailed {
            attempts: 3,
            reason: "pattern not found".into(),
        };
        assert_eq!(
            err.to_string(),
            "token extraction failed after 3 attempt(s): pattern not found"
        );
        assert!(!err.is_caller_error());
        assert!(DispatchError::InvalidRequest("bad".into()).is_caller_error());
    }
}
