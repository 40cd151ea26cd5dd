//! Handler errors.

use murmur_protocol::ErrorCode;
use thiserror::Error;

use crate::store::StoreError;

/// Why an event handler refused or failed a request.
///
/// Reported to the originating connection only.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The caller may not act on this conversation or message.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// The request was well formed but its content was rejected.
    #[error("{0}")]
    Validation(String),

    /// A conversation or message id did not resolve.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// The handler cannot continue; the connection is closed.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HandlerError {
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            HandlerError::AccessDenied(_) => ErrorCode::AccessDenied,
            HandlerError::Validation(_) => ErrorCode::Validation,
            HandlerError::NotFound(_) => ErrorCode::NotFound,
            HandlerError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Check if the connection must be closed after reporting this error.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, HandlerError::Internal(_))
    }
}

impl From<StoreError> for HandlerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => HandlerError::NotFound(what),
            StoreError::Forbidden(reason) => HandlerError::AccessDenied(reason.to_string()),
            StoreError::Validation(reason) => HandlerError::Validation(reason),
            StoreError::Unavailable(reason) => HandlerError::Internal(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_mapping() {
        let err = HandlerError::from(StoreError::NotFound("message"));
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert_eq!(err.to_string(), "message not found");
        assert!(!err.is_fatal());

        let err = HandlerError::from(StoreError::Forbidden("nope"));
        assert_eq!(err.code(), ErrorCode::AccessDenied);

        let err = HandlerError::from(StoreError::Unavailable("db down".into()));
        assert_eq!(err.code(), ErrorCode::Internal);
        assert!(err.is_fatal());
    }
}
