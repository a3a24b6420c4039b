//! Error types for the Gatehouse service.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by a shared store backend.
///
/// Every variant belongs to the "store unavailable" category: the gate never
/// retries inline and leaves the fail-open/fail-closed decision to the
/// middleware that made the call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached or rejected the command
    #[error("Shared store unavailable: {0}")]
    Unavailable(String),

    /// The command did not complete within the configured deadline
    #[error("Shared store call timed out after {0:?}")]
    Timeout(Duration),

    /// The store answered with a reply the caller cannot interpret
    #[error("Unexpected reply from shared store: {0}")]
    UnexpectedReply(String),
}

impl StoreError {
    /// Whether the error means the store is unreachable for this request.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_timeout() {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::UnexpectedReply(err.to_string())
        }
    }
}

/// Rate limiter failures. Hitting the limit is a decision, not an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LimiterError {
    /// The limiter was asked about an empty key
    #[error("Rate limit key must not be empty")]
    EmptyKey,

    /// The window could not be evaluated
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Authentication failures.
///
/// `TokenMissing`, `TokenInvalid`, `TokenExpired` and `SessionNotFound` all
/// surface to the caller as the same unauthorized response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No bearer token on the request
    #[error("No bearer token present")]
    TokenMissing,

    /// Bad signature, malformed token or wrong claim type
    #[error("Token is invalid")]
    TokenInvalid,

    /// Signature is fine but `exp` has passed
    #[error("Token has expired")]
    TokenExpired,

    /// The session backing the token was revoked or has expired
    #[error("Session not found")]
    SessionNotFound,

    /// Minting a token failed
    #[error("Token signing failed: {0}")]
    Signing(String),

    /// The session store could not be consulted
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Main error type for Gatehouse operations.
#[derive(Error, Debug)]
pub enum GatehouseError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Shared store errors raised outside a request
    #[error(transparent)]
    Store(#[from] StoreError),

    /// HTTP server errors
    #[error("Server error: {0}")]
    Server(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for GatehouseError {
    fn from(err: config::ConfigError) -> Self {
        GatehouseError::Config(err.to_string())
    }
}

/// Result type alias for Gatehouse operations.
pub type Result<T> = std::result::Result<T, GatehouseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_categories() {
        assert!(StoreError::Unavailable("refused".into()).is_unavailable());
        assert!(StoreError::Timeout(Duration::from_millis(50)).is_unavailable());
        assert!(!StoreError::UnexpectedReply("nil".into()).is_unavailable());
    }

    #[test]
    fn test_auth_error_wraps_store_error() {
        let err: AuthError = StoreError::Timeout(Duration::from_millis(10)).into();
        assert!(matches!(err, AuthError::Store(StoreError::Timeout(_))));
    }

    #[test]
    fn test_redis_errors_are_categorised() {
        let refused: StoreError = redis::RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ))
        .into();
        assert!(refused.is_unavailable());

        let dropped: StoreError = redis::RedisError::from(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "pipe",
        ))
        .into();
        assert!(dropped.is_unavailable());

        let bad_reply: StoreError =
            redis::RedisError::from((redis::ErrorKind::TypeError, "not an integer")).into();
        assert!(matches!(bad_reply, StoreError::UnexpectedReply(_)));
    }
}
