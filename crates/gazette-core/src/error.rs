//! Error types for gazette.

use thiserror::Error;

/// Result type alias using gazette's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for gazette operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Malformed capability vector input (caller error)
    #[error("Invalid bitmask: {0}")]
    InvalidBitmask(String),

    /// Index optimistic-concurrency failure (retryable with backoff)
    #[error("Version conflict: {0}")]
    VersionConflict(String),

    /// Network, 5xx, broker hiccup (retryable with backoff)
    #[error("Transient error: {0}")]
    Transient(String),

    /// Non-retryable failure (4xx non-409, integrity beyond idempotency)
    #[error("Permanent error: {0}")]
    Permanent(String),

    /// Referenced Collection/User/Subscription not found
    #[error("Entity missing: {0}")]
    EntityMissing(String),

    /// Cooperative cancellation (job goes RIP)
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Per-user parallel job limit reached at admission
    #[error("Too many parallel jobs: {0}")]
    TooManyJobs(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for failures the worker protocol retries with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient(_) | Error::VersionConflict(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        // Connect/timeout failures at this level have no status code;
        // treat them as transient like any other network hiccup.
        Error::Transient(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_invalid_bitmask() {
        let err = Error::InvalidBitmask("too long".to_string());
        assert_eq!(err.to_string(), "Invalid bitmask: too long");
    }

    #[test]
    fn test_error_display_version_conflict() {
        let err = Error::VersionConflict("doc abc-123".to_string());
        assert_eq!(err.to_string(), "Version conflict: doc abc-123");
    }

    #[test]
    fn test_error_display_transient() {
        let err = Error::Transient("503 from index".to_string());
        assert_eq!(err.to_string(), "Transient error: 503 from index");
    }

    #[test]
    fn test_error_display_permanent() {
        let err = Error::Permanent("400 bad query".to_string());
        assert_eq!(err.to_string(), "Permanent error: 400 bad query");
    }

    #[test]
    fn test_error_display_entity_missing() {
        let err = Error::EntityMissing("collection local-abc".to_string());
        assert_eq!(err.to_string(), "Entity missing: collection local-abc");
    }

    #[test]
    fn test_error_display_too_many_jobs() {
        let err = Error::TooManyJobs("user 42".to_string());
        assert_eq!(err.to_string(), "Too many parallel jobs: user 42");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Transient("x".into()).is_retryable());
        assert!(Error::VersionConflict("x".into()).is_retryable());
        assert!(!Error::Permanent("x".into()).is_retryable());
        assert!(!Error::EntityMissing("x".into()).is_retryable());
        assert!(!Error::InvalidBitmask("x".into()).is_retryable());
        assert!(!Error::Cancelled("x".into()).is_retryable());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
