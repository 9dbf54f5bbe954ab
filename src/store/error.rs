//! Error types for object store operations

use std::io;
use thiserror::Error;

/// Result type alias for object store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors reported by an [`ObjectStore`](super::ObjectStore) implementation
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// AWS SDK error that could not be classified further
    #[error("AWS SDK error: {0}")]
    Sdk(String),

    /// S3 service error with specific error code
    #[error("S3 service error ({code}): {message}")]
    Service { code: String, message: String },

    /// Object not found in bucket
    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// Bucket not found or not accessible
    #[error("Bucket not found or not accessible: {0}")]
    BucketNotFound(String),

    /// Access denied error
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Authentication error (invalid or missing keys)
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Object lives in an archive tier and has not been restored
    #[error("Object is archived and not readable until restored: {0}")]
    InvalidObjectState(String),

    /// The store does not implement the requested operation
    #[error("Operation not supported by the object store: {0}")]
    NotImplemented(String),

    /// Multipart upload error
    #[error("Multipart upload error: {0}")]
    MultipartUpload(String),

    /// Unknown or already finished multipart upload
    #[error("No such multipart upload: {0}")]
    NoSuchUpload(String),

    /// A non-final part was smaller than the store accepts
    #[error("Part {part_number} is {size} bytes, below the minimum part size of {minimum} bytes")]
    EntityTooSmall {
        part_number: u32,
        size: u64,
        minimum: u64,
    },

    /// Invalid range request
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(String),

    /// Network error
    #[error("Network error: {0}")]
    Network(String),

    /// Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),
}

impl StoreError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Network(_) => true,
            StoreError::Timeout(_) => true,
            StoreError::RateLimitExceeded(_) => true,
            StoreError::Io(_) => true,
            // Authentication errors are NOT retryable
            StoreError::Authentication(_) | StoreError::AccessDenied(_) => false,
            StoreError::Sdk(msg) => {
                let lower = msg.to_lowercase();
                lower.contains("connection reset")
                    || lower.contains("connection timed out")
                    || lower.contains("broken pipe")
                    || lower.contains("connection refused")
                    || lower.contains("temporarily unavailable")
            }
            StoreError::Service { code, .. } => is_retryable_code(code),
            _ => false,
        }
    }

    /// Check if the store rejected the caller's credentials
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            StoreError::Authentication(_) | StoreError::AccessDenied(_)
        )
    }

    /// Check if the error reports a missing object
    pub fn is_not_found(&self) -> bool {
        match self {
            StoreError::NotFound { .. } => true,
            StoreError::Service { code, .. } => code == "NoSuchKey" || code == "NotFound",
            _ => false,
        }
    }

    /// Service error code, when the store reported one
    pub fn service_code(&self) -> Option<&str> {
        match self {
            StoreError::Service { code, .. } => Some(code),
            _ => None,
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

/// Check if an S3 error code is retryable
pub(crate) fn is_retryable_code(code: &str) -> bool {
    matches!(
        code,
        "RequestTimeout"
            | "ServiceUnavailable"
            | "InternalError"
            | "SlowDown"
            | "RequestTimeTooSkewed"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(StoreError::Network("connection lost".to_string()).is_retryable());
        assert!(StoreError::Timeout("timed out".to_string()).is_retryable());
        assert!(StoreError::RateLimitExceeded("too many requests".to_string()).is_retryable());
        assert!(!StoreError::InvalidRange("bad range".to_string()).is_retryable());
    }

    #[test]
    fn test_authentication_not_retryable() {
        assert!(!StoreError::Authentication("bad credentials".to_string()).is_retryable());
        assert!(!StoreError::AccessDenied("InvalidAccessKeyId".to_string()).is_retryable());
        assert!(StoreError::AccessDenied("denied".to_string()).is_auth_failure());
    }

    #[test]
    fn test_sdk_network_errors_retryable() {
        assert!(StoreError::Sdk("connection reset by peer".to_string()).is_retryable());
        assert!(StoreError::Sdk("Connection refused".to_string()).is_retryable());
        assert!(!StoreError::Sdk("invalid argument".to_string()).is_retryable());
    }

    #[test]
    fn test_service_codes() {
        for code in ["RequestTimeout", "ServiceUnavailable", "InternalError", "SlowDown"] {
            let err = StoreError::Service {
                code: code.to_string(),
                message: "transient".to_string(),
            };
            assert!(err.is_retryable(), "{code} should be retryable");
        }

        let err = StoreError::Service {
            code: "NoSuchKey".to_string(),
            message: "gone".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(err.is_not_found());
        assert_eq!(err.service_code(), Some("NoSuchKey"));
    }

    #[test]
    fn test_archived_object_not_retryable() {
        let err = StoreError::InvalidObjectState("bucket/key".to_string());
        assert!(!err.is_retryable());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "gone");
        let err: StoreError = io_err.into();
        assert!(matches!(err, StoreError::Io(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_error_display_formats() {
        let err = StoreError::NotFound {
            bucket: "my-bucket".to_string(),
            key: "my-key".to_string(),
        };
        assert_eq!(format!("{}", err), "Object not found: my-bucket/my-key");

        let err = StoreError::EntityTooSmall {
            part_number: 2,
            size: 10,
            minimum: 100,
        };
        assert_eq!(
            format!("{}", err),
            "Part 2 is 10 bytes, below the minimum part size of 100 bytes"
        );
    }
}
