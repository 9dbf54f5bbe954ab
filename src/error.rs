/*!
 * Error types for nimbus
 *
 * Every error maps to a stable [`ErrorCode`] so callers that only speak the
 * resource-plugin protocol can react to it without matching on variants.
 */

use crate::core::glacier::StagingState;
use crate::store::StoreError;
use std::fmt;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, NimbusError>;

/// Exit code constants for the CLI
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_RETRY_LATER: i32 = 1;
pub const EXIT_FATAL: i32 = 2;
pub const EXIT_INTEGRITY: i32 = 3;

/// Stable error codes reported to the caller of a resource operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    S3PutError,
    S3GetError,
    S3FileUnlinkErr,
    S3FileOpenErr,
    S3FileCopyErr,
    S3FileStatErr,
    ReplicaIsBeingStaged,
    ReplicaStagingFailed,
    HierarchyError,
    SysConfigFileErr,
    SysInvalidFilePath,
    SysNotSupported,
    LockedDataObjectAccess,
    CatNoRowsFound,
    UnixFileIoErr,
    SysInternalErr,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::S3PutError => "S3_PUT_ERROR",
            ErrorCode::S3GetError => "S3_GET_ERROR",
            ErrorCode::S3FileUnlinkErr => "S3_FILE_UNLINK_ERR",
            ErrorCode::S3FileOpenErr => "S3_FILE_OPEN_ERR",
            ErrorCode::S3FileCopyErr => "S3_FILE_COPY_ERR",
            ErrorCode::S3FileStatErr => "S3_FILE_STAT_ERR",
            ErrorCode::ReplicaIsBeingStaged => "REPLICA_IS_BEING_STAGED",
            ErrorCode::ReplicaStagingFailed => "REPLICA_STAGING_FAILED",
            ErrorCode::HierarchyError => "HIERARCHY_ERROR",
            ErrorCode::SysConfigFileErr => "SYS_CONFIG_FILE_ERR",
            ErrorCode::SysInvalidFilePath => "SYS_INVALID_FILE_PATH",
            ErrorCode::SysNotSupported => "SYS_NOT_SUPPORTED",
            ErrorCode::LockedDataObjectAccess => "LOCKED_DATA_OBJECT_ACCESS",
            ErrorCode::CatNoRowsFound => "CAT_NO_ROWS_FOUND",
            ErrorCode::UnixFileIoErr => "UNIX_FILE_IO_ERR",
            ErrorCode::SysInternalErr => "SYS_INTERNAL_ERR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum NimbusError {
    /// Malformed or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credentials file missing or malformed
    #[error("Credentials unavailable: {0}")]
    Credentials(String),

    /// Path that cannot be mapped to a bucket and key
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Object exceeds the single-request limit with multipart disabled
    #[error("Object of {size} bytes exceeds the single upload limit of {limit} bytes and multipart upload is disabled")]
    ObjectTooLarge { size: u64, limit: u64 },

    #[error("Failed to upload {key}: {source}")]
    Put { key: String, source: StoreError },

    #[error("Failed to download {key}: {source}")]
    Get { key: String, source: StoreError },

    #[error("Failed to delete {key}: {source}")]
    Unlink { key: String, source: StoreError },

    #[error("Failed to copy {src} to {dest}: {source}")]
    Copy {
        src: String,
        dest: String,
        source: StoreError,
    },

    #[error("Failed to stat {key}: {source}")]
    Stat { key: String, source: StoreError },

    /// Object is absent from the store
    #[error("Object not found: {key}")]
    ObjectNotFound { key: String },

    /// Object is archived; the caller should retry later
    #[error("{message} ({key})")]
    Staging {
        key: String,
        state: StagingState,
        message: String,
    },

    /// The store refused the restore request
    #[error("Restore request for {key} failed: {source}")]
    StagingFailed { key: String, source: StoreError },

    /// Another write holds the replica
    #[error("Replica {replica_number} of {logical_path} is locked by another write")]
    ReplicaLocked {
        logical_path: String,
        replica_number: u32,
    },

    /// Catalog lookup found nothing
    #[error("No catalog entry: {0}")]
    NotFound(String),

    /// Resource hierarchy does not match the catalog
    #[error("Hierarchy error: {0}")]
    Hierarchy(String),

    /// Operation not available in the configured host mode
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Checksum mismatch for {key}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl NimbusError {
    /// Stable code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            NimbusError::Config(_) | NimbusError::Credentials(_) => ErrorCode::SysConfigFileErr,
            NimbusError::InvalidPath(_) => ErrorCode::SysInvalidFilePath,
            NimbusError::ObjectTooLarge { .. } | NimbusError::Put { .. } => ErrorCode::S3PutError,
            NimbusError::Get { .. } | NimbusError::ChecksumMismatch { .. } => {
                ErrorCode::S3GetError
            }
            NimbusError::Unlink { .. } => ErrorCode::S3FileUnlinkErr,
            NimbusError::Copy { .. } => ErrorCode::S3FileCopyErr,
            NimbusError::Stat { .. } => ErrorCode::S3FileStatErr,
            NimbusError::ObjectNotFound { .. } => ErrorCode::S3FileOpenErr,
            NimbusError::Staging { .. } => ErrorCode::ReplicaIsBeingStaged,
            NimbusError::StagingFailed { .. } => ErrorCode::ReplicaStagingFailed,
            NimbusError::ReplicaLocked { .. } => ErrorCode::LockedDataObjectAccess,
            NimbusError::NotFound(_) => ErrorCode::CatNoRowsFound,
            NimbusError::Hierarchy(_) => ErrorCode::HierarchyError,
            NimbusError::NotSupported(_) => ErrorCode::SysNotSupported,
            NimbusError::Io(_) => ErrorCode::UnixFileIoErr,
            NimbusError::Internal(_) => ErrorCode::SysInternalErr,
        }
    }

    /// True when the object is being restored and the caller should try again later
    pub fn is_staging(&self) -> bool {
        matches!(self, NimbusError::Staging { .. })
    }

    /// Check if the operation may succeed when repeated unchanged
    pub fn is_retryable(&self) -> bool {
        match self {
            NimbusError::Put { source, .. }
            | NimbusError::Get { source, .. }
            | NimbusError::Unlink { source, .. }
            | NimbusError::Copy { source, .. }
            | NimbusError::Stat { source, .. } => source.is_retryable(),
            NimbusError::Staging { .. } => true,
            _ => false,
        }
    }

    /// Underlying store error, if any
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            NimbusError::Put { source, .. }
            | NimbusError::Get { source, .. }
            | NimbusError::Unlink { source, .. }
            | NimbusError::Copy { source, .. }
            | NimbusError::Stat { source, .. }
            | NimbusError::StagingFailed { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Process exit code for the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            NimbusError::Staging { .. } => EXIT_RETRY_LATER,
            NimbusError::ChecksumMismatch { .. } => EXIT_INTEGRITY,
            _ => EXIT_FATAL,
        }
    }
}
