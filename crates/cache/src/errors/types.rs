//! Core error types for the content cache

use std::path::PathBuf;
use std::time::Duration;

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Error type for cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// I/O errors while reading or writing live content
    #[error("I/O error during {operation} on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        operation: &'static str,
        #[source]
        source: std::io::Error,
        recovery_hint: RecoveryHint,
    },

    /// The key is not a valid hierarchical cache key
    #[error("invalid cache key '{key}': {reason}")]
    InvalidKey {
        key: String,
        reason: String,
        recovery_hint: RecoveryHint,
    },

    /// A bookkeeping file could not be decoded
    #[error("corrupt bookkeeping file '{}': {reason}", .path.display())]
    Bookkeeping {
        path: PathBuf,
        reason: String,
        recovery_hint: RecoveryHint,
    },

    /// Configuration error
    #[error("configuration error: {message}")]
    Configuration {
        message: String,
        recovery_hint: RecoveryHint,
    },

    /// The caller cancelled the operation before any bytes were written
    #[error("operation on '{key}' was cancelled")]
    Cancelled {
        key: String,
        recovery_hint: RecoveryHint,
    },

    /// A temporary handle was committed to a backend that did not create it
    #[error("temporary content for '{key}' belongs to the {expected} backend")]
    BackendMismatch {
        key: String,
        expected: &'static str,
        recovery_hint: RecoveryHint,
    },
}

/// Recovery hints for error handling
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryHint {
    /// Retry the operation
    Retry { after: Duration },

    /// Check file permissions
    CheckPermissions { path: PathBuf },

    /// Check disk space and clean up if needed
    CheckDiskSpace,

    /// Fix the input and try again
    FixInput { suggestion: String },

    /// No automated recovery possible
    Manual { instructions: String },

    /// Operation can be safely ignored
    Ignore,
}
