//! Error conversion utilities

use super::types::{CacheError, RecoveryHint};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

impl CacheError {
    /// Wrap an I/O error with the path and operation it came from
    pub fn io(path: impl AsRef<Path>, operation: &'static str, source: io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        let recovery_hint = hint_for(&source, &path);
        Self::Io {
            path,
            operation,
            source,
            recovery_hint,
        }
    }

    pub(crate) fn invalid_key(key: &str, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.to_string(),
            reason: reason.into(),
            recovery_hint: RecoveryHint::FixInput {
                suggestion: "use slash-separated segments without '.', '..' or a '.$$$' suffix"
                    .to_string(),
            },
        }
    }

    pub(crate) fn cancelled(key: &str) -> Self {
        Self::Cancelled {
            key: key.to_string(),
            recovery_hint: RecoveryHint::Ignore,
        }
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            recovery_hint: RecoveryHint::Manual {
                instructions: "Check the cache configuration file and PATHCACHE_* variables"
                    .to_string(),
            },
        }
    }
}

fn hint_for(error: &io::Error, path: &Path) -> RecoveryHint {
    match error.kind() {
        io::ErrorKind::PermissionDenied => RecoveryHint::CheckPermissions {
            path: path.to_path_buf(),
        },
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted => {
            RecoveryHint::Retry {
                after: Duration::from_millis(100),
            }
        }
        io::ErrorKind::WriteZero | io::ErrorKind::OutOfMemory => RecoveryHint::CheckDiskSpace,
        _ => RecoveryHint::Manual {
            instructions: format!("Inspect '{}'", path.display()),
        },
    }
}

impl From<io::Error> for CacheError {
    fn from(error: io::Error) -> Self {
        Self::io(PathBuf::from("."), "unknown", error)
    }
}
