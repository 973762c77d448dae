//! Path-keyed content cache
//!
//! Content is stored under hierarchical, slash-separated keys and written
//! through temporary entries that only become visible when committed. Two
//! backends are provided:
//! - [`DiskBackend`] maps keys onto files under a root directory and keeps
//!   working when files cannot be deleted, redirecting reads to alternate
//!   files and retrying deletions later
//! - [`MemoryBackend`] keeps everything in process memory
//!
//! [`CacheService`] is the thread-safe facade over either of them.

pub mod backend;
pub mod cancel;
pub mod config;
pub mod disk;
pub mod errors;
pub mod handle;
pub mod keys;
pub mod memory;
pub mod reclaim;
pub mod service;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backend::{Backend, BackendSink};
pub use cancel::CancellationToken;
pub use config::{BackendKind, CacheConfig, CacheConfigBuilder, CacheConfigLoader};
pub use disk::{DiskBackend, DiskBackendBuilder, DiskSink, FileOps, StdFileOps};
pub use errors::{CacheError, RecoveryHint, Result};
pub use handle::{
    now_millis, CachedContentHandle, ContentBackend, ContentReader, ContentSource,
    TemporaryContentHandle, Timestamp,
};
pub use keys::CacheKey;
pub use memory::{MemoryBackend, MemorySink};
pub use reclaim::{ReclaimReport, Reclaimer};
pub use service::{CacheService, ContentWriter};
