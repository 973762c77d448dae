//! Runtime selection between the disk and memory backends

use crate::config::{BackendKind, CacheConfig};
use crate::disk::{DiskBackend, DiskSink};
use crate::errors::{CacheError, RecoveryHint, Result};
use crate::handle::{CachedContentHandle, ContentBackend, TemporaryContentHandle, Timestamp};
use crate::keys::CacheKey;
use crate::memory::{MemoryBackend, MemorySink};
use crate::reclaim::ReclaimReport;
use std::io::{self, Write};

/// Either backend, chosen from configuration
#[derive(Debug)]
pub enum Backend {
    Disk(DiskBackend),
    Memory(MemoryBackend),
}

/// Write sink matching [`Backend`]
#[derive(Debug)]
pub enum BackendSink {
    Disk(DiskSink),
    Memory(MemorySink),
}

impl Write for BackendSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Disk(sink) => sink.write(buf),
            Self::Memory(sink) => sink.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Disk(sink) => sink.flush(),
            Self::Memory(sink) => sink.flush(),
        }
    }
}

impl Backend {
    /// Build the backend described by `config`
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        match config.backend {
            BackendKind::Disk => Ok(Self::Disk(
                DiskBackend::builder(&config.root)
                    .buffer_size(config.buffer_size)
                    .open()?,
            )),
            BackendKind::Memory => Ok(Self::Memory(MemoryBackend::new())),
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Disk(_) => BackendKind::Disk,
            Self::Memory(_) => BackendKind::Memory,
        }
    }
}

fn mismatch(key: &CacheKey, expected: &'static str) -> CacheError {
    CacheError::BackendMismatch {
        key: key.to_string(),
        expected,
        recovery_hint: RecoveryHint::Manual {
            instructions: "Commit temporary entries through the cache that opened them"
                .to_string(),
        },
    }
}

impl ContentBackend for Backend {
    type Sink = BackendSink;

    fn name(&self) -> &'static str {
        match self {
            Self::Disk(backend) => backend.name(),
            Self::Memory(backend) => backend.name(),
        }
    }

    fn exists(&self, key: &CacheKey) -> Result<bool> {
        match self {
            Self::Disk(backend) => backend.exists(key),
            Self::Memory(backend) => backend.exists(key),
        }
    }

    fn cached(&self, key: &CacheKey) -> Result<Option<CachedContentHandle>> {
        match self {
            Self::Disk(backend) => backend.cached(key),
            Self::Memory(backend) => backend.cached(key),
        }
    }

    fn timestamp(&self, key: &CacheKey) -> Result<Option<Timestamp>> {
        match self {
            Self::Disk(backend) => backend.timestamp(key),
            Self::Memory(backend) => backend.timestamp(key),
        }
    }

    fn set_timestamp(&mut self, key: &CacheKey, timestamp: Timestamp) -> Result<bool> {
        match self {
            Self::Disk(backend) => backend.set_timestamp(key, timestamp),
            Self::Memory(backend) => backend.set_timestamp(key, timestamp),
        }
    }

    fn open_temporary(
        &mut self,
        key: &CacheKey,
        append: bool,
    ) -> Result<TemporaryContentHandle<BackendSink>> {
        match self {
            Self::Disk(backend) => Ok(backend
                .open_temporary(key, append)?
                .map_sink(BackendSink::Disk)),
            Self::Memory(backend) => Ok(backend
                .open_temporary(key, append)?
                .map_sink(BackendSink::Memory)),
        }
    }

    fn commit(
        &mut self,
        handle: TemporaryContentHandle<BackendSink>,
        timestamp: Timestamp,
    ) -> Result<()> {
        let (key, append, position, sink) = handle.into_parts();
        match (self, sink) {
            (Self::Disk(backend), BackendSink::Disk(sink)) => backend.commit(
                TemporaryContentHandle::new(key, append, position, sink),
                timestamp,
            ),
            (Self::Memory(backend), BackendSink::Memory(sink)) => backend.commit(
                TemporaryContentHandle::new(key, append, position, sink),
                timestamp,
            ),
            (Self::Disk(_), BackendSink::Memory(_)) => Err(mismatch(&key, "memory")),
            (Self::Memory(_), BackendSink::Disk(_)) => Err(mismatch(&key, "disk")),
        }
    }

    fn discard(&mut self, handle: TemporaryContentHandle<BackendSink>) {
        let (key, append, position, sink) = handle.into_parts();
        match (self, sink) {
            (Self::Disk(backend), BackendSink::Disk(sink)) => {
                backend.discard(TemporaryContentHandle::new(key, append, position, sink))
            }
            (Self::Memory(backend), BackendSink::Memory(sink)) => {
                backend.discard(TemporaryContentHandle::new(key, append, position, sink))
            }
            _ => tracing::warn!(key = %key, "discarding temporary entry from another backend"),
        }
    }

    fn remove(&mut self, key: &CacheKey) -> Result<()> {
        match self {
            Self::Disk(backend) => backend.remove(key),
            Self::Memory(backend) => backend.remove(key),
        }
    }

    fn remove_recursive(&mut self, prefix: &CacheKey) -> Result<()> {
        match self {
            Self::Disk(backend) => backend.remove_recursive(prefix),
            Self::Memory(backend) => backend.remove_recursive(prefix),
        }
    }

    fn reclaim(&mut self) -> ReclaimReport {
        match self {
            Self::Disk(backend) => backend.reclaim(),
            Self::Memory(backend) => backend.reclaim(),
        }
    }
}
