//! Reclamation of deferred deletions
//!
//! By default deferred deletions are only retried lazily, when an operation
//! touches the same path again. A [`Reclaimer`] additionally runs a full
//! pass on a fixed interval from a background thread.

use crate::handle::ContentBackend;
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use parking_lot::RwLock;
use std::io;
use std::sync::Weak;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Outcome of one reclamation pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReclaimReport {
    /// Leaked files that were finally deleted
    pub reclaimed: usize,
    /// Cleanups that failed again and stay on record
    pub still_pending: usize,
    /// Alternates moved back to their canonical path
    pub alternates_promoted: usize,
}

impl ReclaimReport {
    /// True when the pass changed anything on disk
    pub fn changed(&self) -> bool {
        self.reclaimed > 0 || self.alternates_promoted > 0
    }
}

/// Background thread running periodic reclamation passes.
///
/// The thread only holds a weak reference to the backend and exits when the
/// backend is gone or the reclaimer is dropped.
#[derive(Debug)]
pub struct Reclaimer {
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Reclaimer {
    pub fn spawn<B>(backend: Weak<RwLock<B>>, interval: Duration) -> io::Result<Self>
    where
        B: ContentBackend + 'static,
    {
        let (shutdown, signal) = channel::bounded::<()>(1);

        let thread = thread::Builder::new()
            .name("pathcache-reclaim".to_string())
            .spawn(move || loop {
                match signal.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let Some(backend) = backend.upgrade() else {
                            return;
                        };
                        let report = backend.write().reclaim();
                        tracing::debug!(?report, "periodic reclamation pass");
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                }
            })?;

        tracing::debug!(?interval, "started reclaimer");
        Ok(Self {
            shutdown: Some(shutdown),
            thread: Some(thread),
        })
    }

    /// Stop the background thread and wait for it to exit
    pub fn shutdown(&mut self) {
        // dropping the sender disconnects the channel
        self.shutdown.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Reclaimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
