//! The startup barrier between the host and its watch loops.
//!
//! The host holds the write side while it assembles its initial state. Every
//! delivery to a consumer happens under the read side, so nothing reaches a
//! consumer while the host is still starting up.
//!
//! The writer's own thread may also take the read side. That lets the host
//! start watches, whose initial scan is delivered synchronously on the
//! calling thread, while it still holds the write side.

use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::cancel::CancelToken;
use crate::error::WatchError;

/// How long a reader blocks before re-checking for cancellation.
const READ_POLL: Duration = Duration::from_millis(50);

/// A reader/writer barrier with a re-entrant read side for the writer.
///
/// # Examples
///
/// ```
/// use bw_watcher::{CancelToken, StartupBarrier};
///
/// let barrier = StartupBarrier::new();
/// let cancel = CancelToken::new();
///
/// let startup = barrier.hold();
/// // The writer's own thread can still read.
/// assert!(barrier.read(&cancel).is_ok());
/// drop(startup);
///
/// assert!(barrier.read(&cancel).is_ok());
/// ```
#[derive(Debug, Default)]
pub struct StartupBarrier {
    lock: RwLock<()>,
    writer: Mutex<Option<ThreadId>>,
}

/// Held by the host for the duration of its startup.
#[must_use = "the barrier is released when the guard is dropped"]
pub struct StartupGuard<'a> {
    barrier: &'a StartupBarrier,
    _guard: RwLockWriteGuard<'a, ()>,
}

impl Drop for StartupGuard<'_> {
    fn drop(&mut self) {
        *self.barrier.writer.lock() = None;
    }
}

/// Permission to deliver changes to a consumer.
#[must_use = "the permit is released when dropped"]
pub enum ReadPermit<'a> {
    /// An ordinary shared read.
    Shared(RwLockReadGuard<'a, ()>),
    /// The calling thread holds the write side.
    Reentrant,
}

impl std::fmt::Debug for ReadPermit<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shared(_) => f.write_str("ReadPermit::Shared"),
            Self::Reentrant => f.write_str("ReadPermit::Reentrant"),
        }
    }
}

impl StartupBarrier {
    /// Creates an open barrier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the write side, blocking until every reader is gone.
    pub fn hold(&self) -> StartupGuard<'_> {
        let guard = self.lock.write();
        *self.writer.lock() = Some(thread::current().id());
        StartupGuard {
            barrier: self,
            _guard: guard,
        }
    }

    /// Takes the read side, waiting while the host holds the write side.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Interrupted`] if `cancel` fires while waiting.
    pub fn read(&self, cancel: &CancelToken) -> Result<ReadPermit<'_>, WatchError> {
        if *self.writer.lock() == Some(thread::current().id()) {
            return Ok(ReadPermit::Reentrant);
        }
        loop {
            cancel.check()?;
            if let Some(guard) = self.lock.try_read_for(READ_POLL) {
                return Ok(ReadPermit::Shared(guard));
            }
        }
    }

    /// Returns `true` while the host holds the write side.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.lock.is_locked_exclusive()
    }
}
