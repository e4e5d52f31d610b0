//! Cooperative cancellation for loop threads.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::WatchError;

/// A cancellation flag that blocking waits observe.
///
/// Cloning shares the flag. Once cancelled it stays cancelled.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use bw_watcher::CancelToken;
///
/// let token = CancelToken::new();
/// let waiter = token.clone();
/// let handle = std::thread::spawn(move || waiter.sleep(Duration::from_secs(60)));
///
/// token.cancel();
/// assert!(handle.join().unwrap().is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: Mutex<bool>,
    wakeup: Condvar,
}

impl CancelToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the token and wakes every sleeper.
    pub fn cancel(&self) {
        *self.inner.cancelled.lock() = true;
        self.inner.wakeup.notify_all();
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.lock()
    }

    /// Returns an error if the token has been cancelled.
    pub fn check(&self) -> Result<(), WatchError> {
        if self.is_cancelled() {
            Err(WatchError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Sleeps for `duration`, returning early if cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Interrupted`] if the token is cancelled before
    /// or during the sleep.
    pub fn sleep(&self, duration: Duration) -> Result<(), WatchError> {
        let deadline = Instant::now() + duration;
        let mut cancelled = self.inner.cancelled.lock();
        while !*cancelled {
            if self
                .inner
                .wakeup
                .wait_until(&mut cancelled, deadline)
                .timed_out()
            {
                return Ok(());
            }
        }
        Err(WatchError::Interrupted)
    }
}
