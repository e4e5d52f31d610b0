//! The seams between the engine and its host.
//!
//! - [`ChangeConsumer`] receives each non-empty change set.
//! - [`Readiness`] tells loops whether the host is ready for disk I/O.

use std::sync::atomic::{AtomicBool, Ordering};

use bw_core::ChangeSet;

/// Receives the units that changed in one scan cycle.
///
/// Called from the loop thread (and from the thread calling `start` for the
/// initial scan). A returned error is logged and the loop carries on.
///
/// Closures taking `(&str, &ChangeSet)` implement this trait.
///
/// # Examples
///
/// ```
/// use bw_core::ChangeSet;
/// use bw_watcher::ChangeConsumer;
///
/// let consumer = |identity: &str, changes: &ChangeSet| -> anyhow::Result<()> {
///     for path in changes {
///         println!("{identity}: {path}");
///     }
///     Ok(())
/// };
/// consumer.on_changes("initial", &ChangeSet::new())?;
/// # Ok::<(), anyhow::Error>(())
/// ```
pub trait ChangeConsumer: Send + Sync + 'static {
    /// Handles one change set for the watch named `identity`.
    fn on_changes(&self, identity: &str, changes: &ChangeSet) -> anyhow::Result<()>;
}

impl<F> ChangeConsumer for F
where
    F: Fn(&str, &ChangeSet) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn on_changes(&self, identity: &str, changes: &ChangeSet) -> anyhow::Result<()> {
        self(identity, changes)
    }
}

/// Whether the host is fully up.
///
/// While this returns `false`, loops skip their scans entirely.
pub trait Readiness: Send + Sync + 'static {
    /// Returns `true` once the host is ready.
    fn is_ready(&self) -> bool;
}

/// A host that is always ready.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysReady;

impl Readiness for AlwaysReady {
    #[inline]
    fn is_ready(&self) -> bool {
        true
    }
}

/// A readiness flag the host flips once its startup is complete.
#[derive(Debug, Default)]
pub struct ReadinessFlag {
    ready: AtomicBool,
}

impl ReadinessFlag {
    /// Creates a flag that starts out not ready.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
        }
    }

    /// Marks the host ready or not ready.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }
}

impl Readiness for ReadinessFlag {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_closure_consumer() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let consumer = move |identity: &str, changes: &ChangeSet| -> anyhow::Result<()> {
            sink.lock().push((identity.to_owned(), changes.len()));
            Ok(())
        };

        let changes: ChangeSet = std::iter::once(Utf8PathBuf::from("/a.jar")).collect();
        consumer.on_changes("initial", &changes).unwrap();
        assert_eq!(*seen.lock(), vec![("initial".to_owned(), 1)]);
    }

    #[test]
    fn test_readiness_flag() {
        let flag = ReadinessFlag::new();
        assert!(!flag.is_ready());
        flag.set_ready(true);
        assert!(flag.is_ready());
        assert!(AlwaysReady.is_ready());
    }
}
