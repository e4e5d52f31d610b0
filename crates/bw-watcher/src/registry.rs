//! The registry of live watch loops.
//!
//! [`WatchRegistry`] maps configuration identities to their running
//! [`DirectoryWatcher`]s. Every mutation goes through one mutex, but loops
//! are closed and started outside it so a slow close never blocks other
//! configuration changes.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use bw_core::{ChangeSet, WatchProperties};
//! use bw_watcher::{WatchContext, WatchRegistry};
//!
//! let consumer = |identity: &str, changes: &ChangeSet| -> anyhow::Result<()> {
//!     println!("{identity}: {} change(s)", changes.len());
//!     Ok(())
//! };
//! let registry = WatchRegistry::new(WatchContext::new(Arc::new(consumer)));
//!
//! let mut props = WatchProperties::new();
//! props.insert("bundlewatch.dir".into(), "/srv/load".into());
//! registry.upsert("deploy", &props)?;
//!
//! registry.shutdown();
//! # Ok::<(), bw_watcher::WatchError>(())
//! ```

use std::sync::Arc;

use bw_core::{expand_initial, FxHashMap, WatchProperties, WatchTarget};
use camino::Utf8Path;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::barrier::StartupBarrier;
use crate::error::WatchError;
use crate::watch_loop::{DirectoryWatcher, WatchContext};

/// What an [`upsert`](WatchRegistry::upsert) did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The identity already ran with an identical target.
    Unchanged,
    /// A new watch was started.
    Created,
    /// The previous watch was closed and a new one started.
    Replaced,
}

#[derive(Default)]
struct Inner {
    watchers: FxHashMap<String, Arc<DirectoryWatcher>>,
    stopped: bool,
}

/// Owns one watch loop per configuration identity.
pub struct WatchRegistry {
    context: WatchContext,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for WatchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchRegistry")
            .field("identities", &self.identities())
            .finish_non_exhaustive()
    }
}

impl WatchRegistry {
    /// Creates an empty registry whose loops share `context`.
    pub fn new(context: WatchContext) -> Self {
        Self {
            context,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Returns the startup barrier shared by every loop.
    #[must_use]
    pub fn barrier(&self) -> &Arc<StartupBarrier> {
        &self.context.barrier
    }

    /// Resolves `props` and creates or replaces the watch for `identity`.
    ///
    /// # Errors
    ///
    /// See [`upsert_target`](Self::upsert_target).
    pub fn upsert(
        &self,
        identity: &str,
        props: &WatchProperties,
    ) -> Result<UpsertOutcome, WatchError> {
        let target = WatchTarget::from_properties(identity, props)?;
        self.upsert_target(target)
    }

    /// Creates or replaces the watch for `target.identity`.
    ///
    /// A target equal to the running one is a no-op. Otherwise the old loop
    /// is closed, the new one is built and registered, and then started.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::RegistryClosed`] after [`shutdown`](Self::shutdown),
    /// [`WatchError::Config`] if the target is unusable (the old loop, if
    /// any, stays closed), and any error from [`DirectoryWatcher::start`],
    /// in which case the new loop is unregistered again.
    pub fn upsert_target(&self, target: WatchTarget) -> Result<UpsertOutcome, WatchError> {
        let identity = target.identity.clone();

        let previous = {
            let mut inner = self.inner.lock();
            if inner.stopped {
                return Err(WatchError::RegistryClosed);
            }
            match inner.watchers.get(&identity) {
                Some(existing) if *existing.target() == target => {
                    return Ok(UpsertOutcome::Unchanged);
                }
                _ => inner.watchers.remove(&identity),
            }
        };

        let outcome = if let Some(old) = previous {
            info!(identity = %identity, "Configuration changed, replacing watch");
            old.close();
            UpsertOutcome::Replaced
        } else {
            UpsertOutcome::Created
        };

        let watcher = match DirectoryWatcher::new(target, self.context.clone()) {
            Ok(watcher) => Arc::new(watcher),
            Err(err) => {
                error!(identity = %identity, error = %err, "Cannot create watch");
                return Err(err);
            }
        };

        let displaced = {
            let mut inner = self.inner.lock();
            if inner.stopped {
                drop(inner);
                watcher.close();
                return Err(WatchError::RegistryClosed);
            }
            inner.watchers.insert(identity.clone(), Arc::clone(&watcher))
        };
        if let Some(displaced) = displaced {
            warn!(identity = %identity, "Concurrent update for the same watch, closing the older one");
            displaced.close();
        }

        if let Err(err) = watcher.start() {
            error!(identity = %identity, error = %err, "Cannot start watch");
            {
                let mut inner = self.inner.lock();
                if inner
                    .watchers
                    .get(&identity)
                    .is_some_and(|current| Arc::ptr_eq(current, &watcher))
                {
                    inner.watchers.remove(&identity);
                }
            }
            watcher.close();
            return Err(err);
        }

        Ok(outcome)
    }

    /// Closes and forgets the watch for `identity`.
    ///
    /// Returns `false` if there was none.
    pub fn remove(&self, identity: &str) -> bool {
        let removed = self.inner.lock().watchers.remove(identity);
        match removed {
            Some(watcher) => {
                info!(identity, "Removing watch");
                watcher.close();
                true
            }
            None => false,
        }
    }

    /// Starts the host's own watches from its initial properties.
    ///
    /// A comma-separated directory list becomes one watch per directory,
    /// named `initial`, `initial1`, and so on. Each is upserted on its own;
    /// the failures are returned, the rest keep running.
    pub fn start_initial(&self, props: &WatchProperties) -> Vec<(String, WatchError)> {
        let mut failures = Vec::new();
        for (identity, single) in expand_initial(props) {
            if let Err(err) = self.upsert(&identity, &single) {
                failures.push((identity, err));
            }
        }
        failures
    }

    /// Forwards a re-baseline request to every watch.
    ///
    /// Watches whose root does not contain `path` ignore it.
    pub fn update_checksum(&self, path: &Utf8Path) {
        for watcher in self.snapshot() {
            watcher.update_checksum(path);
        }
    }

    /// Closes every watch. Later upserts are rejected.
    ///
    /// Idempotent.
    pub fn shutdown(&self) {
        let watchers: Vec<_> = {
            let mut inner = self.inner.lock();
            if inner.stopped {
                return;
            }
            inner.stopped = true;
            inner.watchers.drain().map(|(_, watcher)| watcher).collect()
        };

        info!(count = watchers.len(), "Shutting down watches");
        for watcher in watchers {
            watcher.close();
        }
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has run.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.lock().stopped
    }

    /// Returns the registered identities in sorted order.
    #[must_use]
    pub fn identities(&self) -> Vec<String> {
        let mut identities: Vec<_> = self.inner.lock().watchers.keys().cloned().collect();
        identities.sort();
        identities
    }

    /// Returns the watch registered for `identity`.
    #[must_use]
    pub fn get(&self, identity: &str) -> Option<Arc<DirectoryWatcher>> {
        self.inner.lock().watchers.get(identity).map(Arc::clone)
    }

    /// Returns the number of registered watches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().watchers.len()
    }

    /// Returns `true` if no watch is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().watchers.is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<DirectoryWatcher>> {
        self.inner.lock().watchers.values().map(Arc::clone).collect()
    }
}

impl Drop for WatchRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}
