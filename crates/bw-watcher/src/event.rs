//! The OS notification backend.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────── notify thread ─────────────────────────┐
//! │ RecommendedWatcher ─► Debouncer (250ms) ─► attribute + filter   │
//! └──────────────────────────────────────────────┬──────────────────┘
//!                                                │ crossbeam (unbounded)
//! ┌───────────────────────── loop thread ────────▼──────────────────┐
//! │ scan(): drain ─► pending set ─► checksum ─► stabilize ─► result │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The notification callback never blocks: it attributes each raw path to
//! its unit and pushes it onto an unbounded channel. Only the owning loop
//! thread touches the pending set and the checksum store.
//!
//! If the watched root disappears the OS drops the subscription with it.
//! The scanner then reports "no information" until the root is back,
//! re-subscribes, and re-examines every unit once. An event on the root
//! itself also forces a re-subscribe, since a root deleted and recreated
//! between two scans never looks unlistable.

use std::time::Duration;

use bw_core::{Backend, ChangeSet, FxHashSet, SubdirMode};
use camino::{Utf8Path, Utf8PathBuf};
use crossbeam_channel::{Receiver, Sender};
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use tracing::{debug, info, trace, warn};

use crate::checksum::{compute_checksum, ChecksumStore};
use crate::error::WatchError;
use crate::scanner::Scanner;
use crate::stabilize::{stabilize, Candidates};
use crate::walker::DirectoryLister;

/// A message from the notification thread.
#[derive(Debug)]
enum Notice {
    /// Something happened to this unit.
    Changed(Utf8PathBuf),
    /// Events may have been lost; re-examine everything.
    Rescan,
    /// The root itself was touched; the subscription may be stale.
    RootChanged,
}

/// Re-examines only the units the OS reported as touched.
pub struct EventScanner {
    lister: DirectoryLister,
    store: ChecksumStore,
    pending: FxHashSet<Utf8PathBuf>,
    debouncer: Option<Debouncer<RecommendedWatcher>>,
    notices: Receiver<Notice>,
    needs_rewatch: bool,
}

impl std::fmt::Debug for EventScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventScanner")
            .field("root", &self.lister.root())
            .field("pending", &self.pending.len())
            .field("subscribed", &self.debouncer.is_some())
            .finish_non_exhaustive()
    }
}

impl EventScanner {
    /// Subscribes to OS notifications for `lister`'s root.
    ///
    /// The pending set starts with every unit currently present, so the
    /// first scan sees pre-existing files.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Notify`] if the OS backend cannot be initialized
    /// or the root cannot be subscribed to (including when it is missing).
    pub fn new(lister: DirectoryLister, debounce: Duration) -> Result<Self, WatchError> {
        let (tx, notices) = crossbeam_channel::unbounded();
        let mut debouncer = new_debouncer(debounce, notification_handler(lister.clone(), tx))?;
        debouncer
            .watcher()
            .watch(lister.root().as_std_path(), recursive_mode(lister.mode()))?;

        info!(root = %lister.root(), mode = %lister.mode(), "Subscribed to file system events");

        let mut scanner = Self {
            lister,
            store: ChecksumStore::new(),
            pending: FxHashSet::default(),
            debouncer: Some(debouncer),
            notices,
            needs_rewatch: false,
        };
        scanner.queue_everything();
        Ok(scanner)
    }

    /// Returns the number of units waiting to be re-examined.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Returns the scanner's records.
    #[must_use]
    pub fn store(&self) -> &ChecksumStore {
        &self.store
    }

    fn drain_notices(&mut self) {
        while let Ok(notice) = self.notices.try_recv() {
            match notice {
                Notice::Changed(unit) => {
                    self.pending.insert(unit);
                }
                Notice::Rescan => self.queue_everything(),
                Notice::RootChanged => self.needs_rewatch = true,
            }
        }
    }

    fn queue_everything(&mut self) {
        if let Some(units) = self.lister.list() {
            self.pending.extend(units);
        }
        self.pending.extend(self.store.paths().cloned());
    }

    fn resubscribe(&mut self) {
        let Some(debouncer) = self.debouncer.as_mut() else {
            return;
        };
        let root = self.lister.root().as_std_path();
        let _ = debouncer.watcher().unwatch(root);
        match debouncer
            .watcher()
            .watch(root, recursive_mode(self.lister.mode()))
        {
            Ok(()) => {
                info!(root = %self.lister.root(), "Re-subscribed to file system events");
                self.needs_rewatch = false;
            }
            Err(error) => {
                warn!(
                    root = %self.lister.root(),
                    error = %error,
                    "Could not re-subscribe, re-examining every unit each scan"
                );
            }
        }
        self.queue_everything();
    }

    fn gather(&mut self) -> Candidates {
        let mut candidates = Candidates::new();
        for path in self.pending.drain() {
            for tracked in self.store.tracked_under(&path) {
                candidates.absent(tracked);
            }
            for unit in self.lister.expand(&path) {
                match compute_checksum(&unit) {
                    Some(checksum) => candidates.present(unit, checksum),
                    None => candidates.absent(unit),
                }
            }
        }
        candidates
    }
}

impl Scanner for EventScanner {
    fn scan(&mut self, report_immediately: bool) -> Option<ChangeSet> {
        self.drain_notices();

        if !self.lister.is_listable() {
            if !self.needs_rewatch {
                debug!(root = %self.lister.root(), "Watched directory is gone");
            }
            self.needs_rewatch = true;
            return None;
        }
        if self.needs_rewatch {
            self.resubscribe();
        }

        let examined = self.pending.len();
        let candidates = self.gather();
        if candidates.is_empty() {
            trace!(root = %self.lister.root(), "Nothing pending");
            return Some(ChangeSet::new());
        }
        let outcome = stabilize(&mut self.store, candidates, report_immediately);
        debug!(
            root = %self.lister.root(),
            examined,
            changed = outcome.changes.len(),
            unsettled = outcome.unsettled.len(),
            tracked = self.store.len(),
            "Event scan complete"
        );
        self.pending.extend(outcome.unsettled);
        Some(outcome.changes)
    }

    fn update_checksum(&mut self, path: &Utf8Path) {
        let Some(unit) = self.lister.attribute(path) else {
            return;
        };
        if let Some(checksum) = compute_checksum(&unit) {
            debug!(path = %unit, checksum = %checksum, "Re-baselined checksum");
            self.store.rebaseline(&unit, checksum);
        }
    }

    fn close(&mut self) {
        if self.debouncer.take().is_some() {
            info!(root = %self.lister.root(), "Unsubscribed from file system events");
        }
        while self.notices.try_recv().is_ok() {}
    }

    fn root(&self) -> &Utf8Path {
        self.lister.root()
    }

    fn backend(&self) -> Backend {
        Backend::Event
    }
}

const fn recursive_mode(mode: SubdirMode) -> RecursiveMode {
    match mode {
        SubdirMode::None => RecursiveMode::NonRecursive,
        SubdirMode::Managed | SubdirMode::All => RecursiveMode::Recursive,
    }
}

fn notification_handler(
    lister: DirectoryLister,
    tx: Sender<Notice>,
) -> impl FnMut(DebounceEventResult) + Send + 'static {
    move |res: DebounceEventResult| match res {
        Ok(events) => {
            for event in events {
                let path = match Utf8PathBuf::try_from(event.path) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(
                            path = %e.into_path_buf().display(),
                            "Skipping non-UTF-8 path in file event"
                        );
                        continue;
                    }
                };

                if lister.is_root(&path) {
                    debug!(path = %path, "Watched root touched, scheduling re-subscribe");
                    if tx.send(Notice::RootChanged).is_err() {
                        break;
                    }
                    continue;
                }

                let Some(unit) = lister.attribute(&path) else {
                    trace!(path = %path, "Ignoring file event");
                    continue;
                };

                if tx.send(Notice::Changed(unit)).is_err() {
                    trace!("Scanner closed, dropping file events");
                    break;
                }
            }
        }
        Err(error) => {
            warn!(error = %error, "File event backend reported an error, scheduling a rescan");
            let _ = tx.send(Notice::Rescan);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::AcceptAllFilter;
    use std::fs;
    use std::sync::Arc;
    use std::thread;
    use std::time::SystemTime;
    use tempfile::TempDir;

    /// Debounce window plus OS notification latency.
    const SETTLE: Duration = Duration::from_millis(800);

    fn lister(root: &Utf8Path) -> DirectoryLister {
        DirectoryLister::new(root.to_owned(), SubdirMode::Managed, Arc::new(AcceptAllFilter))
    }

    fn temp_root() -> (TempDir, Utf8PathBuf) {
        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp.path().canonicalize().unwrap()).unwrap();
        (temp, root)
    }

    #[test]
    fn test_missing_root_fails_construction() {
        let (_temp, root) = temp_root();
        let result = EventScanner::new(lister(&root.join("missing")), Duration::from_millis(50));
        assert!(matches!(result, Err(WatchError::Notify(_))));
    }

    #[test]
    fn test_construction_seeds_pending_with_listing() {
        let (_temp, root) = temp_root();
        fs::write(root.join("a.jar"), "a").unwrap();
        fs::write(root.join("b.jar"), "b").unwrap();

        let mut scanner = EventScanner::new(lister(&root), Duration::from_millis(50)).unwrap();
        assert_eq!(scanner.pending_len(), 2);

        let changes = scanner.scan(true).unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(scanner.pending_len(), 0);
        scanner.close();
    }

    #[test]
    fn test_unsettled_units_stay_pending() {
        let (_temp, root) = temp_root();
        let mut scanner = EventScanner::new(lister(&root), Duration::from_millis(50)).unwrap();
        fs::write(root.join("a.jar"), "a").unwrap();
        scanner.pending.insert(root.join("a.jar"));

        assert!(scanner.scan(false).unwrap().is_empty());
        assert_eq!(scanner.pending_len(), 1);

        let changes = scanner.scan(false).unwrap();
        assert!(changes.contains(&root.join("a.jar")));
        scanner.close();
    }

    #[test]
    fn test_root_removal_yields_no_information() {
        let (_temp, root) = temp_root();
        let watched = root.join("load");
        fs::create_dir(&watched).unwrap();
        fs::write(watched.join("a.jar"), "a").unwrap();

        let mut scanner = EventScanner::new(lister(&watched), Duration::from_millis(50)).unwrap();
        scanner.scan(true).unwrap();

        fs::remove_dir_all(&watched).unwrap();
        assert!(scanner.scan(false).is_none());
        assert_eq!(scanner.store().len(), 1);

        fs::create_dir(&watched).unwrap();
        let changes = scanner.scan(false).unwrap();
        assert!(changes.contains(&watched.join("a.jar")));
        scanner.close();
    }

    #[test]
    fn test_close_is_idempotent() {
        let (_temp, root) = temp_root();
        let mut scanner = EventScanner::new(lister(&root), Duration::from_millis(50)).unwrap();
        scanner.close();
        scanner.close();
        assert_eq!(scanner.backend(), Backend::Event);
    }

    fn write_at(path: &Utf8Path, contents: &str, secs: u64) {
        fs::write(path, contents).unwrap();
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
            .unwrap();
    }

    #[test]
    fn test_no_events_after_close() {
        let (_temp, root) = temp_root();
        let mut scanner = EventScanner::new(lister(&root), Duration::from_millis(50)).unwrap();
        assert!(scanner.scan(true).unwrap().is_empty());
        scanner.close();

        write_at(&root.join("a.jar"), "a", 1_000);
        thread::sleep(SETTLE);
        assert!(scanner.scan(false).unwrap().is_empty());
        assert!(scanner.scan(false).unwrap().is_empty());
        assert_eq!(scanner.pending_len(), 0);
    }

    #[test]
    fn test_rebaseline_suppresses_rewrite() {
        let (_temp, root) = temp_root();
        let file = root.join("a.jar");
        write_at(&file, "a", 1_000);

        let mut scanner = EventScanner::new(lister(&root), Duration::from_millis(50)).unwrap();
        assert_eq!(scanner.scan(true).unwrap().len(), 1);

        write_at(&file, "rewritten by consumer", 2_000);
        scanner.update_checksum(&file);
        thread::sleep(SETTLE);

        assert!(scanner.scan(false).unwrap().is_empty());
        assert!(scanner.scan(false).unwrap().is_empty());
        assert_eq!(scanner.pending_len(), 0);
        scanner.close();
    }

    #[test]
    fn test_root_event_schedules_resubscribe() {
        let (_temp, root) = temp_root();
        let mut scanner = EventScanner::new(lister(&root), Duration::from_millis(50)).unwrap();
        scanner.scan(true).unwrap();

        let (tx, rx) = crossbeam_channel::unbounded();
        scanner.notices = rx;
        tx.send(Notice::RootChanged).unwrap();
        scanner.drain_notices();
        assert!(scanner.needs_rewatch);

        scanner.scan(false).unwrap();
        assert!(!scanner.needs_rewatch);
        scanner.close();
    }

    #[test]
    fn test_recursive_mode_by_subdir_mode() {
        assert_eq!(recursive_mode(SubdirMode::None), RecursiveMode::NonRecursive);
        assert_eq!(recursive_mode(SubdirMode::All), RecursiveMode::Recursive);
    }
}
