//! The polling backend.

use bw_core::{Backend, ChangeSet};
use camino::Utf8Path;
use tracing::debug;

use crate::checksum::{compute_checksum, ChecksumStore};
use crate::scanner::Scanner;
use crate::stabilize::{stabilize, Candidates};
use crate::walker::DirectoryLister;

/// Lists and checksums every unit under the root on every scan.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use bw_core::SubdirMode;
/// use bw_watcher::{AcceptAllFilter, DirectoryLister, PollScanner, Scanner};
/// use camino::Utf8PathBuf;
///
/// let lister = DirectoryLister::new(
///     Utf8PathBuf::from("/nonexistent/bundlewatch"),
///     SubdirMode::Managed,
///     Arc::new(AcceptAllFilter),
/// );
/// let mut scanner = PollScanner::new(lister);
///
/// // An unlistable root yields no information, not an empty change set.
/// assert!(scanner.scan(false).is_none());
/// ```
#[derive(Debug)]
pub struct PollScanner {
    lister: DirectoryLister,
    store: ChecksumStore,
}

impl PollScanner {
    /// Creates a scanner over `lister`'s root.
    #[must_use]
    pub fn new(lister: DirectoryLister) -> Self {
        Self {
            lister,
            store: ChecksumStore::new(),
        }
    }

    /// Returns the scanner's records.
    #[must_use]
    pub fn store(&self) -> &ChecksumStore {
        &self.store
    }
}

impl Scanner for PollScanner {
    fn scan(&mut self, report_immediately: bool) -> Option<ChangeSet> {
        let listed = self.lister.list()?;

        let mut candidates = Candidates::new();
        for unit in &listed {
            // Vanished between listing and checksumming; neither present nor
            // removed until the next listing says otherwise.
            if let Some(checksum) = compute_checksum(unit) {
                candidates.present(unit.clone(), checksum);
            }
        }
        for tracked in self.store.paths() {
            if !listed.contains(tracked) {
                candidates.absent(tracked.clone());
            }
        }

        let outcome = stabilize(&mut self.store, candidates, report_immediately);
        debug!(
            root = %self.lister.root(),
            listed = listed.len(),
            changed = outcome.changes.len(),
            unsettled = outcome.unsettled.len(),
            tracked = self.store.len(),
            "Poll scan complete"
        );
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

    fn close(&mut self) {}

    fn root(&self) -> &Utf8Path {
        self.lister.root()
    }

    fn backend(&self) -> Backend {
        Backend::Poll
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::AcceptAllFilter;
    use bw_core::SubdirMode;
    use camino::Utf8PathBuf;
    use std::fs;
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn scanner(mode: SubdirMode) -> (TempDir, Utf8PathBuf, PollScanner) {
        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        let lister = DirectoryLister::new(root.clone(), mode, Arc::new(AcceptAllFilter));
        (temp, root, PollScanner::new(lister))
    }

    fn write_at(path: &Utf8Path, contents: &str, secs: u64) {
        fs::write(path, contents).unwrap();
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
            .unwrap();
    }

    fn names(changes: &ChangeSet) -> Vec<&str> {
        changes.iter().filter_map(|p| p.file_name()).collect()
    }

    #[test]
    fn test_initial_scan_reports_everything() {
        let (_temp, root, mut scanner) = scanner(SubdirMode::Managed);
        write_at(&root.join("a.jar"), "a", 100);
        write_at(&root.join("b.jar"), "b", 100);

        let changes = scanner.scan(true).unwrap();
        assert_eq!(names(&changes), vec!["a.jar", "b.jar"]);
        assert!(scanner.scan(false).unwrap().is_empty());
    }

    #[test]
    fn test_update_checksum_suppresses_external_rewrite() {
        let (_temp, root, mut scanner) = scanner(SubdirMode::Managed);
        let file = root.join("a.jar");
        write_at(&file, "a", 100);
        scanner.scan(true).unwrap();

        write_at(&file, "rewritten", 200);
        scanner.update_checksum(&file);

        assert!(scanner.scan(false).unwrap().is_empty());
        assert!(scanner.scan(false).unwrap().is_empty());
    }

    #[test]
    fn test_update_checksum_ignores_paths_outside_root() {
        let (_temp, _root, mut scanner) = scanner(SubdirMode::Managed);
        scanner.update_checksum(Utf8Path::new("/elsewhere/a.jar"));
        assert!(scanner.store().is_empty());
    }

    #[test]
    fn test_managed_unit_reported_when_nested_file_changes() {
        let (_temp, root, mut scanner) = scanner(SubdirMode::Managed);
        let unit = root.join("app");
        fs::create_dir(&unit).unwrap();
        let inner = unit.join("lib.jar");
        write_at(&inner, "v1", 100);
        scanner.scan(true).unwrap();

        write_at(&inner, "v2", 200);
        assert!(scanner.scan(false).unwrap().is_empty());
        let changes = scanner.scan(false).unwrap();
        assert_eq!(names(&changes), vec!["app"]);
    }

    #[test]
    fn test_backend_is_poll() {
        let (_temp, _root, scanner) = scanner(SubdirMode::None);
        assert_eq!(scanner.backend(), Backend::Poll);
    }
}
