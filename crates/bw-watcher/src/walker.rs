//! Directory listing and subdirectory attribution.
//!
//! [`DirectoryLister`] turns a watched root into the set of *units* a scanner
//! tracks. What counts as a unit depends on the [`SubdirMode`]:
//!
//! | Mode      | Top-level file | Top-level directory          | Nested file          |
//! |-----------|----------------|------------------------------|----------------------|
//! | `None`    | unit           | ignored                      | ignored              |
//! | `Managed` | unit           | unit (checksummed as a tree) | attributed to parent |
//! | `All`     | unit           | walked                       | unit                 |
//!
//! The file name filter applies to the unit's own name.

use std::fs;
use std::sync::Arc;

use bw_core::{FxHashSet, SubdirMode};
use camino::{Utf8Path, Utf8PathBuf};
use ignore::WalkBuilder;
use tracing::{trace, warn};

use crate::filter::FileFilter;

/// Lists a watched root and maps arbitrary paths below it onto units.
///
/// Cheap to clone; the event backend's notification callback holds a copy.
#[derive(Clone)]
pub struct DirectoryLister {
    root: Utf8PathBuf,
    /// Canonical form of `root`, when it differs. Some platforms report
    /// events against the resolved path.
    canonical_root: Option<Utf8PathBuf>,
    mode: SubdirMode,
    filter: Arc<dyn FileFilter>,
}

impl std::fmt::Debug for DirectoryLister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryLister")
            .field("root", &self.root)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl DirectoryLister {
    /// Creates a lister for `root`.
    pub fn new(root: Utf8PathBuf, mode: SubdirMode, filter: Arc<dyn FileFilter>) -> Self {
        let canonical_root = root
            .canonicalize_utf8()
            .ok()
            .filter(|canonical| *canonical != root);
        Self {
            root,
            canonical_root,
            mode,
            filter,
        }
    }

    /// Returns the watched root.
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Returns the subdirectory mode.
    #[inline]
    #[must_use]
    pub const fn mode(&self) -> SubdirMode {
        self.mode
    }

    /// Returns `true` if the root can currently be listed.
    #[must_use]
    pub fn is_listable(&self) -> bool {
        fs::read_dir(&self.root).is_ok()
    }

    /// Lists every unit currently present under the root.
    ///
    /// Returns `None` if the root itself cannot be read. Entries that vanish
    /// or cannot be inspected during the listing are skipped.
    #[must_use]
    pub fn list(&self) -> Option<FxHashSet<Utf8PathBuf>> {
        let walker = WalkBuilder::new(&self.root)
            .standard_filters(false)
            .follow_links(true)
            .max_depth(Some(1))
            .build();

        let mut units = FxHashSet::default();
        let mut saw_root = false;
        for result in walker {
            let entry = match result {
                Ok(entry) => entry,
                // Failures at the root mean the root itself is unreadable.
                Err(error) if error.depth().is_none_or(|depth| depth == 0) => {
                    trace!(root = %self.root, error = %error, "Watched directory cannot be listed");
                    return None;
                }
                Err(error) => {
                    trace!(root = %self.root, error = %error, "Skipping unreadable entry");
                    continue;
                }
            };
            if entry.depth() == 0 {
                if !entry.file_type().is_some_and(|ft| ft.is_dir()) {
                    trace!(root = %self.root, "Watched path is not a directory");
                    return None;
                }
                saw_root = true;
                continue;
            }
            match Utf8Path::from_path(entry.path()) {
                Some(path) => units.extend(self.expand(path)),
                None => warn!(path = %entry.path().display(), "Skipping non-UTF-8 path"),
            }
        }
        saw_root.then_some(units)
    }

    /// Returns the units currently present at or below a first-level path.
    ///
    /// A missing path, a filtered-out path, and a path that is not a unit in
    /// this mode all yield an empty list.
    #[must_use]
    pub fn expand(&self, path: &Utf8Path) -> Vec<Utf8PathBuf> {
        let Ok(metadata) = fs::metadata(path) else {
            return Vec::new();
        };

        if metadata.is_file() {
            return if self.filter.should_process(path) {
                vec![path.to_owned()]
            } else {
                Vec::new()
            };
        }

        if !metadata.is_dir() {
            return Vec::new();
        }

        match self.mode {
            SubdirMode::None => Vec::new(),
            SubdirMode::Managed => {
                if self.is_top_level(path) && self.filter.should_process(path) {
                    vec![path.to_owned()]
                } else {
                    Vec::new()
                }
            }
            SubdirMode::All => self.walk_files(path),
        }
    }

    /// Returns `true` if `path` names the watched root itself.
    #[must_use]
    pub fn is_root(&self, path: &Utf8Path) -> bool {
        path == self.root || self.canonical_root.as_deref() == Some(path)
    }

    /// Maps a path reported by the OS onto the unit it belongs to.
    ///
    /// Returns `None` for the root itself, for paths outside the root, for
    /// paths the mode ignores, and for units the filter rejects.
    #[must_use]
    pub fn attribute(&self, path: &Utf8Path) -> Option<Utf8PathBuf> {
        let relative = path
            .strip_prefix(&self.root)
            .ok()
            .or_else(|| {
                self.canonical_root
                    .as_deref()
                    .and_then(|canonical| path.strip_prefix(canonical).ok())
            })?;

        let mut components = relative.components();
        let first = components.next()?;
        let nested = components.next().is_some();

        let unit = match self.mode {
            SubdirMode::None if nested => return None,
            SubdirMode::None | SubdirMode::Managed => self.root.join(first),
            SubdirMode::All => self.root.join(relative),
        };

        self.filter.should_process(&unit).then_some(unit)
    }

    fn is_top_level(&self, path: &Utf8Path) -> bool {
        path.parent() == Some(self.root.as_path())
    }

    fn walk_files(&self, dir: &Utf8Path) -> Vec<Utf8PathBuf> {
        let walker = WalkBuilder::new(dir)
            .standard_filters(false)
            .follow_links(true)
            .build();

        let mut files = Vec::new();
        for entry in walker.flatten() {
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            match Utf8Path::from_path(entry.path()) {
                Some(path) if self.filter.should_process(path) => files.push(path.to_owned()),
                Some(_) => {}
                None => {
                    warn!(path = %entry.path().display(), "Skipping non-UTF-8 path");
                }
            }
        }
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{AcceptAllFilter, NamePatternFilter};
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        root: Utf8PathBuf,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp.path().canonicalize().unwrap()).unwrap();
        fs::write(root.join("a.jar"), "a").unwrap();
        fs::write(root.join("notes.txt"), "n").unwrap();
        fs::create_dir_all(root.join("exploded.jar").join("META-INF")).unwrap();
        fs::write(root.join("exploded.jar").join("META-INF").join("MANIFEST.MF"), "m").unwrap();
        fs::create_dir_all(root.join("nested").join("deeper")).unwrap();
        fs::write(root.join("nested").join("b.jar"), "b").unwrap();
        fs::write(root.join("nested").join("deeper").join("c.jar"), "c").unwrap();
        Fixture { _temp: temp, root }
    }

    fn lister(root: &Utf8Path, mode: SubdirMode) -> DirectoryLister {
        DirectoryLister::new(root.to_owned(), mode, Arc::new(AcceptAllFilter))
    }

    fn sorted_relative(root: &Utf8Path, units: impl IntoIterator<Item = Utf8PathBuf>) -> Vec<String> {
        let mut names: Vec<_> = units
            .into_iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_list_mode_none() {
        let fx = fixture();
        let units = lister(&fx.root, SubdirMode::None).list().unwrap();
        assert_eq!(sorted_relative(&fx.root, units), vec!["a.jar", "notes.txt"]);
    }

    #[test]
    fn test_list_mode_managed() {
        let fx = fixture();
        let units = lister(&fx.root, SubdirMode::Managed).list().unwrap();
        assert_eq!(
            sorted_relative(&fx.root, units),
            vec!["a.jar", "exploded.jar", "nested", "notes.txt"]
        );
    }

    #[test]
    fn test_list_mode_all() {
        let fx = fixture();
        let units = lister(&fx.root, SubdirMode::All).list().unwrap();
        assert_eq!(
            sorted_relative(&fx.root, units),
            vec![
                "a.jar",
                "exploded.jar/META-INF/MANIFEST.MF",
                "nested/b.jar",
                "nested/deeper/c.jar",
                "notes.txt",
            ]
        );
    }

    #[test]
    fn test_list_applies_filter() {
        let fx = fixture();
        let filter = Arc::new(NamePatternFilter::new(r".*\.jar").unwrap());
        let units = DirectoryLister::new(fx.root.clone(), SubdirMode::Managed, filter)
            .list()
            .unwrap();
        assert_eq!(sorted_relative(&fx.root, units), vec!["a.jar", "exploded.jar"]);
    }

    #[test]
    fn test_list_missing_root_is_none() {
        let fx = fixture();
        let missing = fx.root.join("does-not-exist");
        assert!(lister(&missing, SubdirMode::All).list().is_none());
        assert!(!lister(&missing, SubdirMode::All).is_listable());
    }

    #[test]
    fn test_list_root_that_is_a_file_is_none() {
        let fx = fixture();
        assert!(lister(&fx.root.join("a.jar"), SubdirMode::Managed).list().is_none());
    }

    #[test]
    fn test_is_root() {
        let lister = lister(Utf8Path::new("/srv/load"), SubdirMode::Managed);
        assert!(lister.is_root(Utf8Path::new("/srv/load")));
        assert!(!lister.is_root(Utf8Path::new("/srv/load/a.jar")));
        assert!(!lister.is_root(Utf8Path::new("/srv")));
    }

    #[test]
    fn test_attribute_by_mode() {
        let root = Utf8Path::new("/srv/load");
        let nested = Utf8Path::new("/srv/load/app/lib/x.jar");
        let top = Utf8Path::new("/srv/load/a.jar");

        let none = lister(root, SubdirMode::None);
        assert_eq!(none.attribute(top).as_deref(), Some(top));
        assert_eq!(none.attribute(nested), None);

        let managed = lister(root, SubdirMode::Managed);
        assert_eq!(
            managed.attribute(nested).as_deref(),
            Some(Utf8Path::new("/srv/load/app"))
        );

        let all = lister(root, SubdirMode::All);
        assert_eq!(all.attribute(nested).as_deref(), Some(nested));
    }

    #[test]
    fn test_attribute_rejects_root_and_outside_paths() {
        let managed = lister(Utf8Path::new("/srv/load"), SubdirMode::Managed);
        assert_eq!(managed.attribute(Utf8Path::new("/srv/load")), None);
        assert_eq!(managed.attribute(Utf8Path::new("/srv/other/a.jar")), None);
    }

    #[test]
    fn test_attribute_filters_on_unit_name() {
        let filter = Arc::new(NamePatternFilter::new(r".*\.jar").unwrap());
        let managed =
            DirectoryLister::new(Utf8PathBuf::from("/srv/load"), SubdirMode::Managed, filter);
        assert!(managed
            .attribute(Utf8Path::new("/srv/load/app.jar/META-INF/MANIFEST.MF"))
            .is_some());
        assert!(managed.attribute(Utf8Path::new("/srv/load/app/x.jar")).is_none());
    }

    #[test]
    fn test_expand_missing_path_is_empty() {
        let fx = fixture();
        let lister = lister(&fx.root, SubdirMode::Managed);
        assert!(lister.expand(&fx.root.join("gone.jar")).is_empty());
    }
}
