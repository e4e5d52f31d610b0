//! Data passed between the scanners, the watch loops, and consumers.
//!
//! - [`Checksum`] - cheap content-identity proxy for one file or unit
//! - [`FileRecord`] - what a scanner remembers about one path
//! - [`ChangeSet`] - the paths one scan cycle hands to the consumer

use std::collections::BTreeSet;
use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

/// A cheap checksum derived from file names, sizes, and modification times.
///
/// This is not a content hash. Two writes that leave the size unchanged and
/// land within the filesystem's timestamp granularity produce the same
/// checksum, and the second write goes unnoticed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum(u64);

impl Checksum {
    /// Wraps a raw checksum value.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// What a scanner remembers about one watched path.
///
/// `last` is the checksum seen by the most recent scan that touched the path.
/// `stored` is the checksum at the time the path was last delivered to the
/// consumer; it is `None` until the first delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Absolute path of the file or managed unit.
    pub path: Utf8PathBuf,

    /// Checksum observed by the most recent scan.
    pub last: Option<Checksum>,

    /// Checksum at the time of the last delivery.
    pub stored: Option<Checksum>,
}

impl FileRecord {
    /// Creates a record for a path that has not been observed yet.
    #[must_use]
    pub fn new(path: Utf8PathBuf) -> Self {
        Self {
            path,
            last: None,
            stored: None,
        }
    }

    /// Returns `true` once the path has been delivered at least once.
    #[inline]
    #[must_use]
    pub const fn is_reported(&self) -> bool {
        self.stored.is_some()
    }
}

/// The set of paths needing consumer attention after one scan cycle.
///
/// Paths are absolute and ordered, so a path appears at most once and
/// consumers see a deterministic order. A path in the set may refer to a file
/// that was added, modified, or removed; consumers check the filesystem to
/// tell these apart.
///
/// # Examples
///
/// ```
/// use bw_core::ChangeSet;
/// use camino::Utf8PathBuf;
///
/// let mut changes = ChangeSet::new();
/// changes.insert(Utf8PathBuf::from("/srv/load/b.jar"));
/// changes.insert(Utf8PathBuf::from("/srv/load/a.jar"));
/// changes.insert(Utf8PathBuf::from("/srv/load/a.jar"));
///
/// assert_eq!(changes.len(), 2);
/// let first = changes.iter().next().map(|p| p.as_str());
/// assert_eq!(first, Some("/srv/load/a.jar"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeSet {
    paths: BTreeSet<Utf8PathBuf>,
}

impl ChangeSet {
    /// Creates an empty change set.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a path. Returns `false` if it was already present.
    pub fn insert(&mut self, path: Utf8PathBuf) -> bool {
        self.paths.insert(path)
    }

    /// Returns `true` if the path is part of this change set.
    #[must_use]
    pub fn contains(&self, path: &Utf8Path) -> bool {
        self.paths.contains(path)
    }

    /// Returns the number of paths.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Returns `true` if nothing changed.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Returns an iterator over the paths in order.
    pub fn iter(&self) -> impl Iterator<Item = &Utf8PathBuf> {
        self.paths.iter()
    }
}

impl IntoIterator for ChangeSet {
    type Item = Utf8PathBuf;
    type IntoIter = std::collections::btree_set::IntoIter<Utf8PathBuf>;

    fn into_iter(self) -> Self::IntoIter {
        self.paths.into_iter()
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = &'a Utf8PathBuf;
    type IntoIter = std::collections::btree_set::Iter<'a, Utf8PathBuf>;

    fn into_iter(self) -> Self::IntoIter {
        self.paths.iter()
    }
}

impl FromIterator<Utf8PathBuf> for ChangeSet {
    fn from_iter<T: IntoIterator<Item = Utf8PathBuf>>(iter: T) -> Self {
        Self {
            paths: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_display_is_fixed_width_hex() {
        assert_eq!(Checksum::new(0xab).to_string(), "00000000000000ab");
    }

    #[test]
    fn test_file_record_new_is_unreported() {
        let record = FileRecord::new(Utf8PathBuf::from("/srv/load/a.jar"));
        assert!(!record.is_reported());
        assert_eq!(record.last, None);
    }

    #[test]
    fn test_change_set_dedups_and_orders() {
        let changes: ChangeSet = ["/b.jar", "/a.jar", "/b.jar"]
            .into_iter()
            .map(Utf8PathBuf::from)
            .collect();

        let paths: Vec<_> = changes.iter().map(|p| p.as_str()).collect();
        assert_eq!(paths, vec!["/a.jar", "/b.jar"]);
        assert!(changes.contains(Utf8Path::new("/a.jar")));
    }

    #[test]
    fn test_change_set_serializes_as_list() {
        let changes: ChangeSet = std::iter::once(Utf8PathBuf::from("/a.jar")).collect();
        let json = serde_json::to_string(&changes).unwrap();
        assert_eq!(json, r#"["/a.jar"]"#);
    }
}
