//! Checksums and the per-scanner record store.
//!
//! [`compute_checksum`] folds the name, size, and modification time of a
//! file into a [`Checksum`]. For a directory (a managed unit) it folds in
//! every entry below it, so touching any file inside the unit changes the
//! unit's checksum.
//!
//! [`ChecksumStore`] is pure data: one [`FileRecord`] per path a scanner has
//! seen. It does no I/O.

use std::hash::Hasher;
use std::time::UNIX_EPOCH;

use bw_core::{Checksum, FileRecord, FxHashMap};
use camino::{Utf8Path, Utf8PathBuf};
use ignore::WalkBuilder;
use rustc_hash::FxHasher;

/// Computes the checksum of a file or directory.
///
/// Returns `None` if the path cannot be inspected, which usually means it
/// vanished between listing and checksumming. Entries below a directory that
/// vanish mid-walk are skipped.
///
/// The checksum covers names, sizes, and modification times only. A rewrite
/// that keeps the size and lands within the filesystem's timestamp
/// granularity is not detected.
#[must_use]
pub fn compute_checksum(path: &Utf8Path) -> Option<Checksum> {
    let metadata = std::fs::metadata(path).ok()?;
    let mut hasher = FxHasher::default();

    if metadata.is_dir() {
        hasher.write(path.file_name().unwrap_or_default().as_bytes());
        let walker = WalkBuilder::new(path)
            .standard_filters(false)
            .follow_links(true)
            .sort_by_file_name(|a, b| a.cmp(b))
            .build();

        for entry in walker.flatten() {
            if entry.depth() == 0 {
                continue;
            }
            let Ok(entry_meta) = entry.metadata() else {
                continue;
            };
            let relative = entry.path().strip_prefix(path).unwrap_or(entry.path());
            hasher.write(relative.as_os_str().as_encoded_bytes());
            if entry_meta.is_file() {
                fold_file(&mut hasher, &entry_meta);
            }
        }
    } else {
        hasher.write(path.file_name().unwrap_or_default().as_bytes());
        fold_file(&mut hasher, &metadata);
    }

    Some(Checksum::new(hasher.finish()))
}

fn fold_file(hasher: &mut FxHasher, metadata: &std::fs::Metadata) {
    hasher.write_u64(metadata.len());
    let modified = metadata
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |since| since.as_nanos());
    hasher.write_u128(modified);
}

/// Per-path records for one scanner.
///
/// Owned by exactly one scanner, which in turn is owned by one watch loop,
/// so no locking is involved.
#[derive(Debug, Default)]
pub struct ChecksumStore {
    records: FxHashMap<Utf8PathBuf, FileRecord>,
}

impl ChecksumStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the record for a path, if one exists.
    #[must_use]
    pub fn get(&self, path: &Utf8Path) -> Option<&FileRecord> {
        self.records.get(path)
    }

    /// Returns the record for a path, creating an unobserved one if needed.
    pub fn record_mut(&mut self, path: &Utf8Path) -> &mut FileRecord {
        self.records
            .entry(path.to_owned())
            .or_insert_with(|| FileRecord::new(path.to_owned()))
    }

    /// Purges the record for a path.
    pub fn remove(&mut self, path: &Utf8Path) -> Option<FileRecord> {
        self.records.remove(path)
    }

    /// Sets both the observed and the reported checksum of a path.
    ///
    /// After this, the path is not reported again until its checksum moves
    /// away from `checksum`.
    pub fn rebaseline(&mut self, path: &Utf8Path, checksum: Checksum) {
        let record = self.record_mut(path);
        record.last = Some(checksum);
        record.stored = Some(checksum);
    }

    /// Returns every tracked path.
    pub fn paths(&self) -> impl Iterator<Item = &Utf8PathBuf> {
        self.records.keys()
    }

    /// Returns the tracked paths equal to or below `prefix`.
    #[must_use]
    pub fn tracked_under(&self, prefix: &Utf8Path) -> Vec<Utf8PathBuf> {
        self.records
            .keys()
            .filter(|path| path.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Returns the number of tracked paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
