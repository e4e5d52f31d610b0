//! The stabilization and removal rule shared by both scanners.
//!
//! A scanner gathers [`Candidates`]: units it found present, with their fresh
//! checksums, and units it believes are gone. [`stabilize`] compares them
//! against the [`ChecksumStore`] and decides what the consumer sees:
//!
//! - A present unit is reported once its checksum matches the one observed
//!   by the previous scan, unless that checksum was already reported.
//! - With `report_immediately`, every present unit is reported at once.
//! - An absent unit that was reported before is reported one last time and
//!   purged. One that was only ever observed is purged silently.
//!
//! Present units whose checksum is still moving come back as *unsettled*;
//! the event scanner keeps them pending so it re-checks them next cycle.

use bw_core::{ChangeSet, Checksum, FxHashMap, FxHashSet};
use camino::Utf8PathBuf;

use crate::checksum::ChecksumStore;

/// What one scan observed.
#[derive(Debug, Default)]
pub struct Candidates {
    present: FxHashMap<Utf8PathBuf, Checksum>,
    absent: FxHashSet<Utf8PathBuf>,
}

impl Candidates {
    /// Creates an empty candidate set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a unit that exists with the given checksum.
    pub fn present(&mut self, path: Utf8PathBuf, checksum: Checksum) {
        self.absent.remove(&path);
        self.present.insert(path, checksum);
    }

    /// Records a unit that no longer exists.
    ///
    /// Ignored if the same unit was already recorded as present.
    pub fn absent(&mut self, path: Utf8PathBuf) {
        if !self.present.contains_key(&path) {
            self.absent.insert(path);
        }
    }

    /// Returns `true` if nothing was observed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.present.is_empty() && self.absent.is_empty()
    }
}

/// The result of applying the rule to one scan's candidates.
#[derive(Debug, Default)]
pub struct Outcome {
    /// Units to hand to the consumer.
    pub changes: ChangeSet,
    /// Present units whose checksum changed since the previous scan.
    pub unsettled: Vec<Utf8PathBuf>,
}

/// Applies the stabilization and removal rule.
///
/// Every present unit's observed checksum is advanced. A unit's reported
/// checksum moves only when the unit lands in [`Outcome::changes`].
pub fn stabilize(
    store: &mut ChecksumStore,
    candidates: Candidates,
    report_immediately: bool,
) -> Outcome {
    let mut outcome = Outcome::default();

    for (path, checksum) in candidates.present {
        let record = store.record_mut(&path);
        let previous = record.last.replace(checksum);
        let already_reported = record.stored == Some(checksum);

        if report_immediately || (previous == Some(checksum) && !already_reported) {
            record.stored = Some(checksum);
            outcome.changes.insert(path);
        } else if previous != Some(checksum) && !already_reported {
            outcome.unsettled.push(path);
        }
    }

    for path in candidates.absent {
        if store.remove(&path).is_some_and(|record| record.is_reported()) {
            outcome.changes.insert(path);
        }
    }

    outcome
}
