//! The scanner contract and backend selection.
//!
//! A [`Scanner`] answers one question per cycle: which units need the
//! consumer's attention? [`PollScanner`](crate::PollScanner) lists the whole
//! root every time; [`EventScanner`](crate::EventScanner) only re-examines
//! paths the OS reported. Both feed the same stabilization rule, so the
//! consumer cannot tell them apart.
//!
//! [`build_scanner`] picks the backend for a [`WatchTarget`], falling back to
//! polling when OS notifications cannot be set up.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bw_core::{Backend, ChangeSet, ConfigError, WatchTarget, FILTER};
use camino::{Utf8Path, Utf8PathBuf};
use tracing::{info, warn};

use crate::error::WatchError;
use crate::event::EventScanner;
use crate::filter::filter_for;
use crate::poll::PollScanner;
use crate::walker::DirectoryLister;

/// Debounce window applied to raw OS events before they are queued.
pub const EVENT_DEBOUNCE: Duration = Duration::from_millis(250);

/// Detects changed units under one watched root.
///
/// A scanner is owned by a single watch loop and never shared between
/// threads at the same time, so methods take `&mut self`.
pub trait Scanner: Send {
    /// Runs one scan cycle.
    ///
    /// Returns `None` if the root could not be listed; the caller must treat
    /// that as "no information" rather than "nothing changed". Otherwise
    /// returns the units to deliver, which may be empty.
    fn scan(&mut self, report_immediately: bool) -> Option<ChangeSet>;

    /// Records the current checksum of `path` as already reported.
    ///
    /// Used when an external writer rewrites a unit the consumer has already
    /// handled. Paths below a managed unit re-baseline the whole unit.
    fn update_checksum(&mut self, path: &Utf8Path);

    /// Releases OS resources. Later scans see no new events.
    fn close(&mut self);

    /// Returns the watched root.
    fn root(&self) -> &Utf8Path;

    /// Returns the backend this scanner runs on.
    fn backend(&self) -> Backend;
}

/// Builds the scanner for a target.
///
/// The event backend is tried first unless the target asks for polling. If
/// it cannot be initialized the failure is logged and a [`PollScanner`] is
/// returned instead; that decision is final for the scanner's lifetime.
///
/// # Errors
///
/// Returns [`WatchError::Config`] if the filter does not compile, and an I/O
/// error if the current directory is needed to absolutize a relative root
/// and cannot be read.
pub fn build_scanner(target: &WatchTarget) -> Result<Box<dyn Scanner>, WatchError> {
    let filter = filter_for(target.filter.as_deref())
        .map_err(|e| ConfigError::invalid_option(FILTER, e.to_string()))?;
    let root = absolute(target.directory())?;
    let lister = DirectoryLister::new(root, target.subdir_mode, Arc::from(filter));

    if target.backend == Backend::Event {
        match EventScanner::new(lister.clone(), EVENT_DEBOUNCE) {
            Ok(scanner) => {
                info!(root = %lister.root(), "Using OS event backend");
                return Ok(Box::new(scanner));
            }
            Err(error) => {
                warn!(
                    root = %lister.root(),
                    error = %error,
                    "OS event backend unavailable, falling back to polling"
                );
            }
        }
    }

    info!(root = %lister.root(), "Using polling backend");
    Ok(Box::new(PollScanner::new(lister)))
}

/// Makes a path absolute without touching the filesystem beyond reading the
/// current directory.
pub(crate) fn absolute(path: &Utf8Path) -> Result<Utf8PathBuf, WatchError> {
    if path.is_absolute() {
        return Ok(path.to_owned());
    }
    let resolved = std::path::absolute(Path::new(path.as_str()))?;
    Utf8PathBuf::try_from(resolved).map_err(|e| WatchError::non_utf8_path(e.into_path_buf()))
}
