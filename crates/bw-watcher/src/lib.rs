//! Stabilizing change detection for watched directories.
//!
//! This crate reports files under a watched directory once they have stopped
//! changing. It provides:
//!
//! - [`Scanner`] with two backends: [`PollScanner`] lists the directory on
//!   every cycle, [`EventScanner`] re-examines only what the OS reported.
//!   Both share one stabilization rule, so their results are identical.
//! - [`DirectoryWatcher`], one thread per watched directory running the
//!   scan/sleep cycle and handing change sets to a [`ChangeConsumer`].
//! - [`WatchRegistry`], which maps configuration identities to watches and
//!   replaces them when their configuration changes.
//! - [`StartupBarrier`], which keeps deliveries out of the host's startup
//!   phase.
//!
//! # Architecture
//!
//! ```text
//! configuration ──► WatchRegistry ──► DirectoryWatcher (thread per target)
//!                                          │
//!                                          ├─► Scanner::scan ─► stabilize
//!                                          │
//!                                          └─► ChangeConsumer::on_changes
//! ```
//!
//! # Stabilization
//!
//! A unit (a file, or a first-level directory in managed mode) is reported
//! once its checksum is the same on two consecutive scans. The very first
//! scan of a watch reports everything present. A reported unit that
//! disappears is reported once more so the consumer can undo its work.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use bw_core::SubdirMode;
//! use bw_watcher::{AcceptAllFilter, DirectoryLister, PollScanner, Scanner};
//! use camino::Utf8PathBuf;
//!
//! # let temp = tempfile::tempdir()?;
//! # let root = Utf8PathBuf::try_from(temp.path().to_path_buf())?;
//! let lister = DirectoryLister::new(root.clone(), SubdirMode::Managed, Arc::new(AcceptAllFilter));
//! let mut scanner = PollScanner::new(lister);
//!
//! std::fs::write(root.join("a.jar"), b"contents")?;
//! assert!(scanner.scan(false).unwrap().is_empty()); // just observed
//! assert_eq!(scanner.scan(false).unwrap().len(), 1); // stable now
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod barrier;
pub mod cancel;
pub mod checksum;
pub mod consumer;
pub mod error;
pub mod event;
pub mod filter;
pub mod poll;
pub mod registry;
pub mod scanner;
pub mod stabilize;
pub mod walker;
pub mod watch_loop;

pub use barrier::{ReadPermit, StartupBarrier, StartupGuard};
pub use cancel::CancelToken;
pub use checksum::{compute_checksum, ChecksumStore};
pub use consumer::{AlwaysReady, ChangeConsumer, Readiness, ReadinessFlag};
pub use error::WatchError;
pub use event::EventScanner;
pub use filter::{filter_for, AcceptAllFilter, FileFilter, NamePatternFilter};
pub use poll::PollScanner;
pub use registry::{UpsertOutcome, WatchRegistry};
pub use scanner::{build_scanner, Scanner, EVENT_DEBOUNCE};
pub use stabilize::{stabilize, Candidates, Outcome};
pub use walker::DirectoryLister;
pub use watch_loop::{DirectoryWatcher, LoopState, WatchContext, CLOSE_TIMEOUT};
