//! Error types for the bw-watcher crate.
//!
//! This module provides the [`WatchError`] type for errors that can occur
//! while building, running, or managing watch loops.

use bw_core::ConfigError;
use camino::Utf8PathBuf;

/// Errors that can occur during watching operations.
///
/// # Error Recovery Strategy
///
/// - **Config errors** ([`WatchError::Config`]): Fatal - the watch never starts
///   and is not retried
/// - **Notify errors** ([`WatchError::Notify`]): Recoverable - the watch falls
///   back to polling
/// - **Non-UTF-8 path** ([`WatchError::NonUtf8Path`]): Recoverable - skip the
///   path and continue
/// - **Interrupted** ([`WatchError::Interrupted`]): Terminal for the loop that
///   observed it
/// - **Registry closed** ([`WatchError::RegistryClosed`]): Fatal - the registry
///   has been shut down
/// - **I/O errors** ([`WatchError::Io`]): Fatal - propagate immediately
///
/// # Examples
///
/// ```
/// use bw_watcher::WatchError;
///
/// fn handle_error(err: &WatchError) {
///     if err.is_fatal() {
///         eprintln!("watch failed: {err}");
///     } else {
///         eprintln!("warning: {err}");
///     }
/// }
/// ```
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// The watch configuration could not be resolved.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The OS notification backend failed to initialize or operate.
    #[error("notify watcher error: {0}")]
    Notify(#[from] notify::Error),

    /// A path is not valid UTF-8.
    #[error("path is not valid UTF-8: {}", _0.display())]
    NonUtf8Path(std::path::PathBuf),

    /// A blocking wait was cancelled.
    #[error("interrupted while waiting")]
    Interrupted,

    /// The registry has been shut down and accepts no new watches.
    #[error("watch registry has been shut down")]
    RegistryClosed,

    /// The loop thread could not be spawned.
    #[error("failed to spawn watch loop for {path}: {source}")]
    Spawn {
        /// The directory the loop was meant to watch.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WatchError {
    /// Creates a new [`WatchError::NonUtf8Path`] error.
    #[inline]
    pub fn non_utf8_path(path: impl Into<std::path::PathBuf>) -> Self {
        Self::NonUtf8Path(path.into())
    }

    /// Returns `true` if the operation that failed can be worked around.
    ///
    /// A notify failure means the event backend is unavailable and polling
    /// takes over; a non-UTF-8 path is skipped.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Notify(_) | Self::NonUtf8Path(_))
    }

    /// Returns `true` if this error is fatal.
    #[inline]
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !self.is_recoverable()
    }

    /// Returns `true` if this error is a configuration error.
    #[inline]
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}
