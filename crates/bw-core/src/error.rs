//! Error types for the bw-core crate.
//!
//! This module provides the [`ConfigError`] type for configuration-related
//! errors. Configuration errors are fatal for the watch they describe: a watch
//! whose configuration fails to resolve never starts, and the failure is not
//! retried automatically.

use camino::Utf8PathBuf;

/// Errors that can occur while resolving a watch configuration.
///
/// # Examples
///
/// ```
/// use bw_core::ConfigError;
/// use camino::Utf8PathBuf;
///
/// let error = ConfigError::NotADirectory(Utf8PathBuf::from("/srv/load"));
/// assert!(error.to_string().contains("/srv/load"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The provided path is invalid or could not be prepared.
    #[error("invalid path '{path}': {reason}")]
    InvalidPath {
        /// The invalid path.
        path: Utf8PathBuf,
        /// Explanation of why the path is invalid.
        reason: String,
    },

    /// A path that must be a directory exists but is something else.
    #[error("not a directory: {0}")]
    NotADirectory(Utf8PathBuf),

    /// A configuration option has an invalid value.
    #[error("invalid configuration option '{option}': {reason}")]
    InvalidOption {
        /// The name of the invalid option.
        option: String,
        /// Explanation of why the option is invalid.
        reason: String,
    },

    /// An I/O error occurred while reading configuration.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    /// Creates a new [`ConfigError::InvalidOption`] error.
    pub fn invalid_option(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            option: option.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new [`ConfigError::InvalidPath`] error.
    pub fn invalid_path(path: impl Into<Utf8PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
