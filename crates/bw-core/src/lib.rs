//! Core types, configuration, and errors for bundlewatch.
//!
//! This crate provides the foundational types used across the workspace:
//!
//! - [`WatchTarget`] and the string-property configuration it is built from
//! - [`Checksum`], [`FileRecord`], and [`ChangeSet`], the data the
//!   change-detection engine passes around
//! - [`ConfigError`] for configuration failures
//! - Type aliases for `FxHashMap`/`FxHashSet` (faster than std)
//!
//! # Crate Dependencies
//!
//! ```text
//! bw-cli ──► bw-watcher ──► bw-core
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod hash;
pub mod types;

pub use config::{
    expand_initial, resolve_properties, Backend, Config, Environment, PropertySource, SubdirMode,
    WatchProperties, WatchTarget, DEFAULT_DIR, DEFAULT_POLL, DIR, DISABLE_EVENTS, FILTER,
    INITIAL_IDENTITY, KEYS, POLL, SUBDIR_MODE, TMPDIR,
};
pub use error::ConfigError;
pub use hash::{fx_hash_map, fx_hash_set, FxHashMap, FxHashSet};
pub use types::{ChangeSet, Checksum, FileRecord};
