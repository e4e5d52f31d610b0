//! File name filtering.
//!
//! A watch may restrict which entries it tracks with a regular expression
//! matched against the entry's file name. Filtering happens before anything
//! is checksummed or queued, for both backends.
//!
//! # Examples
//!
//! ```
//! use bw_watcher::{FileFilter, NamePatternFilter};
//! use camino::Utf8Path;
//!
//! let filter = NamePatternFilter::new(r".*\.(jar|war)")?;
//!
//! assert!(filter.should_process(Utf8Path::new("/srv/load/app.jar")));
//! assert!(!filter.should_process(Utf8Path::new("/srv/load/app.jar.part")));
//! # Ok::<(), regex::Error>(())
//! ```

use camino::Utf8Path;
use regex::Regex;

/// A predicate deciding which paths a watch tracks.
///
/// Filters run on the notification thread as well as the loop thread, so
/// they must be [`Send`] and [`Sync`].
pub trait FileFilter: Send + Sync + 'static {
    /// Returns `true` if the path should be tracked.
    fn should_process(&self, path: &Utf8Path) -> bool;
}

/// A filter that accepts every path.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllFilter;

impl FileFilter for AcceptAllFilter {
    #[inline]
    fn should_process(&self, _path: &Utf8Path) -> bool {
        true
    }
}

/// Accepts paths whose file name matches a regular expression in full.
///
/// The pattern is anchored at both ends, so `.*\.jar` accepts `a.jar` but
/// not `a.jar.tmp`. Paths without a file name component are rejected.
#[derive(Debug, Clone)]
pub struct NamePatternFilter {
    pattern: Regex,
}

impl NamePatternFilter {
    /// Compiles a filter from a pattern.
    ///
    /// # Errors
    ///
    /// Returns the regex compilation error for an invalid pattern.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(&format!("^(?:{pattern})$"))?,
        })
    }
}

impl FileFilter for NamePatternFilter {
    fn should_process(&self, path: &Utf8Path) -> bool {
        path.file_name()
            .is_some_and(|name| self.pattern.is_match(name))
    }
}

/// Builds the filter for an optional configured pattern.
///
/// # Errors
///
/// Returns the regex compilation error for an invalid pattern.
pub fn filter_for(pattern: Option<&str>) -> Result<Box<dyn FileFilter>, regex::Error> {
    match pattern {
        Some(pattern) => Ok(Box::new(NamePatternFilter::new(pattern)?)),
        None => Ok(Box::new(AcceptAllFilter)),
    }
}

impl<F: FileFilter + ?Sized> FileFilter for Box<F> {
    fn should_process(&self, path: &Utf8Path) -> bool {
        (**self).should_process(path)
    }
}

impl<F: FileFilter + ?Sized> FileFilter for std::sync::Arc<F> {
    fn should_process(&self, path: &Utf8Path) -> bool {
        (**self).should_process(path)
    }
}
