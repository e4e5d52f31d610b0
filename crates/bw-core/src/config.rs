//! Watch configuration.
//!
//! Watches are configured through flat string properties, the shape a
//! key/value configuration registry delivers them in:
//!
//! | Key                          | Meaning                                   | Default   |
//! |------------------------------|-------------------------------------------|-----------|
//! | `bundlewatch.dir`            | Directory to watch                        | `./load`  |
//! | `bundlewatch.poll`           | Cycle interval in milliseconds            | `2000`    |
//! | `bundlewatch.tmpdir`         | Scratch directory for the consumer        | private   |
//! | `bundlewatch.filter`         | Regular expression matched on file names  | none      |
//! | `bundlewatch.subdir.mode`    | `none`, `managed`, or `all`               | `managed` |
//! | `bundlewatch.disableEvents`  | `true` to force the polling backend       | `false`   |
//!
//! [`WatchTarget::from_properties`] resolves a property map into a typed,
//! validated [`WatchTarget`]. [`Config`] is the JSON file the command-line
//! host reads its initial properties and extra watches from.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;

/// Property key for the watched directory.
pub const DIR: &str = "bundlewatch.dir";
/// Property key for the poll interval in milliseconds.
pub const POLL: &str = "bundlewatch.poll";
/// Property key for the scratch directory.
pub const TMPDIR: &str = "bundlewatch.tmpdir";
/// Property key for the file name filter.
pub const FILTER: &str = "bundlewatch.filter";
/// Property key for the subdirectory mode.
pub const SUBDIR_MODE: &str = "bundlewatch.subdir.mode";
/// Property key that disables the OS event backend.
pub const DISABLE_EVENTS: &str = "bundlewatch.disableEvents";

/// Every property key a watch understands.
pub const KEYS: &[&str] = &[DIR, POLL, TMPDIR, FILTER, SUBDIR_MODE, DISABLE_EVENTS];

/// Directory watched when none is configured.
pub const DEFAULT_DIR: &str = "./load";

/// Poll interval used when none (or an unusable one) is configured.
pub const DEFAULT_POLL: Duration = Duration::from_millis(2000);

/// Identity of the watch built from the host's own configuration.
pub const INITIAL_IDENTITY: &str = "initial";

/// Flat string properties describing one watch.
pub type WatchProperties = BTreeMap<String, String>;

/// How files below the first directory level are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubdirMode {
    /// Subdirectories and everything in them are ignored.
    None,
    /// Each first-level subdirectory is one unit (an exploded archive).
    #[default]
    Managed,
    /// Every file at every depth is tracked on its own.
    All,
}

impl SubdirMode {
    /// Returns the configuration spelling of this mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Managed => "managed",
            Self::All => "all",
        }
    }
}

impl fmt::Display for SubdirMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubdirMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "managed" => Ok(Self::Managed),
            "all" => Ok(Self::All),
            other => Err(ConfigError::invalid_option(
                SUBDIR_MODE,
                format!("unknown mode '{other}', expected none, managed, or all"),
            )),
        }
    }
}

/// Which mechanism discovers candidate changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// OS change notifications, falling back to polling if unavailable.
    #[default]
    Event,
    /// Exhaustive listing on every cycle.
    Poll,
}

/// A resolved, validated watch.
///
/// Immutable for the lifetime of one watch loop: changing any field means
/// closing the loop and starting a new one.
///
/// # Examples
///
/// ```
/// use bw_core::{Backend, SubdirMode, WatchProperties, WatchTarget};
///
/// let mut props = WatchProperties::new();
/// props.insert("bundlewatch.dir".into(), "/srv/load".into());
/// props.insert("bundlewatch.poll".into(), "500".into());
/// props.insert("bundlewatch.subdir.mode".into(), "all".into());
///
/// let target = WatchTarget::from_properties("initial", &props)?;
/// assert_eq!(target.directory, "/srv/load");
/// assert_eq!(target.poll_interval.as_millis(), 500);
/// assert_eq!(target.subdir_mode, SubdirMode::All);
/// assert_eq!(target.backend, Backend::Event);
/// # Ok::<(), bw_core::ConfigError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchTarget {
    /// Configuration identity this watch belongs to.
    pub identity: String,

    /// Directory to watch.
    pub directory: Utf8PathBuf,

    /// Scratch directory handed to consumers. `None` means a private
    /// temporary directory is created per watch loop.
    pub temp_dir: Option<Utf8PathBuf>,

    /// Time between scan cycles.
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,

    /// Regular expression a file name must match to be tracked.
    pub filter: Option<String>,

    /// Subdirectory handling.
    pub subdir_mode: SubdirMode,

    /// Preferred change-discovery backend.
    pub backend: Backend,
}

impl WatchTarget {
    /// Creates a target with default settings for the given directory.
    #[must_use]
    pub fn new(identity: impl Into<String>, directory: impl Into<Utf8PathBuf>) -> Self {
        Self {
            identity: identity.into(),
            directory: directory.into(),
            temp_dir: None,
            poll_interval: DEFAULT_POLL,
            filter: None,
            subdir_mode: SubdirMode::default(),
            backend: Backend::default(),
        }
    }

    /// Sets the poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the scratch directory.
    #[must_use]
    pub fn with_temp_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Sets the file name filter.
    #[must_use]
    pub fn with_filter(mut self, pattern: impl Into<String>) -> Self {
        self.filter = Some(pattern.into());
        self
    }

    /// Sets the subdirectory mode.
    #[must_use]
    pub const fn with_subdir_mode(mut self, mode: SubdirMode) -> Self {
        self.subdir_mode = mode;
        self
    }

    /// Sets the backend preference.
    #[must_use]
    pub const fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Resolves a property map into a target.
    ///
    /// Missing keys take their defaults. A poll value that is not a positive
    /// integer is logged and replaced by [`DEFAULT_POLL`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOption`] for an empty directory, an
    /// unknown subdirectory mode, or a filter that is not a valid regular
    /// expression.
    pub fn from_properties(
        identity: impl Into<String>,
        props: &WatchProperties,
    ) -> Result<Self, ConfigError> {
        let directory = props.get(DIR).map_or(DEFAULT_DIR, |d| d.trim());
        if directory.is_empty() {
            return Err(ConfigError::invalid_option(DIR, "directory must not be empty"));
        }

        let poll_interval = props.get(POLL).map_or(DEFAULT_POLL, |raw| parse_poll(raw));

        let temp_dir = props
            .get(TMPDIR)
            .map(|d| d.trim())
            .filter(|d| !d.is_empty())
            .map(Utf8PathBuf::from);

        let filter = props
            .get(FILTER)
            .map(|f| f.trim())
            .filter(|f| !f.is_empty())
            .map(str::to_owned);
        if let Some(pattern) = &filter {
            regex::Regex::new(pattern)
                .map_err(|e| ConfigError::invalid_option(FILTER, e.to_string()))?;
        }

        let subdir_mode = props
            .get(SUBDIR_MODE)
            .map(|m| m.parse::<SubdirMode>())
            .transpose()?
            .unwrap_or_default();

        let backend = if props.get(DISABLE_EVENTS).is_some_and(|v| parse_bool(v)) {
            Backend::Poll
        } else {
            Backend::Event
        };

        Ok(Self {
            identity: identity.into(),
            directory: Utf8PathBuf::from(directory),
            temp_dir,
            poll_interval,
            filter,
            subdir_mode,
            backend,
        })
    }

    /// Returns the name used for this watch's loop thread.
    #[must_use]
    pub fn thread_name(&self) -> String {
        format!("bundlewatch-{}", self.directory)
    }

    /// Returns the watched directory.
    #[inline]
    #[must_use]
    pub fn directory(&self) -> &Utf8Path {
        &self.directory
    }
}

fn parse_poll(raw: &str) -> Duration {
    match raw.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Duration::from_millis(ms),
        _ => {
            warn!(
                key = POLL,
                value = raw,
                default_ms = DEFAULT_POLL.as_millis(),
                "Poll interval is not a positive integer, using default"
            );
            DEFAULT_POLL
        }
    }
}

fn parse_bool(raw: &str) -> bool {
    raw.trim().eq_ignore_ascii_case("true")
}

/// A place watch properties can be looked up in.
pub trait PropertySource {
    /// Returns the value for `key`, if this source defines it.
    fn property(&self, key: &str) -> Option<String>;
}

impl PropertySource for WatchProperties {
    fn property(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Looks properties up in process environment variables.
///
/// `bundlewatch.subdir.mode` is read from `BUNDLEWATCH_SUBDIR_MODE`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Environment;

impl Environment {
    /// Returns the environment variable name for a property key.
    #[must_use]
    pub fn variable_for(key: &str) -> String {
        key.to_ascii_uppercase().replace('.', "_")
    }
}

impl PropertySource for Environment {
    fn property(&self, key: &str) -> Option<String> {
        std::env::var(Self::variable_for(key)).ok()
    }
}

/// Collects every known key from `primary`, falling back to `fallback`.
#[must_use]
pub fn resolve_properties(
    primary: &dyn PropertySource,
    fallback: &dyn PropertySource,
) -> WatchProperties {
    KEYS.iter()
        .filter_map(|key| {
            primary
                .property(key)
                .or_else(|| fallback.property(key))
                .map(|value| ((*key).to_owned(), value))
        })
        .collect()
}

/// Splits the initial configuration into one watch per directory.
///
/// A comma-separated `bundlewatch.dir` yields identities `initial`,
/// `initial1`, `initial2`, and so on, each with a single directory and the
/// remaining properties copied. Empty entries are skipped.
///
/// # Examples
///
/// ```
/// use bw_core::{expand_initial, WatchProperties};
///
/// let mut props = WatchProperties::new();
/// props.insert("bundlewatch.dir".into(), "/a, /b".into());
///
/// let expanded = expand_initial(&props);
/// let ids: Vec<_> = expanded.iter().map(|(id, _)| id.as_str()).collect();
/// assert_eq!(ids, vec!["initial", "initial1"]);
/// assert_eq!(expanded[1].1["bundlewatch.dir"], "/b");
/// ```
#[must_use]
pub fn expand_initial(props: &WatchProperties) -> Vec<(String, WatchProperties)> {
    let Some(dirs) = props.get(DIR).filter(|d| d.contains(',')) else {
        return vec![(INITIAL_IDENTITY.to_owned(), props.clone())];
    };

    dirs.split(',')
        .map(str::trim)
        .filter(|dir| !dir.is_empty())
        .enumerate()
        .map(|(index, dir)| {
            let identity = if index == 0 {
                INITIAL_IDENTITY.to_owned()
            } else {
                format!("{INITIAL_IDENTITY}{index}")
            };
            let mut single = props.clone();
            single.insert(DIR.to_owned(), dir.to_owned());
            (identity, single)
        })
        .collect()
}

/// Root configuration file for the command-line host.
///
/// # Examples
///
/// ```
/// use bw_core::Config;
///
/// let json = r#"{
///     "initial": { "bundlewatch.dir": "/srv/load" },
///     "watches": { "deploy": { "bundlewatch.dir": "/srv/deploy" } }
/// }"#;
/// let config = Config::from_json(json)?;
/// assert_eq!(config.watches.len(), 1);
/// # Ok::<(), bw_core::ConfigError>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Properties of the host's own watch (may list several directories).
    pub initial: WatchProperties,

    /// Additional named watches, keyed by identity.
    pub watches: BTreeMap<String, WatchProperties>,
}

impl Config {
    /// Parses a configuration from JSON text.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a configuration file.
    pub fn from_file(path: &Utf8Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_std_path())?;
        Self::from_json(&contents)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> WatchProperties {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_defaults_from_empty_properties() {
        let target = WatchTarget::from_properties("initial", &WatchProperties::new()).unwrap();
        assert_eq!(target.identity, "initial");
        assert_eq!(target.directory, DEFAULT_DIR);
        assert_eq!(target.poll_interval, DEFAULT_POLL);
        assert_eq!(target.subdir_mode, SubdirMode::Managed);
        assert_eq!(target.backend, Backend::Event);
        assert!(target.temp_dir.is_none());
        assert!(target.filter.is_none());
    }

    #[test]
    fn test_full_properties() {
        let target = WatchTarget::from_properties(
            "deploy",
            &props(&[
                (DIR, " /srv/deploy "),
                (POLL, "250"),
                (TMPDIR, "/var/tmp/bw"),
                (FILTER, r".*\.jar"),
                (SUBDIR_MODE, "NONE"),
                (DISABLE_EVENTS, "True"),
            ]),
        )
        .unwrap();

        assert_eq!(target.directory, "/srv/deploy");
        assert_eq!(target.poll_interval, Duration::from_millis(250));
        assert_eq!(target.temp_dir.as_deref(), Some(Utf8Path::new("/var/tmp/bw")));
        assert_eq!(target.filter.as_deref(), Some(r".*\.jar"));
        assert_eq!(target.subdir_mode, SubdirMode::None);
        assert_eq!(target.backend, Backend::Poll);
    }

    #[test]
    fn test_malformed_poll_falls_back_to_default() {
        for raw in ["soon", "-5", "0", ""] {
            let target = WatchTarget::from_properties("x", &props(&[(POLL, raw)])).unwrap();
            assert_eq!(target.poll_interval, DEFAULT_POLL, "poll value {raw:?}");
        }
    }

    #[test]
    fn test_unknown_subdir_mode_is_rejected() {
        let err = WatchTarget::from_properties("x", &props(&[(SUBDIR_MODE, "jar")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOption { ref option, .. } if option == SUBDIR_MODE));
    }

    #[test]
    fn test_invalid_filter_is_rejected() {
        let err = WatchTarget::from_properties("x", &props(&[(FILTER, "(unclosed")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOption { ref option, .. } if option == FILTER));
    }

    #[test]
    fn test_empty_directory_is_rejected() {
        assert!(WatchTarget::from_properties("x", &props(&[(DIR, "  ")])).is_err());
    }

    #[test]
    fn test_disable_events_accepts_only_true() {
        let poll = WatchTarget::from_properties("x", &props(&[(DISABLE_EVENTS, "yes")])).unwrap();
        assert_eq!(poll.backend, Backend::Event);
    }

    #[test]
    fn test_targets_compare_field_for_field() {
        let a = WatchTarget::from_properties("x", &props(&[(DIR, "/a")])).unwrap();
        let b = WatchTarget::from_properties("x", &props(&[(DIR, "/a"), (POLL, "2000")])).unwrap();
        let c = WatchTarget::from_properties("x", &props(&[(DIR, "/a"), (POLL, "1000")])).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_expand_single_directory() {
        let expanded = expand_initial(&props(&[(DIR, "/srv/load")]));
        assert_eq!(expanded.len(), 1);
        assert_eq!(expanded[0].0, INITIAL_IDENTITY);
    }

    #[test]
    fn test_expand_comma_separated_directories() {
        let expanded = expand_initial(&props(&[(DIR, "/a,,/b , /c"), (POLL, "10")]));
        let summary: Vec<_> = expanded
            .iter()
            .map(|(id, p)| (id.as_str(), p[DIR].as_str(), p[POLL].as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("initial", "/a", "10"),
                ("initial1", "/b", "10"),
                ("initial2", "/c", "10"),
            ]
        );
    }

    #[test]
    fn test_environment_variable_names() {
        assert_eq!(Environment::variable_for(SUBDIR_MODE), "BUNDLEWATCH_SUBDIR_MODE");
        assert_eq!(Environment::variable_for(DISABLE_EVENTS), "BUNDLEWATCH_DISABLEEVENTS");
    }

    #[test]
    fn test_resolve_properties_prefers_primary() {
        let primary = props(&[(DIR, "/primary")]);
        let fallback = props(&[(DIR, "/fallback"), (POLL, "10")]);
        let resolved = resolve_properties(&primary, &fallback);
        assert_eq!(resolved[DIR], "/primary");
        assert_eq!(resolved[POLL], "10");
        assert!(!resolved.contains_key(FILTER));
    }

    #[test]
    fn test_config_deserialize_with_missing_fields() {
        let config = Config::from_json(r#"{"initial": {"bundlewatch.dir": "/x"}}"#).unwrap();
        assert_eq!(config.initial[DIR], "/x");
        assert!(config.watches.is_empty());
    }

    #[test]
    fn test_target_serializes_poll_as_millis() {
        let target = WatchTarget::new("x", "/a").with_poll_interval(Duration::from_millis(750));
        let json = serde_json::to_value(&target).unwrap();
        assert_eq!(json["poll_interval"], 750);
        assert_eq!(json["subdir_mode"], "managed");
    }
}
