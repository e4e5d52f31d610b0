//! Fast hash map and hash set type aliases.
//!
//! Checksum records and the watch registry are keyed by paths and identity
//! strings, which the Fx hash handles well. None of these maps are exposed to
//! untrusted input, so denial-of-service resistance is not needed.
//!
//! # Examples
//!
//! ```
//! use bw_core::{fx_hash_map, fx_hash_set, FxHashMap, FxHashSet};
//!
//! let mut records: FxHashMap<&str, u64> = fx_hash_map();
//! records.insert("load/a.jar", 42);
//!
//! let pending: FxHashSet<&str> = fx_hash_set();
//! assert!(pending.is_empty());
//! ```

/// A [`HashMap`](std::collections::HashMap) using the Fx hash algorithm.
pub type FxHashMap<K, V> = rustc_hash::FxHashMap<K, V>;

/// A [`HashSet`](std::collections::HashSet) using the Fx hash algorithm.
pub type FxHashSet<V> = rustc_hash::FxHashSet<V>;

/// Creates a new empty [`FxHashMap`].
#[inline]
#[must_use]
pub fn fx_hash_map<K, V>() -> FxHashMap<K, V> {
    FxHashMap::default()
}

/// Creates a new empty [`FxHashSet`].
#[inline]
#[must_use]
pub fn fx_hash_set<V>() -> FxHashSet<V> {
    FxHashSet::default()
}
