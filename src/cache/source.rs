//! Value Source Module
//!
//! The loader the cache calls on a miss or refresh.

use crate::cache::time::Timestamp;

/// Loads the value for a key.
///
/// The cache calls `load` without holding any structure lock and with at
/// most one load per key in flight. Errors are cached as load failures and
/// re-thrown to callers of `get`.
pub trait ValueSource<K, V>: Send + Sync + 'static {
    /// `previous` is the last good value when the entry is reloaded, and
    /// `last_modified` the time of its last successful load or put.
    fn load(
        &self,
        key: &K,
        now: Timestamp,
        previous: Option<&V>,
        last_modified: Option<Timestamp>,
    ) -> anyhow::Result<V>;
}

impl<K, V, F> ValueSource<K, V> for F
where
    F: Fn(&K) -> anyhow::Result<V> + Send + Sync + 'static,
{
    fn load(
        &self,
        key: &K,
        _now: Timestamp,
        _previous: Option<&V>,
        _last_modified: Option<Timestamp>,
    ) -> anyhow::Result<V> {
        self(key)
    }
}
