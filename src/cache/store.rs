//! Cache Store Module
//!
//! The cache engine: lookups, loads through the value source, puts,
//! removal, eviction and the bookkeeping around them.
//!
//! Two lock levels keep the engine consistent. The structure lock guards
//! the tables, the eviction policy and the counters; the entry lock guards
//! one entry's value and status. An entry lock is always taken before the
//! structure lock, and the value source is called with neither held.

use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::cache::entry::{CacheEntry, CachedValue, Entry, EntryData, EntryStatus};
use crate::cache::expiry::{Expiry, ExpiryPolicy};
use crate::cache::integrity::IntegrityState;
use crate::cache::iter::Iter;
use crate::cache::policy::{EvictionPolicy, LruPolicy};
use crate::cache::source::ValueSource;
use crate::cache::stats::CacheInfo;
use crate::cache::structure::Structure;
use crate::cache::table::hash_key;
use crate::cache::time::{format_millis, Clock, Timestamp};
use crate::config::CacheConfig;
use crate::error::{CacheError, IntegrityViolation, LoadFailure, Result};
use crate::tasks::Background;

/// What an install is counted as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Update {
    Fetch,
    Refresh,
    Put,
}

// == Fetch Guard ==
/// Held while a load is in flight. If the load does not complete (an error
/// before install, or a panic in the value source) the entry's previous
/// state is restored. Waiters are woken either way.
struct FetchGuard<'a, K, V> {
    entry: &'a Entry<K, V>,
    in_flight: &'a AtomicUsize,
    restore: Option<EntryStatus>,
}

impl<'a, K, V> FetchGuard<'a, K, V> {
    fn new(entry: &'a Entry<K, V>, in_flight: &'a AtomicUsize, previous: EntryStatus) -> Self {
        in_flight.fetch_add(1, Ordering::Relaxed);
        Self {
            entry,
            in_flight,
            restore: Some(previous),
        }
    }

    fn disarm(&mut self) {
        self.restore = None;
    }
}

impl<K, V> Drop for FetchGuard<'_, K, V> {
    fn drop(&mut self) {
        if let Some(previous) = self.restore.take() {
            let mut data = self.entry.lock();
            if data.status.is_fetch_in_progress() {
                data.status = previous;
            }
        }
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        self.entry.notify_waiters();
    }
}

// == Cache Core ==
/// Shared state behind every [`Cache`] handle.
pub(crate) struct CacheCore<K, V, P: EvictionPolicy> {
    pub(crate) name: String,
    pub(crate) config: CacheConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) source: Option<Box<dyn ValueSource<K, V>>>,
    pub(crate) expiry: ExpiryPolicy<K, V>,
    pub(crate) seed: u64,
    pub(crate) structure: RwLock<Structure<K, V, P>>,
    pub(crate) closed: AtomicBool,
    pub(crate) gets: AtomicU64,
    pub(crate) hits: AtomicU64,
    pub(crate) fetches_in_flight: AtomicUsize,
    pub(crate) background: Option<Background>,
    /// Past-deadline values are served until the refresh timer picks them up
    pub(crate) serves_expired: bool,
    pub(crate) weak: Weak<Self>,
}

impl<K, V, P> CacheCore<K, V, P>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    P: EvictionPolicy,
{
    pub(crate) fn now(&self) -> Timestamp {
        self.clock.millis_since_epoch()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn closed_error(&self) -> CacheError {
        CacheError::Closed {
            name: self.name.clone(),
        }
    }

    fn check_closed(&self) -> Result<()> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        Ok(())
    }

    fn spins_exceeded(&self) -> CacheError {
        CacheError::LockSpinsExceeded {
            name: self.name.clone(),
            spins: self.config.tunables.max_entry_lock_spins,
        }
    }

    fn hash(&self, key: &K) -> u64 {
        hash_key(key, self.seed)
    }

    fn is_fresh(&self, data: &EntryData<V>, now: Timestamp) -> bool {
        data.status.has_fresh_data(now, self.serves_expired)
    }

    // == Lookup ==
    /// Finds the entry for `key`, creating it on a miss.
    fn lookup_or_new(&self, key: &K, hash: u64) -> Result<Arc<Entry<K, V>>> {
        if P::UNSYNCHRONIZED_HITS {
            let hit = self.structure.read().peek_main(key, hash).cloned();
            if let Some(entry) = hit {
                entry.record_hit();
                return Ok(entry);
            }
        }
        let mut s = self.structure.write();
        // checked under the lock so no entry is created after close drained
        self.check_closed()?;
        if let Some(entry) = s.lookup(key, hash, true) {
            return Ok(entry);
        }
        Ok(s.new_entry(key.clone(), hash))
    }

    /// Finds the entry for `key` without creating one.
    fn lookup_existing(&self, key: &K, hash: u64, touch: bool) -> Option<Arc<Entry<K, V>>> {
        if !touch {
            return self.structure.read().find(key, hash).cloned();
        }
        if P::UNSYNCHRONIZED_HITS {
            let hit = self.structure.read().peek_main(key, hash).cloned();
            if let Some(entry) = hit {
                entry.record_hit();
                return Some(entry);
            }
        }
        self.structure.write().lookup(key, hash, true)
    }

    // == Get ==
    /// Returns the entry's data, loading it if it is not fresh.
    pub(crate) fn get_entry(&self, key: &K) -> Result<CacheEntry<K, V>> {
        let hash = self.hash(key);
        for _ in 0..self.config.tunables.max_entry_lock_spins {
            self.check_closed()?;
            let entry = self.lookup_or_new(key, hash)?;
            let mut data = entry.lock();
            if !self.is_fresh(&data, self.now()) {
                entry.wait_for_fetch(&mut data);
            }
            if data.status.is_removed() {
                continue;
            }
            if self.is_fresh(&data, self.now()) {
                if let Some(view) = CacheEntry::snapshot(entry.key(), &data) {
                    drop(data);
                    self.gets.fetch_add(1, Ordering::Release);
                    self.hits.fetch_add(1, Ordering::Release);
                    return Ok(view);
                }
            }
            let previous = data.start_fetch();
            drop(data);
            self.gets.fetch_add(1, Ordering::Relaxed);
            let view = self.load(&entry, previous, Update::Fetch);
            self.evict_eventually();
            return view;
        }
        Err(self.spins_exceeded())
    }

    /// Loads the value for `key` even if the cached one is fresh.
    pub(crate) fn reload(&self, key: &K) -> Result<CacheEntry<K, V>> {
        let hash = self.hash(key);
        for _ in 0..self.config.tunables.max_entry_lock_spins {
            self.check_closed()?;
            let entry = self.lookup_or_new(key, hash)?;
            let mut data = entry.lock();
            entry.wait_for_fetch(&mut data);
            if data.status.is_removed() {
                continue;
            }
            let previous = data.start_fetch();
            drop(data);
            let view = self.load(&entry, previous, Update::Fetch);
            self.evict_eventually();
            return view;
        }
        Err(self.spins_exceeded())
    }

    // == Load ==
    /// Calls the value source for an entry this thread marked as fetching
    /// and installs the outcome.
    pub(crate) fn load(
        &self,
        entry: &Arc<Entry<K, V>>,
        previous: EntryStatus,
        update: Update,
    ) -> Result<CacheEntry<K, V>> {
        let mut guard = FetchGuard::new(entry, &self.fetches_in_flight, previous);
        let source = self.source.as_deref().ok_or_else(|| {
            CacheError::Usage(format!("cache '{}' has no value source", self.name))
        })?;
        let (previous_value, last_modified) = {
            let data = entry.lock();
            (data.previous_value().cloned(), data.last_modified)
        };
        let t0 = self.now();
        let loaded = source
            .load(entry.key(), t0, previous_value.as_ref(), last_modified)
            .map_err(LoadFailure::new);
        let t1 = self.now();

        let mut data = entry.lock();
        guard.disarm();
        self.install(entry, &mut data, loaded, t0, t1, update, previous)
    }

    // == Install ==
    /// Stores a loaded or put value, updates the counters and starts the
    /// expiry timer. The entry lock is held by the caller.
    ///
    /// Leaves the entry in a settled state whatever the outcome.
    #[allow(clippy::too_many_arguments)]
    fn install(
        &self,
        entry: &Arc<Entry<K, V>>,
        data: &mut EntryData<V>,
        loaded: std::result::Result<V, LoadFailure>,
        t0: Timestamp,
        t1: Timestamp,
        update: Update,
        previous: EntryStatus,
    ) -> Result<CacheEntry<K, V>> {
        let key = entry.key();
        let failed = loaded.is_err();
        let suppress = failed && self.config.suppress_exceptions && data.previous_value().is_some();
        let expiry = match &loaded {
            Ok(value) => self.expiry.for_value(key, value, t0, data.previous_value()),
            Err(failure) => self.expiry.for_failure(key, failure, t0),
        };
        if !suppress {
            match loaded {
                Ok(value) => {
                    data.value = Some(CachedValue::Value(value));
                    data.last_modified = Some(t0);
                }
                Err(failure) => {
                    debug!(
                        cache = %self.name,
                        expiry = ?expiry,
                        error = %failure,
                        "Value source failed, caching the failure"
                    );
                    data.value = Some(CachedValue::Failure(failure));
                }
            }
        }
        let put_but_expired = match expiry {
            Expiry::Immediately => true,
            Expiry::Eternal => false,
            Expiry::At(t) | Expiry::SharpAt(t) => t <= t1,
        };

        let live = {
            let mut s = self.structure.write();
            if self.is_closed() {
                drop(s);
                data.set_removed();
                return Err(self.closed_error());
            }
            let live = s.is_live(entry);
            let first = live && s.mark_loaded(entry, update == Update::Put);
            if live && update == Update::Refresh {
                s.move_to_main(entry);
            }
            let stats = &mut s.stats;
            match update {
                Update::Fetch | Update::Refresh => {
                    stats.fetches += 1;
                    stats.fetch_millis += t1.saturating_sub(t0);
                    if failed {
                        stats.fetch_exceptions += 1;
                    }
                    if suppress {
                        stats.suppressed_exceptions += 1;
                    }
                    if update == Update::Refresh {
                        stats.refreshes += 1;
                    }
                    // a first load was counted by mark_loaded; a virgin entry
                    // that was cleared while loading counts as neither
                    if !first && previous != EntryStatus::Virgin {
                        if previous.has_fresh_data(t0, self.serves_expired) {
                            stats.fetch_but_hit += 1;
                        } else {
                            stats.refetch_non_fresh += 1;
                        }
                    }
                }
                Update::Put => {
                    stats.puts += 1;
                    if put_but_expired {
                        stats.put_but_expired += 1;
                    }
                }
            }
            live
        };

        data.cancel_timer();
        if live {
            self.start_timer(entry, data, expiry, t1);
        } else {
            // cleared while loading: hand the value out without keeping it
            data.set_removed();
        }
        match CacheEntry::snapshot(key, data) {
            Some(view) => Ok(view),
            None => Err(CacheError::Internal(format!(
                "entry of cache '{}' holds no data after install",
                self.name
            ))),
        }
    }

    // == Put ==
    pub(crate) fn put(&self, key: K, value: V) -> Result<()> {
        let hash = self.hash(&key);
        for _ in 0..self.config.tunables.max_entry_lock_spins {
            self.check_closed()?;
            let entry = self.lookup_or_new(&key, hash)?;
            let mut data = entry.lock();
            entry.wait_for_fetch(&mut data);
            if data.status.is_removed() {
                continue;
            }
            let previous = data.status;
            let now = self.now();
            if self.is_fresh(&data, now) {
                data.status = EntryStatus::ReputPending;
            }
            let installed = self.install(&entry, &mut data, Ok(value), now, now, Update::Put, previous);
            drop(data);
            entry.notify_waiters();
            installed?;
            self.evict_eventually();
            return Ok(());
        }
        Err(self.spins_exceeded())
    }

    // == Peek ==
    /// Returns the entry's data if it is fresh, never loading.
    pub(crate) fn peek_entry(&self, key: &K) -> Result<Option<CacheEntry<K, V>>> {
        self.check_closed()?;
        let hash = self.hash(key);
        let entry = match self.lookup_existing(key, hash, true) {
            Some(entry) => entry,
            None => {
                self.structure.write().stats.peek_miss += 1;
                return Ok(None);
            }
        };
        let data = entry.lock();
        if self.is_fresh(&data, self.now()) {
            return Ok(CacheEntry::snapshot(entry.key(), &data));
        }
        drop(data);
        self.structure.write().stats.peek_hit_not_fresh += 1;
        Ok(None)
    }

    /// True if the key maps to fresh data. Does not count as an access.
    pub(crate) fn contains(&self, key: &K) -> Result<bool> {
        self.check_closed()?;
        let hash = self.hash(key);
        Ok(match self.lookup_existing(key, hash, false) {
            Some(entry) => {
                let data = entry.lock();
                self.is_fresh(&data, self.now())
            }
            None => false,
        })
    }

    // == Remove ==
    /// Removes the mapping if `matches` accepts the fresh data it holds.
    ///
    /// Waits for an in-flight load first. Returns whether a fresh mapping
    /// was removed.
    pub(crate) fn remove_matching(
        &self,
        key: &K,
        matches: impl Fn(Option<&CachedValue<V>>) -> bool,
    ) -> Result<bool> {
        let hash = self.hash(key);
        for _ in 0..self.config.tunables.max_entry_lock_spins {
            self.check_closed()?;
            let entry = match self.lookup_existing(key, hash, false) {
                Some(entry) => entry,
                None => return Ok(false),
            };
            let mut data = entry.lock();
            entry.wait_for_fetch(&mut data);
            if data.status.is_removed() {
                continue;
            }
            let fresh = self.is_fresh(&data, self.now());
            if !matches(fresh.then_some(data.value.as_ref()).flatten()) {
                return Ok(false);
            }
            {
                let mut s = self.structure.write();
                if s.unlink(&entry).is_some() {
                    s.stats.removed += 1;
                }
            }
            data.set_removed();
            drop(data);
            entry.notify_waiters();
            return Ok(fresh);
        }
        Err(self.spins_exceeded())
    }

    // == Eviction ==
    /// Evicts entries until the cache is within its capacity, giving up
    /// after a bounded number of attempts or when the policy keeps
    /// returning the same pinned entry.
    pub(crate) fn evict_eventually(&self) {
        let mut last_pinned = None;
        for _ in 0..self.config.tunables.max_evict_spins {
            let candidate = match self.structure.write().eviction_candidate() {
                Some(candidate) => candidate,
                None => return,
            };
            let mut data = candidate.lock();
            if data.status.is_removed() {
                continue;
            }
            if data.status.is_pinned() {
                if last_pinned == Some(candidate.id()) {
                    debug!(cache = %self.name, "Eviction gave up on a pinned entry");
                    return;
                }
                last_pinned = Some(candidate.id());
                continue;
            }
            let evicted = self.structure.write().evict(&candidate);
            if evicted {
                data.set_removed();
            }
            drop(data);
            candidate.notify_waiters();
        }
    }

    // == Bulk Operations ==
    /// Drops every entry, cancelling its timer.
    pub(crate) fn clear(&self) -> Result<()> {
        let entries = {
            let mut s = self.structure.write();
            self.check_closed()?;
            let entries = s.drain();
            let now = self.now();
            s.stats.record_clear(entries.len(), now);
            entries
        };
        debug!(cache = %self.name, dropped = entries.len(), "Cache cleared");
        for entry in entries {
            let mut data = entry.lock();
            data.set_removed();
            drop(data);
            entry.notify_waiters();
        }
        Ok(())
    }

    /// Closes the cache. Only the first call has an effect.
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let live = self.structure.read().snapshot();
        for entry in &live {
            entry.lock().cancel_timer();
        }
        if let Some(background) = &self.background {
            background.shutdown();
        }
        let entries = {
            let mut s = self.structure.write();
            let entries = s.drain();
            // counted as cleared so the conservation check still holds
            s.stats.cleared += entries.len() as u64;
            entries
        };
        for entry in entries {
            let mut data = entry.lock();
            data.set_removed();
            drop(data);
            entry.notify_waiters();
        }
        info!(cache = %self.name, "Cache closed");
    }

    pub(crate) fn iter(&self) -> Result<Iter<K, V>> {
        self.check_closed()?;
        let entries = self.structure.read().snapshot();
        Ok(Iter::new(entries, Arc::clone(&self.clock), self.serves_expired))
    }

    // == Diagnostics ==
    pub(crate) fn info(&self) -> CacheInfo {
        let s = self.structure.read();
        self.info_locked(&s)
    }

    fn info_locked(&self, s: &Structure<K, V, P>) -> CacheInfo {
        let mut stats = s.stats.clone();
        // hits first: both are bumped gets-then-hits without a lock
        stats.hits = self.hits.load(Ordering::Acquire);
        stats.gets = self.gets.load(Ordering::Acquire);
        CacheInfo {
            name: self.name.clone(),
            implementation: s.policy().name().to_string(),
            size: s.len(),
            max_size: s.max_size(),
            refresh_size: s.refresh_len(),
            fetches_in_flight: self.fetches_in_flight.load(Ordering::Relaxed),
            policy_info: s.policy().extra_statistics(),
            info_created: self.now(),
            stats,
        }
    }

    pub(crate) fn check_integrity(&self) -> Result<()> {
        self.check_closed()?;
        let s = self.structure.read();
        let info = self.info_locked(&s);
        let mut state = IntegrityState::new();
        s.check_integrity(&mut state);
        state.check("hits <= gets", info.stats.hits <= info.stats.gets);
        drop(s);
        if state.is_ok() {
            return Ok(());
        }
        Err(CacheError::Integrity(Box::new(IntegrityViolation {
            failing: state.into_failing(),
            info,
        })))
    }

    /// Human readable internal state of one entry.
    pub(crate) fn entry_state(&self, key: &K) -> Option<String> {
        let hash = self.hash(key);
        let entry = self.lookup_existing(key, hash, false)?;
        let data = entry.lock();
        let in_refresh = self.structure.read().in_refresh(&entry);
        Some(format!(
            "status={:?}, hash={:#x}, hits={}, timer={}, inRefreshTable={}, failure={}, lastModified={}",
            data.status,
            entry.hash(),
            entry.hits(),
            data.timer.is_some(),
            in_refresh,
            data.has_failure(),
            data.last_modified
                .map(format_millis)
                .unwrap_or_else(|| "never".to_string())
        ))
    }
}

// == Cache ==
/// Thread-safe cache handle. Clones share the same cache.
///
/// Built with [`CacheBuilder`](crate::cache::CacheBuilder).
pub struct Cache<K, V, P: EvictionPolicy = LruPolicy> {
    pub(crate) core: Arc<CacheCore<K, V, P>>,
}

impl<K, V, P: EvictionPolicy> Clone for Cache<K, V, P> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<K, V, P> Cache<K, V, P>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    P: EvictionPolicy,
{
    pub fn name(&self) -> &str {
        &self.core.name
    }

    // == Get ==
    /// Returns the value for `key`, loading it through the value source if
    /// it is not cached or no longer fresh.
    ///
    /// A cached load failure is returned as [`CacheError::Propagated`].
    pub fn get(&self, key: &K) -> Result<V> {
        self.core.get_entry(key)?.into_result()
    }

    /// Like [`get`](Self::get) but returns the entry view, failures included.
    pub fn get_entry(&self, key: &K) -> Result<CacheEntry<K, V>> {
        self.core.get_entry(key)
    }

    /// Loads the value through the value source even if a fresh one is cached.
    pub fn reload(&self, key: &K) -> Result<V> {
        self.core.reload(key)?.into_result()
    }

    // == Put ==
    /// Stores `value`, replacing any cached data. The expiry is computed as
    /// for a loaded value.
    pub fn put(&self, key: K, value: V) -> Result<()> {
        self.core.put(key, value)
    }

    // == Peek ==
    /// Returns the fresh cached value without loading.
    pub fn peek(&self, key: &K) -> Result<Option<V>> {
        match self.core.peek_entry(key)? {
            Some(view) => view.into_result().map(Some),
            None => Ok(None),
        }
    }

    pub fn peek_entry(&self, key: &K) -> Result<Option<CacheEntry<K, V>>> {
        self.core.peek_entry(key)
    }

    pub fn contains(&self, key: &K) -> Result<bool> {
        self.core.contains(key)
    }

    // == Remove ==
    /// Removes the mapping. Returns true if fresh data was removed.
    pub fn remove(&self, key: &K) -> Result<bool> {
        self.core.remove_matching(key, |_| true)
    }

    /// Removes every fresh mapping.
    pub fn remove_all(&self) -> Result<()> {
        for view in self.iter()? {
            self.remove(view.key())?;
        }
        Ok(())
    }

    /// Drops every entry. Counted separately from removals.
    pub fn clear(&self) -> Result<()> {
        self.core.clear()
    }

    // == Iteration ==
    /// Iterates over the entries holding fresh data.
    ///
    /// Each call takes a new snapshot of the tables; freshness is checked
    /// as each entry is reached.
    pub fn iter(&self) -> Result<Iter<K, V>> {
        self.core.iter()
    }

    // == Lifecycle ==
    /// Closes the cache, cancelling timers and stopping background work.
    /// Calling it again has no effect.
    pub fn close(&self) {
        self.core.close();
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    // == Diagnostics ==
    /// Number of entries in the cache, including expired entries that are
    /// kept and entries being refreshed.
    pub fn len(&self) -> usize {
        self.core.structure.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn info(&self) -> CacheInfo {
        self.core.info()
    }

    /// Verifies the counters and data structures are consistent.
    ///
    /// Fails with [`CacheError::Closed`] once the cache is closed.
    pub fn check_integrity(&self) -> Result<()> {
        self.core.check_integrity()
    }

    /// Internal state of the entry for `key`, for debugging.
    pub fn entry_state(&self, key: &K) -> Result<Option<String>> {
        self.core.check_closed()?;
        Ok(self.core.entry_state(key))
    }
}

impl<K, V, P> Cache<K, V, P>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
    P: EvictionPolicy,
{
    /// Removes the mapping only if it holds fresh data equal to `expected`.
    pub fn remove_if(&self, key: &K, expected: &V) -> Result<bool> {
        self.core.remove_matching(key, |current| {
            matches!(current, Some(CachedValue::Value(v)) if v == expected)
        })
    }
}

impl<K, V, P: EvictionPolicy> fmt::Debug for Cache<K, V, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.core.name)
            .field("closed", &self.core.closed.load(Ordering::Relaxed))
            .finish()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheBuilder;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_panicking_source_restores_entry() {
        let armed = Arc::new(AtomicBool::new(true));
        let flag = armed.clone();
        let cache = CacheBuilder::<u32, u32>::new()
            .eternal()
            .source(move |key: &u32| -> anyhow::Result<u32> {
                if flag.swap(false, Ordering::SeqCst) {
                    panic!("source blew up");
                }
                Ok(*key)
            })
            .build()
            .unwrap();

        let result = catch_unwind(AssertUnwindSafe(|| cache.get(&5)));
        assert!(result.is_err());
        assert_eq!(cache.core.fetches_in_flight.load(Ordering::SeqCst), 0);
        let state = cache.entry_state(&5).unwrap().unwrap();
        assert!(state.starts_with("status=Virgin"), "{}", state);

        assert_eq!(cache.get(&5).unwrap(), 5);
        assert!(cache.check_integrity().is_ok());
    }

    #[test]
    fn test_fetching_entry_is_not_evicted() {
        let started = Arc::new(AtomicBool::new(false));
        let release = Arc::new(AtomicBool::new(false));
        let (s, r) = (started.clone(), release.clone());
        let cache = CacheBuilder::<u32, u32>::new()
            .max_size(1)
            .eternal()
            .source(move |key: &u32| -> anyhow::Result<u32> {
                s.store(true, Ordering::SeqCst);
                while !r.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(5));
                }
                Ok(*key)
            })
            .build()
            .unwrap();

        let loader = {
            let cache = cache.clone();
            thread::spawn(move || cache.get(&1))
        };
        while !started.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(5));
        }
        cache.put(2, 2).unwrap();
        cache.put(3, 3).unwrap();
        assert!(cache.entry_state(&1).unwrap().is_some());

        release.store(true, Ordering::SeqCst);
        assert_eq!(loader.join().unwrap().unwrap(), 1);
        assert!(cache.len() <= 2);
        assert!(cache.check_integrity().is_ok());
    }

    #[test]
    fn test_clear_during_first_load_keeps_integrity() {
        let started = Arc::new(AtomicBool::new(false));
        let release = Arc::new(AtomicBool::new(false));
        let (s, r) = (started.clone(), release.clone());
        let cache = CacheBuilder::<u32, u32>::new()
            .eternal()
            .source(move |key: &u32| -> anyhow::Result<u32> {
                s.store(true, Ordering::SeqCst);
                while !r.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(5));
                }
                Ok(*key)
            })
            .build()
            .unwrap();

        let loader = {
            let cache = cache.clone();
            thread::spawn(move || cache.get(&1))
        };
        while !started.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(5));
        }
        cache.clear().unwrap();
        let result = cache.check_integrity();
        assert!(result.is_ok(), "{:?}", result);

        release.store(true, Ordering::SeqCst);
        assert_eq!(loader.join().unwrap().unwrap(), 1);
        assert!(cache.is_empty());
        let stats = cache.info().stats;
        assert_eq!(stats.virgin_removed, 1);
        assert_eq!(stats.fetch_new_entry, 0);
        assert_eq!(stats.fetches, 1);
        let result = cache.check_integrity();
        assert!(result.is_ok(), "{:?}", result);
    }

    #[test]
    fn test_put_replacing_fresh_value_counts_once() {
        let cache = CacheBuilder::<u32, u32>::new().eternal().build().unwrap();
        cache.put(1, 1).unwrap();
        cache.put(1, 2).unwrap();
        let stats = cache.info().stats;
        assert_eq!(stats.puts, 2);
        assert_eq!(stats.put_new_entry, 1);
        assert_eq!(stats.created, 1);
        assert_eq!(cache.peek(&1).unwrap(), Some(2));
    }

    #[test]
    fn test_peek_counts_misses() {
        let cache = CacheBuilder::<u32, u32>::new().eternal().build().unwrap();
        assert_eq!(cache.peek(&1).unwrap(), None);
        assert_eq!(cache.info().stats.peek_miss, 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_entry_state_of_loaded_entry() {
        let cache = CacheBuilder::<u32, u32>::new().eternal().build().unwrap();
        assert!(cache.entry_state(&1).unwrap().is_none());
        cache.put(1, 1).unwrap();
        let state = cache.entry_state(&1).unwrap().unwrap();
        assert!(state.contains("status=Eternal"), "{}", state);
        assert!(state.contains("inRefreshTable=false"), "{}", state);
        assert!(state.contains("failure=false"), "{}", state);
    }
}
