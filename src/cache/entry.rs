//! Cache Entry Module
//!
//! Defines the engine's record for one key, its lifecycle states, and the
//! immutable view handed out to callers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::cache::arena::EntryId;
use crate::cache::time::{format_millis, Timestamp};
use crate::error::{CacheError, LoadFailure, Result};
use crate::tasks::TimerHandle;

// == Entry Status ==
/// Lifecycle state of an entry.
///
/// ```text
/// Virgin -> FetchInProgress -> Valid / Eternal / NeedsFetch / Expired -> Removed
///                  ^                |
///                  +----------------+   (expired or stale data is fetched again)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    /// Created on a lookup miss, never loaded
    Virgin,
    /// A caller is loading the value; other callers wait on the entry
    FetchInProgress,
    /// The refresh pool is reloading the value; the old value keeps being served
    RefreshInProgress { deadline: Timestamp, sharp: bool },
    /// A put is replacing data that was still fresh
    ReputPending,
    /// Loaded, never expires
    Eternal,
    /// Loaded, fresh until the deadline
    Valid(Timestamp),
    /// Sharp expiry timer fired early; fresh strictly until the deadline
    SharpPending(Timestamp),
    /// Loaded with a zero lifetime, the next access loads again
    NeedsFetch,
    /// Expired, kept in the table without fresh data
    Expired,
    /// Unlinked from every structure, must never be used again
    Removed,
}

impl EntryStatus {
    /// Whether the entry may be served without loading.
    ///
    /// `serves_expired` is set for caches with background refresh: a value
    /// past its deadline is still served until the timer hands it to the
    /// refresh pool.
    pub fn has_fresh_data(&self, now: Timestamp, serves_expired: bool) -> bool {
        match *self {
            EntryStatus::Eternal => true,
            EntryStatus::Valid(deadline) => serves_expired || now < deadline,
            EntryStatus::SharpPending(deadline) => now < deadline,
            EntryStatus::RefreshInProgress { deadline, sharp } => !sharp || now < deadline,
            _ => false,
        }
    }

    pub fn is_fetch_in_progress(&self) -> bool {
        matches!(
            self,
            EntryStatus::FetchInProgress | EntryStatus::RefreshInProgress { .. }
        )
    }

    /// Pinned entries are skipped by eviction.
    pub fn is_pinned(&self) -> bool {
        self.is_fetch_in_progress()
    }

    pub fn is_removed(&self) -> bool {
        matches!(self, EntryStatus::Removed)
    }

    /// Whether the entry holds data from an earlier load or put.
    pub fn has_loaded_data(&self) -> bool {
        matches!(
            self,
            EntryStatus::Eternal
                | EntryStatus::Valid(_)
                | EntryStatus::SharpPending(_)
                | EntryStatus::NeedsFetch
                | EntryStatus::Expired
                | EntryStatus::ReputPending
                | EntryStatus::RefreshInProgress { .. }
        )
    }

    /// The expiry deadline, if the state carries one.
    pub fn deadline(&self) -> Option<Timestamp> {
        match *self {
            EntryStatus::Valid(t) | EntryStatus::SharpPending(t) => Some(t),
            EntryStatus::RefreshInProgress { deadline, .. } => Some(deadline),
            _ => None,
        }
    }
}

// == Cached Value ==
/// What an entry holds: a loaded value or a load failure.
#[derive(Clone)]
pub enum CachedValue<V> {
    Value(V),
    Failure(LoadFailure),
}

impl<V> CachedValue<V> {
    pub fn is_failure(&self) -> bool {
        matches!(self, CachedValue::Failure(_))
    }

    pub fn value(&self) -> Option<&V> {
        match self {
            CachedValue::Value(v) => Some(v),
            CachedValue::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&LoadFailure> {
        match self {
            CachedValue::Value(_) => None,
            CachedValue::Failure(f) => Some(f),
        }
    }
}

impl<V: fmt::Debug> fmt::Debug for CachedValue<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CachedValue::Value(v) => f.debug_tuple("Value").field(v).finish(),
            CachedValue::Failure(e) => f.debug_tuple("Failure").field(e).finish(),
        }
    }
}

// == Entry Data ==
/// Mutable part of an entry, guarded by the entry lock.
pub(crate) struct EntryData<V> {
    pub(crate) status: EntryStatus,
    pub(crate) value: Option<CachedValue<V>>,
    pub(crate) last_modified: Option<Timestamp>,
    pub(crate) timer: Option<TimerHandle>,
    timer_seq: u64,
}

impl<V> EntryData<V> {
    fn new() -> Self {
        Self {
            status: EntryStatus::Virgin,
            value: None,
            last_modified: None,
            timer: None,
            timer_seq: 0,
        }
    }

    /// Marks the start of a fetch and returns the state to restore on abort.
    pub(crate) fn start_fetch(&mut self) -> EntryStatus {
        let previous = self.status;
        self.status = EntryStatus::FetchInProgress;
        previous
    }

    /// Sequence number for the next timer; older timers become no-ops.
    pub(crate) fn next_timer_seq(&mut self) -> u64 {
        self.timer_seq += 1;
        self.timer_seq
    }

    /// True if the timer identified by `seq` is the one currently armed.
    pub(crate) fn owns_timer(&self, seq: u64) -> bool {
        self.timer.as_ref().is_some_and(|t| t.seq() == seq)
    }

    pub(crate) fn cancel_timer(&mut self) -> bool {
        match self.timer.take() {
            Some(timer) => {
                timer.cancel();
                true
            }
            None => false,
        }
    }

    /// The last successfully loaded value, if any.
    pub(crate) fn previous_value(&self) -> Option<&V> {
        self.value.as_ref().and_then(CachedValue::value)
    }

    pub(crate) fn has_failure(&self) -> bool {
        self.value.as_ref().is_some_and(CachedValue::is_failure)
    }

    /// Marks the entry removed; waiters must restart from a fresh lookup.
    pub(crate) fn set_removed(&mut self) {
        self.cancel_timer();
        self.status = EntryStatus::Removed;
    }
}

// == Entry ==
/// The engine's record for one key.
///
/// Key, hash and arena slot never change. Value and status live behind the
/// entry lock. Fetch waiters park on `fetched`.
pub(crate) struct Entry<K, V> {
    key: K,
    hash: u64,
    id: EntryId,
    hits: AtomicU64,
    data: Mutex<EntryData<V>>,
    fetched: Condvar,
}

impl<K, V> Entry<K, V> {
    pub(crate) fn new(key: K, hash: u64, id: EntryId) -> Self {
        Self {
            key,
            hash,
            id,
            hits: AtomicU64::new(0),
            data: Mutex::new(EntryData::new()),
            fetched: Condvar::new(),
        }
    }

    pub(crate) fn key(&self) -> &K {
        &self.key
    }

    pub(crate) fn hash(&self) -> u64 {
        self.hash
    }

    pub(crate) fn id(&self) -> EntryId {
        self.id
    }

    /// Lock-free hit counter, readable by eviction policies.
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, EntryData<V>> {
        self.data.lock()
    }

    /// Blocks until no fetch is in flight for this entry.
    pub(crate) fn wait_for_fetch(&self, data: &mut MutexGuard<'_, EntryData<V>>) {
        while data.status.is_fetch_in_progress() {
            self.fetched.wait(data);
        }
    }

    pub(crate) fn notify_waiters(&self) {
        self.fetched.notify_all();
    }
}

impl<K: fmt::Debug, V> fmt::Debug for Entry<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("key", &self.key)
            .field("hash", &self.hash)
            .field("id", &self.id)
            .finish()
    }
}

// == Cache Entry View ==
/// Immutable copy of an entry's observable fields.
#[derive(Clone)]
pub struct CacheEntry<K, V> {
    key: K,
    value: CachedValue<V>,
    last_modified: Option<Timestamp>,
    expires_at: Option<Timestamp>,
}

impl<K: Clone, V: Clone> CacheEntry<K, V> {
    /// Copies the entry's fields; `None` while the entry holds no data.
    pub(crate) fn snapshot(key: &K, data: &EntryData<V>) -> Option<Self> {
        let value = data.value.clone()?;
        Some(Self {
            key: key.clone(),
            value,
            last_modified: data.last_modified,
            expires_at: data.status.deadline(),
        })
    }
}

impl<K, V> CacheEntry<K, V> {
    pub fn key(&self) -> &K {
        &self.key
    }

    /// The value, or `None` if the entry holds a load failure.
    pub fn value(&self) -> Option<&V> {
        self.value.value()
    }

    pub fn failure(&self) -> Option<&LoadFailure> {
        self.value.failure()
    }

    pub fn cached_value(&self) -> &CachedValue<V> {
        &self.value
    }

    /// Time of the last successful load or put.
    pub fn last_modified(&self) -> Option<Timestamp> {
        self.last_modified
    }

    pub fn expires_at(&self) -> Option<Timestamp> {
        self.expires_at
    }

    /// Converts into the caller-facing result, re-throwing a cached failure.
    pub fn into_result(self) -> Result<V> {
        match self.value {
            CachedValue::Value(v) => Ok(v),
            CachedValue::Failure(cause) => {
                let expiry = self
                    .expires_at
                    .map(format_millis)
                    .unwrap_or_else(|| "none".to_string());
                Err(CacheError::Propagated {
                    message: format!("(expiry={}) {}", expiry, cause),
                    cause,
                })
            }
        }
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for CacheEntry<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let updated = self
            .last_modified
            .map(format_millis)
            .unwrap_or_else(|| "never".to_string());
        match &self.value {
            CachedValue::Value(v) => write!(
                f,
                "CacheEntry(key={:?}, value={:?}, updated={})",
                self.key, v, updated
            ),
            CachedValue::Failure(e) => write!(
                f,
                "CacheEntry(key={:?}, exception={}, updated={})",
                self.key, e, updated
            ),
        }
    }
}
