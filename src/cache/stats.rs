//! Cache Statistics Module
//!
//! Counters kept under the structure lock, and the snapshot handed out to
//! callers.

use std::fmt;

use serde::Serialize;

use crate::cache::time::{format_millis, Timestamp};

// == Cache Stats ==
/// Running counters of one cache instance.
///
/// Every entry that leaves the cache is counted in exactly one of
/// `evicted`, `expired_removed`, `removed` or `cleared`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Entries created on a lookup miss
    pub created: u64,
    /// Calls to `get`, counted outside the structure lock
    pub gets: u64,
    /// Gets answered from the cache without loading
    pub hits: u64,
    /// Loads from the value source, including refreshes and reloads
    pub fetches: u64,
    /// Loads of entries that never held data
    pub fetch_new_entry: u64,
    /// Loads of entries that held data that was no longer fresh
    pub refetch_non_fresh: u64,
    /// Loads of entries that still held fresh data (reload, refresh ahead)
    pub fetch_but_hit: u64,
    /// Loads that failed
    pub fetch_exceptions: u64,
    /// Failed loads hidden behind a previous good value
    pub suppressed_exceptions: u64,
    /// Total milliseconds spent in the value source
    pub fetch_millis: u64,
    pub puts: u64,
    /// Puts that created the entry
    pub put_new_entry: u64,
    /// Puts whose value was already expired when installed
    pub put_but_expired: u64,
    /// Peeks that found no entry
    pub peek_miss: u64,
    /// Peeks that found an entry without fresh data
    pub peek_hit_not_fresh: u64,
    /// Background refreshes completed
    pub refreshes: u64,
    /// Lookups served from the refresh table
    pub refresh_hits: u64,
    /// Refreshes rejected by a saturated refresh pool
    pub refresh_submit_failed: u64,
    /// Errors on the background refresh path
    pub internal_exceptions: u64,
    pub timer_events: u64,
    pub evicted: u64,
    /// Entries expired and kept in the table
    pub expired_kept: u64,
    /// Entries expired and removed
    pub expired_removed: u64,
    /// Entries removed by `remove`
    pub removed: u64,
    /// Entries removed before they ever held data
    pub virgin_removed: u64,
    /// Entries dropped by `clear`
    pub cleared: u64,
    pub clear_count: u64,
    pub last_clear_time: Option<Timestamp>,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Record Eviction ==
    pub fn record_eviction(&mut self) {
        self.evicted += 1;
    }

    // == Record Clear ==
    pub fn record_clear(&mut self, dropped: usize, now: Timestamp) {
        self.cleared += dropped as u64;
        self.clear_count += 1;
        self.last_clear_time = Some(now);
    }

    /// Gets that had to load.
    pub fn misses(&self) -> u64 {
        self.gets.saturating_sub(self.hits)
    }

    /// Sum of every way an entry can leave the cache.
    pub fn departed(&self) -> u64 {
        self.evicted + self.expired_removed + self.removed + self.cleared
    }
}

// == Cache Info ==
/// Point in time snapshot of a cache's size and counters.
#[derive(Debug, Clone, Serialize)]
pub struct CacheInfo {
    pub name: String,
    /// Eviction policy name
    pub implementation: String,
    /// Live entries, including entries being refreshed
    pub size: usize,
    pub max_size: usize,
    /// Entries currently in the refresh table
    pub refresh_size: usize,
    pub fetches_in_flight: usize,
    /// Policy specific statistics
    pub policy_info: String,
    pub info_created: Timestamp,
    #[serde(flatten)]
    pub stats: CacheStats,
}

impl CacheInfo {
    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / gets, or 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        if self.stats.gets == 0 {
            0.0
        } else {
            self.stats.hits as f64 / self.stats.gets as f64
        }
    }

    /// Average milliseconds per load.
    pub fn millis_per_fetch(&self) -> f64 {
        if self.stats.fetches == 0 {
            0.0
        } else {
            self.stats.fetch_millis as f64 / self.stats.fetches as f64
        }
    }

    /// Serializes the snapshot as JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl fmt::Display for CacheInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.stats;
        write!(
            f,
            "Cache{{{}}}(size={}, maxSize={}, refreshSize={}, usageCnt={}, missCnt={}, \
             hitRate={:.2}%, fetchCnt={}, fetchesInFlight={}, fetchExceptionCnt={}, \
             suppressedExceptionCnt={}, putCnt={}, newEntryCnt={}, evictedCnt={}, \
             expiredKeptCnt={}, expiredRemoveCnt={}, removedCnt={}, clearedCnt={}, \
             refreshCnt={}, refreshHitCnt={}, refreshSubmitFailedCnt={}, \
             internalExceptionCnt={}, timerEventCnt={}, millisPerFetch={:.1}, \
             impl={}, policy=[{}], infoCreated={})",
            self.name,
            self.size,
            self.max_size,
            self.refresh_size,
            s.gets,
            s.misses(),
            self.hit_rate() * 100.0,
            s.fetches,
            self.fetches_in_flight,
            s.fetch_exceptions,
            s.suppressed_exceptions,
            s.puts,
            s.created,
            s.evicted,
            s.expired_kept,
            s.expired_removed,
            s.removed,
            s.cleared,
            s.refreshes,
            s.refresh_hits,
            s.refresh_submit_failed,
            s.internal_exceptions,
            s.timer_events,
            self.millis_per_fetch(),
            self.implementation,
            self.policy_info,
            format_millis(self.info_created)
        )
    }
}
