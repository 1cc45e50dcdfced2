//! Cache Structure Module
//!
//! Everything guarded by the structure lock: the entry arena, the main and
//! refresh hash tables, the eviction policy and the counters. Methods here
//! never take an entry lock; callers that need both take the entry lock
//! first.

use std::sync::Arc;

use crate::cache::arena::{Arena, Node};
use crate::cache::entry::Entry;
use crate::cache::integrity::IntegrityState;
use crate::cache::policy::EvictionPolicy;
use crate::cache::stats::CacheStats;
use crate::cache::table::HashTable;
use crate::config::Tunables;

pub(crate) struct Structure<K, V, P: EvictionPolicy> {
    arena: Arena<K, V, P::Meta>,
    main: HashTable<K, V>,
    refresh: HashTable<K, V>,
    policy: P,
    max_size: usize,
    eviction_needed: bool,
    pub(crate) stats: CacheStats,
}

impl<K: Eq, V, P: EvictionPolicy> Structure<K, V, P> {
    pub(crate) fn new(policy: P, max_size: usize, tunables: &Tunables) -> Self {
        Self {
            arena: Arena::new(),
            main: HashTable::new(tunables.initial_hash_size, tunables.hash_load_percent),
            refresh: HashTable::new(tunables.initial_hash_size, tunables.hash_load_percent),
            policy,
            max_size,
            eviction_needed: false,
            stats: CacheStats::new(),
        }
    }

    // == Lookup ==
    /// Read-only lookup in the main table, for the shared-lock fast path.
    pub(crate) fn peek_main(&self, key: &K, hash: u64) -> Option<&Arc<Entry<K, V>>> {
        self.main.lookup(key, hash)
    }

    /// Read-only lookup in both tables; records nothing.
    pub(crate) fn find(&self, key: &K, hash: u64) -> Option<&Arc<Entry<K, V>>> {
        self.main
            .lookup(key, hash)
            .or_else(|| self.refresh.lookup(key, hash))
    }

    /// Finds the entry in either table.
    ///
    /// An entry found in the refresh table moves back to the main table. If
    /// `touch` is set the access is recorded for the eviction policy.
    pub(crate) fn lookup(&mut self, key: &K, hash: u64, touch: bool) -> Option<Arc<Entry<K, V>>> {
        let entry = match self.main.lookup(key, hash) {
            Some(entry) => Arc::clone(entry),
            None => {
                let entry = self.refresh.remove_key(key, hash)?;
                self.main.insert(Arc::clone(&entry));
                self.stats.refresh_hits += 1;
                entry
            }
        };
        if touch {
            self.record_hit(&entry);
        }
        Some(entry)
    }

    pub(crate) fn record_hit(&mut self, entry: &Entry<K, V>) {
        entry.record_hit();
        if !P::UNSYNCHRONIZED_HITS && self.arena.contains(entry.id()) {
            self.policy.record_hit(&mut self.arena, entry.id());
        }
    }

    // == New Entry ==
    /// Creates an entry for `key` and links it into the main table and the
    /// eviction policy.
    pub(crate) fn new_entry(&mut self, key: K, hash: u64) -> Arc<Entry<K, V>> {
        if self.arena.len() >= self.max_size {
            self.eviction_needed = true;
        }
        let meta = self.policy.check_for_ghost(hash).unwrap_or_default();
        let entry = self.arena.insert_with(meta, |id| Entry::new(key, hash, id));
        // policies index the arena directly and panic on stale handles
        debug_assert!(self.arena.contains(entry.id()));
        self.policy.insert(&mut self.arena, entry.id());
        self.main.insert(Arc::clone(&entry));
        self.stats.created += 1;
        entry
    }

    /// Whether `entry` is still linked into the cache.
    pub(crate) fn is_live(&self, entry: &Arc<Entry<K, V>>) -> bool {
        self.arena
            .get(entry.id())
            .is_some_and(|node| Arc::ptr_eq(&node.entry, entry))
    }

    /// Records that the entry received data. Returns true, and counts the
    /// first load or put, if this is the first data the entry received.
    pub(crate) fn mark_loaded(&mut self, entry: &Arc<Entry<K, V>>, by_put: bool) -> bool {
        let first = match self.arena.get_mut(entry.id()) {
            Some(node) if Arc::ptr_eq(&node.entry, entry) => {
                std::mem::replace(&mut node.virgin, false)
            }
            _ => false,
        };
        if first && by_put {
            self.stats.put_new_entry += 1;
        } else if first {
            self.stats.fetch_new_entry += 1;
        }
        first
    }

    // == Unlink ==
    /// Removes the entry from both tables, the policy and the arena.
    ///
    /// Returns the node if the entry was live. The caller counts the reason.
    pub(crate) fn unlink(&mut self, entry: &Arc<Entry<K, V>>) -> Option<Node<K, V, P::Meta>> {
        if !self.is_live(entry) {
            return None;
        }
        debug_assert!(self.arena.contains(entry.id()));
        self.policy.remove(&mut self.arena, entry.id());
        if !self.main.remove_entry(entry) {
            self.refresh.remove_entry(entry);
        }
        let node = self.arena.remove(entry.id())?;
        if node.virgin {
            self.stats.virgin_removed += 1;
        }
        if self.arena.len() <= self.max_size {
            self.eviction_needed = false;
        }
        Some(node)
    }

    // == Refresh Table ==
    /// Moves a live entry from the main table into the refresh table.
    pub(crate) fn move_to_refresh(&mut self, entry: &Arc<Entry<K, V>>) -> bool {
        if !self.is_live(entry) {
            return false;
        }
        self.main.remove_entry(entry);
        self.refresh.insert(Arc::clone(entry));
        true
    }

    /// Moves a live entry back into the main table, wherever it is now.
    pub(crate) fn move_to_main(&mut self, entry: &Arc<Entry<K, V>>) {
        if !self.is_live(entry) {
            return;
        }
        self.refresh.remove_entry(entry);
        self.main.insert(Arc::clone(entry));
    }

    pub(crate) fn in_refresh(&self, entry: &Arc<Entry<K, V>>) -> bool {
        self.refresh.contains_entry(entry)
    }

    // == Eviction ==
    /// Next entry to evict, or `None` if the cache is within its capacity.
    pub(crate) fn eviction_candidate(&mut self) -> Option<Arc<Entry<K, V>>> {
        if self.arena.len() <= self.max_size {
            self.eviction_needed = false;
            return None;
        }
        let id = self.policy.find_eviction_candidate(&mut self.arena)?;
        debug_assert!(self.arena.contains(id), "policy returned a stale handle");
        self.arena.entry(id).cloned()
    }

    /// Evicts the entry; false if it was removed concurrently.
    pub(crate) fn evict(&mut self, entry: &Arc<Entry<K, V>>) -> bool {
        match self.unlink(entry) {
            Some(node) => {
                self.policy.record_eviction(entry.hash(), &node.meta);
                self.stats.record_eviction();
                true
            }
            None => false,
        }
    }

    pub(crate) fn over_capacity(&self) -> bool {
        self.arena.len() > self.max_size
    }

    // == Bulk ==
    /// Unlinks every entry and resets both tables and the policy.
    pub(crate) fn drain(&mut self) -> Vec<Arc<Entry<K, V>>> {
        let nodes = self.arena.drain();
        self.stats.virgin_removed += nodes.iter().filter(|node| node.virgin).count() as u64;
        let entries = nodes.into_iter().map(|node| node.entry).collect();
        self.main.clear();
        self.refresh.clear();
        self.policy.clear();
        self.eviction_needed = false;
        entries
    }

    /// Every live entry, main table first.
    pub(crate) fn snapshot(&self) -> Vec<Arc<Entry<K, V>>> {
        self.main.iter().chain(self.refresh.iter()).cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.arena.len()
    }

    pub(crate) fn refresh_len(&self) -> usize {
        self.refresh.len()
    }

    pub(crate) fn max_size(&self) -> usize {
        self.max_size
    }

    pub(crate) fn policy(&self) -> &P {
        &self.policy
    }

    // == Integrity ==
    pub(crate) fn check_integrity(&self, state: &mut IntegrityState) {
        let size = self.arena.len();
        let s = &self.stats;
        state
            .check_equals(
                "created == size + evicted + expiredRemoved + removed + cleared",
                s.created,
                size as u64 + s.departed(),
            )
            .check_equals(
                "created - virginRemoved == fetchNewEntry + putNewEntry + virgins",
                s.created - s.virgin_removed.min(s.created),
                s.fetch_new_entry + s.put_new_entry + self.arena.virgin_count() as u64,
            )
            .check_equals(
                "main table size == chain count",
                self.main.len(),
                self.main.calc_entry_count(),
            )
            .check_equals(
                "refresh table size == chain count",
                self.refresh.len(),
                self.refresh.calc_entry_count(),
            )
            .check_equals(
                "main + refresh == size",
                self.main.len() + self.refresh.len(),
                size,
            )
            .check_equals("policy size == size", self.policy.len(), size)
            .check(
                "evictionNeeded || size <= maxSize",
                self.eviction_needed || size <= self.max_size,
            );
        state.extend(self.policy.name(), self.policy.check_integrity(&self.arena));
    }
}
