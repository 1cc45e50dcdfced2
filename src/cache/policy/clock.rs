//! Clock Policy Module
//!
//! Second-chance eviction with a clock hand sweeping a cyclic list. Hits are
//! counted lock-free on the entry itself, so lookups never need the
//! structure lock. Keys evicted recently are remembered by hash; when such a
//! key comes back it starts with a second chance.

use std::collections::{HashMap, VecDeque};

use crate::cache::arena::{Arena, EntryId};
use crate::cache::policy::{CyclicList, EvictionPolicy};

/// Number of evicted key hashes remembered by default.
pub const DEFAULT_GHOST_CAPACITY: usize = 1024;

// == Clock Meta ==
/// Per-entry state of the clock policy.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClockMeta {
    /// Entry hit count when the hand last passed
    pub seen_hits: u64,
    /// Survives the next sweep regardless of hits
    pub second_chance: bool,
}

// == Ghost History ==
/// Bounded FIFO of recently evicted key hashes.
#[derive(Debug)]
struct Ghosts {
    capacity: usize,
    order: VecDeque<(u64, u64)>,
    live: HashMap<u64, u64>,
    seq: u64,
}

impl Ghosts {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::new(),
            live: HashMap::new(),
            seq: 0,
        }
    }

    fn push(&mut self, hash: u64) {
        if self.capacity == 0 {
            return;
        }
        self.seq += 1;
        self.live.insert(hash, self.seq);
        self.order.push_back((hash, self.seq));
        while self.live.len() > self.capacity {
            match self.order.pop_front() {
                Some((old, seq)) => {
                    if self.live.get(&old) == Some(&seq) {
                        self.live.remove(&old);
                    }
                }
                None => break,
            }
        }
        // drop stale queue slots left behind by re-pushed or taken hashes
        if self.order.len() > self.capacity * 2 {
            let live = &self.live;
            self.order.retain(|(h, s)| live.get(h) == Some(s));
        }
    }

    fn take(&mut self, hash: u64) -> bool {
        self.live.remove(&hash).is_some()
    }

    fn len(&self) -> usize {
        self.live.len()
    }

    fn clear(&mut self) {
        self.order.clear();
        self.live.clear();
    }
}

// == Clock Policy ==
/// Clock (second chance) eviction.
///
/// New entries are placed right behind the hand, so they are the last ones
/// the next sweep reaches.
#[derive(Debug)]
pub struct ClockPolicy {
    list: CyclicList,
    ghosts: Ghosts,
    sweeps: u64,
    ghost_hits: u64,
}

impl Default for ClockPolicy {
    fn default() -> Self {
        Self::with_ghost_capacity(DEFAULT_GHOST_CAPACITY)
    }
}

impl ClockPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a clock policy remembering up to `capacity` evicted keys.
    pub fn with_ghost_capacity(capacity: usize) -> Self {
        Self {
            list: CyclicList::new(),
            ghosts: Ghosts::new(capacity),
            sweeps: 0,
            ghost_hits: 0,
        }
    }

    /// Entry the hand currently points at.
    pub fn hand(&self) -> Option<EntryId> {
        self.list.head()
    }

    fn advance<K, V>(&mut self, arena: &Arena<K, V, ClockMeta>, from: EntryId) {
        self.list.set_head(Some(CyclicList::next(arena, from)));
    }
}

impl EvictionPolicy for ClockPolicy {
    type Meta = ClockMeta;

    const UNSYNCHRONIZED_HITS: bool = true;

    fn name(&self) -> &'static str {
        "clock"
    }

    // hits live on the entry; the sweep reads them
    fn record_hit<K, V>(&mut self, _arena: &mut Arena<K, V, ClockMeta>, _id: EntryId) {}

    fn insert<K, V>(&mut self, arena: &mut Arena<K, V, ClockMeta>, id: EntryId) {
        let hits = arena.hits(id);
        arena.node_mut(id).meta.seen_hits = hits;
        self.list.insert_tail(arena, id);
    }

    fn remove<K, V>(&mut self, arena: &mut Arena<K, V, ClockMeta>, id: EntryId) {
        self.list.remove(arena, id);
    }

    // == Sweep ==
    /// Advances the hand until an entry without new hits and without a
    /// second chance is found. The hand ends up past the returned entry.
    fn find_eviction_candidate<K, V>(
        &mut self,
        arena: &mut Arena<K, V, ClockMeta>,
    ) -> Option<EntryId> {
        let mut hand = self.list.head()?;
        // two full turns clear every reference bit
        let limit = self.list.len() * 2;
        for _ in 0..limit {
            let hits = arena.hits(hand);
            let meta = &mut arena.node_mut(hand).meta;
            if hits == meta.seen_hits && !meta.second_chance {
                break;
            }
            meta.seen_hits = hits;
            meta.second_chance = false;
            self.sweeps += 1;
            hand = CyclicList::next(arena, hand);
        }
        self.advance(arena, hand);
        Some(hand)
    }

    fn check_for_ghost(&mut self, hash: u64) -> Option<ClockMeta> {
        if !self.ghosts.take(hash) {
            return None;
        }
        self.ghost_hits += 1;
        Some(ClockMeta {
            seen_hits: 0,
            second_chance: true,
        })
    }

    fn record_eviction(&mut self, hash: u64, _meta: &ClockMeta) {
        self.ghosts.push(hash);
    }

    fn clear(&mut self) {
        self.list = CyclicList::new();
        self.ghosts.clear();
    }

    fn len(&self) -> usize {
        self.list.len()
    }

    fn check_integrity<K, V>(&self, arena: &Arena<K, V, ClockMeta>) -> Vec<String> {
        let mut failing = Vec::new();
        if !self.list.check_integrity(arena) {
            failing.push("clock list is not a consistent cycle".to_string());
        }
        if self.ghosts.len() > self.ghosts.capacity {
            failing.push(format!(
                "ghost history {} exceeds capacity {}",
                self.ghosts.len(),
                self.ghosts.capacity
            ));
        }
        failing
    }

    fn extra_statistics(&self) -> String {
        format!(
            "sweeps={}, ghosts={}, ghostHits={}",
            self.sweeps,
            self.ghosts.len(),
            self.ghost_hits
        )
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::Entry;

    type TestArena = Arena<u32, (), ClockMeta>;

    fn add(clock: &mut ClockPolicy, arena: &mut TestArena, key: u32) -> EntryId {
        let meta = clock.check_for_ghost(key as u64).unwrap_or_default();
        let id = arena
            .insert_with(meta, |id| Entry::new(key, key as u64, id))
            .id();
        clock.insert(arena, id);
        id
    }

    fn evict(clock: &mut ClockPolicy, arena: &mut TestArena) -> u32 {
        let id = clock.find_eviction_candidate(arena).unwrap();
        let key = *arena.node(id).entry.key();
        clock.remove(arena, id);
        let node = arena.remove(id).unwrap();
        clock.record_eviction(key as u64, &node.meta);
        key
    }

    #[test]
    fn test_without_hits_evicts_in_insertion_order() {
        let mut arena = Arena::new();
        let mut clock = ClockPolicy::new();
        for key in 0..3 {
            add(&mut clock, &mut arena, key);
        }
        assert_eq!(evict(&mut clock, &mut arena), 0);
        assert_eq!(evict(&mut clock, &mut arena), 1);
        assert_eq!(evict(&mut clock, &mut arena), 2);
        assert!(clock.is_empty());
    }

    #[test]
    fn test_hit_entry_gets_second_chance() {
        let mut arena = Arena::new();
        let mut clock = ClockPolicy::new();
        let first = add(&mut clock, &mut arena, 0);
        add(&mut clock, &mut arena, 1);

        arena.node(first).entry.record_hit();

        assert_eq!(evict(&mut clock, &mut arena), 1);
        // hits were consumed by the sweep
        assert_eq!(evict(&mut clock, &mut arena), 0);
    }

    #[test]
    fn test_all_hit_still_finds_candidate() {
        let mut arena = Arena::new();
        let mut clock = ClockPolicy::new();
        let ids: Vec<_> = (0..4).map(|k| add(&mut clock, &mut arena, k)).collect();
        for id in &ids {
            arena.node(*id).entry.record_hit();
        }
        assert_eq!(evict(&mut clock, &mut arena), 0);
    }

    #[test]
    fn test_skipped_candidate_makes_progress() {
        let mut arena = Arena::new();
        let mut clock = ClockPolicy::new();
        add(&mut clock, &mut arena, 0);
        add(&mut clock, &mut arena, 1);

        let first = clock.find_eviction_candidate(&mut arena).unwrap();
        let second = clock.find_eviction_candidate(&mut arena).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_ghost_gives_returning_key_second_chance() {
        let mut arena = Arena::new();
        let mut clock = ClockPolicy::new();
        add(&mut clock, &mut arena, 7);
        assert_eq!(evict(&mut clock, &mut arena), 7);

        let returning = add(&mut clock, &mut arena, 7);
        assert!(arena.node(returning).meta.second_chance);
        add(&mut clock, &mut arena, 8);

        assert_eq!(evict(&mut clock, &mut arena), 8);
        assert!(clock.extra_statistics().contains("ghostHits=1"));
    }

    #[test]
    fn test_ghost_history_is_bounded() {
        let mut arena = Arena::new();
        let mut clock = ClockPolicy::with_ghost_capacity(2);
        for key in 0..5 {
            add(&mut clock, &mut arena, key);
        }
        for _ in 0..5 {
            evict(&mut clock, &mut arena);
        }
        assert!(clock.check_for_ghost(0).is_none());
        assert!(clock.check_for_ghost(4).is_some());
        assert!(clock.check_integrity(&arena).is_empty());
    }
}
