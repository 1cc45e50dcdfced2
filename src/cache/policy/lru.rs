//! LRU Policy Module
//!
//! Implements Least Recently Used eviction on a cyclic list.

use crate::cache::arena::{Arena, EntryId};
use crate::cache::policy::{CyclicList, EvictionPolicy};

// == LRU Policy ==
/// Tracks access order for LRU eviction.
///
/// Entries sit on a cyclic list where:
/// - Head = Most recently used
/// - Tail = Least recently used
#[derive(Debug, Default)]
pub struct LruPolicy {
    list: CyclicList,
}

impl LruPolicy {
    // == Constructor ==
    /// Creates a new empty LRU policy.
    pub fn new() -> Self {
        Self::default()
    }

    // == Peek Oldest ==
    /// Returns the least recently used entry without touching it.
    pub fn peek_oldest<K, V>(&self, arena: &Arena<K, V, ()>) -> Option<EntryId> {
        self.list.tail(arena)
    }
}

impl EvictionPolicy for LruPolicy {
    type Meta = ();

    fn name(&self) -> &'static str {
        "lru"
    }

    // == Touch ==
    /// Marks an entry as recently used (moves to head).
    fn record_hit<K, V>(&mut self, arena: &mut Arena<K, V, ()>, id: EntryId) {
        self.list.move_to_head(arena, id);
    }

    fn insert<K, V>(&mut self, arena: &mut Arena<K, V, ()>, id: EntryId) {
        self.list.insert_head(arena, id);
    }

    fn remove<K, V>(&mut self, arena: &mut Arena<K, V, ()>, id: EntryId) {
        self.list.remove(arena, id);
    }

    // == Evict Oldest ==
    /// Returns the least recently used entry.
    ///
    /// The candidate is rotated to the head so that, if the engine cannot
    /// evict it, the next call returns the next oldest entry instead.
    fn find_eviction_candidate<K, V>(&mut self, arena: &mut Arena<K, V, ()>) -> Option<EntryId> {
        let oldest = self.list.tail(arena)?;
        self.list.move_to_head(arena, oldest);
        Some(oldest)
    }

    fn clear(&mut self) {
        self.list = CyclicList::new();
    }

    fn len(&self) -> usize {
        self.list.len()
    }

    fn check_integrity<K, V>(&self, arena: &Arena<K, V, ()>) -> Vec<String> {
        let mut failing = Vec::new();
        if !self.list.check_integrity(arena) {
            failing.push("lru list is not a consistent cycle".to_string());
        }
        match self.list.count(arena) {
            Some(count) if count == self.list.len() => {}
            other => failing.push(format!(
                "lru list length {} != walked count {:?}",
                self.list.len(),
                other
            )),
        }
        failing
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::Entry;

    fn add(lru: &mut LruPolicy, arena: &mut Arena<&'static str, (), ()>, key: &'static str) -> EntryId {
        let id = arena.insert_with((), |id| Entry::new(key, 0, id)).id();
        lru.insert(arena, id);
        id
    }

    fn key_of(arena: &Arena<&'static str, (), ()>, id: EntryId) -> &'static str {
        arena.node(id).entry.key()
    }

    #[test]
    fn test_lru_new() {
        let lru = LruPolicy::new();
        assert!(lru.is_empty());
        assert_eq!(lru.len(), 0);
    }

    #[test]
    fn test_lru_insert_tracks_oldest() {
        let mut arena = Arena::new();
        let mut lru = LruPolicy::new();

        add(&mut lru, &mut arena, "key1");
        add(&mut lru, &mut arena, "key2");
        add(&mut lru, &mut arena, "key3");

        assert_eq!(lru.len(), 3);
        // key1 is oldest (added first)
        let oldest = lru.peek_oldest(&arena).unwrap();
        assert_eq!(key_of(&arena, oldest), "key1");
    }

    #[test]
    fn test_lru_hit_moves_to_front() {
        let mut arena = Arena::new();
        let mut lru = LruPolicy::new();

        let a = add(&mut lru, &mut arena, "a");
        add(&mut lru, &mut arena, "b");
        add(&mut lru, &mut arena, "c");

        // Touch 'a' to move it to front
        lru.record_hit(&mut arena, a);

        // Now 'b' should be oldest
        let oldest = lru.peek_oldest(&arena).unwrap();
        assert_eq!(key_of(&arena, oldest), "b");
    }

    #[test]
    fn test_lru_candidates_in_age_order() {
        let mut arena = Arena::new();
        let mut lru = LruPolicy::new();

        add(&mut lru, &mut arena, "a");
        add(&mut lru, &mut arena, "b");
        add(&mut lru, &mut arena, "c");

        let first = lru.find_eviction_candidate(&mut arena).unwrap();
        assert_eq!(key_of(&arena, first), "a");
        lru.remove(&mut arena, first);
        arena.remove(first);

        let second = lru.find_eviction_candidate(&mut arena).unwrap();
        assert_eq!(key_of(&arena, second), "b");
        assert_eq!(lru.len(), 2);
    }

    #[test]
    fn test_lru_skipped_candidate_makes_progress() {
        let mut arena = Arena::new();
        let mut lru = LruPolicy::new();

        add(&mut lru, &mut arena, "a");
        add(&mut lru, &mut arena, "b");

        // the engine could not evict the first candidate
        let first = lru.find_eviction_candidate(&mut arena).unwrap();
        let second = lru.find_eviction_candidate(&mut arena).unwrap();
        assert_ne!(first, second);
        assert_eq!(key_of(&arena, second), "b");
    }

    #[test]
    fn test_lru_evict_empty() {
        let mut arena: Arena<&'static str, (), ()> = Arena::new();
        let mut lru = LruPolicy::new();
        assert_eq!(lru.find_eviction_candidate(&mut arena), None);
    }

    #[test]
    fn test_lru_remove_keeps_integrity() {
        let mut arena = Arena::new();
        let mut lru = LruPolicy::new();

        add(&mut lru, &mut arena, "key1");
        let key2 = add(&mut lru, &mut arena, "key2");
        add(&mut lru, &mut arena, "key3");

        lru.remove(&mut arena, key2);
        arena.remove(key2);

        assert_eq!(lru.len(), 2);
        assert!(lru.check_integrity(&arena).is_empty());
    }
}
