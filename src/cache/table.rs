//! Hash Table Module
//!
//! Chained hash table over shared entry handles. The engine keeps two of
//! these: the main table and the table of entries being refreshed in the
//! background. Both are only mutated under the structure lock.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::cache::entry::Entry;

/// Spreads the high bits of a hash into the low bits used for bucket
/// selection.
pub fn modified_hash(hash: u64) -> u64 {
    let mut h = hash;
    h ^= h >> 7;
    h ^= h >> 15;
    h
}

/// Seeded hash of a key as used for table placement.
///
/// The seed keys the hasher itself, so which keys share a bucket depends on
/// the seed and colliding keys cannot be prepared for every cache.
pub fn hash_key<K: Hash + ?Sized>(key: &K, seed: u64) -> u64 {
    let mut hasher = DefaultHasher::new();
    hasher.write_u64(seed);
    key.hash(&mut hasher);
    modified_hash(hasher.finish())
}

// == Hash Table ==
pub(crate) struct HashTable<K, V> {
    buckets: Vec<Vec<Arc<Entry<K, V>>>>,
    len: usize,
    load_percent: usize,
    initial_size: usize,
}

impl<K: Eq, V> HashTable<K, V> {
    /// Creates a table with `size` buckets (a power of two).
    pub(crate) fn new(size: usize, load_percent: usize) -> Self {
        Self {
            buckets: (0..size).map(|_| Vec::new()).collect(),
            len: 0,
            load_percent,
            initial_size: size,
        }
    }

    fn index(&self, hash: u64) -> usize {
        (hash as usize) & (self.buckets.len() - 1)
    }

    pub(crate) fn lookup(&self, key: &K, hash: u64) -> Option<&Arc<Entry<K, V>>> {
        self.buckets[self.index(hash)]
            .iter()
            .find(|e| e.hash() == hash && e.key() == key)
    }

    /// Inserts the entry, growing the table if it crosses its load limit.
    ///
    /// Inserting an entry that is already present is a no-op.
    pub(crate) fn insert(&mut self, entry: Arc<Entry<K, V>>) {
        let index = self.index(entry.hash());
        let bucket = &mut self.buckets[index];
        if bucket.iter().any(|e| Arc::ptr_eq(e, &entry)) {
            return;
        }
        bucket.push(entry);
        self.len += 1;
        if self.len * 100 > self.buckets.len() * self.load_percent {
            self.grow();
        }
    }

    /// Removes the entry mapped to `key`.
    pub(crate) fn remove_key(&mut self, key: &K, hash: u64) -> Option<Arc<Entry<K, V>>> {
        let index = self.index(hash);
        let bucket = &mut self.buckets[index];
        let pos = bucket
            .iter()
            .position(|e| e.hash() == hash && e.key() == key)?;
        self.len -= 1;
        Some(bucket.swap_remove(pos))
    }

    /// Removes exactly this entry; false if it is not in the table.
    pub(crate) fn remove_entry(&mut self, entry: &Arc<Entry<K, V>>) -> bool {
        let index = self.index(entry.hash());
        let bucket = &mut self.buckets[index];
        match bucket.iter().position(|e| Arc::ptr_eq(e, entry)) {
            Some(pos) => {
                bucket.swap_remove(pos);
                self.len -= 1;
                true
            }
            None => false,
        }
    }

    pub(crate) fn contains_entry(&self, entry: &Arc<Entry<K, V>>) -> bool {
        self.buckets[self.index(entry.hash())]
            .iter()
            .any(|e| Arc::ptr_eq(e, entry))
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Walks every chain; used by the integrity check.
    pub(crate) fn calc_entry_count(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<Entry<K, V>>> + '_ {
        self.buckets.iter().flatten()
    }

    /// Drops every entry and shrinks back to the initial size.
    pub(crate) fn clear(&mut self) {
        self.buckets = (0..self.initial_size).map(|_| Vec::new()).collect();
        self.len = 0;
    }

    fn grow(&mut self) {
        let size = self.buckets.len() * 2;
        let old = std::mem::replace(&mut self.buckets, (0..size).map(|_| Vec::new()).collect());
        for entry in old.into_iter().flatten() {
            let index = self.index(entry.hash());
            self.buckets[index].push(entry);
        }
    }

    #[cfg(test)]
    pub(crate) fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::arena::EntryId;

    fn entry(key: &str, seed: u64, index: u32) -> Arc<Entry<String, u32>> {
        let hash = hash_key(key, seed);
        Arc::new(Entry::new(key.to_string(), hash, EntryId::new(index, 1)))
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut table = HashTable::new(4, 64);
        let a = entry("a", 1, 0);
        table.insert(Arc::clone(&a));

        let found = table.lookup(&"a".to_string(), a.hash()).unwrap();
        assert!(Arc::ptr_eq(found, &a));
        assert!(table.lookup(&"b".to_string(), hash_key("b", 1)).is_none());
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut table = HashTable::new(4, 64);
        let a = entry("a", 1, 0);
        table.insert(Arc::clone(&a));
        table.insert(Arc::clone(&a));
        assert_eq!(table.len(), 1);
        assert_eq!(table.calc_entry_count(), 1);
    }

    #[test]
    fn test_grows_and_keeps_entries() {
        let mut table = HashTable::new(4, 64);
        let entries: Vec<_> = (0..100).map(|i| entry(&format!("k{}", i), 9, i)).collect();
        for e in &entries {
            table.insert(Arc::clone(e));
        }
        assert!(table.bucket_count() > 4);
        assert!(table.bucket_count().is_power_of_two());
        assert_eq!(table.len(), 100);
        assert_eq!(table.calc_entry_count(), 100);
        for e in &entries {
            assert!(table.lookup(e.key(), e.hash()).is_some());
        }
    }

    #[test]
    fn test_remove_by_key_and_entry() {
        let mut table = HashTable::new(8, 64);
        let a = entry("a", 3, 0);
        let b = entry("b", 3, 1);
        table.insert(Arc::clone(&a));
        table.insert(Arc::clone(&b));

        assert!(table.remove_key(&"a".to_string(), a.hash()).is_some());
        assert!(table.remove_key(&"a".to_string(), a.hash()).is_none());
        assert!(table.remove_entry(&b));
        assert!(!table.remove_entry(&b));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_clear_resets() {
        let mut table = HashTable::new(4, 64);
        for i in 0..20 {
            table.insert(entry(&format!("k{}", i), 0, i));
        }
        table.clear();
        assert_eq!(table.len(), 0);
        assert_eq!(table.bucket_count(), 4);
        assert_eq!(table.iter().count(), 0);
    }

    #[test]
    fn test_seed_changes_hash() {
        assert_ne!(hash_key("key", 1), hash_key("key", 2));
        assert_eq!(hash_key("key", 5), hash_key("key", 5));
    }

    #[test]
    fn test_colliding_keys_separate_under_another_seed() {
        let mask = 63;
        let bucket = |key: &str, seed: u64| hash_key(key, seed) & mask;

        // 65 keys over 64 buckets: at least one pair shares a bucket
        let keys: Vec<String> = (0..65).map(|i| format!("k{}", i)).collect();
        let mut by_bucket = std::collections::HashMap::new();
        let (a, b) = keys
            .iter()
            .find_map(|key| {
                by_bucket
                    .insert(bucket(key, 1), key.clone())
                    .map(|other| (other, key.clone()))
            })
            .unwrap();
        assert_eq!(bucket(&a, 1), bucket(&b, 1));

        assert!((2..100).any(|seed| bucket(&a, seed) != bucket(&b, seed)));
    }
}
