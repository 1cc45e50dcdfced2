//! Cache Iterator Module

use std::sync::Arc;

use crate::cache::entry::{CacheEntry, Entry};
use crate::cache::time::Clock;

/// Iterator over the entries of a cache that hold fresh data.
///
/// Built from a snapshot of the tables taken when iteration starts. Each
/// entry is checked when it is reached, so an entry that expires or is
/// evicted in the meantime is skipped, and entries added later are not seen.
pub struct Iter<K, V> {
    entries: std::vec::IntoIter<Arc<Entry<K, V>>>,
    clock: Arc<dyn Clock>,
    serves_expired: bool,
}

impl<K, V> Iter<K, V> {
    pub(crate) fn new(entries: Vec<Arc<Entry<K, V>>>, clock: Arc<dyn Clock>, serves_expired: bool) -> Self {
        Self {
            entries: entries.into_iter(),
            clock,
            serves_expired,
        }
    }
}

impl<K: Clone, V: Clone> Iterator for Iter<K, V> {
    type Item = CacheEntry<K, V>;

    fn next(&mut self) -> Option<Self::Item> {
        for entry in self.entries.by_ref() {
            let data = entry.lock();
            let now = self.clock.millis_since_epoch();
            if data.status.has_fresh_data(now, self.serves_expired) {
                if let Some(view) = CacheEntry::snapshot(entry.key(), &data) {
                    return Some(view);
                }
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.entries.len()))
    }
}
