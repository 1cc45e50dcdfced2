//! Eviction Policy Module
//!
//! The capability every eviction strategy implements, plus the strategies
//! shipped with the engine. A policy keeps its own structure over the arena
//! (usually a [`CyclicList`]) and is only ever called under the structure lock.

mod clock;
mod list;
mod lru;

pub use clock::{ClockMeta, ClockPolicy};
pub use list::CyclicList;
pub use lru::LruPolicy;

use crate::cache::arena::{Arena, EntryId};

/// Replacement strategy plugged into the cache engine.
///
/// The engine calls [`insert`](EvictionPolicy::insert) once per new entry and
/// [`remove`](EvictionPolicy::remove) once when the entry leaves the cache,
/// whatever the reason.
pub trait EvictionPolicy: Send + Sync + 'static {
    /// Per-entry bookkeeping stored in the arena next to the links.
    type Meta: Default + Send + Sync + 'static;

    /// Policies that record hits without the structure lock set this, which
    /// enables the lookup fast path.
    const UNSYNCHRONIZED_HITS: bool = false;

    /// Short name used in statistics.
    fn name(&self) -> &'static str;

    /// Records a lookup hit. Called under the structure lock.
    fn record_hit<K, V>(&mut self, arena: &mut Arena<K, V, Self::Meta>, id: EntryId);

    /// Links a brand-new entry into the replacement structure.
    fn insert<K, V>(&mut self, arena: &mut Arena<K, V, Self::Meta>, id: EntryId);

    /// Unlinks an entry that leaves the cache.
    fn remove<K, V>(&mut self, arena: &mut Arena<K, V, Self::Meta>, id: EntryId);

    /// Picks a low value entry without removing it.
    ///
    /// Repeated calls must make progress: if the engine could not evict the
    /// last candidate (it was pinned), the next call returns another one.
    fn find_eviction_candidate<K, V>(
        &mut self,
        arena: &mut Arena<K, V, Self::Meta>,
    ) -> Option<EntryId>;

    /// Metadata retained for a recently evicted key with this hash, if any.
    /// Returned metadata seeds the new entry instead of the default.
    fn check_for_ghost(&mut self, _hash: u64) -> Option<Self::Meta> {
        None
    }

    /// Called after `remove` when the entry left through eviction.
    fn record_eviction(&mut self, _hash: u64, _meta: &Self::Meta) {}

    /// Forgets every entry; the arena is emptied by the engine.
    fn clear(&mut self);

    /// Number of entries linked into the replacement structure.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a description of every broken internal invariant.
    fn check_integrity<K, V>(&self, arena: &Arena<K, V, Self::Meta>) -> Vec<String>;

    /// Policy specific statistics appended to the cache info.
    fn extra_statistics(&self) -> String {
        String::new()
    }
}
