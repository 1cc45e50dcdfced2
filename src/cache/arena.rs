//! Entry Arena Module
//!
//! Owns every live entry and addresses it through a stable, generation-checked
//! handle. Eviction policies link entries through handles stored here instead
//! of pointers, so a reclaimed slot can never be reached through a stale link.

use std::sync::Arc;

use crate::cache::entry::Entry;

// == Entry Id ==
/// Stable handle of an entry slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId {
    index: u32,
    generation: u32,
}

impl EntryId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> usize {
        self.index as usize
    }
}

// == Node ==
/// Arena slot contents for a live entry.
pub struct Node<K, V, M> {
    pub(crate) entry: Arc<Entry<K, V>>,
    pub(crate) prev: EntryId,
    pub(crate) next: EntryId,
    /// Policy private bookkeeping
    pub meta: M,
    /// Set until the first load or put completes
    pub(crate) virgin: bool,
}

struct Slot<K, V, M> {
    generation: u32,
    node: Option<Node<K, V, M>>,
}

// == Arena ==
/// Slot storage for entries, guarded by the structure lock.
pub struct Arena<K, V, M> {
    slots: Vec<Slot<K, V, M>>,
    free: Vec<u32>,
    len: usize,
}

impl<K, V, M> Default for Arena<K, V, M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, M> Arena<K, V, M> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Allocates a slot and builds the entry with its own handle.
    ///
    /// The new node is not linked into any list; its links point at itself.
    pub(crate) fn insert_with(
        &mut self,
        meta: M,
        make: impl FnOnce(EntryId) -> Entry<K, V>,
    ) -> Arc<Entry<K, V>> {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: None,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.generation = slot.generation.wrapping_add(1);
        let id = EntryId::new(index, slot.generation);
        let entry = Arc::new(make(id));
        slot.node = Some(Node {
            entry: Arc::clone(&entry),
            prev: id,
            next: id,
            meta,
            virgin: true,
        });
        self.len += 1;
        entry
    }

    /// Releases the slot, returning its node if the handle was live.
    pub(crate) fn remove(&mut self, id: EntryId) -> Option<Node<K, V, M>> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation || slot.node.is_none() {
            return None;
        }
        let node = slot.node.take();
        self.free.push(id.index);
        self.len -= 1;
        node
    }

    pub fn contains(&self, id: EntryId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: EntryId) -> Option<&Node<K, V, M>> {
        self.slots
            .get(id.index())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    pub fn get_mut(&mut self, id: EntryId) -> Option<&mut Node<K, V, M>> {
        self.slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    /// Node of a handle the caller knows to be live.
    ///
    /// # Panics
    /// Panics on a stale handle. The structure links an entry into the
    /// policy on creation and unlinks it before releasing its slot, so
    /// policies only ever see live handles.
    pub fn node(&self, id: EntryId) -> &Node<K, V, M> {
        match self.get(id) {
            Some(node) => node,
            None => panic!("stale entry handle {:?}: policy list out of sync with arena", id),
        }
    }

    /// Mutable variant of [`Arena::node`].
    pub fn node_mut(&mut self, id: EntryId) -> &mut Node<K, V, M> {
        match self.get_mut(id) {
            Some(node) => node,
            None => panic!("stale entry handle {:?}: policy list out of sync with arena", id),
        }
    }

    pub(crate) fn entry(&self, id: EntryId) -> Option<&Arc<Entry<K, V>>> {
        self.get(id).map(|node| &node.entry)
    }

    /// Hit count of a live entry, as recorded by lookups.
    pub fn hits(&self, id: EntryId) -> u64 {
        self.node(id).entry.hits()
    }

    /// Key hash of a live entry.
    pub fn hash(&self, id: EntryId) -> u64 {
        self.node(id).entry.hash()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Live entries that never received data.
    pub(crate) fn virgin_count(&self) -> usize {
        self.slots
            .iter()
            .filter_map(|slot| slot.node.as_ref())
            .filter(|node| node.virgin)
            .count()
    }

    /// Empties the arena, returning every node that was live.
    ///
    /// Slots and their generations are kept, so handles of drained entries
    /// stay stale after the slots are reused.
    pub(crate) fn drain(&mut self) -> Vec<Node<K, V, M>> {
        let mut nodes = Vec::with_capacity(self.len);
        self.free.clear();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(node) = slot.node.take() {
                nodes.push(node);
            }
            self.free.push(index as u32);
        }
        self.len = 0;
        nodes
    }
}
