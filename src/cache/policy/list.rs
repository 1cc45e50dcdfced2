//! Cyclic List Module
//!
//! Circular doubly linked lists threaded through the arena's link fields.
//! These are the building blocks the LRU and clock policies compose.

use crate::cache::arena::{Arena, EntryId};

// == Cyclic List ==
/// A circular list addressed by a single head handle; `None` means empty.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CyclicList {
    head: Option<EntryId>,
    len: usize,
}

impl CyclicList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn head(&self) -> Option<EntryId> {
        self.head
    }

    /// Makes `id` the head without changing the cyclic order.
    ///
    /// Used by clock hands to advance.
    pub fn set_head(&mut self, id: Option<EntryId>) {
        self.head = id;
    }

    /// The element before the head, i.e. the tail.
    pub fn tail<K, V, M>(&self, arena: &Arena<K, V, M>) -> Option<EntryId> {
        self.head.map(|head| arena.node(head).prev)
    }

    pub fn next<K, V, M>(arena: &Arena<K, V, M>, id: EntryId) -> EntryId {
        arena.node(id).next
    }

    pub fn prev<K, V, M>(arena: &Arena<K, V, M>, id: EntryId) -> EntryId {
        arena.node(id).prev
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Inserts `id` in front of the head and makes it the new head.
    pub fn insert_head<K, V, M>(&mut self, arena: &mut Arena<K, V, M>, id: EntryId) {
        match self.head {
            None => self.first(arena, id),
            Some(head) => {
                link_before(arena, head, id);
                self.head = Some(id);
                self.len += 1;
            }
        }
    }

    /// Inserts `id` right after the head: X into A B C yields A X B C.
    pub fn insert_after_head<K, V, M>(&mut self, arena: &mut Arena<K, V, M>, id: EntryId) {
        match self.head {
            None => self.first(arena, id),
            Some(head) => {
                let after = arena.node(head).next;
                link_before(arena, after, id);
                self.len += 1;
            }
        }
    }

    /// Inserts `id` behind the tail; the head stays where it is.
    pub fn insert_tail<K, V, M>(&mut self, arena: &mut Arena<K, V, M>, id: EntryId) {
        match self.head {
            None => self.first(arena, id),
            Some(head) => {
                link_before(arena, head, id);
                self.len += 1;
            }
        }
    }

    /// Unlinks `id`. Removing the head moves the head to the next element,
    /// or empties the list if `id` was the only element.
    pub fn remove<K, V, M>(&mut self, arena: &mut Arena<K, V, M>, id: EntryId) {
        let (prev, next) = {
            let node = arena.node(id);
            (node.prev, node.next)
        };
        if next == id {
            self.head = None;
        } else {
            arena.node_mut(prev).next = next;
            arena.node_mut(next).prev = prev;
            if self.head == Some(id) {
                self.head = Some(next);
            }
        }
        let node = arena.node_mut(id);
        node.prev = id;
        node.next = id;
        self.len -= 1;
    }

    /// Moves `id` to the head position.
    pub fn move_to_head<K, V, M>(&mut self, arena: &mut Arena<K, V, M>, id: EntryId) {
        if self.head == Some(id) {
            return;
        }
        self.remove(arena, id);
        self.insert_head(arena, id);
    }

    /// Counts elements by walking the ring; `None` if the ring is broken.
    pub fn count<K, V, M>(&self, arena: &Arena<K, V, M>) -> Option<usize> {
        let head = match self.head {
            Some(head) => head,
            None => return Some(0),
        };
        let mut count = 0;
        let mut cursor = head;
        loop {
            count += 1;
            cursor = arena.get(cursor)?.next;
            if cursor == head {
                return Some(count);
            }
            if count > arena.len() {
                return None;
            }
        }
    }

    /// Verifies that every `next.prev` points back and the ring closes.
    pub fn check_integrity<K, V, M>(&self, arena: &Arena<K, V, M>) -> bool {
        let head = match self.head {
            Some(head) => head,
            None => return self.len == 0,
        };
        let mut cursor = head;
        let mut seen = 0;
        loop {
            let next = match arena.get(cursor) {
                Some(node) => node.next,
                None => return false,
            };
            match arena.get(next) {
                Some(node) if node.prev == cursor => {}
                _ => return false,
            }
            seen += 1;
            cursor = next;
            if cursor == head {
                return seen == self.len;
            }
            if seen > arena.len() {
                return false;
            }
        }
    }

    fn first<K, V, M>(&mut self, arena: &mut Arena<K, V, M>, id: EntryId) {
        let node = arena.node_mut(id);
        node.prev = id;
        node.next = id;
        self.head = Some(id);
        self.len = 1;
    }
}

/// Links `id` directly before `at`.
fn link_before<K, V, M>(arena: &mut Arena<K, V, M>, at: EntryId, id: EntryId) {
    let prev = arena.node(at).prev;
    {
        let node = arena.node_mut(id);
        node.prev = prev;
        node.next = at;
    }
    arena.node_mut(prev).next = id;
    arena.node_mut(at).prev = id;
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::Entry;

    fn setup(n: u32) -> (Arena<u32, u32, ()>, Vec<EntryId>) {
        let mut arena = Arena::new();
        let ids = (0..n)
            .map(|key| {
                arena
                    .insert_with((), |id| Entry::new(key, key as u64, id))
                    .id()
            })
            .collect();
        (arena, ids)
    }

    fn order(list: &CyclicList, arena: &Arena<u32, u32, ()>) -> Vec<u32> {
        let mut out = Vec::new();
        if let Some(head) = list.head() {
            let mut cursor = head;
            loop {
                out.push(*arena.node(cursor).entry.key());
                cursor = CyclicList::next(arena, cursor);
                if cursor == head {
                    break;
                }
            }
        }
        out
    }

    #[test]
    fn test_insert_head_order() {
        let (mut arena, ids) = setup(3);
        let mut list = CyclicList::new();
        for id in &ids {
            list.insert_head(&mut arena, *id);
        }
        assert_eq!(order(&list, &arena), vec![2, 1, 0]);
        assert_eq!(list.tail(&arena), Some(ids[0]));
        assert!(list.check_integrity(&arena));
    }

    #[test]
    fn test_insert_tail_keeps_head() {
        let (mut arena, ids) = setup(3);
        let mut list = CyclicList::new();
        for id in &ids {
            list.insert_tail(&mut arena, *id);
        }
        assert_eq!(order(&list, &arena), vec![0, 1, 2]);
        assert_eq!(list.count(&arena), Some(3));
    }

    #[test]
    fn test_insert_after_head() {
        let (mut arena, ids) = setup(4);
        let mut list = CyclicList::new();
        list.insert_tail(&mut arena, ids[0]);
        list.insert_tail(&mut arena, ids[1]);
        list.insert_tail(&mut arena, ids[2]);
        list.insert_after_head(&mut arena, ids[3]);
        assert_eq!(order(&list, &arena), vec![0, 3, 1, 2]);
        assert!(list.check_integrity(&arena));
    }

    #[test]
    fn test_remove_head_moves_head_forward() {
        let (mut arena, ids) = setup(3);
        let mut list = CyclicList::new();
        for id in &ids {
            list.insert_tail(&mut arena, *id);
        }
        list.remove(&mut arena, ids[0]);
        assert_eq!(list.head(), Some(ids[1]));
        assert_eq!(order(&list, &arena), vec![1, 2]);
        assert_eq!(list.len(), 2);
        assert!(list.check_integrity(&arena));
    }

    #[test]
    fn test_remove_last_element_empties_list() {
        let (mut arena, ids) = setup(1);
        let mut list = CyclicList::new();
        list.insert_head(&mut arena, ids[0]);
        list.remove(&mut arena, ids[0]);
        assert!(list.is_empty());
        assert_eq!(list.count(&arena), Some(0));
        assert!(list.check_integrity(&arena));
    }

    #[test]
    fn test_move_to_head() {
        let (mut arena, ids) = setup(3);
        let mut list = CyclicList::new();
        for id in &ids {
            list.insert_tail(&mut arena, *id);
        }
        list.move_to_head(&mut arena, ids[2]);
        assert_eq!(order(&list, &arena), vec![2, 0, 1]);
        assert_eq!(list.len(), 3);
    }
}
