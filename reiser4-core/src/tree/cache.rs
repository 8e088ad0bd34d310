//! In-memory tree cache (spec §4.8.1).
//!
//! Per §9.1's redesign note, the source's nodes-own-cyclic-pointers graph
//! (`parent`/`left`/`right`/`children` raw pointers chasing each other)
//! becomes an arena: every cached node lives in a `Vec` slot addressed by
//! a plain `usize`, and parent/sibling/child relationships are indices
//! into that same arena. Grounded on `examples/original_source`'s
//! `reiser4progs/libreiser4/tree.c` for the cache invariants themselves
//! (sibling chain agrees with the parent's sorted children, left/right
//! pointers are each other's inverse).

use std::collections::HashMap;

use crate::device::Blk;
use crate::key::Key;
use crate::node::Node;

pub struct CacheEntry {
    pub node: Node,
    pub parent: Option<usize>,
    pub left: Option<usize>,
    pub right: Option<usize>,
    /// Children sorted by left-delimiting key (spec §4.8.1).
    pub children: Vec<(Key, usize)>,
}

/// The node cache: an arena of [`CacheEntry`] plus a `Blk -> index` index
/// for resolving block addresses found in internal-item bodies back to a
/// cache slot.
///
/// This crate never evicts: every node opened during a session stays
/// resident for the session's lifetime. A production cache would cap
/// arena size and evict clean, unreferenced entries; the scenarios this
/// crate is built for (spec §8.4) never approach a scale where that
/// matters, so the simpler always-resident cache is what's implemented.
#[derive(Default)]
pub struct Cache {
    slots: Vec<CacheEntry>,
    by_addr: HashMap<Blk, usize>,
}

impl Cache {
    pub fn new() -> Self {
        Cache::default()
    }

    pub fn insert(&mut self, node: Node) -> usize {
        let addr = node.addr();
        let idx = self.slots.len();
        self.slots.push(CacheEntry {
            node,
            parent: None,
            left: None,
            right: None,
            children: Vec::new(),
        });
        self.by_addr.insert(addr, idx);
        idx
    }

    pub fn find_by_addr(&self, addr: Blk) -> Option<usize> {
        self.by_addr.get(&addr).copied()
    }

    pub fn get(&self, idx: usize) -> &CacheEntry {
        &self.slots[idx]
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut CacheEntry {
        &mut self.slots[idx]
    }

    pub fn node(&self, idx: usize) -> &Node {
        &self.slots[idx].node
    }

    pub fn node_mut(&mut self, idx: usize) -> &mut Node {
        &mut self.slots[idx].node
    }

    pub fn parent(&self, idx: usize) -> Option<usize> {
        self.slots[idx].parent
    }

    pub fn left(&self, idx: usize) -> Option<usize> {
        self.slots[idx].left
    }

    pub fn right(&self, idx: usize) -> Option<usize> {
        self.slots[idx].right
    }

    /// Registers `child_idx` as a child of `parent_idx` under
    /// `left_delim_key`, re-running a sorted insert into the parent's
    /// children and rewiring the sibling chain so `L.right = R` and
    /// `R.left = L` for the new neighbors (spec §4.8.1 cache invariant).
    pub fn register_child(&mut self, parent_idx: usize, child_idx: usize, left_delim_key: Key) {
        let pos = {
            let parent = &mut self.slots[parent_idx];
            let pos = parent
                .children
                .binary_search_by(|(k, _)| k.cmp(&left_delim_key))
                .unwrap_or_else(|e| e);
            parent.children.insert(pos, (left_delim_key, child_idx));
            pos
        };

        let left_sibling = if pos > 0 {
            Some(self.slots[parent_idx].children[pos - 1].1)
        } else {
            None
        };
        let right_sibling = if pos + 1 < self.slots[parent_idx].children.len() {
            Some(self.slots[parent_idx].children[pos + 1].1)
        } else {
            None
        };

        self.slots[child_idx].parent = Some(parent_idx);
        self.slots[child_idx].left = left_sibling;
        self.slots[child_idx].right = right_sibling;
        if let Some(l) = left_sibling {
            self.slots[l].right = Some(child_idx);
        }
        if let Some(r) = right_sibling {
            self.slots[r].left = Some(child_idx);
        }
    }

    /// Removes `child_idx` from its parent's children and splices the
    /// sibling chain back together.
    pub fn unregister_child(&mut self, parent_idx: usize, child_idx: usize) {
        self.slots[parent_idx].children.retain(|(_, i)| *i != child_idx);
        let left = self.slots[child_idx].left;
        let right = self.slots[child_idx].right;
        if let Some(l) = left {
            self.slots[l].right = right;
        }
        if let Some(r) = right {
            self.slots[r].left = left;
        }
        self.slots[child_idx].parent = None;
        self.slots[child_idx].left = None;
        self.slots[child_idx].right = None;
    }

    pub fn children_of(&self, parent_idx: usize) -> &[(Key, usize)] {
        &self.slots[parent_idx].children
    }

    pub fn all_dirty(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, e)| e.node.as_v40().block().is_dirty())
            .map(|(i, _)| i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Block;
    use crate::key::KeyType;
    use crate::node::LEAF_LEVEL;

    fn leaf(addr: Blk) -> Node {
        Node::create(Block::zeroed(addr, 4096), LEAF_LEVEL)
    }

    #[test]
    fn register_child_sorts_and_wires_siblings() {
        let mut cache = Cache::new();
        let parent = cache.insert(leaf(0));
        let a = cache.insert(leaf(1));
        let b = cache.insert(leaf(2));
        let c = cache.insert(leaf(3));

        let ka = Key::build_generic(KeyType::StatData, 0, 1, 0);
        let kb = Key::build_generic(KeyType::StatData, 0, 2, 0);
        let kc = Key::build_generic(KeyType::StatData, 0, 3, 0);

        cache.register_child(parent, b, kb);
        cache.register_child(parent, a, ka);
        cache.register_child(parent, c, kc);

        assert_eq!(cache.children_of(parent).len(), 3);
        assert_eq!(cache.left(b), Some(a));
        assert_eq!(cache.right(b), Some(c));
        assert_eq!(cache.right(a), Some(b));
        assert_eq!(cache.left(c), Some(b));
        assert_eq!(cache.parent(a), Some(parent));
    }

    #[test]
    fn unregister_child_splices_siblings_together() {
        let mut cache = Cache::new();
        let parent = cache.insert(leaf(0));
        let a = cache.insert(leaf(1));
        let b = cache.insert(leaf(2));
        let c = cache.insert(leaf(3));
        let ka = Key::build_generic(KeyType::StatData, 0, 1, 0);
        let kb = Key::build_generic(KeyType::StatData, 0, 2, 0);
        let kc = Key::build_generic(KeyType::StatData, 0, 3, 0);
        cache.register_child(parent, a, ka);
        cache.register_child(parent, b, kb);
        cache.register_child(parent, c, kc);

        cache.unregister_child(parent, b);
        assert_eq!(cache.right(a), Some(c));
        assert_eq!(cache.left(c), Some(a));
        assert_eq!(cache.children_of(parent).len(), 2);
    }
}
