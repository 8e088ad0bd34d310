//! Balanced tree engine (spec §4.8), grounded on `examples/original_source`'s
//! `reiser4progs/libreiser4/tree.c` / `librepair/node.c` for the lookup,
//! insert-with-split and neighbor-walk algorithms, generalized over the
//! §9.1 arena cache in [`cache`].
//!
//! Per §9.4 the device and block allocator are never stored as fields of
//! [`Tree`] (no globals, no captured `&mut` borrows living across calls) —
//! every mutating method takes an explicit [`TreeEnv`] bundling the two,
//! matching the context-struct redesign the rest of the crate follows.

pub mod cache;
pub mod cursor;

use crate::alloc::Bitmap;
use crate::device::{Block, Blk, Device};
use crate::error::CoreError;
use crate::item::internal40::{self, Internal40};
use crate::item::{InternalItemOps, ItemKind};
use crate::key::Key;
use crate::node::{node40, Coord, ItemHint, ItemPos, Level, Node, ShiftDirection, LEAF_LEVEL};

use cache::Cache;

/// Bundles everything a [`Tree`] method needs to touch outside its own
/// cache (spec §9.4's explicit-context redesign).
pub struct TreeEnv<'a> {
    pub device: &'a mut dyn Device,
    pub bitmap: &'a mut Bitmap,
}

#[derive(Debug, Clone, Copy)]
pub struct TreeLookup {
    pub coord: Coord,
    pub found: bool,
}

pub struct Tree {
    cache: Cache,
    root: usize,
    height: Level,
    block_size: u32,
}

impl Tree {
    pub fn create(env: &mut TreeEnv, block_size: u32) -> Result<Self, CoreError> {
        let addr = env.bitmap.allocate(0)?;
        let block = Block::zeroed(addr, block_size);
        let node = Node::create(block, LEAF_LEVEL);
        let mut cache = Cache::new();
        let root = cache.insert(node);
        Ok(Tree { cache, root, height: LEAF_LEVEL, block_size })
    }

    pub fn open(env: &mut TreeEnv, block_size: u32, root_addr: Blk) -> Result<Self, CoreError> {
        let block = Block::read(env.device, root_addr)?;
        let node = Node::open(block)?;
        let height = node.level();
        let mut cache = Cache::new();
        let root = cache.insert(node);
        Ok(Tree { cache, root, height, block_size })
    }

    pub fn root_addr(&self) -> Blk {
        self.cache.node(self.root).addr()
    }

    pub fn height(&self) -> Level {
        self.height
    }

    fn descend(
        &mut self,
        env: &mut TreeEnv,
        parent_idx: usize,
        pos: usize,
    ) -> Result<usize, CoreError> {
        let (key, child_addr) = {
            let node = self.cache.node(parent_idx).as_v40();
            let key = node.get_key(pos)?;
            let body = node.item(pos)?.body.to_vec();
            (key, Internal40.target(&body)?)
        };
        if let Some(idx) = self.cache.find_by_addr(child_addr) {
            return Ok(idx);
        }
        let block = Block::read(env.device, child_addr)?;
        let node = Node::open(block)?;
        let idx = self.cache.insert(node);
        self.cache.register_child(parent_idx, idx, key);
        Ok(idx)
    }

    /// `lookup(stop_level, key)` (spec §4.8.2).
    pub fn lookup(
        &mut self,
        env: &mut TreeEnv,
        stop_level: Level,
        key: &Key,
    ) -> Result<TreeLookup, CoreError> {
        let mut cur = self.root;
        loop {
            let level = self.cache.node(cur).level();
            let lr = self.cache.node(cur).as_v40().lookup(key);
            if level == stop_level {
                return Ok(TreeLookup {
                    coord: Coord::new(self.cache.node(cur).addr(), ItemPos::Item(lr.pos)),
                    found: lr.found,
                });
            }

            let count = self.cache.node(cur).count();
            if count == 0 {
                return Err(CoreError::Corrupted {
                    reason: "internal node has no children to descend into",
                });
            }
            let mut pos = lr.pos;
            if !lr.found && pos > 0 {
                pos -= 1;
            }
            if pos >= count {
                pos = count - 1;
            }
            cur = self.descend(env, cur, pos)?;
        }
    }

    /// `insert(item_hint) -> coord` (spec §4.8.3).
    pub fn insert(&mut self, env: &mut TreeEnv, hint: ItemHint) -> Result<Coord, CoreError> {
        let lookup = self.lookup(env, LEAF_LEVEL, &hint.key)?;
        if lookup.found {
            return Err(CoreError::DuplicateKey);
        }
        let leaf_idx = self
            .cache
            .find_by_addr(lookup.coord.node)
            .expect("lookup always resolves to a cached node");
        let pos = lookup.coord.pos.item_index();

        let needed = hint.body.len() + node40::ITEM_HEADER_SIZE;
        if needed <= self.cache.node(leaf_idx).free_space() {
            self.cache.node_mut(leaf_idx).as_v40_mut().insert(pos, hint)?;
            return Ok(Coord::new(self.cache.node(leaf_idx).addr(), ItemPos::Item(pos)));
        }

        let new_addr = env.bitmap.allocate(0)?;
        let new_block = Block::zeroed(new_addr, self.block_size);
        let mut new_node = Node::create(new_block, LEAF_LEVEL);
        new_node.as_v40_mut().insert(0, hint.clone())?;
        let new_idx = self.cache.insert(new_node);
        let new_key = hint.key;

        self.insert_into_parent(env, leaf_idx, new_idx, new_key)?;
        Ok(Coord::new(new_addr, ItemPos::Item(0)))
    }

    /// Inserts an internal pointer to `new_node_idx` (left-delimited by
    /// `new_key`) as a sibling of `sibling_idx`, splitting `sibling_idx`'s
    /// parent and recursing upward if it doesn't fit, or growing the tree
    /// by one level if `sibling_idx` was the root (spec §4.8.3 step 3).
    fn insert_into_parent(
        &mut self,
        env: &mut TreeEnv,
        sibling_idx: usize,
        new_node_idx: usize,
        new_key: Key,
    ) -> Result<(), CoreError> {
        let Some(parent_idx) = self.cache.parent(sibling_idx) else {
            return self.grow_root(env, sibling_idx, new_node_idx, new_key);
        };

        let pos = self.cache.node(parent_idx).as_v40().lookup(&new_key).pos;
        let body = internal40::create(self.cache.node(new_node_idx).addr());
        let hint = ItemHint { key: new_key, plugin_id: ItemKind::Internal.plugin_id(), body };
        let needed = hint.body.len() + node40::ITEM_HEADER_SIZE;

        if needed <= self.cache.node(parent_idx).free_space() {
            self.cache.node_mut(parent_idx).as_v40_mut().insert(pos, hint)?;
            self.cache.register_child(parent_idx, new_node_idx, new_key);
            return Ok(());
        }

        let new_parent_addr = env.bitmap.allocate(0)?;
        let new_parent_block = Block::zeroed(new_parent_addr, self.block_size);
        let level = self.cache.node(parent_idx).level();
        let mut new_parent_node = Node::create(new_parent_block, level);
        let count = self.cache.node(parent_idx).count();
        self.cache.node_mut(parent_idx).as_v40_mut().shift(
            new_parent_node.as_v40_mut(),
            count / 2,
            ShiftDirection::ToRight,
        )?;
        let new_parent_idx = self.cache.insert(new_parent_node);
        self.rewire_children_after_split(parent_idx, new_parent_idx);

        let split_key = self.cache.node(new_parent_idx).as_v40().get_key(0)?;
        let (target_idx, target_pos) = if new_key < split_key {
            let pos = self.cache.node(parent_idx).as_v40().lookup(&new_key).pos;
            (parent_idx, pos)
        } else {
            let pos = self.cache.node(new_parent_idx).as_v40().lookup(&new_key).pos;
            (new_parent_idx, pos)
        };
        self.cache.node_mut(target_idx).as_v40_mut().insert(target_pos, hint)?;
        self.cache.register_child(target_idx, new_node_idx, new_key);

        let new_parent_key = self.cache.node(new_parent_idx).as_v40().get_key(0)?;
        self.insert_into_parent(env, parent_idx, new_parent_idx, new_parent_key)
    }

    fn grow_root(
        &mut self,
        env: &mut TreeEnv,
        old_root_idx: usize,
        new_node_idx: usize,
        new_key: Key,
    ) -> Result<(), CoreError> {
        let old_root_level = self.cache.node(old_root_idx).level();
        let old_root_key = self
            .cache
            .node(old_root_idx)
            .as_v40()
            .get_key(0)
            .unwrap_or(Key::MIN);

        let new_root_addr = env.bitmap.allocate(0)?;
        let new_root_block = Block::zeroed(new_root_addr, self.block_size);
        let mut new_root_node = Node::create(new_root_block, old_root_level + 1);

        let body0 = internal40::create(self.cache.node(old_root_idx).addr());
        new_root_node.as_v40_mut().insert(
            0,
            ItemHint { key: old_root_key, plugin_id: ItemKind::Internal.plugin_id(), body: body0 },
        )?;
        let body1 = internal40::create(self.cache.node(new_node_idx).addr());
        new_root_node.as_v40_mut().insert(
            1,
            ItemHint { key: new_key, plugin_id: ItemKind::Internal.plugin_id(), body: body1 },
        )?;

        let new_root_idx = self.cache.insert(new_root_node);
        self.cache.register_child(new_root_idx, old_root_idx, old_root_key);
        self.cache.register_child(new_root_idx, new_node_idx, new_key);

        self.root = new_root_idx;
        self.height = old_root_level + 1;
        Ok(())
    }

    /// After shifting a run of internal items from `old_parent` into
    /// `new_parent`, re-homes every child those items point at.
    fn rewire_children_after_split(&mut self, old_parent: usize, new_parent: usize) {
        let count = self.cache.node(new_parent).count();
        let mut moves = Vec::new();
        for pos in 0..count {
            let node = self.cache.node(new_parent).as_v40();
            let Ok(item) = node.item(pos) else { continue };
            let Ok(child_addr) = Internal40.target(item.body) else { continue };
            if let Some(child_idx) = self.cache.find_by_addr(child_addr) {
                let key = node.get_key(pos).unwrap();
                moves.push((child_idx, key));
            }
        }
        for (child_idx, key) in moves {
            self.cache.unregister_child(old_parent, child_idx);
            self.cache.register_child(new_parent, child_idx, key);
        }
    }

    /// `remove(key)` (spec §4.8.4).
    pub fn remove(&mut self, env: &mut TreeEnv, key: &Key) -> Result<(), CoreError> {
        let lookup = self.lookup(env, LEAF_LEVEL, key)?;
        if !lookup.found {
            return Err(CoreError::NotFound);
        }
        let leaf_idx = self
            .cache
            .find_by_addr(lookup.coord.node)
            .expect("lookup always resolves to a cached node");
        let pos = lookup.coord.pos.item_index();
        self.cache.node_mut(leaf_idx).as_v40_mut().remove(pos)?;

        if self.cache.node(leaf_idx).count() == 0 {
            if let Some(parent_idx) = self.cache.parent(leaf_idx) {
                self.remove_internal_pointer(env, parent_idx, leaf_idx)?;
            }
        }
        Ok(())
    }

    fn remove_internal_pointer(
        &mut self,
        env: &mut TreeEnv,
        parent_idx: usize,
        child_idx: usize,
    ) -> Result<(), CoreError> {
        let child_addr = self.cache.node(child_idx).addr();
        let count = self.cache.node(parent_idx).count();
        let mut found_pos = None;
        for pos in 0..count {
            let node = self.cache.node(parent_idx).as_v40();
            let item = node.item(pos)?;
            if Internal40.target(item.body)? == child_addr {
                found_pos = Some(pos);
                break;
            }
        }
        let Some(pos) = found_pos else { return Ok(()) };

        self.cache.node_mut(parent_idx).as_v40_mut().remove(pos)?;
        self.cache.unregister_child(parent_idx, child_idx);
        env.bitmap.release(child_addr)?;

        if self.cache.node(parent_idx).count() == 0 {
            if let Some(grandparent) = self.cache.parent(parent_idx) {
                self.remove_internal_pointer(env, grandparent, parent_idx)?;
            }
        }
        Ok(())
    }

    /// `sync` (spec §4.8.5): flushes every dirty cached node.
    pub fn sync(&mut self, env: &mut TreeEnv) -> Result<(), CoreError> {
        let dirty: Vec<usize> = self.cache.all_dirty().collect();
        for idx in dirty {
            self.cache.node_mut(idx).as_v40_mut().sync(env.device)?;
        }
        Ok(())
    }

    /// `left_neighbor(coord)` (spec §4.8.6).
    pub fn left_neighbor(
        &mut self,
        env: &mut TreeEnv,
        coord: &Coord,
    ) -> Result<Option<Coord>, CoreError> {
        let idx = self.cache.find_by_addr(coord.node).ok_or(CoreError::NotFound)?;
        if let ItemPos::Item(p) = coord.pos {
            if p > 0 {
                return Ok(Some(Coord::new(coord.node, ItemPos::Item(p - 1))));
            }
        }

        let target_level = self.cache.node(idx).level();
        let mut cur = idx;
        loop {
            if let Some(left) = self.cache.left(cur) {
                let mut node_idx = left;
                while self.cache.node(node_idx).level() != target_level {
                    let count = self.cache.node(node_idx).count();
                    if count == 0 {
                        break;
                    }
                    node_idx = self.descend(env, node_idx, count - 1)?;
                }
                let last_pos = self.cache.node(node_idx).count().saturating_sub(1);
                return Ok(Some(Coord::new(self.cache.node(node_idx).addr(), ItemPos::Item(last_pos))));
            }
            match self.cache.parent(cur) {
                Some(p) => cur = p,
                None => return Ok(None),
            }
        }
    }

    /// `right_neighbor(coord)` (spec §4.8.6).
    pub fn right_neighbor(
        &mut self,
        env: &mut TreeEnv,
        coord: &Coord,
    ) -> Result<Option<Coord>, CoreError> {
        let idx = self.cache.find_by_addr(coord.node).ok_or(CoreError::NotFound)?;
        if let ItemPos::Item(p) = coord.pos {
            let count = self.cache.node(idx).count();
            if p + 1 < count {
                return Ok(Some(Coord::new(coord.node, ItemPos::Item(p + 1))));
            }
        }

        let target_level = self.cache.node(idx).level();
        let mut cur = idx;
        loop {
            if let Some(right) = self.cache.right(cur) {
                let mut node_idx = right;
                while self.cache.node(node_idx).level() != target_level {
                    let count = self.cache.node(node_idx).count();
                    if count == 0 {
                        break;
                    }
                    node_idx = self.descend(env, node_idx, 0)?;
                }
                return Ok(Some(Coord::new(self.cache.node(node_idx).addr(), ItemPos::Item(0))));
            }
            match self.cache.parent(cur) {
                Some(p) => cur = p,
                None => return Ok(None),
            }
        }
    }

    pub fn item_plugin_id_at(&self, coord: &Coord) -> Result<u16, CoreError> {
        let idx = self.cache.find_by_addr(coord.node).ok_or(CoreError::NotFound)?;
        self.cache.node(idx).as_v40().plugin_id_at(coord.pos.item_index())
    }

    pub fn item_body_at(&self, coord: &Coord) -> Result<&[u8], CoreError> {
        let idx = self.cache.find_by_addr(coord.node).ok_or(CoreError::NotFound)?;
        Ok(self.cache.node(idx).as_v40().item(coord.pos.item_index())?.body)
    }

    pub fn key_at(&self, coord: &Coord) -> Result<Key, CoreError> {
        let idx = self.cache.find_by_addr(coord.node).ok_or(CoreError::NotFound)?;
        self.cache.node(idx).as_v40().get_key(coord.pos.item_index())
    }

    pub fn node_at(&self, addr: Blk) -> Option<&Node> {
        self.cache.find_by_addr(addr).map(|idx| self.cache.node(idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::Bitmap;
    use crate::device::MemDevice;
    use crate::item::statdata40::{self, StatDataHint};
    use crate::key::KeyType;

    fn make_env<'a>(device: &'a mut MemDevice, bitmap: &'a mut Bitmap) -> TreeEnv<'a> {
        TreeEnv { device, bitmap }
    }

    fn sd_hint(objectid: u64) -> ItemHint {
        ItemHint {
            key: Key::build_generic(KeyType::StatData, 42, objectid, 0),
            plugin_id: ItemKind::StatData.plugin_id(),
            body: statdata40::create(&StatDataHint { mode: 0o100644, nlink: 1, size: 0, unix_ext: None }),
        }
    }

    #[test]
    fn create_then_lookup_missing_key() {
        let mut device = MemDevice::new(4096, 256);
        let mut bitmap = Bitmap::new(256);
        let mut env = make_env(&mut device, &mut bitmap);
        let mut tree = Tree::create(&mut env, 4096).unwrap();

        let key = Key::build_generic(KeyType::StatData, 42, 1, 0);
        let lookup = tree.lookup(&mut env, LEAF_LEVEL, &key).unwrap();
        assert!(!lookup.found);
    }

    #[test]
    fn insert_then_lookup_round_trips() {
        let mut device = MemDevice::new(4096, 256);
        let mut bitmap = Bitmap::new(256);
        let mut env = make_env(&mut device, &mut bitmap);
        let mut tree = Tree::create(&mut env, 4096).unwrap();

        let hint = sd_hint(1);
        let key = hint.key;
        tree.insert(&mut env, hint).unwrap();

        let lookup = tree.lookup(&mut env, LEAF_LEVEL, &key).unwrap();
        assert!(lookup.found);
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let mut device = MemDevice::new(4096, 256);
        let mut bitmap = Bitmap::new(256);
        let mut env = make_env(&mut device, &mut bitmap);
        let mut tree = Tree::create(&mut env, 4096).unwrap();

        tree.insert(&mut env, sd_hint(1)).unwrap();
        let err = tree.insert(&mut env, sd_hint(1)).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateKey));
    }

    #[test]
    fn many_inserts_grow_tree_height() {
        let mut device = MemDevice::new(4096, 8192);
        let mut bitmap = Bitmap::new(8192);
        let mut env = make_env(&mut device, &mut bitmap);
        let mut tree = Tree::create(&mut env, 4096).unwrap();

        for oid in 1..2000u64 {
            tree.insert(&mut env, sd_hint(oid)).unwrap();
        }
        assert!(tree.height() > LEAF_LEVEL);

        for oid in [1u64, 999, 1999] {
            let key = Key::build_generic(KeyType::StatData, 42, oid, 0);
            let lookup = tree.lookup(&mut env, LEAF_LEVEL, &key).unwrap();
            assert!(lookup.found, "oid {oid} should be found");
        }
    }

    #[test]
    fn remove_then_lookup_reports_missing() {
        let mut device = MemDevice::new(4096, 256);
        let mut bitmap = Bitmap::new(256);
        let mut env = make_env(&mut device, &mut bitmap);
        let mut tree = Tree::create(&mut env, 4096).unwrap();

        let hint = sd_hint(1);
        let key = hint.key;
        tree.insert(&mut env, hint).unwrap();
        tree.remove(&mut env, &key).unwrap();

        let lookup = tree.lookup(&mut env, LEAF_LEVEL, &key).unwrap();
        assert!(!lookup.found);
    }

    #[test]
    fn neighbors_resolve_across_leaves() {
        let mut device = MemDevice::new(4096, 8192);
        let mut bitmap = Bitmap::new(8192);
        let mut env = make_env(&mut device, &mut bitmap);
        let mut tree = Tree::create(&mut env, 4096).unwrap();

        for oid in 1..500u64 {
            tree.insert(&mut env, sd_hint(oid)).unwrap();
        }

        let key = Key::build_generic(KeyType::StatData, 42, 1, 0);
        let lookup = tree.lookup(&mut env, LEAF_LEVEL, &key).unwrap();
        assert!(lookup.found);
        let right = tree.right_neighbor(&mut env, &lookup.coord).unwrap();
        assert!(right.is_some());
    }
}
