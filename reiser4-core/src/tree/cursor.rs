//! Leaf-level cursor (spec §4.8.6 / §9.5).
//!
//! Per the §9.5 redesign note the source's callback-driven traversal
//! (`reiser4progs/libreiser4/tree.c`'s `reiser4_tree_scan` taking a function
//! pointer invoked per item) becomes an explicit, pull-based `Iterator`: the
//! caller drives `next()`/`next_back()` itself instead of handing control to
//! the tree via a closure.

use crate::error::CoreError;
use crate::key::Key;
use crate::node::Coord;

use super::{Tree, TreeEnv};

/// Walks leaf-level items from a starting key, in key order, one
/// `left_neighbor`/`right_neighbor` step at a time.
pub struct Cursor<'t> {
    tree: &'t mut Tree,
    front: Option<Coord>,
    back: Option<Coord>,
    exhausted: bool,
}

impl<'t> Cursor<'t> {
    /// Positions a cursor at the first leaf item whose key is `>= from`, or
    /// an exhausted cursor if no such item exists.
    pub fn seek(tree: &'t mut Tree, env: &mut TreeEnv, from: &Key) -> Result<Self, CoreError> {
        let lookup = tree.lookup(env, crate::node::LEAF_LEVEL, from)?;
        let start = if lookup.found {
            Some(lookup.coord)
        } else {
            Self::advance_from_insertion_point(tree, env, &lookup.coord)?
        };
        Ok(Cursor {
            exhausted: start.is_none(),
            front: start,
            back: start,
            tree,
        })
    }

    /// An unsuccessful lookup's coord points at an insertion slot that may
    /// be one past the node's last item; walk right until a real item (or
    /// the end of the tree) is found.
    fn advance_from_insertion_point(
        tree: &mut Tree,
        env: &mut TreeEnv,
        coord: &Coord,
    ) -> Result<Option<Coord>, CoreError> {
        let count = match tree.node_at(coord.node) {
            Some(node) => node.count(),
            None => return Ok(None),
        };
        let pos = coord.pos.item_index();
        if pos < count {
            return Ok(Some(*coord));
        }
        tree.right_neighbor(env, coord)
    }

    pub fn current(&self) -> Option<Coord> {
        if self.exhausted {
            None
        } else {
            self.front
        }
    }

    pub fn key(&self) -> Result<Option<Key>, CoreError> {
        match self.current() {
            Some(coord) => Ok(Some(self.tree.key_at(&coord)?)),
            None => Ok(None),
        }
    }

    pub fn item_body(&self) -> Result<Option<&[u8]>, CoreError> {
        match self.current() {
            Some(coord) => Ok(Some(self.tree.item_body_at(&coord)?)),
            None => Ok(None),
        }
    }

    /// Advances to the next leaf item, returning the coord just left
    /// behind (matches `Iterator::next`'s "return current, then advance"
    /// shape without requiring `Tree: Clone`).
    pub fn advance(&mut self, env: &mut TreeEnv) -> Result<Option<Coord>, CoreError> {
        if self.exhausted {
            return Ok(None);
        }
        let current = self.front.expect("non-exhausted cursor always has a front coord");
        if self.front == self.back {
            match self.tree.right_neighbor(env, &current)? {
                Some(next) => {
                    self.front = Some(next);
                    self.back = Some(next);
                }
                None => self.exhausted = true,
            }
        } else {
            match self.tree.right_neighbor(env, &current)? {
                Some(next) => self.front = Some(next),
                None => self.exhausted = true,
            }
        }
        Ok(Some(current))
    }

    /// Steps back from the tail end; pairs with [`Cursor::advance`] for
    /// double-ended traversal within a single open range.
    pub fn retreat(&mut self, env: &mut TreeEnv) -> Result<Option<Coord>, CoreError> {
        if self.exhausted {
            return Ok(None);
        }
        let current = self.back.expect("non-exhausted cursor always has a back coord");
        if self.front == self.back {
            match self.tree.left_neighbor(env, &current)? {
                Some(prev) => {
                    self.front = Some(prev);
                    self.back = Some(prev);
                }
                None => self.exhausted = true,
            }
        } else {
            match self.tree.left_neighbor(env, &current)? {
                Some(prev) => self.back = Some(prev),
                None => self.exhausted = true,
            }
        }
        Ok(Some(current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::Bitmap;
    use crate::device::MemDevice;
    use crate::item::statdata40::{self, StatDataHint};
    use crate::item::ItemKind;
    use crate::key::KeyType;
    use crate::node::{ItemHint, LEAF_LEVEL};

    fn sd_hint(objectid: u64) -> ItemHint {
        ItemHint {
            key: Key::build_generic(KeyType::StatData, 42, objectid, 0),
            plugin_id: ItemKind::StatData.plugin_id(),
            body: statdata40::create(&StatDataHint { mode: 0o100644, nlink: 1, size: 0, unix_ext: None }),
        }
    }

    #[test]
    fn cursor_walks_keys_in_order() {
        let mut device = MemDevice::new(4096, 4096);
        let mut bitmap = Bitmap::new(4096);
        let mut env = TreeEnv { device: &mut device, bitmap: &mut bitmap };
        let mut tree = Tree::create(&mut env, 4096).unwrap();

        for oid in [5u64, 1, 3, 2, 4] {
            tree.insert(&mut env, sd_hint(oid)).unwrap();
        }

        let mut coords = Vec::new();
        {
            let mut cursor = Cursor::seek(&mut tree, &mut env, &Key::MIN).unwrap();
            while let Some(coord) = cursor.advance(&mut env).unwrap() {
                coords.push(coord);
            }
        }
        let seen: Vec<u64> = coords.iter().map(|c| tree.key_at(c).unwrap().objectid()).collect();
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn seek_past_every_key_is_immediately_exhausted() {
        let mut device = MemDevice::new(4096, 256);
        let mut bitmap = Bitmap::new(256);
        let mut env = TreeEnv { device: &mut device, bitmap: &mut bitmap };
        let mut tree = Tree::create(&mut env, 4096).unwrap();
        tree.insert(&mut env, sd_hint(1)).unwrap();

        let mut cursor = Cursor::seek(&mut tree, &mut env, &Key::MAX).unwrap();
        assert_eq!(cursor.advance(&mut env).unwrap(), None);
    }
}
