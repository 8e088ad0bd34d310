//! Regular-file object (spec §4.11), grounded on the teacher's
//! `drivers/fs/ext2/{read,write,create_file,delete}.rs` for the
//! open/read/write/truncate shape.
//!
//! Body storage is tail-only: each [`RegularFile::write`] call lays down
//! one [`crate::item::tail40`] item at the file's current offset and
//! advances past it, so one write call is one item and one read call
//! returns at most one item's worth of bytes — the tree engine's `insert`
//! only ever targets the leaf level (spec §4.8.3), so the twig-level
//! extent format [`crate::item::extent40`] implements has no path to land
//! in this tree; every file here is, in effect, always-tail.

use crate::error::CoreError;
use crate::item::tail40;
use crate::item::{statdata40, ItemKind};
use crate::key::{Key, KeyType};
use crate::node::LEAF_LEVEL;
use crate::plugin::CoreOps;

use super::{build_statdata, ObjectHint, ObjectOps, S_IFREG};

#[derive(Debug, Clone, Copy)]
pub struct RegularFile {
    parent_locality: u64,
    objectid: u64,
    offset: u64,
}

impl RegularFile {
    fn statdata_key(&self) -> Key {
        Key::build_generic(KeyType::StatData, self.parent_locality, self.objectid, 0)
    }

    fn body_key(&self, offset: u64) -> Key {
        Key::build_generic(KeyType::FileBody, self.parent_locality, self.objectid, offset)
    }

    /// `create` (spec §4.11): a single statdata item, `nlink=1`, `size=0`;
    /// body items are inserted lazily on write.
    pub fn create<C: CoreOps>(
        core: &mut C,
        parent_locality: u64,
        objectid: u64,
        mode: u16,
    ) -> Result<Self, CoreError> {
        let file = RegularFile { parent_locality, objectid, offset: 0 };
        let hint = ObjectHint { mode: S_IFREG | mode, uid: 0, gid: 0, now: 0 };
        let body = build_statdata(&hint, 1, 0);
        core.insert_item(file.statdata_key(), ItemKind::StatData.plugin_id(), &body)?;
        Ok(file)
    }

    pub fn open<C: CoreOps>(
        core: &mut C,
        parent_locality: u64,
        objectid: u64,
    ) -> Result<Self, CoreError> {
        let file = RegularFile { parent_locality, objectid, offset: 0 };
        let coord = core.lookup(LEAF_LEVEL, &file.statdata_key())?;
        if core.item_plugin_id(&coord)? != ItemKind::StatData.plugin_id() {
            return Err(CoreError::Corrupted {
                reason: "file objectid does not resolve to a statdata item",
            });
        }
        Ok(file)
    }

    pub fn size<C: CoreOps>(&self, core: &mut C) -> Result<u64, CoreError> {
        let coord = core.lookup(LEAF_LEVEL, &self.statdata_key())?;
        statdata40::get_size(&core.item_body(&coord)?)
    }

    fn set_size<C: CoreOps>(&self, core: &mut C, size: u64) -> Result<(), CoreError> {
        let coord = core.lookup(LEAF_LEVEL, &self.statdata_key())?;
        let mut body = core.item_body(&coord)?;
        statdata40::set_size(&mut body, size)?;
        core.remove_item(&self.statdata_key())?;
        core.insert_item(self.statdata_key(), ItemKind::StatData.plugin_id(), &body)?;
        Ok(())
    }

    /// Appends `data` as one tail item at the current offset, growing the
    /// file's recorded size if the write extends past it (spec §4.11
    /// `write`).
    pub fn write<C: CoreOps>(&mut self, core: &mut C, data: &[u8]) -> Result<usize, CoreError> {
        if data.is_empty() {
            return Ok(0);
        }
        let key = self.body_key(self.offset);
        let body = tail40::create(data);
        core.insert_item(key, ItemKind::Tail.plugin_id(), &body)?;
        self.offset += data.len() as u64;

        let size = self.size(core)?;
        if self.offset > size {
            self.set_size(core, self.offset)?;
        }
        Ok(data.len())
    }

    /// Reads the tail item starting exactly at the current offset, if any
    /// (spec §4.11 `read`) — the counterpart to `write`'s one-item-per-call
    /// chunking.
    pub fn read<C: CoreOps>(&mut self, core: &mut C, buf: &mut [u8]) -> Result<usize, CoreError> {
        let size = self.size(core)?;
        if self.offset >= size {
            return Ok(0);
        }
        let key = self.body_key(self.offset);
        let coord = match core.lookup(LEAF_LEVEL, &key) {
            Ok(coord) => coord,
            Err(CoreError::NotFound) => return Ok(0),
            Err(e) => return Err(e),
        };
        let body = core.item_body(&coord)?;
        let n = body.len().min(buf.len());
        buf[..n].copy_from_slice(&body[..n]);
        self.offset += n as u64;
        Ok(n)
    }

    /// Drops every tail item at or past `new_len` and updates the recorded
    /// size (spec §4.11 `truncate`).
    pub fn truncate<C: CoreOps>(&mut self, core: &mut C, new_len: u64) -> Result<(), CoreError> {
        let mut cursor = 0u64;
        loop {
            let key = self.body_key(cursor);
            let coord = match core.lookup(LEAF_LEVEL, &key) {
                Ok(coord) => coord,
                Err(CoreError::NotFound) => break,
                Err(e) => return Err(e),
            };
            let body = core.item_body(&coord)?;
            let item_len = body.len() as u64;
            if cursor >= new_len {
                core.remove_item(&key)?;
            }
            cursor += item_len;
        }
        self.set_size(core, new_len)?;
        if self.offset > new_len {
            self.offset = new_len;
        }
        Ok(())
    }

    pub fn close<C: CoreOps>(&mut self, _core: &mut C) -> Result<(), CoreError> {
        Ok(())
    }
}

impl ObjectOps for RegularFile {
    fn object_key(&self) -> Key {
        self.statdata_key()
    }

    fn offset(&self) -> u64 {
        self.offset
    }

    fn seek(&mut self, new_offset: u64) {
        self.offset = new_offset;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::Bitmap;
    use crate::device::MemDevice;
    use crate::node::ItemHint;
    use crate::tree::{Tree, TreeEnv};

    struct Harness {
        device: MemDevice,
        bitmap: Bitmap,
        tree: Tree,
    }

    impl Harness {
        fn new() -> Self {
            let mut device = MemDevice::new(4096, 4096);
            let mut bitmap = Bitmap::new(4096);
            let mut env = TreeEnv { device: &mut device, bitmap: &mut bitmap };
            let tree = Tree::create(&mut env, 4096).unwrap();
            Harness { device, bitmap, tree }
        }

        fn core(&mut self) -> Shim<'_> {
            Shim { tree: &mut self.tree, device: &mut self.device, bitmap: &mut self.bitmap }
        }
    }

    struct Shim<'a> {
        tree: &'a mut Tree,
        device: &'a mut MemDevice,
        bitmap: &'a mut Bitmap,
    }

    impl<'a> CoreOps for Shim<'a> {
        fn lookup(&mut self, stop_level: u8, key: &Key) -> Result<crate::node::Coord, CoreError> {
            let mut env = TreeEnv { device: self.device, bitmap: self.bitmap };
            let lookup = self.tree.lookup(&mut env, stop_level, key)?;
            if lookup.found {
                Ok(lookup.coord)
            } else {
                Err(CoreError::NotFound)
            }
        }

        fn insert_item(
            &mut self,
            key: Key,
            plugin_id: u16,
            body: &[u8],
        ) -> Result<crate::node::Coord, CoreError> {
            let mut env = TreeEnv { device: self.device, bitmap: self.bitmap };
            self.tree.insert(&mut env, ItemHint { key, plugin_id, body: body.to_vec() })
        }

        fn remove_item(&mut self, key: &Key) -> Result<(), CoreError> {
            let mut env = TreeEnv { device: self.device, bitmap: self.bitmap };
            self.tree.remove(&mut env, key)
        }

        fn left_neighbor(
            &mut self,
            coord: &crate::node::Coord,
        ) -> Result<Option<crate::node::Coord>, CoreError> {
            let mut env = TreeEnv { device: self.device, bitmap: self.bitmap };
            self.tree.left_neighbor(&mut env, coord)
        }

        fn right_neighbor(
            &mut self,
            coord: &crate::node::Coord,
        ) -> Result<Option<crate::node::Coord>, CoreError> {
            let mut env = TreeEnv { device: self.device, bitmap: self.bitmap };
            self.tree.right_neighbor(&mut env, coord)
        }

        fn item_plugin_id(&self, coord: &crate::node::Coord) -> Result<u16, CoreError> {
            self.tree.item_plugin_id_at(coord)
        }

        fn item_body(&self, coord: &crate::node::Coord) -> Result<Vec<u8>, CoreError> {
            self.tree.item_body_at(coord).map(|b| b.to_vec())
        }

        fn item_key(&self, coord: &crate::node::Coord) -> Result<Key, CoreError> {
            self.tree.key_at(coord)
        }
    }

    #[test]
    fn write_then_read_back_round_trips() {
        let mut h = Harness::new();
        let mut core = h.core();
        let mut file = RegularFile::create(&mut core, 7, 100, 0o644).unwrap();
        file.write(&mut core, b"hello world").unwrap();
        assert_eq!(file.size(&mut core).unwrap(), 11);

        file.seek(0);
        let mut buf = [0u8; 32];
        let n = file.read(&mut core, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello world");
    }

    #[test]
    fn truncate_drops_trailing_data_and_updates_size() {
        let mut h = Harness::new();
        let mut core = h.core();
        let mut file = RegularFile::create(&mut core, 7, 101, 0o644).unwrap();
        file.write(&mut core, b"abc").unwrap();
        file.write(&mut core, b"def").unwrap();
        assert_eq!(file.size(&mut core).unwrap(), 6);

        file.truncate(&mut core, 3).unwrap();
        assert_eq!(file.size(&mut core).unwrap(), 3);

        file.seek(0);
        let mut buf = [0u8; 8];
        let n = file.read(&mut core, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"abc");
    }

    #[test]
    fn open_rejects_unknown_objectid() {
        let mut h = Harness::new();
        let mut core = h.core();
        let err = RegularFile::open(&mut core, 7, 999).unwrap_err();
        assert!(matches!(err, CoreError::NotFound));
    }
}
