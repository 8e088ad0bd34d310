//! Explicit context struct (spec §9.4): the one place this crate bundles
//! what the teacher instead keeps as process-wide globals (plugin list, log
//! stream, last error). A [`Context`] owns the device, the bitmap, the oid
//! allocator, the plugin factory and the tree, and is the single argument
//! every object-plugin entry point needs.

use crate::alloc::{Bitmap, OidAllocator};
use crate::device::{Blk, Device};
use crate::error::CoreError;
use crate::format::Disk;
use crate::journal::Journal;
use crate::key::Key;
use crate::node::{Coord, ItemHint};
use crate::plugin::{CoreOps, Factory};
use crate::tree::{Tree, TreeEnv};

/// Runtime configuration gathered at mkfs/mount time (spec's [AMBIENT]
/// Configuration section): the teacher has no such layer (a kernel boots
/// from compile-time constants), so this is the hosted-crate analogue,
/// mirroring the teacher's frequent `SmartDefault`-derived HAL option
/// structs (e.g. `drivers/ata/sata/fis.rs`'s command-table defaults).
#[derive(Debug, Clone, Copy, smart_default::SmartDefault)]
pub struct FormatConfig {
    #[default(crate::format::DEFAULT_BLOCKSIZE)]
    pub blocksize: u16,
    #[default(0x0001)] // r5
    pub hash_plugin_id: u16,
}

pub struct Context {
    device: Box<dyn Device>,
    bitmap: Bitmap,
    oid_alloc: OidAllocator,
    factory: Factory,
    disk: Disk,
    journal: Journal,
    tree: Tree,
}

impl Context {
    /// `mkfs`-equivalent: lays out a fresh format40 filesystem, an empty
    /// root node, and a root directory with `.`/`..` (spec §8.4 scenario 1).
    pub fn create(mut device: Box<dyn Device>, config: FormatConfig) -> Result<Self, CoreError> {
        let total_blocks = device.len_blocks();
        let mut bitmap = Bitmap::new(total_blocks);
        let (root_parent, root_locality, root_objectid) = OidAllocator::root_triplet();

        let root_block_addr = total_blocks / 2;
        let disk = Disk::create(total_blocks, config.blocksize, root_block_addr, crate::alloc::oid::LOW_RESERVE, &mut bitmap)?;

        let journal_header = disk.root_block().saturating_sub(2).max(1);
        let journal_footer = disk.root_block().saturating_sub(1).max(2);
        bitmap.mark(journal_header)?;
        bitmap.mark(journal_footer)?;
        let journal = Journal::create(journal_header, journal_footer);

        let mut oid_alloc = OidAllocator::new();
        let factory = Factory::with_builtins();

        let mut env = TreeEnv { device: device.as_mut(), bitmap: &mut bitmap };
        let mut tree = Tree::open(&mut env, config.blocksize as u32, root_block_addr)
            .or_else(|_| Tree::create(&mut env, config.blocksize as u32))?;

        let mut ctx = Context { device, bitmap, oid_alloc, factory, disk, journal, tree };
        ctx.disk.set_root_block(ctx.tree.root_addr());

        crate::object::dir::Directory::create(&mut ctx, root_parent, root_locality, root_objectid)?;
        Ok(ctx)
    }

    pub fn open(mut device: Box<dyn Device>) -> Result<Self, CoreError> {
        let disk = Disk::open(device.as_ref())?;
        let total_blocks = device.len_blocks();
        let mut bitmap = Bitmap::new(total_blocks);

        let journal_header = disk.root_block().saturating_sub(2).max(1);
        let journal_footer = disk.root_block().saturating_sub(1).max(2);
        let mut journal = Journal::open(device.as_ref(), journal_header, journal_footer)?;

        let oid_alloc = OidAllocator::from_parts(disk.format.oid_next, 0)?;
        let factory = Factory::with_builtins();

        let mut env = TreeEnv { device: device.as_mut(), bitmap: &mut bitmap };
        journal.replay(env.device)?;
        let tree = Tree::open(&mut env, disk.master.blocksize as u32, disk.root_block())?;

        Ok(Context { device, bitmap, oid_alloc, factory, disk, journal, tree })
    }

    pub fn sync(&mut self) -> Result<(), CoreError> {
        let mut env = self.env();
        self.tree.sync(&mut env)?;
        self.disk.set_root_block(self.tree.root_addr());
        self.disk.set_free_blocks(self.bitmap.count_free());
        self.disk.sync(self.device.as_mut())?;
        self.journal.sync(self.device.as_mut())?;
        Ok(())
    }

    pub fn env(&mut self) -> TreeEnv<'_> {
        TreeEnv { device: self.device.as_mut(), bitmap: &mut self.bitmap }
    }

    pub fn allocate_oid(&mut self) -> Result<u64, CoreError> {
        self.oid_alloc.allocate()
    }

    pub fn release_oid(&mut self, id: u64) -> Result<(), CoreError> {
        self.oid_alloc.release(id)
    }

    pub fn factory(&self) -> &Factory {
        &self.factory
    }

    pub fn root_block(&self) -> Blk {
        self.disk.root_block()
    }

    pub fn block_count(&self) -> u64 {
        self.disk.block_count()
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Hands the backing device back, e.g. to simulate a remount by
    /// re-opening the same (in-memory, in tests) medium in a fresh
    /// [`Context`].
    pub fn into_device(self) -> Box<dyn Device> {
        self.device
    }
}

impl CoreOps for Context {
    fn lookup(&mut self, stop_level: u8, key: &Key) -> Result<Coord, CoreError> {
        let mut env = self.env();
        let result = self.tree.lookup(&mut env, stop_level, key)?;
        if result.found {
            Ok(result.coord)
        } else {
            Err(CoreError::NotFound)
        }
    }

    fn insert_item(&mut self, key: Key, plugin_id: u16, body: &[u8]) -> Result<Coord, CoreError> {
        let mut env = self.env();
        self.tree.insert(&mut env, ItemHint { key, plugin_id, body: body.to_vec() })
    }

    fn remove_item(&mut self, key: &Key) -> Result<(), CoreError> {
        let mut env = self.env();
        self.tree.remove(&mut env, key)
    }

    fn left_neighbor(&mut self, coord: &Coord) -> Result<Option<Coord>, CoreError> {
        let mut env = self.env();
        self.tree.left_neighbor(&mut env, coord)
    }

    fn right_neighbor(&mut self, coord: &Coord) -> Result<Option<Coord>, CoreError> {
        let mut env = self.env();
        self.tree.right_neighbor(&mut env, coord)
    }

    fn item_plugin_id(&self, coord: &Coord) -> Result<u16, CoreError> {
        self.tree.item_plugin_id_at(coord)
    }

    fn item_body(&self, coord: &Coord) -> Result<Vec<u8>, CoreError> {
        self.tree.item_body_at(coord).map(|b| b.to_vec())
    }

    fn item_key(&self, coord: &Coord) -> Result<Key, CoreError> {
        self.tree.key_at(coord)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemDevice;

    #[test]
    fn create_then_reopen_preserves_root_directory() {
        let device: Box<dyn Device> = Box::new(MemDevice::new(4096, 16384));
        let mut ctx = Context::create(device, FormatConfig::default()).unwrap();
        ctx.sync().unwrap();

        let (_, root_locality, root_objectid) = OidAllocator::root_triplet();
        let key = Key::build_generic(crate::key::KeyType::StatData, root_locality, root_objectid, 0);
        let coord = ctx.lookup(crate::node::LEAF_LEVEL, &key).unwrap();
        assert_eq!(ctx.item_plugin_id(&coord).unwrap(), crate::item::ItemKind::StatData.plugin_id());
    }
}
