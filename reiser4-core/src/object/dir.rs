//! Directory object (spec §4.11), grounded on the teacher's
//! `drivers/fs/ext2/dirs.rs` for the create/add-entry/lookup/remove shape
//! and on `examples/original_source`'s `plugin/dir40/dir40.c` for the
//! `.`/`..` bootstrap a fresh directory gets.
//!
//! Per the §9.1/§9.3 redesign this crate's [`super::super::tree::Tree`]
//! only resolves a leaf item by an *exact* key (node40's binary search
//! compares the query against each item's own stored key, with no
//! in-item range search at the tree level). So unlike the source, where
//! several colliding names can live packed inside one direntry unit array,
//! here every directory entry is its own leaf item, keyed by
//! `(locality, objectid, hash, generation)` — a hash collision is resolved
//! by trying the next `generation` until the tree's own `DuplicateKey`
//! rejection stops firing. [`crate::item::direntry40`]'s `add_entry`/
//! `remove_entry` helpers still express the same per-entry codec, just
//! applied to a single-element record list per item instead of a packed
//! array.

use crate::error::CoreError;
use crate::item::direntry40::{self, DirEntryRecord};
use crate::item::statdata40;
use crate::item::ItemKind;
use crate::key::{Key, KeyType};
use crate::node::LEAF_LEVEL;
use crate::plugin::hash::{HashPlugin, R5Hash};
use crate::plugin::CoreOps;

use super::{build_statdata, ObjectHint, S_IFDIR};

/// 56 bits, matching [`crate::key::Key::build_directory`]'s own masking —
/// kept in sync by hand since the mask width is a fixed protocol constant,
/// not something either side derives from the other.
const HASH_MASK: u64 = (1u64 << 56) - 1;

fn masked_hash(hash: &dyn HashPlugin, name: &str) -> u64 {
    hash.hash(name.as_bytes()) & HASH_MASK
}

/// A directory handle (spec GLOSSARY "Object"): the statdata/direntry key
/// triple needed to address this directory and everything filed under it.
///
/// `parent_locality` addresses this directory's own statdata (normally the
/// containing directory's objectid); `locality` is what this directory's
/// *children* use as their own statdata locality and what its own
/// direntry items are keyed under. For an ordinary `mkdir` the two
/// coincide with `objectid` itself; the root directory is the one
/// exception, using the reserved triplet from
/// [`crate::alloc::oid::OidAllocator::root_triplet`].
#[derive(Debug, Clone, Copy)]
pub struct Directory {
    parent_locality: u64,
    locality: u64,
    objectid: u64,
}

impl Directory {
    pub fn objectid(&self) -> u64 {
        self.objectid
    }

    pub fn locality(&self) -> u64 {
        self.locality
    }

    fn statdata_key(&self) -> Key {
        Key::build_generic(KeyType::StatData, self.parent_locality, self.objectid, 0)
    }

    /// Lays out a fresh directory: a statdata item (`mode=S_IFDIR|0755`,
    /// `nlink=2`, `size=2`) and two direntry items for `.`/`..`, both
    /// pointing at the directory itself (spec §4.11 "directory-create
    /// emits exactly two items" — generalized here to "two direntry
    /// items", one per self-referential name, since each entry is its own
    /// item in this crate's model).
    pub fn create<C: CoreOps>(
        core: &mut C,
        parent_locality: u64,
        locality: u64,
        objectid: u64,
    ) -> Result<Self, CoreError> {
        let dir = Directory { parent_locality, locality, objectid };

        let hint = ObjectHint { mode: S_IFDIR | 0o755, uid: 0, gid: 0, now: 0 };
        let sd_body = build_statdata(&hint, 2, 2);
        core.insert_item(dir.statdata_key(), ItemKind::StatData.plugin_id(), &sd_body)?;

        let hash = R5Hash;
        for name in [".", ".."] {
            let record = DirEntryRecord {
                name: name.to_string(),
                target_locality: parent_locality,
                target_objectid: objectid,
                hash: masked_hash(&hash, name),
                generation: 0,
            };
            let key = dir.entry_key(name, 0);
            let body = direntry40::encode(&[record], objectid);
            core.insert_item(key, ItemKind::DirEntry.plugin_id(), &body)?;
        }
        Ok(dir)
    }

    /// Creates a fresh subdirectory of `self` named `name` with object id
    /// `objectid`, and links it into `self`'s entry list.
    pub fn create_child<C: CoreOps>(
        &self,
        core: &mut C,
        name: &str,
        objectid: u64,
    ) -> Result<Self, CoreError> {
        let child = Directory::create(core, self.objectid, objectid, objectid)?;
        self.add_entry(core, name, self.objectid, objectid)?;
        Ok(child)
    }

    /// Opens an existing directory, confirming its statdata item is
    /// present (spec §4.11 `open`).
    pub fn open<C: CoreOps>(
        core: &mut C,
        parent_locality: u64,
        locality: u64,
        objectid: u64,
    ) -> Result<Self, CoreError> {
        let dir = Directory { parent_locality, locality, objectid };
        let coord = core.lookup(LEAF_LEVEL, &dir.statdata_key())?;
        if core.item_plugin_id(&coord)? != ItemKind::StatData.plugin_id() {
            return Err(CoreError::Corrupted {
                reason: "directory objectid does not resolve to a statdata item",
            });
        }
        Ok(dir)
    }

    fn entry_key(&self, name: &str, generation: u8) -> Key {
        Key::build_directory(self.locality, self.objectid, name, &R5Hash, generation)
    }

    /// `add_entry` (spec §4.7 / §4.11): inserts a new direntry item for
    /// `name`, trying successive generations while the tree reports the
    /// `(hash, generation)` slot already taken (spec §8.4 scenario 3, a
    /// genuine hash collision between two different names).
    pub fn add_entry<C: CoreOps>(
        &self,
        core: &mut C,
        name: &str,
        target_locality: u64,
        target_objectid: u64,
    ) -> Result<(), CoreError> {
        let hash = R5Hash;
        let masked = masked_hash(&hash, name);
        let mut generation = 0u8;
        loop {
            let mut key = self.entry_key(name, generation);
            key.set_hash(masked, generation);
            let record = DirEntryRecord {
                name: name.to_string(),
                target_locality,
                target_objectid,
                hash: masked,
                generation,
            };
            let body = direntry40::encode(&[record], self.objectid);
            match core.insert_item(key, ItemKind::DirEntry.plugin_id(), &body) {
                Ok(_) => return Ok(()),
                Err(CoreError::DuplicateKey) => {
                    generation = generation.checked_add(1).ok_or(CoreError::NoSpace)?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Walks the hash-collision chain for `name`, returning the first
    /// entry whose recorded name matches exactly.
    pub fn lookup_entry<C: CoreOps>(
        &self,
        core: &mut C,
        name: &str,
    ) -> Result<Option<DirEntryRecord>, CoreError> {
        let hash = R5Hash;
        let masked = masked_hash(&hash, name);
        let mut generation = 0u8;
        loop {
            let mut key = self.entry_key(name, generation);
            key.set_hash(masked, generation);
            match core.lookup(LEAF_LEVEL, &key) {
                Ok(coord) => {
                    let body = core.item_body(&coord)?;
                    let records = direntry40::decode(&body)?;
                    if let Some(record) = records.into_iter().find(|r| r.name == name) {
                        return Ok(Some(record));
                    }
                    generation = match generation.checked_add(1) {
                        Some(g) => g,
                        None => return Ok(None),
                    };
                }
                Err(CoreError::NotFound) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }

    /// Removes the entry named `name`, if present.
    pub fn remove_entry<C: CoreOps>(&self, core: &mut C, name: &str) -> Result<(), CoreError> {
        let hash = R5Hash;
        let masked = masked_hash(&hash, name);
        let mut generation = 0u8;
        loop {
            let mut key = self.entry_key(name, generation);
            key.set_hash(masked, generation);
            match core.lookup(LEAF_LEVEL, &key) {
                Ok(coord) => {
                    let body = core.item_body(&coord)?;
                    let records = direntry40::decode(&body)?;
                    if records.iter().any(|r| r.name == name) {
                        return core.remove_item(&key);
                    }
                    generation = generation.checked_add(1).ok_or(CoreError::NotFound)?;
                }
                Err(CoreError::NotFound) => return Err(CoreError::NotFound),
                Err(e) => return Err(e),
            }
        }
    }

    /// Lists every entry filed directly under this directory, walking
    /// right from `.` one leaf item at a time (spec §4.11; grounded on the
    /// teacher's `drivers/fs/ext2/dirs.rs` sequential-scan readdir shape).
    pub fn entries<C: CoreOps>(&self, core: &mut C) -> Result<Vec<DirEntryRecord>, CoreError> {
        let mut key = self.entry_key(".", 0);
        key.set_hash(masked_hash(&R5Hash, "."), 0);
        let mut coord = core.lookup(LEAF_LEVEL, &key)?;

        let mut out = Vec::new();
        loop {
            let item_key = core.item_key(&coord)?;
            if item_key.locality() != self.locality
                || item_key.objectid() != self.objectid
                || item_key.minor_type() != KeyType::FileName
            {
                break;
            }
            if core.item_plugin_id(&coord)? == ItemKind::DirEntry.plugin_id() {
                let body = core.item_body(&coord)?;
                out.extend(direntry40::decode(&body)?);
            }
            match core.right_neighbor(&coord)? {
                Some(next) => coord = next,
                None => break,
            }
        }
        Ok(out)
    }

    pub fn nlink<C: CoreOps>(&self, core: &mut C) -> Result<u32, CoreError> {
        let coord = core.lookup(LEAF_LEVEL, &self.statdata_key())?;
        statdata40::get_nlink(&core.item_body(&coord)?)
    }
}
