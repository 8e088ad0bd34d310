//! Item plugins (spec §4.7): the polymorphic payload formats a node's item
//! bodies are interpreted as.
//!
//! Grounded on `examples/original_source`'s `reiser4progs/plugin/stat40/stat40.h`
//! (statdata prologue + extension mask) and
//! `reiser4progs/plugin/direntry40/direntry40.h` (directory-entry header/slot
//! layout); the internal, tail and extent layouts have no standalone header
//! in the retrieved pack (`node40.c`'s body is all geometry, no item
//! payload code), so they are built directly from spec §4.7/§4.6 and the
//! node40 byte-packing idiom (fixed prologue, `dvida_serialize` field
//! decode, no padding).
//!
//! Per §9.2 these five formats are a closed sum (`ItemKind`/`Item`) rather
//! than the source's per-plugin function table; `ItemOps` is the shared
//! contract, dispatched by a `match` in [`dispatch`] instead of a vtable
//! pointer.

pub mod direntry40;
pub mod extent40;
pub mod internal40;
pub mod statdata40;
pub mod tail40;

use crate::device::Blk;
use crate::error::CoreError;
use crate::key::Key;
use crate::node::LookupResult;

/// Which structural group an item belongs to — used by the tree/checker to
/// enforce level typing (spec §3.3 invariant 4: internal only above leaves,
/// extent only at twig, everything else only at leaf).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemGroup {
    StatData,
    DirEntry,
    Internal,
    FileBody,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    StatData,
    DirEntry,
    Internal,
    Tail,
    Extent,
}

impl ItemKind {
    pub fn from_plugin_id(id: u16) -> Result<Self, CoreError> {
        match id {
            0x0001 => Ok(ItemKind::StatData),
            0x0002 => Ok(ItemKind::DirEntry),
            0x0003 => Ok(ItemKind::Internal),
            0x0004 => Ok(ItemKind::Tail),
            0x0005 => Ok(ItemKind::Extent),
            _ => Err(CoreError::UnknownPlugin {
                kind: crate::error::PluginType::Item,
                id,
            }),
        }
    }

    pub fn plugin_id(self) -> u16 {
        match self {
            ItemKind::StatData => 0x0001,
            ItemKind::DirEntry => 0x0002,
            ItemKind::Internal => 0x0003,
            ItemKind::Tail => 0x0004,
            ItemKind::Extent => 0x0005,
        }
    }

    pub fn group(self) -> ItemGroup {
        match self {
            ItemKind::StatData => ItemGroup::StatData,
            ItemKind::DirEntry => ItemGroup::DirEntry,
            ItemKind::Internal => ItemGroup::Internal,
            ItemKind::Tail | ItemKind::Extent => ItemGroup::FileBody,
        }
    }

    /// Spec §3.3 invariant 4 / §4.6 "invariants": is this item legal at
    /// `level`?
    pub fn legal_at_level(self, level: crate::node::Level) -> bool {
        use crate::node::{is_internal, is_leaf, is_twig};
        match self {
            ItemKind::Internal => is_internal(level),
            ItemKind::Extent => is_twig(level),
            ItemKind::StatData | ItemKind::DirEntry | ItemKind::Tail => is_leaf(level),
        }
    }
}

/// The shared item-plugin contract (spec §4.7). `body` is always the raw
/// bytes stored in a node40 item slot; hint types vary per plugin and live
/// in each plugin's own module.
pub trait ItemOps {
    fn kind(&self) -> ItemKind;
    fn minsize(&self) -> usize;

    /// The largest key describable within this item — used for the
    /// internal-item right-delimiter and range queries.
    fn maxkey(&self, base_key: &Key, body: &[u8]) -> Key;

    fn lookup(&self, base_key: &Key, body: &[u8], key: &Key) -> LookupResult;
    fn count(&self, body: &[u8]) -> usize;
    fn confirm(&self, body: &[u8]) -> bool;
    fn valid(&self, body: &[u8]) -> bool;

    /// How many extra bytes pasting `extra` into this item (at `unit_pos`,
    /// or appended if `None`) would consume — spec §4.7 `estimate`. Every
    /// format in this crate stores units back to back with no padding, so
    /// the default (the paste is exactly as big as what's pasted) holds for
    /// all five; overridden only if a format ever adds per-unit overhead.
    fn estimate(&self, _unit_pos: Option<usize>, extra: &[u8]) -> usize {
        extra.len()
    }

    /// Combines [`ItemOps::confirm`] and [`ItemOps::valid`] into the single
    /// pass/fail query spec §4.7's `check` names; `print`'s role (a
    /// human-readable dump for debugging) is filled by each item module's
    /// own `Debug` impls rather than a trait method, since there's no
    /// uniform "options" type worth threading through every plugin for it.
    fn check(&self, body: &[u8]) -> Result<(), &'static str> {
        if !self.confirm(body) {
            return Err("item body is not internally consistent");
        }
        if !self.valid(body) {
            return Err("item body fails structural validation");
        }
        Ok(())
    }
}

/// Internal items additionally expose the child pointer they carry (spec
/// §4.7 "for group=internal additionally `target`/`pointto`").
pub trait InternalItemOps: ItemOps {
    fn target(&self, body: &[u8]) -> Result<Blk, CoreError>;
    fn pointto(&self, body: &mut Vec<u8>, blk: Blk);
}

pub fn dispatch(kind: ItemKind) -> &'static dyn ItemOps {
    match kind {
        ItemKind::StatData => &statdata40::StatData40,
        ItemKind::DirEntry => &direntry40::DirEntry40,
        ItemKind::Internal => &internal40::Internal40,
        ItemKind::Tail => &tail40::Tail40,
        ItemKind::Extent => &extent40::Extent40,
    }
}
