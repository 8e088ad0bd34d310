//! statdata40 (spec §4.7.1), grounded on
//! `examples/original_source`'s `reiser4progs/plugin/stat40/stat40.h`
//! (`stat40_base` prologue, `reiserfs_unix_stat` extension).
//!
//! Per the source's ordering comment ("order this by presumed frequency of
//! use") only the `UNIX_STAT` extension is implemented; `sdext_lw`
//! (id 1 in the plugin factory) stands for "no extension present" — a file
//! with `ext_mask == 0` is light-weight, matching the header's own note
//! that UNIX_STAT's absence is what light-weight means.

use dvida_serialize::{DvDeserialize, DvSerialize, Endianness};

use crate::error::CoreError;
use crate::key::Key;
use crate::node::LookupResult;

use super::{ItemGroup, ItemKind, ItemOps};

pub const PROLOGUE_SIZE: usize = 2 + 2 + 4 + 8;
pub const UNIX_EXT_SIZE: usize = 4 * 6 + 8;

const EXT_UNIX_BIT: u16 = 1 << 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnixStat {
    pub uid: u32,
    pub gid: u32,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
    pub rdev: u32,
    pub bytes: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct StatDataHint {
    pub mode: u16,
    pub nlink: u32,
    pub size: u64,
    pub unix_ext: Option<UnixStat>,
}

impl StatDataHint {
    pub fn estimate(&self) -> usize {
        PROLOGUE_SIZE + if self.unix_ext.is_some() { UNIX_EXT_SIZE } else { 0 }
    }
}

/// Builds a fresh statdata body from a hint (spec §4.7.1 "on-disk growth"):
/// fixed prologue, then one pass over the extension bits writing each
/// SDEXT payload in order.
pub fn create(hint: &StatDataHint) -> Vec<u8> {
    let mut body = vec![0u8; hint.estimate()];
    let ext_mask: u16 = if hint.unix_ext.is_some() { EXT_UNIX_BIT } else { 0 };

    hint.mode.serialize(Endianness::Little, &mut body[0..]).unwrap();
    ext_mask.serialize(Endianness::Little, &mut body[2..]).unwrap();
    hint.nlink.serialize(Endianness::Little, &mut body[4..]).unwrap();
    hint.size.serialize(Endianness::Little, &mut body[8..]).unwrap();

    if let Some(ext) = &hint.unix_ext {
        let mut off = PROLOGUE_SIZE;
        ext.uid.serialize(Endianness::Little, &mut body[off..]).unwrap();
        off += 4;
        ext.gid.serialize(Endianness::Little, &mut body[off..]).unwrap();
        off += 4;
        ext.atime.serialize(Endianness::Little, &mut body[off..]).unwrap();
        off += 4;
        ext.mtime.serialize(Endianness::Little, &mut body[off..]).unwrap();
        off += 4;
        ext.ctime.serialize(Endianness::Little, &mut body[off..]).unwrap();
        off += 4;
        ext.rdev.serialize(Endianness::Little, &mut body[off..]).unwrap();
        off += 4;
        ext.bytes.serialize(Endianness::Little, &mut body[off..]).unwrap();
    }

    body
}

pub fn get_mode(body: &[u8]) -> Result<u16, CoreError> {
    Ok(u16::deserialize(Endianness::Little, body)?.0)
}

pub fn set_mode(body: &mut [u8], mode: u16) -> Result<(), CoreError> {
    mode.serialize(Endianness::Little, body)?;
    Ok(())
}

pub fn get_ext_mask(body: &[u8]) -> Result<u16, CoreError> {
    Ok(u16::deserialize(Endianness::Little, &body[2..])?.0)
}

pub fn get_nlink(body: &[u8]) -> Result<u32, CoreError> {
    Ok(u32::deserialize(Endianness::Little, &body[4..])?.0)
}

pub fn set_nlink(body: &mut [u8], nlink: u32) -> Result<(), CoreError> {
    nlink.serialize(Endianness::Little, &mut body[4..])?;
    Ok(())
}

pub fn get_size(body: &[u8]) -> Result<u64, CoreError> {
    Ok(u64::deserialize(Endianness::Little, &body[8..])?.0)
}

pub fn set_size(body: &mut [u8], size: u64) -> Result<(), CoreError> {
    size.serialize(Endianness::Little, &mut body[8..])?;
    Ok(())
}

pub fn get_unix_ext(body: &[u8]) -> Result<Option<UnixStat>, CoreError> {
    if get_ext_mask(body)? & EXT_UNIX_BIT == 0 {
        return Ok(None);
    }
    let base = PROLOGUE_SIZE;
    if body.len() < base + UNIX_EXT_SIZE {
        return Err(CoreError::Corrupted {
            reason: "statdata unix extension truncated",
        });
    }
    let (uid, _) = u32::deserialize(Endianness::Little, &body[base..])?;
    let (gid, _) = u32::deserialize(Endianness::Little, &body[base + 4..])?;
    let (atime, _) = u32::deserialize(Endianness::Little, &body[base + 8..])?;
    let (mtime, _) = u32::deserialize(Endianness::Little, &body[base + 12..])?;
    let (ctime, _) = u32::deserialize(Endianness::Little, &body[base + 16..])?;
    let (rdev, _) = u32::deserialize(Endianness::Little, &body[base + 20..])?;
    let (bytes, _) = u64::deserialize(Endianness::Little, &body[base + 24..])?;
    Ok(Some(UnixStat { uid, gid, atime, mtime, ctime, rdev, bytes }))
}

pub struct StatData40;

impl ItemOps for StatData40 {
    fn kind(&self) -> ItemKind {
        ItemKind::StatData
    }

    fn minsize(&self) -> usize {
        PROLOGUE_SIZE
    }

    fn maxkey(&self, base_key: &Key, _body: &[u8]) -> Key {
        *base_key
    }

    fn lookup(&self, base_key: &Key, _body: &[u8], key: &Key) -> LookupResult {
        LookupResult { found: key == base_key, pos: 0 }
    }

    fn count(&self, _body: &[u8]) -> usize {
        1
    }

    fn confirm(&self, body: &[u8]) -> bool {
        body.len() >= PROLOGUE_SIZE
    }

    fn valid(&self, body: &[u8]) -> bool {
        self.confirm(body)
    }
}

pub const GROUP: ItemGroup = ItemGroup::StatData;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_without_extension_is_lightweight() {
        let hint = StatDataHint { mode: 0o100644, nlink: 1, size: 0, unix_ext: None };
        let body = create(&hint);
        assert_eq!(body.len(), PROLOGUE_SIZE);
        assert_eq!(get_ext_mask(&body).unwrap(), 0);
        assert!(get_unix_ext(&body).unwrap().is_none());
    }

    #[test]
    fn create_with_unix_extension_roundtrips() {
        let ext = UnixStat { uid: 1000, gid: 1000, atime: 1, mtime: 2, ctime: 3, rdev: 0, bytes: 4096 };
        let hint = StatDataHint { mode: 0o40755, nlink: 2, size: 4096, unix_ext: Some(ext) };
        let body = create(&hint);
        assert_eq!(body.len(), PROLOGUE_SIZE + UNIX_EXT_SIZE);
        assert_eq!(get_mode(&body).unwrap(), 0o40755);
        assert_eq!(get_nlink(&body).unwrap(), 2);
        assert_eq!(get_size(&body).unwrap(), 4096);
        let got = get_unix_ext(&body).unwrap().unwrap();
        assert_eq!(got.uid, 1000);
        assert_eq!(got.bytes, 4096);
    }

    #[test]
    fn set_size_updates_in_place() {
        let hint = StatDataHint { mode: 0o100644, nlink: 1, size: 0, unix_ext: None };
        let mut body = create(&hint);
        set_size(&mut body, 8192).unwrap();
        assert_eq!(get_size(&body).unwrap(), 8192);
    }
}
