//! Object plugins (spec §4.11), grounded on the teacher's
//! `drivers/fs/ext2/{open,read,write,create_file,delete,dirs}.rs` for the
//! open/create/seek/read/write/truncate shape, and on
//! `examples/original_source`'s `plugin/dir40/dir40.c` for directory
//! creation's two-item emission (statdata + `.`/`..` entries).
//!
//! Per §9.2 this is a closed sum over the two concrete object kinds
//! (`ObjectKind::File`, `ObjectKind::Directory`) rather than the source's
//! per-plugin function table; `ObjectOps` is the shared contract.

pub mod dir;
pub mod file;

use crate::error::CoreError;
use crate::key::Key;

/// Common object contract (spec §4.11): `open`/`create`/`close`/`reset`/
/// `offset`/`seek`/`read`, plus `write`/`truncate` where applicable.
pub trait ObjectOps {
    fn object_key(&self) -> Key;
    fn offset(&self) -> u64;
    fn seek(&mut self, new_offset: u64);
    fn reset(&mut self) {
        self.seek(0);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    RegularFile,
    Directory,
}

/// What a fresh object's statdata should say (spec §4.11): permission bits,
/// link count, owning uid/gid and timestamps, gathered at create time so
/// both object kinds build their statdata item the same way.
#[derive(Debug, Clone, Copy)]
pub struct ObjectHint {
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    pub now: u32,
}

pub(crate) fn build_statdata(hint: &ObjectHint, nlink: u32, size: u64) -> Vec<u8> {
    use crate::item::statdata40::{self, StatDataHint, UnixStat};
    statdata40::create(&StatDataHint {
        mode: hint.mode,
        nlink,
        size,
        unix_ext: Some(UnixStat {
            uid: hint.uid,
            gid: hint.gid,
            atime: hint.now,
            mtime: hint.now,
            ctime: hint.now,
            rdev: 0,
            bytes: size,
        }),
    })
}

/// Permission bits matching the teacher's `S_IFDIR`/`S_IFREG` constants
/// (kept local since this crate has no `libc` dependency).
pub const S_IFDIR: u16 = 0o040000;
pub const S_IFREG: u16 = 0o100000;
