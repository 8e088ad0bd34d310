//! The flat, exhaustive error taxonomy every public entry point returns.
//!
//! Mirrors the teacher's layered HAL error style (`HalFsIOErr` mapped into
//! `ErrNo`): one broad enum here, because unlike the teacher we have no
//! syscall-facing layer above us to narrow it further — that belongs to the
//! embedding mkfs/fsck/VFS-adapter, out of this crate's scope.

use thiserror::Error;

/// Bounded set of repair choices offered to a [`crate::check::RepairPolicy`]
/// when the checker finds something it can fix more than one way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairChoice {
    /// Drop the offending item entirely.
    DropItem,
    /// Trust the recomputed length over the stored one.
    TrustRecomputedLength,
    /// Trust the recomputed offset over the stored one.
    TrustRecomputedOffset,
    /// Leave the on-disk state untouched and just report.
    Leave,
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("key or item not found")]
    NotFound,

    #[error("node or item structure is corrupted: {reason}")]
    Corrupted { reason: &'static str },

    #[error("no space left to satisfy the allocation")]
    NoSpace,

    #[error("device I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: &'static str },

    #[error("key already present in the tree")]
    DuplicateKey,

    #[error("bad master/format magic")]
    BadMagic,

    #[error("unsupported on-disk format version: {0}")]
    BadVersion(BadVersion),

    #[error("inconsistent on-disk geometry: {reason}")]
    BadGeometry { reason: &'static str },

    #[error("unknown plugin id {id} of type {kind:?}")]
    UnknownPlugin { kind: PluginType, id: u16 },

    #[error("plugin id {id} does not match the expected kind for this coordinate")]
    PluginMismatch { id: u16 },

    #[error("duplicate plugin registration for ({kind:?}, {id})")]
    DuplicatePlugin { kind: PluginType, id: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadVersion {
    /// `original_source`'s `format36.c` superblock magic was found instead
    /// of format40's — this is a legacy reiser3 filesystem we only probe,
    /// never mount (spec §1: "any guarantee about reiser3 legacy format
    /// beyond probing its superblock").
    Reiser3Detected,
    Unknown(u16),
}

impl std::fmt::Display for BadVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BadVersion::Reiser3Detected => write!(f, "reiser3 (format36) superblock detected"),
            BadVersion::Unknown(id) => write!(f, "unrecognized format id {id}"),
        }
    }
}

/// Plugin type tags, per spec §4.1 / §3.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginType {
    Key,
    Node,
    Item,
    FileObject,
    Hash,
    TailPolicy,
    Permission,
    StatdataExtension,
    DiskFormat,
    OidAllocator,
    BlockAllocator,
    Journal,
}

impl From<dvida_serialize::DvSerErr> for CoreError {
    fn from(_: dvida_serialize::DvSerErr) -> Self {
        CoreError::Corrupted {
            reason: "buffer too small while serializing on-disk layout",
        }
    }
}

impl From<dvida_serialize::DvDeErr> for CoreError {
    fn from(_: dvida_serialize::DvDeErr) -> Self {
        CoreError::Corrupted {
            reason: "buffer too small or malformed while parsing on-disk layout",
        }
    }
}
