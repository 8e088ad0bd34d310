//! Disk format format40 (spec §4.9 / §6.1), grounded on
//! `examples/original_source`'s `reiser4lib/plugin/format40/format40.h/.c`
//! for the superblock layout and the format36 probe used to reject legacy
//! reiser3 filesystems (SPEC_FULL supplement 5).

use dvida_serialize::{DvDeserialize, DvSerialize, Endianness};

use crate::device::{Block, Device};
use crate::error::{BadVersion, CoreError};

/// Master superblock offset (spec §6.1), fixed regardless of blocksize.
pub const MASTER_OFFSET: u64 = 65536;
pub const MASTER_MAGIC: &[u8; 4] = b"R4Sb";

/// Format40 superblock offset in the default format (spec §6.1).
pub const FORMAT40_OFFSET: u64 = MASTER_OFFSET + 4096;
pub const FORMAT40_MAGIC: &[u8; 16] = b"R4Sb-Default\0\0\0\0";
pub const FORMAT40_SUPERBLOCK_SIZE: usize = 512;

/// The historical reiser3 (format36) superblock offset, probed once at
/// open time and never read beyond that (spec §1 / SPEC_FULL supplement 5).
const REISER3_SUPERBLOCK_OFFSET: u64 = 64 * 1024;
const REISER3_MAGIC: &[u8; 12] = b"ReIsEr2Fs\0\0\0";

pub const DEFAULT_BLOCKSIZE: u16 = 4096;

pub const RECOGNIZED_FORMAT_IDS: &[u16] = &[1];

/// The master block (spec §6.1): identifies which format plugin owns the
/// rest of the superblock region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterBlock {
    pub format_id: u16,
    pub blocksize: u16,
    pub uuid: [u8; 16],
    pub label: [u8; 16],
}

impl MasterBlock {
    fn decode(bytes: &[u8]) -> Result<Self, CoreError> {
        if &bytes[0..4] != MASTER_MAGIC {
            return Err(CoreError::BadMagic);
        }
        let (format_id, _) = u16::deserialize(Endianness::Little, &bytes[4..])?;
        let (blocksize, _) = u16::deserialize(Endianness::Little, &bytes[6..])?;
        if !blocksize.is_power_of_two() {
            return Err(CoreError::BadGeometry {
                reason: "master blocksize is not a power of two",
            });
        }
        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&bytes[8..24]);
        let mut label = [0u8; 16];
        label.copy_from_slice(&bytes[24..40]);
        Ok(MasterBlock { format_id, blocksize, uuid, label })
    }

    fn encode(&self, bytes: &mut [u8]) {
        bytes[0..4].copy_from_slice(MASTER_MAGIC);
        self.format_id.serialize(Endianness::Little, &mut bytes[4..]).unwrap();
        self.blocksize.serialize(Endianness::Little, &mut bytes[6..]).unwrap();
        bytes[8..24].copy_from_slice(&self.uuid);
        bytes[24..40].copy_from_slice(&self.label);
    }
}

/// Format40's own superblock (spec §6.1): root pointer, space accounting,
/// oid cursor, tree height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Format40 {
    pub block_count: u64,
    pub free_blocks: u64,
    pub root_block: u64,
    pub oid_next: u64,
    pub file_count: u64,
    pub flushes: u64,
    pub tree_height: u16,
}

impl Format40 {
    fn decode(bytes: &[u8]) -> Result<Self, CoreError> {
        if &bytes[48..64] != FORMAT40_MAGIC {
            return Err(CoreError::BadMagic);
        }
        let (block_count, _) = u64::deserialize(Endianness::Little, &bytes[0..])?;
        let (free_blocks, _) = u64::deserialize(Endianness::Little, &bytes[8..])?;
        let (root_block, _) = u64::deserialize(Endianness::Little, &bytes[16..])?;
        let (oid_next, _) = u64::deserialize(Endianness::Little, &bytes[24..])?;
        let (file_count, _) = u64::deserialize(Endianness::Little, &bytes[32..])?;
        let (flushes, _) = u64::deserialize(Endianness::Little, &bytes[40..])?;
        let (tree_height, _) = u16::deserialize(Endianness::Little, &bytes[64..])?;
        Ok(Format40 { block_count, free_blocks, root_block, oid_next, file_count, flushes, tree_height })
    }

    fn encode(&self, bytes: &mut [u8]) {
        self.block_count.serialize(Endianness::Little, &mut bytes[0..]).unwrap();
        self.free_blocks.serialize(Endianness::Little, &mut bytes[8..]).unwrap();
        self.root_block.serialize(Endianness::Little, &mut bytes[16..]).unwrap();
        self.oid_next.serialize(Endianness::Little, &mut bytes[24..]).unwrap();
        self.file_count.serialize(Endianness::Little, &mut bytes[32..]).unwrap();
        self.flushes.serialize(Endianness::Little, &mut bytes[40..]).unwrap();
        bytes[48..64].copy_from_slice(FORMAT40_MAGIC);
        self.tree_height.serialize(Endianness::Little, &mut bytes[64..]).unwrap();
    }
}

/// The open/create interface over master + format40 superblocks (spec
/// §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disk {
    pub master: MasterBlock,
    pub format: Format40,
}

impl Disk {
    /// Probes for the legacy reiser3 magic first; `open` never reads past
    /// that probe for a reiser3 filesystem (spec §1, SPEC_FULL supplement 5).
    fn probe_reiser3(device: &dyn Device) -> Result<(), CoreError> {
        let mut buf = [0u8; 16];
        if device.read(REISER3_SUPERBLOCK_OFFSET, &mut buf).is_ok() && &buf[0..12] == REISER3_MAGIC {
            return Err(CoreError::BadVersion(BadVersion::Reiser3Detected));
        }
        Ok(())
    }

    pub fn open(device: &dyn Device) -> Result<Self, CoreError> {
        Self::probe_reiser3(device)?;

        let mut master_bytes = vec![0u8; device.block_size() as usize];
        device.read(MASTER_OFFSET, &mut master_bytes[..40.min(master_bytes.len())])?;
        let master = MasterBlock::decode(&master_bytes)?;

        if !RECOGNIZED_FORMAT_IDS.contains(&master.format_id) {
            return Err(CoreError::BadVersion(BadVersion::Unknown(master.format_id)));
        }

        let mut format_bytes = vec![0u8; FORMAT40_SUPERBLOCK_SIZE];
        device.read(FORMAT40_OFFSET, &mut format_bytes)?;
        let format = Format40::decode(&format_bytes)?;

        let device_len = device.len_blocks();
        if format.block_count > device_len {
            return Err(CoreError::BadGeometry {
                reason: "format block_count exceeds device length",
            });
        }
        if format.root_block < (FORMAT40_OFFSET / master.blocksize as u64) || format.root_block >= device_len {
            return Err(CoreError::BadGeometry {
                reason: "root_block outside the valid device range",
            });
        }

        log::debug!(
            "format40 opened: block_count={} root_block={} tree_height={}",
            format.block_count,
            format.root_block,
            format.tree_height
        );
        Ok(Disk { master, format })
    }

    /// Lays out a fresh format40 filesystem. Marks the skipped region, the
    /// master block, the format superblock, and the journal area used in
    /// `bitmap`, matching spec §4.9's create contract; bitmap blocks
    /// themselves are marked by `Bitmap::resize`/`new` construction, not
    /// here. The master block's uuid is freshly rolled per mkfs, the way a
    /// new filesystem's identity shouldn't collide with any other's.
    pub fn create(
        block_count: u64,
        blocksize: u16,
        root_block: u64,
        oid_start: u64,
        bitmap: &mut crate::alloc::Bitmap,
    ) -> Result<Self, CoreError> {
        let skip_blocks = (FORMAT40_OFFSET + FORMAT40_SUPERBLOCK_SIZE as u64).div_ceil(blocksize as u64);
        for blk in 0..skip_blocks {
            bitmap.mark(blk)?;
        }
        bitmap.mark(root_block)?;

        let master = MasterBlock {
            format_id: 1,
            blocksize,
            uuid: *uuid::Uuid::new_v4().as_bytes(),
            label: *b"reiser4-core\0\0\0\0",
        };
        let format = Format40 {
            block_count,
            free_blocks: bitmap.count_free(),
            root_block,
            oid_next: oid_start,
            file_count: 0,
            flushes: 0,
            tree_height: crate::node::LEAF_LEVEL as u16,
        };
        log::debug!("format40 created: block_count={block_count} root_block={root_block}");
        Ok(Disk { master, format })
    }

    pub fn sync(&self, device: &mut dyn Device) -> Result<(), CoreError> {
        let mut master_block = Block::zeroed(MASTER_OFFSET / self.master.blocksize as u64, device.block_size());
        self.master.encode(master_block.data_mut());
        master_block.write(device)?;

        let format_blk = FORMAT40_OFFSET / device.block_size() as u64;
        let mut format_block = Block::zeroed(format_blk, device.block_size());
        self.format.encode(format_block.data_mut());
        format_block.write(device)?;
        device.sync()?;
        Ok(())
    }

    pub fn root_block(&self) -> u64 {
        self.format.root_block
    }

    pub fn set_root_block(&mut self, root: u64) {
        self.format.root_block = root;
    }

    pub fn block_count(&self) -> u64 {
        self.format.block_count
    }

    pub fn free_blocks(&self) -> u64 {
        self.format.free_blocks
    }

    pub fn set_free_blocks(&mut self, free: u64) {
        self.format.free_blocks = free;
    }

    pub fn tree_height(&self) -> u16 {
        self.format.tree_height
    }

    pub fn set_tree_height(&mut self, height: u16) {
        self.format.tree_height = height;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::Bitmap;
    use crate::device::MemDevice;

    #[test]
    fn create_then_open_round_trips() {
        let mut device = MemDevice::new(4096, 16384);
        let mut bitmap = Bitmap::new(16384);
        let disk = Disk::create(16384, 4096, 100, 65536, &mut bitmap).unwrap();
        disk.sync(&mut device).unwrap();

        let reopened = Disk::open(&device).unwrap();
        assert_eq!(reopened.master.blocksize, 4096);
        assert_eq!(reopened.format.root_block, 100);
        assert_eq!(reopened.format.block_count, 16384);
    }

    #[test]
    fn open_rejects_oversized_block_count() {
        let mut device = MemDevice::new(4096, 100);
        let mut bitmap = Bitmap::new(100);
        let disk = Disk::create(100_000, 4096, 10, 65536, &mut bitmap).unwrap();
        disk.sync(&mut device).unwrap();
        let err = Disk::open(&device).unwrap_err();
        assert!(matches!(err, CoreError::BadGeometry { .. }));
    }

    #[test]
    fn open_detects_reiser3_superblock() {
        let mut device = MemDevice::new(4096, 16384);
        device.write(REISER3_SUPERBLOCK_OFFSET, REISER3_MAGIC).unwrap();
        let err = Disk::open(&device).unwrap_err();
        assert!(matches!(err, CoreError::BadVersion(BadVersion::Reiser3Detected)));
    }
}
