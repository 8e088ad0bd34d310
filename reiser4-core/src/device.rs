//! Device I/O layer (spec §4.2).
//!
//! The teacher drives storage through an async channel to a
//! `HalBlockDevice` trait object (`hal/storage.rs`); host OS glue and the
//! async executor behind it are out of this crate's scope (spec §1), so the
//! abstraction here is the synchronous equivalent: a trait over
//! `{block_size, length_in_blocks}` plus `read`/`write`/`sync`/`len`.

use std::fmt;
use std::io;

/// A 64-bit block address, in blocksize units.
pub type Blk = u64;

/// An abstract block device. Implementors own the byte storage; the core
/// never assumes a file descriptor or a particular backing medium.
pub trait Device: fmt::Debug {
    /// Size of one block in bytes. Must be a power of two.
    fn block_size(&self) -> u32;

    /// Total addressable blocks on this device.
    fn len_blocks(&self) -> u64;

    /// Read `buf.len()` bytes starting at byte `offset`.
    fn read(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Write `buf` at byte `offset`.
    fn write(&mut self, offset: u64, buf: &[u8]) -> io::Result<()>;

    /// Flush any buffering to the underlying medium.
    fn sync(&mut self) -> io::Result<()>;
}

/// One in-memory block: the wrapper a node/bitmap/journal block is read
/// into. Carries its own logical address and a dirty flag, per spec §3.3 /
/// §4.2.
#[derive(Clone)]
pub struct Block {
    addr: Blk,
    data: Vec<u8>,
    dirty: bool,
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("addr", &self.addr)
            .field("len", &self.data.len())
            .field("dirty", &self.dirty)
            .finish()
    }
}

impl Block {
    pub fn zeroed(addr: Blk, block_size: u32) -> Self {
        Block {
            addr,
            data: vec![0u8; block_size as usize],
            dirty: true,
        }
    }

    pub fn addr(&self) -> Blk {
        self.addr
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.dirty = true;
        &mut self.data
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Reads a block from `device`. Asserts the address is in range per
    /// spec §4.2.
    pub fn read(device: &dyn Device, addr: Blk) -> io::Result<Self> {
        assert!(
            addr < device.len_blocks(),
            "block address {addr} outside device range [0, {})",
            device.len_blocks()
        );
        let bs = device.block_size() as usize;
        let mut data = vec![0u8; bs];
        device.read(addr * bs as u64, &mut data)?;
        Ok(Block {
            addr,
            data,
            dirty: false,
        })
    }

    pub fn write(&mut self, device: &mut dyn Device) -> io::Result<()> {
        let bs = device.block_size() as u64;
        device.write(self.addr * bs, &self.data)?;
        self.dirty = false;
        Ok(())
    }
}

/// An in-memory device backing tests and the end-to-end scenarios of spec
/// §8.4 — never a real file descriptor, per [`crate`]'s test-tooling
/// policy.
#[derive(Debug, Clone)]
pub struct MemDevice {
    block_size: u32,
    data: Vec<u8>,
}

impl MemDevice {
    pub fn new(block_size: u32, len_blocks: u64) -> Self {
        MemDevice {
            block_size,
            data: vec![0u8; block_size as usize * len_blocks as usize],
        }
    }
}

impl Device for MemDevice {
    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn len_blocks(&self) -> u64 {
        self.data.len() as u64 / self.block_size as u64
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let start = offset as usize;
        let end = start + buf.len();
        if end > self.data.len() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "short read"));
        }
        buf.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn write(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        let start = offset as usize;
        let end = start + buf.len();
        if end > self.data.len() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "short write"));
        }
        self.data[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_device_roundtrip() {
        let mut dev = MemDevice::new(4096, 16);
        let mut block = Block::zeroed(3, dev.block_size());
        block.data_mut()[0] = 0xAB;
        block.write(&mut dev).unwrap();
        assert!(!block.is_dirty());

        let reread = Block::read(&dev, 3).unwrap();
        assert_eq!(reread.data()[0], 0xAB);
    }

    #[test]
    #[should_panic]
    fn out_of_range_read_panics() {
        let dev = MemDevice::new(4096, 4);
        let _ = Block::read(&dev, 4);
    }
}
