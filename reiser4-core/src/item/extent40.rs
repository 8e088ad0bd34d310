//! extent40: a file-body item holding a packed array of block-run
//! descriptors, only legal at twig level (spec §3.3 invariant 4, §4.7).
//!
//! Resolves spec §9's open question on unit-granularity: here a unit's
//! `width` counts whole blocks (a unit covers `width` logical blocks, not
//! `width` bytes), and the item's own key offset is likewise a
//! block-granular logical position — the natural reading for an item whose
//! whole purpose is addressing blocks, and the counterpart to
//! [`super::tail40`]'s byte-granular choice for the same open question.

use dvida_serialize::{DvDeserialize, DvSerialize, Endianness};

use crate::device::Blk;
use crate::error::CoreError;
use crate::key::Key;
use crate::node::LookupResult;

use super::{ItemGroup, ItemKind, ItemOps};

/// Marks a run of `width` logical blocks that are not yet backed by any
/// physical block (a sparse hole), per the usual reiser4 convention of a
/// reserved start-block sentinel instead of a separate "hole" item type.
pub const UNALLOCATED: Blk = Blk::MAX;

pub const UNIT_SIZE: usize = 8 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtentUnit {
    pub start: Blk,
    pub width: u32,
}

impl ExtentUnit {
    pub fn is_hole(&self) -> bool {
        self.start == UNALLOCATED
    }
}

pub fn decode(body: &[u8]) -> Result<Vec<ExtentUnit>, CoreError> {
    if body.len() % UNIT_SIZE != 0 {
        return Err(CoreError::Corrupted {
            reason: "extent body length is not a multiple of the unit size",
        });
    }
    let mut units = Vec::with_capacity(body.len() / UNIT_SIZE);
    for chunk in body.chunks_exact(UNIT_SIZE) {
        let (start, _) = Blk::deserialize(Endianness::Little, chunk)?;
        let (width, _) = u32::deserialize(Endianness::Little, &chunk[8..])?;
        units.push(ExtentUnit { start, width });
    }
    Ok(units)
}

pub fn encode(units: &[ExtentUnit]) -> Vec<u8> {
    let mut body = vec![0u8; units.len() * UNIT_SIZE];
    for (i, unit) in units.iter().enumerate() {
        let off = i * UNIT_SIZE;
        unit.start.serialize(Endianness::Little, &mut body[off..]).unwrap();
        unit.width
            .serialize(Endianness::Little, &mut body[off + 8..])
            .unwrap();
    }
    body
}

/// Total logical blocks spanned by every unit.
pub fn block_span(body: &[u8]) -> u64 {
    decode(body)
        .map(|units| units.iter().map(|u| u.width as u64).sum())
        .unwrap_or(0)
}

pub struct Extent40;

impl ItemOps for Extent40 {
    fn kind(&self) -> ItemKind {
        ItemKind::Extent
    }

    fn minsize(&self) -> usize {
        UNIT_SIZE
    }

    fn maxkey(&self, base_key: &Key, body: &[u8]) -> Key {
        let mut key = *base_key;
        let span = block_span(body);
        key.set_offset(base_key.offset() + span.saturating_sub(1));
        key
    }

    fn lookup(&self, base_key: &Key, body: &[u8], key: &Key) -> LookupResult {
        let Ok(units) = decode(body) else {
            return LookupResult { found: false, pos: 0 };
        };
        if key.locality() != base_key.locality()
            || key.objectid() != base_key.objectid()
            || key.offset() < base_key.offset()
        {
            return LookupResult { found: false, pos: 0 };
        }
        let mut target = key.offset() - base_key.offset();
        for (i, unit) in units.iter().enumerate() {
            if target < unit.width as u64 {
                return LookupResult { found: true, pos: i };
            }
            target -= unit.width as u64;
        }
        LookupResult { found: false, pos: units.len() }
    }

    fn count(&self, body: &[u8]) -> usize {
        body.len() / UNIT_SIZE
    }

    fn confirm(&self, body: &[u8]) -> bool {
        decode(body).is_ok()
    }

    fn valid(&self, body: &[u8]) -> bool {
        decode(body).map(|u| u.iter().all(|e| e.width > 0)).unwrap_or(false)
    }
}

pub const GROUP: ItemGroup = ItemGroup::FileBody;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyType;

    #[test]
    fn encode_decode_roundtrip() {
        let units = vec![
            ExtentUnit { start: 10, width: 4 },
            ExtentUnit { start: UNALLOCATED, width: 2 },
        ];
        let body = encode(&units);
        assert_eq!(decode(&body).unwrap(), units);
    }

    #[test]
    fn lookup_crosses_unit_boundary() {
        let base = Key::build_generic(KeyType::FileBody, 1, 1, 0);
        let body = encode(&[ExtentUnit { start: 10, width: 4 }, ExtentUnit { start: 20, width: 4 }]);
        let key = Key::build_generic(KeyType::FileBody, 1, 1, 5);
        let result = Extent40.lookup(&base, &body, &key);
        assert!(result.found);
        assert_eq!(result.pos, 1);
    }

    #[test]
    fn hole_units_report_as_holes() {
        let unit = ExtentUnit { start: UNALLOCATED, width: 3 };
        assert!(unit.is_hole());
    }

    #[test]
    fn valid_rejects_zero_width_unit() {
        let body = encode(&[ExtentUnit { start: 0, width: 0 }]);
        assert!(!Extent40.valid(&body));
    }
}
