//! internal40: the tree's internal (child-pointer) item (spec §4.7,
//! §4.8.2). No dedicated header exists in `examples/original_source` for
//! this format (`node40.c`'s body is pure node geometry, not item
//! payloads); the layout here is the minimal one spec §4.8.2 step 4
//! ("extract the child's block number from the internal item's body")
//! requires: a single `u64` child block address, nothing else.

use dvida_serialize::{DvDeserialize, DvSerialize, Endianness};

use crate::device::Blk;
use crate::error::CoreError;
use crate::key::Key;
use crate::node::LookupResult;

use super::{InternalItemOps, ItemGroup, ItemKind, ItemOps};

pub const SIZE: usize = 8;

pub fn create(child: Blk) -> Vec<u8> {
    let mut body = vec![0u8; SIZE];
    child.serialize(Endianness::Little, &mut body).unwrap();
    body
}

pub struct Internal40;

impl ItemOps for Internal40 {
    fn kind(&self) -> ItemKind {
        ItemKind::Internal
    }

    fn minsize(&self) -> usize {
        SIZE
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
        body.len() == SIZE
    }

    fn valid(&self, body: &[u8]) -> bool {
        self.confirm(body)
    }
}

impl InternalItemOps for Internal40 {
    fn target(&self, body: &[u8]) -> Result<Blk, CoreError> {
        if body.len() != SIZE {
            return Err(CoreError::Corrupted {
                reason: "internal item body is not exactly one block pointer wide",
            });
        }
        Ok(u64::deserialize(Endianness::Little, body)?.0)
    }

    fn pointto(&self, body: &mut Vec<u8>, blk: Blk) {
        if body.len() != SIZE {
            *body = vec![0u8; SIZE];
        }
        blk.serialize(Endianness::Little, body).unwrap();
    }
}

pub const GROUP: ItemGroup = ItemGroup::Internal;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_roundtrips_through_create() {
        let body = create(42);
        assert_eq!(Internal40.target(&body).unwrap(), 42);
    }

    #[test]
    fn pointto_overwrites_existing_target() {
        let mut body = create(1);
        Internal40.pointto(&mut body, 99);
        assert_eq!(Internal40.target(&body).unwrap(), 99);
    }
}
