//! tail40: a file-body item holding raw bytes directly in the tree (spec
//! §4.7 "file-body items"). No on-disk envelope beyond the raw bytes
//! themselves — the item's own key carries the logical byte offset of its
//! first byte, and the body's length is implicit in the node40 item
//! header's `length` field.
//!
//! Resolves spec §9's open question on unit granularity for this item type:
//! a tail's key offset and unit position are both byte-granular (contrast
//! [`super::extent40`], which is block-granular).

use crate::key::Key;
use crate::node::LookupResult;

use super::{ItemGroup, ItemKind, ItemOps};

pub fn create(bytes: &[u8]) -> Vec<u8> {
    bytes.to_vec()
}

/// Splits the tail bytes at `offset` so the prefix can stay in this item
/// while the suffix becomes the head of a new one — used by the object
/// layer's write path when an extent policy decides to convert part of a
/// tail into an extent, or vice versa.
pub fn split_at(body: &[u8], offset: usize) -> (Vec<u8>, Vec<u8>) {
    let at = offset.min(body.len());
    (body[..at].to_vec(), body[at..].to_vec())
}

pub struct Tail40;

impl ItemOps for Tail40 {
    fn kind(&self) -> ItemKind {
        ItemKind::Tail
    }

    fn minsize(&self) -> usize {
        1
    }

    fn maxkey(&self, base_key: &Key, body: &[u8]) -> Key {
        let mut key = *base_key;
        key.set_offset(base_key.offset() + body.len().saturating_sub(1) as u64);
        key
    }

    fn lookup(&self, base_key: &Key, body: &[u8], key: &Key) -> LookupResult {
        if key.locality() != base_key.locality()
            || key.objectid() != base_key.objectid()
            || key.minor_type() != base_key.minor_type()
            || key.offset() < base_key.offset()
        {
            return LookupResult { found: false, pos: 0 };
        }
        let byte_pos = (key.offset() - base_key.offset()) as usize;
        if byte_pos < body.len() {
            LookupResult { found: true, pos: byte_pos }
        } else {
            LookupResult { found: false, pos: body.len() }
        }
    }

    fn count(&self, body: &[u8]) -> usize {
        body.len()
    }

    fn confirm(&self, _body: &[u8]) -> bool {
        true
    }

    fn valid(&self, _body: &[u8]) -> bool {
        true
    }
}

pub const GROUP: ItemGroup = ItemGroup::FileBody;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyType;

    #[test]
    fn lookup_finds_byte_within_range() {
        let base = Key::build_generic(KeyType::FileBody, 1, 1, 100);
        let body = create(b"hello world");
        let key = Key::build_generic(KeyType::FileBody, 1, 1, 106);
        let result = Tail40.lookup(&base, &body, &key);
        assert!(result.found);
        assert_eq!(result.pos, 6);
    }

    #[test]
    fn maxkey_points_at_last_byte() {
        let base = Key::build_generic(KeyType::FileBody, 1, 1, 0);
        let body = create(b"abcd");
        let max = Tail40.maxkey(&base, &body);
        assert_eq!(max.offset(), 3);
    }

    #[test]
    fn split_at_divides_bytes() {
        let (a, b) = split_at(b"abcdef", 3);
        assert_eq!(a, b"abc");
        assert_eq!(b, b"def");
    }
}
