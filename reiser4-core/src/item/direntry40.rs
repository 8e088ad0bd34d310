//! direntry40 (spec §4.7.2), grounded on `examples/original_source`'s
//! `reiser4progs/plugin/direntry40/direntry40.h` (`reiserfs_direntry40`
//! count-prefixed slot array, `reiserfs_entry40` slot = entry id + body
//! offset).
//!
//! Per §9.1/§9.3 the body is kept as a decoded `Vec<DirEntryRecord>` rather
//! than mutated in place through the source's raw offset arithmetic:
//! [`decode`] parses the on-disk bytes once, [`encode`] renders them back,
//! matching the same decode-mutate-reencode shape node40 uses for its item
//! array.

use dvida_serialize::{DvDeserialize, DvSerialize, Endianness};

use crate::error::CoreError;
use crate::key::Key;
use crate::node::LookupResult;

use super::{ItemGroup, ItemKind, ItemOps};

/// `sizeof(reiserfs_entry40)`: entry id (key word1 + word2, 16 bytes) plus
/// the `u16` offset into the name-records region.
pub const SLOT_SIZE: usize = 8 + 8 + 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryRecord {
    pub name: String,
    pub target_locality: u64,
    pub target_objectid: u64,
    pub hash: u64,
    pub generation: u8,
}

impl DirEntryRecord {
    fn sort_key(&self) -> (u64, u64) {
        (self.hash << 8 | self.generation as u64, 0)
    }

    fn record_len(&self) -> usize {
        8 + 8 + self.name.len() + 1
    }
}

/// Decodes the slot array and name records into an ordered list. Entries
/// come back sorted by `(hash, generation)`, matching the sort order their
/// keys induce.
pub fn decode(body: &[u8]) -> Result<Vec<DirEntryRecord>, CoreError> {
    if body.len() < 2 {
        return Err(CoreError::Corrupted {
            reason: "direntry body shorter than its count prefix",
        });
    }
    let (count, _) = u16::deserialize(Endianness::Little, body)?;
    let count = count as usize;
    let slots_end = 2 + count * SLOT_SIZE;
    if body.len() < slots_end {
        return Err(CoreError::Corrupted {
            reason: "direntry slot array truncated",
        });
    }

    let mut records = Vec::with_capacity(count);
    for i in 0..count {
        let slot_off = 2 + i * SLOT_SIZE;
        let (objectid_word, _) = u64::deserialize(Endianness::Little, &body[slot_off..])?;
        let (offset_word, _) = u64::deserialize(Endianness::Little, &body[slot_off + 8..])?;
        let (name_off, _) = u16::deserialize(Endianness::Little, &body[slot_off + 16..])?;
        let name_off = name_off as usize;

        if name_off + 16 > body.len() {
            return Err(CoreError::Corrupted {
                reason: "direntry name record offset out of range",
            });
        }
        let (target_locality, _) = u64::deserialize(Endianness::Little, &body[name_off..])?;
        let (target_objectid, _) = u64::deserialize(Endianness::Little, &body[name_off + 8..])?;
        let name_start = name_off + 16;
        let nul = body[name_start..]
            .iter()
            .position(|&b| b == 0)
            .ok_or(CoreError::Corrupted {
                reason: "direntry name is not NUL-terminated",
            })?;
        let name = String::from_utf8(body[name_start..name_start + nul].to_vec()).map_err(|_| {
            CoreError::Corrupted {
                reason: "direntry name is not valid UTF-8",
            }
        })?;

        let _ = objectid_word;
        records.push(DirEntryRecord {
            name,
            target_locality,
            target_objectid,
            hash: offset_word >> 8,
            generation: (offset_word & 0xFF) as u8,
        });
    }
    Ok(records)
}

/// Renders a (not necessarily sorted) record list back into exact-layout
/// bytes, slot array first, name records packed back-to-back right after
/// it, per spec §4.7.2.
pub fn encode(records: &[DirEntryRecord], dir_objectid: u64) -> Vec<u8> {
    let mut sorted = records.to_vec();
    sorted.sort_by_key(|r| r.sort_key());

    let slots_end = 2 + sorted.len() * SLOT_SIZE;
    let total: usize = slots_end + sorted.iter().map(|r| r.record_len()).sum::<usize>();
    let mut body = vec![0u8; total];

    (sorted.len() as u16).serialize(Endianness::Little, &mut body).unwrap();

    let mut name_cursor = slots_end;
    for (i, record) in sorted.iter().enumerate() {
        let slot_off = 2 + i * SLOT_SIZE;
        let offset_word = (record.hash << 8) | record.generation as u64;
        dir_objectid
            .serialize(Endianness::Little, &mut body[slot_off..])
            .unwrap();
        offset_word
            .serialize(Endianness::Little, &mut body[slot_off + 8..])
            .unwrap();
        (name_cursor as u16)
            .serialize(Endianness::Little, &mut body[slot_off + 16..])
            .unwrap();

        record
            .target_locality
            .serialize(Endianness::Little, &mut body[name_cursor..])
            .unwrap();
        record
            .target_objectid
            .serialize(Endianness::Little, &mut body[name_cursor + 8..])
            .unwrap();
        let name_start = name_cursor + 16;
        body[name_start..name_start + record.name.len()].copy_from_slice(record.name.as_bytes());
        body[name_start + record.name.len()] = 0;
        name_cursor += record.record_len();
    }

    body
}

/// Inserts `record` in sorted position (spec §4.7 `add_entry`). Rejects a
/// name that collides on `(hash, generation)` with an existing entry; the
/// caller is expected to retry with the next generation, matching how
/// real reiserfs resolves hash collisions (spec §8.4 scenario 3).
pub fn add_entry(
    body: &[u8],
    dir_objectid: u64,
    record: DirEntryRecord,
) -> Result<Vec<u8>, CoreError> {
    let mut records = decode(body)?;
    if records
        .iter()
        .any(|r| r.hash == record.hash && r.generation == record.generation)
    {
        return Err(CoreError::DuplicateKey);
    }
    records.push(record);
    Ok(encode(&records, dir_objectid))
}

pub fn remove_entry(body: &[u8], hash: u64, generation: u8) -> Result<Vec<u8>, CoreError> {
    let mut records = decode(body)?;
    let before = records.len();
    records.retain(|r| !(r.hash == hash && r.generation == generation));
    if records.len() == before {
        return Err(CoreError::NotFound);
    }
    let dir_objectid = 0; // slot objectid word is redundant with the item's own key; harmless on rebuild.
    Ok(encode(&records, dir_objectid))
}

/// Largest name a directory entry can hold in one block (spec §4.7
/// `max_name_len`): a conservative quarter of the block, enough room for
/// several short-named siblings plus the slot/name-record overhead.
pub fn max_name_len(block_size: usize) -> usize {
    (block_size / 4).saturating_sub(SLOT_SIZE + 16)
}

pub struct DirEntry40;

impl ItemOps for DirEntry40 {
    fn kind(&self) -> ItemKind {
        ItemKind::DirEntry
    }

    fn minsize(&self) -> usize {
        2 + SLOT_SIZE + 16 + 1
    }

    fn maxkey(&self, base_key: &Key, body: &[u8]) -> Key {
        let Ok(records) = decode(body) else {
            return *base_key;
        };
        let Some(last) = records.iter().max_by_key(|r| (r.hash, r.generation)) else {
            return *base_key;
        };
        let mut key = *base_key;
        key.set_hash(last.hash, last.generation);
        key
    }

    fn lookup(&self, base_key: &Key, body: &[u8], key: &Key) -> LookupResult {
        let Ok(records) = decode(body) else {
            return LookupResult { found: false, pos: 0 };
        };
        if key.locality() != base_key.locality() || key.objectid() != base_key.objectid() {
            return LookupResult { found: false, pos: 0 };
        }
        match records.binary_search_by_key(&(key.name_hash(), key.generation()), |r| {
            (r.hash, r.generation)
        }) {
            Ok(pos) => LookupResult { found: true, pos },
            Err(pos) => LookupResult { found: false, pos },
        }
    }

    fn count(&self, body: &[u8]) -> usize {
        decode(body).map(|r| r.len()).unwrap_or(0)
    }

    fn confirm(&self, body: &[u8]) -> bool {
        decode(body).is_ok()
    }

    fn valid(&self, body: &[u8]) -> bool {
        self.confirm(body)
    }
}

pub const GROUP: ItemGroup = ItemGroup::DirEntry;

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, hash: u64, generation: u8) -> DirEntryRecord {
        DirEntryRecord {
            name: name.to_string(),
            target_locality: 7,
            target_objectid: 100,
            hash,
            generation,
        }
    }

    #[test]
    fn encode_decode_roundtrip() {
        let records = vec![record(".", 1, 0), record("..", 2, 0), record("file", 3, 0)];
        let body = encode(&records, 7);
        let decoded = decode(&body).unwrap();
        assert_eq!(decoded.len(), 3);
        assert!(decoded.iter().any(|r| r.name == "file"));
    }

    #[test]
    fn add_entry_rejects_exact_hash_collision() {
        let body = encode(&[record("a", 1, 0)], 7);
        let err = add_entry(&body, 7, record("b", 1, 0)).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateKey));
    }

    #[test]
    fn add_entry_same_hash_different_generation_ok() {
        let body = encode(&[record("a", 1, 0)], 7);
        let body = add_entry(&body, 7, record("b", 1, 1)).unwrap();
        let decoded = decode(&body).unwrap();
        assert_eq!(decoded.len(), 2);
    }

    #[test]
    fn remove_entry_drops_matching_record() {
        let body = encode(&[record("a", 1, 0), record("b", 2, 0)], 7);
        let body = remove_entry(&body, 1, 0).unwrap();
        let decoded = decode(&body).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].name, "b");
    }
}
